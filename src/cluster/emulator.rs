//! Multi-key emulator
//!
//! Rebuilds multi-key commands whose keys may span slots out of single-key
//! primitives sent through the router. Steps run one after another; a failure
//! stops the sequence and is reported with the step that failed. Nothing here is
//! atomic: concurrent writers may observe intermediate states.

use super::lease::TemporaryKeyLease;
use super::router::ClusterRouter;
use crate::command::{CommandDescriptor, Emulation, SetOp};
use crate::error::{AikvError, Result};
use crate::protocol::Value;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub struct MultiKeyEmulator {
    router: Arc<ClusterRouter>,
}

impl MultiKeyEmulator {
    pub fn new(router: Arc<ClusterRouter>) -> Self {
        Self { router }
    }

    /// Run an emulated command. Descriptors without an emulation are routed natively.
    pub async fn run(&self, descriptor: &CommandDescriptor, args: &[Bytes]) -> Result<Value> {
        let Some(emulation) = descriptor.emulation else {
            return self.router.route_descriptor(descriptor, args).await;
        };
        let name = descriptor.name;
        let arity = |ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(AikvError::WrongArgCount(name.to_lowercase()))
            }
        };

        self.router.metrics().emulated_operations.inc();
        debug!(command = name, ?emulation, "Emulating multi-key command");

        match emulation {
            Emulation::SetAlgebra { op, store: false } => {
                arity(!args.is_empty())?;
                self.set_algebra(name, op, args).await.map(Value::Set)
            }
            Emulation::SetAlgebra { op, store: true } => {
                arity(args.len() >= 2)?;
                self.set_algebra_store(name, op, &args[0], &args[1..]).await
            }
            Emulation::SetMove => {
                arity(args.len() == 3)?;
                self.smove(name, &args[0], &args[1], &args[2]).await
            }
            Emulation::HyperLogLogMerge => {
                arity(!args.is_empty())?;
                self.pfmerge(name, &args[0], &args[1..]).await
            }
            Emulation::Rename => {
                arity(args.len() == 2)?;
                self.rename(name, &args[0], &args[1]).await?;
                Ok(Value::Bool(true))
            }
            Emulation::RenameNx => {
                arity(args.len() == 2)?;
                self.renamenx(name, &args[0], &args[1]).await
            }
            Emulation::PerKeySum => {
                arity(!args.is_empty())?;
                self.per_key_sum(name, args).await
            }
            Emulation::MultiGet => {
                arity(!args.is_empty())?;
                self.mget(name, args).await
            }
            Emulation::MultiSet => {
                arity(!args.is_empty() && args.len() % 2 == 0)?;
                self.mset(name, args).await
            }
            Emulation::MultiSetNx => {
                arity(!args.is_empty() && args.len() % 2 == 0)?;
                self.msetnx(name, args).await
            }
            Emulation::PopPush => {
                arity(args.len() == 2)?;
                self.rpoplpush(name, &args[0], &args[1]).await
            }
            Emulation::BlockingPopPush => {
                arity(args.len() == 3)?;
                self.brpoplpush(name, &args[0], &args[1], &args[2]).await
            }
            Emulation::Sort => {
                arity(!args.is_empty())?;
                let spec = SortSpec::parse(args)?;
                self.sort(name, spec).await
            }
        }
    }

    /// One step: a native command through the router
    async fn step(&self, command: &'static str, step: &'static str, args: &[Bytes]) -> Result<Value> {
        self.router
            .route(step, args)
            .await
            .map_err(|e| AikvError::at_step(command, step, e))
    }

    async fn members(&self, command: &'static str, key: &Bytes) -> Result<BTreeSet<Bytes>> {
        self.step(command, "SMEMBERS", std::slice::from_ref(key))
            .await?
            .into_set()
    }

    async fn set_algebra(&self, command: &'static str, op: SetOp, keys: &[Bytes]) -> Result<BTreeSet<Bytes>> {
        let Some((first, rest)) = keys.split_first() else {
            return Ok(BTreeSet::new());
        };
        let mut result = self.members(command, first).await?;
        for key in rest {
            let members = self.members(command, key).await?;
            match op {
                SetOp::Diff => result.retain(|m| !members.contains(m)),
                SetOp::Inter => result.retain(|m| members.contains(m)),
                SetOp::Union => result.extend(members),
            }
        }
        Ok(result)
    }

    /// Compute, then replace the destination. Re-running yields the same state.
    async fn set_algebra_store(
        &self,
        command: &'static str,
        op: SetOp,
        destination: &Bytes,
        keys: &[Bytes],
    ) -> Result<Value> {
        let members = self.set_algebra(command, op, keys).await?;
        self.step(command, "DEL", std::slice::from_ref(destination)).await?;
        if !members.is_empty() {
            let mut args = Vec::with_capacity(members.len() + 1);
            args.push(destination.clone());
            args.extend(members.iter().cloned());
            self.step(command, "SADD", &args).await?;
        }
        Ok(Value::Int(members.len() as i64))
    }

    async fn smove(&self, command: &'static str, source: &Bytes, destination: &Bytes, member: &Bytes) -> Result<Value> {
        let removed = self
            .step(command, "SREM", &[source.clone(), member.clone()])
            .await?
            .as_int()?;
        if removed != 1 {
            return Ok(Value::Bool(false));
        }
        self.step(command, "SADD", &[destination.clone(), member.clone()])
            .await?;
        Ok(Value::Bool(true))
    }

    /// PFMERGE across slots: copy every input blob into keys sharing one hash
    /// tag, merge there natively, copy the result back out.
    async fn pfmerge(&self, command: &'static str, destination: &Bytes, sources: &[Bytes]) -> Result<Value> {
        let mut blobs = Vec::with_capacity(sources.len() + 1);
        // The destination's current value takes part in the merge
        for key in sources.iter().chain(std::iter::once(destination)) {
            let value = self.step(command, "GET", std::slice::from_ref(key)).await?;
            if let Some(blob) = value.into_optional_bytes()? {
                blobs.push(blob);
            }
        }

        let mut lease = TemporaryKeyLease::new(self.router.clone());
        let outcome = self
            .merge_colocated(command, &mut lease, destination, blobs)
            .await;
        lease.release().await;
        outcome
    }

    async fn merge_colocated(
        &self,
        command: &'static str,
        lease: &mut TemporaryKeyLease,
        destination: &Bytes,
        blobs: Vec<Bytes>,
    ) -> Result<Value> {
        let merged = lease.next_key();
        let mut keys = Vec::with_capacity(blobs.len() + 1);
        keys.push(merged.clone());
        for blob in blobs {
            let key = lease.next_key();
            self.step(command, "SET", &[key.clone(), blob]).await?;
            keys.push(key);
        }

        self.step(command, "PFMERGE", &keys).await?;
        let Some(result) = self
            .step(command, "GET", std::slice::from_ref(&merged))
            .await?
            .into_optional_bytes()?
        else {
            return Err(AikvError::at_step(
                command,
                "GET",
                AikvError::Response("merged value disappeared".to_string()),
            ));
        };
        self.step(command, "SET", &[destination.clone(), result])
            .await?;
        Ok(Value::Bool(true))
    }

    /// Move a value between slots: the destination is written before the source
    /// is deleted, so the value is never lost.
    async fn rename(&self, command: &'static str, source: &Bytes, destination: &Bytes) -> Result<()> {
        if source == destination {
            return Err(AikvError::Response(
                "ERR source and destination objects are the same".to_string(),
            ));
        }

        let Some(payload) = self
            .step(command, "DUMP", std::slice::from_ref(source))
            .await?
            .into_optional_bytes()?
        else {
            return Err(AikvError::at_step(
                command,
                "DUMP",
                AikvError::Response("ERR no such key".to_string()),
            ));
        };

        let ttl = self
            .step(command, "PTTL", std::slice::from_ref(source))
            .await?
            .as_int()?;
        // -1 (persistent) and -2 (gone) both restore without expiry
        let ttl = if ttl < 1 { 0 } else { ttl };

        self.step(command, "DEL", std::slice::from_ref(destination))
            .await?;
        self.step(
            command,
            "RESTORE",
            &[destination.clone(), Bytes::from(ttl.to_string()), payload],
        )
        .await?;
        self.step(command, "DEL", std::slice::from_ref(source)).await?;
        Ok(())
    }

    async fn renamenx(&self, command: &'static str, source: &Bytes, destination: &Bytes) -> Result<Value> {
        let exists = self
            .step(command, "EXISTS", std::slice::from_ref(destination))
            .await?
            .as_int()?;
        if exists > 0 {
            return Ok(Value::Bool(false));
        }
        self.rename(command, source, destination).await?;
        Ok(Value::Bool(true))
    }

    async fn per_key_sum(&self, command: &'static str, keys: &[Bytes]) -> Result<Value> {
        let mut total = 0;
        for key in keys {
            total += self
                .step(command, command, std::slice::from_ref(key))
                .await?
                .as_int()?;
        }
        Ok(Value::Int(total))
    }

    async fn mget(&self, command: &'static str, keys: &[Bytes]) -> Result<Value> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.step(command, "GET", std::slice::from_ref(key)).await?);
        }
        Ok(Value::Array(values))
    }

    async fn mset(&self, command: &'static str, pairs: &[Bytes]) -> Result<Value> {
        for pair in pairs.chunks(2) {
            self.step(command, "SET", pair).await?;
        }
        Ok(Value::Bool(true))
    }

    async fn msetnx(&self, command: &'static str, pairs: &[Bytes]) -> Result<Value> {
        for key in pairs.iter().step_by(2) {
            let exists = self
                .step(command, "EXISTS", std::slice::from_ref(key))
                .await?
                .as_int()?;
            if exists > 0 {
                return Ok(Value::Bool(false));
            }
        }
        self.mset(command, pairs).await
    }

    async fn rpoplpush(&self, command: &'static str, source: &Bytes, destination: &Bytes) -> Result<Value> {
        let popped = self
            .step(command, "RPOP", std::slice::from_ref(source))
            .await?
            .into_optional_bytes()?;
        match popped {
            Some(value) => {
                self.step(command, "LPUSH", &[destination.clone(), value.clone()])
                    .await?;
                Ok(Value::Data(value))
            }
            None => Ok(Value::Nil),
        }
    }

    async fn brpoplpush(
        &self,
        command: &'static str,
        source: &Bytes,
        destination: &Bytes,
        timeout: &Bytes,
    ) -> Result<Value> {
        let popped = self
            .step(command, "BRPOP", &[source.clone(), timeout.clone()])
            .await?;
        // BRPOP answers [key, value] or nil on timeout
        let Some(value) = popped.into_array()?.into_iter().nth(1) else {
            return Ok(Value::Nil);
        };
        let value = value.into_bytes()?;
        self.step(command, "LPUSH", &[destination.clone(), value.clone()])
            .await?;
        Ok(Value::Data(value))
    }

    async fn sort(&self, command: &'static str, spec: SortSpec) -> Result<Value> {
        let key = std::slice::from_ref(&spec.key);
        let kind = self.step(command, "TYPE", key).await?.into_bytes()?;
        let elements: Vec<Bytes> = match kind.to_ascii_lowercase().as_slice() {
            b"set" => self.members(command, &spec.key).await?.into_iter().collect(),
            b"list" | b"zset" => {
                let read = if kind.eq_ignore_ascii_case(b"list") {
                    "LRANGE"
                } else {
                    "ZRANGE"
                };
                let args = [spec.key.clone(), Bytes::from_static(b"0"), Bytes::from_static(b"-1")];
                self.step(command, read, &args)
                    .await?
                    .into_array()?
                    .into_iter()
                    .map(Value::into_bytes)
                    .collect::<Result<_>>()?
            }
            b"none" => Vec::new(),
            _ => {
                return Err(AikvError::Response(
                    "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
                ))
            }
        };

        let elements = if spec.sorts() {
            self.order(command, &spec, elements).await?
        } else {
            elements
        };
        let elements = spec.window(elements);

        let values: Vec<Option<Bytes>> = if spec.get.is_empty() {
            elements.into_iter().map(Some).collect()
        } else {
            let mut values = Vec::with_capacity(elements.len() * spec.get.len());
            for element in &elements {
                for pattern in &spec.get {
                    values.push(if pattern.as_ref() == b"#" {
                        Some(element.clone())
                    } else {
                        self.lookup(command, pattern, element).await?
                    });
                }
            }
            values
        };

        match spec.store {
            Some(destination) => {
                self.step(command, "DEL", std::slice::from_ref(&destination))
                    .await?;
                if !values.is_empty() {
                    let mut args = Vec::with_capacity(values.len() + 1);
                    args.push(destination);
                    args.extend(values.iter().map(|v| v.clone().unwrap_or_default()));
                    self.step(command, "RPUSH", &args).await?;
                }
                Ok(Value::Int(values.len() as i64))
            }
            None => Ok(Value::Array(
                values
                    .into_iter()
                    .map(|v| v.map_or(Value::Nil, Value::Data))
                    .collect(),
            )),
        }
    }

    async fn order(&self, command: &'static str, spec: &SortSpec, elements: Vec<Bytes>) -> Result<Vec<Bytes>> {
        let mut weighted = Vec::with_capacity(elements.len());
        for element in elements {
            let weight = match &spec.by {
                Some(pattern) => self.lookup(command, pattern, &element).await?,
                None => Some(element.clone()),
            };
            let weight = if spec.alpha {
                Weight::Alpha(weight.unwrap_or_default())
            } else {
                Weight::Numeric(match weight {
                    Some(raw) => parse_score(&raw)?,
                    None => 0.0,
                })
            };
            weighted.push((weight, element));
        }

        weighted.sort_by(|(a, _), (b, _)| {
            let ordering = a.compare(b);
            if spec.desc {
                ordering.reverse()
            } else {
                ordering
            }
        });
        Ok(weighted.into_iter().map(|(_, element)| element).collect())
    }

    /// Resolve a `BY`/`GET` pattern for one element: `*` is replaced by the
    /// element, `key->field` reads a hash field. Wrong-type keys read as missing.
    async fn lookup(&self, command: &'static str, pattern: &Bytes, element: &Bytes) -> Result<Option<Bytes>> {
        let Some(star) = pattern.iter().position(|&b| b == b'*') else {
            return Ok(None);
        };

        let (key_pattern, field) = match find(pattern, b"->") {
            Some(arrow) if arrow > star && arrow + 2 < pattern.len() => {
                (&pattern[..arrow], Some(pattern.slice(arrow + 2..)))
            }
            _ => (&pattern[..], None),
        };

        let mut key = Vec::with_capacity(key_pattern.len() + element.len());
        key.extend_from_slice(&key_pattern[..star]);
        key.extend_from_slice(element);
        key.extend_from_slice(&key_pattern[star + 1..]);
        let key = Bytes::from(key);

        let (step, args) = match field {
            Some(field) => ("HGET", vec![key, field]),
            None => ("GET", vec![key]),
        };
        match self.router.route(step, &args).await {
            Ok(value) => value.into_optional_bytes(),
            Err(AikvError::Response(msg)) if msg.starts_with("WRONGTYPE") => Ok(None),
            Err(e) => Err(AikvError::at_step(command, step, e)),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_score(raw: &[u8]) -> Result<f64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|score| !score.is_nan())
        .ok_or_else(|| {
            AikvError::Response("ERR One or more scores can't be converted into double".to_string())
        })
}

enum Weight {
    Numeric(f64),
    Alpha(Bytes),
}

impl Weight {
    fn compare(&self, other: &Weight) -> Ordering {
        match (self, other) {
            (Weight::Numeric(a), Weight::Numeric(b)) => a.total_cmp(b),
            (Weight::Alpha(a), Weight::Alpha(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Parsed `SORT key [BY pattern] [LIMIT offset count] [GET pattern ...] [ASC|DESC] [ALPHA] [STORE destination]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    pub key: Bytes,
    pub by: Option<Bytes>,
    pub limit: Option<(i64, i64)>,
    pub get: Vec<Bytes>,
    pub desc: bool,
    pub alpha: bool,
    pub store: Option<Bytes>,
}

impl SortSpec {
    pub fn parse(args: &[Bytes]) -> Result<Self> {
        let Some((key, options)) = args.split_first() else {
            return Err(AikvError::WrongArgCount("sort".to_string()));
        };
        let mut spec = SortSpec {
            key: key.clone(),
            ..Default::default()
        };

        let syntax = || AikvError::Response("ERR syntax error".to_string());
        let mut options = options.iter();
        while let Some(option) = options.next() {
            match option.to_ascii_uppercase().as_slice() {
                b"BY" => spec.by = Some(options.next().ok_or_else(syntax)?.clone()),
                b"GET" => spec.get.push(options.next().ok_or_else(syntax)?.clone()),
                b"STORE" => spec.store = Some(options.next().ok_or_else(syntax)?.clone()),
                b"ASC" => spec.desc = false,
                b"DESC" => spec.desc = true,
                b"ALPHA" => spec.alpha = true,
                b"LIMIT" => {
                    let mut number = || -> Result<i64> {
                        let raw = options.next().ok_or_else(syntax)?;
                        std::str::from_utf8(raw)
                            .ok()
                            .and_then(|s| s.parse().ok())
                            .ok_or_else(|| {
                                AikvError::Response(
                                    "ERR value is not an integer or out of range".to_string(),
                                )
                            })
                    };
                    let offset = number()?;
                    let count = number()?;
                    spec.limit = Some((offset, count));
                }
                _ => return Err(syntax()),
            }
        }
        Ok(spec)
    }

    /// `BY` a pattern without `*` means "don't sort"
    fn sorts(&self) -> bool {
        self.by.as_ref().map_or(true, |by| by.contains(&b'*'))
    }

    fn window(&self, elements: Vec<Bytes>) -> Vec<Bytes> {
        let Some((offset, count)) = self.limit else {
            return elements;
        };
        let start = usize::try_from(offset.max(0)).unwrap_or(usize::MAX).min(elements.len());
        let end = if count < 0 {
            elements.len()
        } else {
            start.saturating_add(count as usize).min(elements.len())
        };
        elements.into_iter().skip(start).take(end - start).collect()
    }

    /// Back to command arguments, key first
    pub fn to_args(&self) -> Vec<Bytes> {
        let mut args = vec![self.key.clone()];
        if let Some(by) = &self.by {
            args.push(Bytes::from_static(b"BY"));
            args.push(by.clone());
        }
        if let Some((offset, count)) = self.limit {
            args.push(Bytes::from_static(b"LIMIT"));
            args.push(Bytes::from(offset.to_string()));
            args.push(Bytes::from(count.to_string()));
        }
        for pattern in &self.get {
            args.push(Bytes::from_static(b"GET"));
            args.push(pattern.clone());
        }
        if self.desc {
            args.push(Bytes::from_static(b"DESC"));
        }
        if self.alpha {
            args.push(Bytes::from_static(b"ALPHA"));
        }
        if let Some(store) = &self.store {
            args.push(Bytes::from_static(b"STORE"));
            args.push(store.clone());
        }
        args
    }
}
