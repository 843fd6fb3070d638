//! In-process cluster used by the integration tests.
//!
//! Each node keeps its own keyspace. Slot ownership is enforced the way a real
//! server does it: keyed commands sent to the wrong node get MOVED, slots being
//! migrated answer ASK for keys the source no longer holds, and multi-key
//! commands spanning slots get CROSSSLOT.

#![allow(dead_code)]

use aikv_client::cluster::{
    key_slot, ClusterRouter, ClusterSlotsDiscovery, Node, RouterSettings, ShardInfo, SlotRange,
    StaticDiscovery, Topology, TopologyDiscovery, TopologyMap, SLOT_COUNT,
};
use aikv_client::command::{CommandTable, Mode, RoutingPolicy};
use aikv_client::protocol::RespValue;
use aikv_client::transport::{reply_error, Transport};
use aikv_client::{AikvError, ClusterClient, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const N1: &str = "10.0.0.1:7000";
pub const N2: &str = "10.0.0.2:7001";
pub const N3: &str = "10.0.0.3:7002";
pub const R1: &str = "10.0.0.4:7003";

const HLL_MAGIC: &[u8] = b"HYLL";

pub fn b(s: &str) -> Bytes {
    Bytes::from(s.to_string())
}

pub fn bs(items: &[&str]) -> Vec<Bytes> {
    items.iter().map(|s| b(s)).collect()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Set(BTreeSet<Bytes>),
    Hash(BTreeMap<Bytes, Bytes>),
    ZSet(Vec<(f64, Bytes)>),
}

impl Entry {
    fn type_name(&self) -> &'static str {
        match self {
            Entry::Str(_) => "string",
            Entry::List(_) => "list",
            Entry::Set(_) => "set",
            Entry::Hash(_) => "hash",
            Entry::ZSet(_) => "zset",
        }
    }
}

#[derive(Debug, Clone)]
struct Stored {
    entry: Entry,
    expires_at: Option<i64>,
}

#[derive(Debug, Default)]
struct NodeState {
    data: HashMap<Bytes, Stored>,
    asking: bool,
}

/// One recorded request
#[derive(Debug, Clone)]
pub struct Call {
    pub node: String,
    pub command: String,
    pub args: Vec<Bytes>,
}

enum Churn {
    /// Install this layout in the client's map on the next request
    Once(Arc<TopologyMap>, Vec<ShardInfo>),
    /// Add a fresh master to the client's map on every request
    Forever(Arc<TopologyMap>, u32),
}

struct State {
    nodes: BTreeMap<String, NodeState>,
    owners: Vec<String>,
    replicas: Vec<(String, String)>,
    migrating: HashMap<u16, String>,
    down: HashSet<String>,
    failures: HashMap<(String, String), String>,
    calls: Vec<Call>,
    churn: Option<Churn>,
    latency: Option<(String, Duration)>,
}

pub struct MockCluster {
    table: CommandTable,
    /// Standalone servers accept any key
    enforce_slots: bool,
    state: Mutex<State>,
}

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

impl MockCluster {
    /// Masters with the slot ranges they own
    pub fn new(layout: &[(&str, std::ops::Range<u16>)]) -> Arc<Self> {
        Self::build(layout, true)
    }

    fn build(layout: &[(&str, std::ops::Range<u16>)], enforce_slots: bool) -> Arc<Self> {
        let mut owners = vec![String::new(); SLOT_COUNT as usize];
        let mut nodes = BTreeMap::new();
        for (addr, range) in layout {
            nodes.insert(addr.to_string(), NodeState::default());
            for slot in range.clone() {
                owners[slot as usize] = addr.to_string();
            }
        }
        Arc::new(Self {
            table: CommandTable::build(Mode::Cluster).unwrap(),
            enforce_slots,
            state: Mutex::new(State {
                nodes,
                owners,
                replicas: Vec::new(),
                migrating: HashMap::new(),
                down: HashSet::new(),
                failures: HashMap::new(),
                calls: Vec::new(),
                churn: None,
                latency: None,
            }),
        })
    }

    pub fn three_masters() -> Arc<Self> {
        Self::new(&[(N1, 0..5461), (N2, 5461..10923), (N3, 10923..16384)])
    }

    /// One standalone server
    pub fn standalone(addr: &str) -> Arc<Self> {
        Self::build(&[(addr, 0..SLOT_COUNT)], false)
    }

    pub fn add_replica(&self, master: &str, replica: &str) {
        let mut state = self.state.lock().unwrap();
        state.nodes.insert(replica.to_string(), NodeState::default());
        state.replicas.push((master.to_string(), replica.to_string()));
    }

    /// Layout as reported by CLUSTER SLOTS
    pub fn shards(&self) -> Vec<ShardInfo> {
        let state = self.state.lock().unwrap();
        shards_of(&state)
    }

    /// Reassign a slot server-side, moving its keys along
    pub fn move_slot(&self, slot: u16, to: &str) {
        let mut state = self.state.lock().unwrap();
        let from = state.owners[slot as usize].clone();
        state.nodes.entry(to.to_string()).or_default();
        let moved: Vec<(Bytes, Stored)> = match state.nodes.get_mut(&from) {
            Some(node) => {
                let keys: Vec<Bytes> = node
                    .data
                    .keys()
                    .filter(|k| key_slot(k) == slot)
                    .cloned()
                    .collect();
                keys.into_iter()
                    .filter_map(|k| node.data.remove(&k).map(|v| (k, v)))
                    .collect()
            }
            None => Vec::new(),
        };
        if let Some(target) = state.nodes.get_mut(to) {
            target.data.extend(moved);
        }
        state.owners[slot as usize] = to.to_string();
    }

    /// Mark a slot as migrating: keys missing at the owner are answered with ASK
    pub fn migrate_slot(&self, slot: u16, to: &str) {
        let mut state = self.state.lock().unwrap();
        state.nodes.entry(to.to_string()).or_default();
        state.migrating.insert(slot, to.to_string());
    }

    pub fn set_down(&self, addr: &str, down: bool) {
        let mut state = self.state.lock().unwrap();
        if down {
            state.down.insert(addr.to_string());
        } else {
            state.down.remove(addr);
        }
    }

    /// Make `command` fail on `addr` with an error reply
    pub fn fail_command(&self, addr: &str, command: &str, message: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .failures
            .insert((addr.to_string(), command.to_string()), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Delay every reply from `addr`
    pub fn slow_down(&self, addr: &str, delay: Duration) {
        self.state.lock().unwrap().latency = Some((addr.to_string(), delay));
    }

    pub fn churn_once(&self, map: Arc<TopologyMap>, shards: Vec<ShardInfo>) {
        self.state.lock().unwrap().churn = Some(Churn::Once(map, shards));
    }

    pub fn churn_forever(&self, map: Arc<TopologyMap>) {
        self.state.lock().unwrap().churn = Some(Churn::Forever(map, 0));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn count_calls(&self, command: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.command == command)
            .count()
    }

    /// Every key stored anywhere, sorted
    pub fn all_keys(&self) -> Vec<Bytes> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<Bytes> = state
            .nodes
            .values()
            .flat_map(|n| n.data.keys().cloned())
            .collect();
        keys.sort();
        keys
    }

    pub fn keys_on(&self, addr: &str) -> Vec<Bytes> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<Bytes> = state
            .nodes
            .get(addr)
            .map(|n| n.data.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn entry(&self, key: &str) -> Option<Entry> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .values()
            .find_map(|n| n.data.get(key.as_bytes()).map(|s| s.entry.clone()))
    }

    /// Remaining time to live; `None` for missing or persistent keys
    pub fn ttl_ms(&self, key: &str) -> Option<i64> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .values()
            .find_map(|n| n.data.get(key.as_bytes()))
            .and_then(|s| s.expires_at)
            .map(|at| at - now_ms())
    }

    /// Store a key directly on whichever node owns it
    pub fn seed(&self, key: &str, entry: Entry) {
        let mut state = self.state.lock().unwrap();
        let owner = state.owners[key_slot(key.as_bytes()) as usize].clone();
        if let Some(node) = state.nodes.get_mut(&owner) {
            node.put(b(key), entry);
        }
    }

    pub fn owner_of(&self, key: &str) -> String {
        self.state.lock().unwrap().owners[key_slot(key.as_bytes()) as usize].clone()
    }

    fn keys_of<'a>(&self, command: &str, args: &'a [Bytes]) -> std::result::Result<Vec<&'a Bytes>, String> {
        let Ok((descriptor, _)) = self.table.resolve(command, args) else {
            return Ok(Vec::new());
        };
        match descriptor.routing {
            RoutingPolicy::SlotOf(spec) => spec.keys(args).map_err(|e| format!("ERR {}", e)),
            _ => Ok(Vec::new()),
        }
    }

    fn handle(&self, state: &mut State, addr: &str, command: &str, args: &[Bytes]) -> std::result::Result<RespValue, String> {
        if command == "ASKING" {
            node_mut(state, addr)?.asking = true;
            return Ok(RespValue::ok());
        }
        if command == "CLUSTER SLOTS" {
            return Ok(cluster_slots_reply(state));
        }

        let asking = std::mem::take(&mut node_mut(state, addr)?.asking);
        let keys = if self.enforce_slots {
            self.keys_of(command, args)?
        } else {
            Vec::new()
        };
        if let Some(first) = keys.first() {
            let slot = key_slot(first);
            if keys.iter().any(|k| key_slot(k) != slot) {
                return Err("CROSSSLOT Keys in request don't hash to the same slot".to_string());
            }
            let owner = state.owners[slot as usize].clone();
            let migrating_to = state.migrating.get(&slot).cloned();
            if owner != addr {
                let imported = asking && migrating_to.as_deref() == Some(addr);
                if !imported {
                    return Err(format!("MOVED {} {}", slot, owner));
                }
            } else if let Some(target) = migrating_to {
                let node = node_mut(state, addr)?;
                if keys.iter().any(|k| !node.data.contains_key(*k)) {
                    return Err(format!("ASK {} {}", slot, target));
                }
            }
        }

        let node = node_mut(state, addr)?;
        execute(node, addr, command, args)
    }
}

fn node_mut<'a>(state: &'a mut State, addr: &str) -> std::result::Result<&'a mut NodeState, String> {
    state
        .nodes
        .get_mut(addr)
        .ok_or_else(|| format!("ERR unknown node {}", addr))
}

fn shards_of(state: &State) -> Vec<ShardInfo> {
    let mut shards: Vec<ShardInfo> = Vec::new();
    let mut start = 0u16;
    for slot in 1..=SLOT_COUNT {
        let boundary = slot == SLOT_COUNT
            || state.owners[slot as usize] != state.owners[start as usize];
        if !boundary {
            continue;
        }
        let owner = &state.owners[start as usize];
        if !owner.is_empty() {
            let mut shard = ShardInfo::new(SlotRange::new(start, slot), Node::master(owner.as_str()));
            for (master, replica) in &state.replicas {
                if master == owner {
                    shard.replicas.push(Node::replica(replica.as_str()));
                }
            }
            shards.push(shard);
        }
        start = slot;
    }
    shards
}

fn node_entry(addr: &str) -> RespValue {
    let (host, port) = addr.rsplit_once(':').unwrap();
    RespValue::array(vec![
        RespValue::bulk_string(host.to_string()),
        RespValue::integer(port.parse().unwrap()),
        RespValue::bulk_string(format!("id-{}", addr)),
    ])
}

fn cluster_slots_reply(state: &State) -> RespValue {
    let entries = shards_of(state)
        .into_iter()
        .map(|shard| {
            let mut fields = vec![
                RespValue::integer(i64::from(shard.range.start)),
                RespValue::integer(i64::from(shard.range.end) - 1),
                node_entry(&shard.master.addr),
            ];
            fields.extend(shard.replicas.iter().map(|r| node_entry(&r.addr)));
            RespValue::array(fields)
        })
        .collect();
    RespValue::array(entries)
}

#[async_trait]
impl Transport for MockCluster {
    async fn execute(&self, node: &Node, command: &str, args: &[Bytes]) -> Result<RespValue> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call {
                node: node.addr.clone(),
                command: command.to_string(),
                args: args.to_vec(),
            });

            match state.churn.take() {
                Some(Churn::Once(map, shards)) => {
                    map.replace_shards(&shards);
                }
                Some(Churn::Forever(map, n)) => {
                    map.apply_redirect(0, &format!("10.9.9.{}:7000", n));
                    state.churn = Some(Churn::Forever(map, n + 1));
                }
                None => {}
            }

            if state.down.contains(&node.addr) {
                return Err(AikvError::NodeUnavailable {
                    node: node.addr.clone(),
                    reason: "connection refused".to_string(),
                });
            }
            if let Some(message) = state
                .failures
                .get(&(node.addr.clone(), command.to_string()))
                .cloned()
            {
                return Err(reply_error(command, &message));
            }
            match &state.latency {
                Some((addr, delay)) if *addr == node.addr => Some(*delay),
                _ => None,
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if !state.nodes.contains_key(&node.addr) {
            return Err(AikvError::NodeUnavailable {
                node: node.addr.clone(),
                reason: "no route to host".to_string(),
            });
        }
        self.handle(&mut state, &node.addr, command, args)
            .map_err(|message| reply_error(command, &message))
    }
}

// Command execution on one node's keyspace

type Reply = std::result::Result<RespValue, String>;

fn int(n: usize) -> RespValue {
    RespValue::integer(n as i64)
}

fn arg_str(args: &[Bytes], i: usize) -> std::result::Result<String, String> {
    args.get(i)
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .ok_or_else(|| "ERR wrong number of arguments".to_string())
}

fn arg_int(args: &[Bytes], i: usize) -> std::result::Result<i64, String> {
    arg_str(args, i)?
        .parse()
        .map_err(|_| "ERR value is not an integer or out of range".to_string())
}

fn bulk_array(items: impl IntoIterator<Item = Bytes>) -> RespValue {
    RespValue::array(items.into_iter().map(RespValue::bulk_string).collect())
}

fn encode_items<'a>(prefix: &[u8], items: impl Iterator<Item = &'a [u8]>) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_slice(prefix);
    for item in items {
        buf.put_u32(item.len() as u32);
        buf.put_slice(item);
    }
    buf.freeze()
}

fn decode_items(mut body: &[u8]) -> Option<Vec<Bytes>> {
    let mut items = Vec::new();
    while !body.is_empty() {
        if body.len() < 4 {
            return None;
        }
        let len = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
        body = &body[4..];
        if body.len() < len {
            return None;
        }
        items.push(Bytes::copy_from_slice(&body[..len]));
        body = &body[len..];
    }
    Some(items)
}

fn dump(entry: &Entry) -> Bytes {
    match entry {
        Entry::Str(data) => encode_items(b"s", std::iter::once(data.as_ref())),
        Entry::List(items) => encode_items(b"l", items.iter().map(|i| i.as_ref())),
        Entry::Set(members) => encode_items(b"S", members.iter().map(|m| m.as_ref())),
        Entry::Hash(fields) => {
            let flat: Vec<&[u8]> = fields
                .iter()
                .flat_map(|(k, v)| [k.as_ref(), v.as_ref()])
                .collect();
            encode_items(b"h", flat.into_iter())
        }
        Entry::ZSet(pairs) => {
            let scores: Vec<String> = pairs.iter().map(|(s, _)| s.to_string()).collect();
            let flat: Vec<&[u8]> = pairs
                .iter()
                .zip(scores.iter())
                .flat_map(|((_, m), s)| [s.as_bytes(), m.as_ref()])
                .collect();
            encode_items(b"z", flat.into_iter())
        }
    }
}

fn restore(payload: &[u8]) -> Option<Entry> {
    let (&tag, body) = payload.split_first()?;
    let items = decode_items(body)?;
    Some(match tag {
        b's' => Entry::Str(items.into_iter().next()?),
        b'l' => Entry::List(items.into_iter().collect()),
        b'S' => Entry::Set(items.into_iter().collect()),
        b'h' => Entry::Hash(
            items
                .chunks(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect(),
        ),
        b'z' => Entry::ZSet(
            items
                .chunks(2)
                .map(|pair| {
                    let score = std::str::from_utf8(&pair[0]).ok()?.parse().ok()?;
                    Some((score, pair[1].clone()))
                })
                .collect::<Option<Vec<_>>>()?,
        ),
        _ => return None,
    })
}

fn hll_elements(entry: Option<&Stored>) -> std::result::Result<BTreeSet<Bytes>, String> {
    match entry.map(|s| &s.entry) {
        None => Ok(BTreeSet::new()),
        Some(Entry::Str(data)) if data.starts_with(HLL_MAGIC) => decode_items(&data[HLL_MAGIC.len()..])
            .map(|items| items.into_iter().collect())
            .ok_or_else(|| "WRONGTYPE Key is not a valid HyperLogLog string value.".to_string()),
        Some(_) => Err("WRONGTYPE Key is not a valid HyperLogLog string value.".to_string()),
    }
}

fn hll_blob(elements: &BTreeSet<Bytes>) -> Bytes {
    encode_items(HLL_MAGIC, elements.iter().map(|e| e.as_ref()))
}

fn glob_match(pattern: &[u8], key: &[u8]) -> bool {
    match pattern.iter().position(|&c| c == b'*') {
        None => pattern == key,
        Some(star) => {
            let (prefix, suffix) = (&pattern[..star], &pattern[star + 1..]);
            key.len() >= prefix.len() + suffix.len()
                && key.starts_with(prefix)
                && glob_match(suffix, &key[key.len() - suffix.len()..])
        }
    }
}

fn range_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

impl NodeState {
    fn get(&self, key: &Bytes) -> Option<&Stored> {
        self.data.get(key)
    }

    fn set_of(&mut self, key: &Bytes) -> std::result::Result<&mut BTreeSet<Bytes>, String> {
        let stored = self.data.entry(key.clone()).or_insert_with(|| Stored {
            entry: Entry::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut stored.entry {
            Entry::Set(members) => Ok(members),
            _ => Err(WRONGTYPE.to_string()),
        }
    }

    fn list_of(&mut self, key: &Bytes) -> std::result::Result<&mut VecDeque<Bytes>, String> {
        let stored = self.data.entry(key.clone()).or_insert_with(|| Stored {
            entry: Entry::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut stored.entry {
            Entry::List(items) => Ok(items),
            _ => Err(WRONGTYPE.to_string()),
        }
    }

    fn read_set(&self, key: &Bytes) -> std::result::Result<BTreeSet<Bytes>, String> {
        match self.get(key).map(|s| &s.entry) {
            None => Ok(BTreeSet::new()),
            Some(Entry::Set(members)) => Ok(members.clone()),
            Some(_) => Err(WRONGTYPE.to_string()),
        }
    }

    fn drop_if_empty(&mut self, key: &Bytes) {
        let empty = match self.data.get(key).map(|s| &s.entry) {
            Some(Entry::Set(m)) => m.is_empty(),
            Some(Entry::List(l)) => l.is_empty(),
            Some(Entry::Hash(h)) => h.is_empty(),
            Some(Entry::ZSet(z)) => z.is_empty(),
            _ => false,
        };
        if empty {
            self.data.remove(key);
        }
    }

    fn put(&mut self, key: Bytes, entry: Entry) {
        self.data.insert(
            key,
            Stored {
                entry,
                expires_at: None,
            },
        );
    }
}

fn execute(node: &mut NodeState, addr: &str, command: &str, args: &[Bytes]) -> Reply {
    match command {
        "PING" => Ok(RespValue::simple_string("PONG")),
        "ECHO" => Ok(RespValue::bulk_string(args.first().cloned().unwrap_or_default())),
        "INFO" => Ok(RespValue::bulk_string(format!(
            "# Server\r\ntcp_addr:{}\r\nkeys:{}\r\n",
            addr,
            node.data.len()
        ))),
        "DBSIZE" => Ok(int(node.data.len())),
        "FLUSHALL" | "FLUSHDB" => {
            node.data.clear();
            Ok(RespValue::ok())
        }
        "KEYS" => {
            let pattern = args.first().cloned().unwrap_or_else(|| b("*"));
            let mut keys: Vec<Bytes> = node
                .data
                .keys()
                .filter(|k| glob_match(&pattern, k))
                .cloned()
                .collect();
            keys.sort();
            Ok(bulk_array(keys))
        }
        "RANDOMKEY" => Ok(node
            .data
            .keys()
            .min()
            .cloned()
            .map_or_else(RespValue::null_bulk_string, RespValue::bulk_string)),
        "SCAN" => {
            let mut keys: Vec<Bytes> = node.data.keys().cloned().collect();
            keys.sort();
            Ok(RespValue::array(vec![
                RespValue::bulk_string("0"),
                bulk_array(keys),
            ]))
        }
        "GET" => match node.get(&args[0]).map(|s| &s.entry) {
            None => Ok(RespValue::null_bulk_string()),
            Some(Entry::Str(data)) => Ok(RespValue::bulk_string(data.clone())),
            Some(_) => Err(WRONGTYPE.to_string()),
        },
        "SET" => {
            let mut expires_at = None;
            let mut nx = false;
            let mut i = 2;
            while i < args.len() {
                match arg_str(args, i)?.to_uppercase().as_str() {
                    "PX" => {
                        expires_at = Some(now_ms() + arg_int(args, i + 1)?);
                        i += 1;
                    }
                    "NX" => nx = true,
                    _ => return Err("ERR syntax error".to_string()),
                }
                i += 1;
            }
            if nx && node.data.contains_key(&args[0]) {
                return Ok(RespValue::null_bulk_string());
            }
            node.data.insert(
                args[0].clone(),
                Stored {
                    entry: Entry::Str(args[1].clone()),
                    expires_at,
                },
            );
            Ok(RespValue::ok())
        }
        "MSET" => {
            for pair in args.chunks(2) {
                node.put(pair[0].clone(), Entry::Str(pair[1].clone()));
            }
            Ok(RespValue::ok())
        }
        "MGET" => Ok(RespValue::array(
            args.iter()
                .map(|k| match node.get(k).map(|s| &s.entry) {
                    Some(Entry::Str(data)) => RespValue::bulk_string(data.clone()),
                    _ => RespValue::null_bulk_string(),
                })
                .collect(),
        )),
        "DEL" | "UNLINK" => Ok(int(args.iter().filter(|k| node.data.remove(*k).is_some()).count())),
        "EXISTS" | "TOUCH" => Ok(int(args.iter().filter(|k| node.data.contains_key(*k)).count())),
        "TYPE" => Ok(RespValue::simple_string(
            node.get(&args[0]).map_or("none", |s| s.entry.type_name()),
        )),
        "PTTL" => Ok(RespValue::integer(match node.get(&args[0]) {
            None => -2,
            Some(Stored {
                expires_at: None, ..
            }) => -1,
            Some(Stored {
                expires_at: Some(at),
                ..
            }) => (*at - now_ms()).max(0),
        })),
        "PEXPIRE" => match node.data.get_mut(&args[0]) {
            Some(stored) => {
                stored.expires_at = Some(now_ms() + arg_int(args, 1)?);
                Ok(RespValue::integer(1))
            }
            None => Ok(RespValue::integer(0)),
        },
        "DUMP" => Ok(match node.get(&args[0]) {
            Some(stored) => RespValue::bulk_string(dump(&stored.entry)),
            None => RespValue::null_bulk_string(),
        }),
        "RESTORE" => {
            let ttl = arg_int(args, 1)?;
            let replace = args
                .get(3)
                .map_or(false, |a| a.eq_ignore_ascii_case(b"REPLACE"));
            if node.data.contains_key(&args[0]) && !replace {
                return Err("BUSYKEY Target key name already exists.".to_string());
            }
            let entry = restore(&args[2])
                .ok_or_else(|| "ERR DUMP payload version or checksum are wrong".to_string())?;
            node.data.insert(
                args[0].clone(),
                Stored {
                    entry,
                    expires_at: (ttl > 0).then(|| now_ms() + ttl),
                },
            );
            Ok(RespValue::ok())
        }
        "RENAME" => {
            let stored = node
                .data
                .remove(&args[0])
                .ok_or_else(|| "ERR no such key".to_string())?;
            node.data.insert(args[1].clone(), stored);
            Ok(RespValue::ok())
        }
        "SADD" => {
            let members = node.set_of(&args[0])?;
            Ok(int(args[1..].iter().filter(|m| members.insert((*m).clone())).count()))
        }
        "SREM" => {
            if !node.data.contains_key(&args[0]) {
                return Ok(int(0));
            }
            let members = node.set_of(&args[0])?;
            let removed = args[1..].iter().filter(|m| members.remove(*m)).count();
            node.drop_if_empty(&args[0]);
            Ok(int(removed))
        }
        "SMEMBERS" => Ok(bulk_array(node.read_set(&args[0])?)),
        "SCARD" => Ok(int(node.read_set(&args[0])?.len())),
        "SDIFF" | "SINTER" | "SUNION" | "SDIFFSTORE" | "SINTERSTORE" | "SUNIONSTORE" => {
            let store = command.ends_with("STORE");
            let sources = if store { &args[1..] } else { args };
            let mut result = node.read_set(&sources[0])?;
            for key in &sources[1..] {
                let other = node.read_set(key)?;
                match &command[..2] {
                    "SD" => result.retain(|m| !other.contains(m)),
                    "SI" => result.retain(|m| other.contains(m)),
                    _ => result.extend(other),
                }
            }
            if store {
                node.data.remove(&args[0]);
                let count = result.len();
                if count > 0 {
                    node.put(args[0].clone(), Entry::Set(result));
                }
                Ok(int(count))
            } else {
                Ok(bulk_array(result))
            }
        }
        "LPUSH" | "RPUSH" => {
            let list = node.list_of(&args[0])?;
            for value in &args[1..] {
                if command == "LPUSH" {
                    list.push_front(value.clone());
                } else {
                    list.push_back(value.clone());
                }
            }
            Ok(int(list.len()))
        }
        "LPOP" | "RPOP" => {
            if !node.data.contains_key(&args[0]) {
                return Ok(RespValue::null_bulk_string());
            }
            let list = node.list_of(&args[0])?;
            let popped = if command == "LPOP" {
                list.pop_front()
            } else {
                list.pop_back()
            };
            node.drop_if_empty(&args[0]);
            Ok(popped.map_or_else(RespValue::null_bulk_string, RespValue::bulk_string))
        }
        "BRPOP" | "BLPOP" => {
            for key in &args[..args.len() - 1] {
                if !node.data.contains_key(key) {
                    continue;
                }
                let list = node.list_of(key)?;
                let popped = if command == "BLPOP" {
                    list.pop_front()
                } else {
                    list.pop_back()
                };
                node.drop_if_empty(key);
                if let Some(value) = popped {
                    return Ok(bulk_array([key.clone(), value]));
                }
            }
            Ok(RespValue::Array(None))
        }
        "LLEN" => Ok(int(match node.get(&args[0]).map(|s| &s.entry) {
            None => 0,
            Some(Entry::List(items)) => items.len(),
            Some(_) => return Err(WRONGTYPE.to_string()),
        })),
        "LRANGE" => {
            let items: Vec<Bytes> = match node.get(&args[0]).map(|s| &s.entry) {
                None => Vec::new(),
                Some(Entry::List(items)) => items.iter().cloned().collect(),
                Some(_) => return Err(WRONGTYPE.to_string()),
            };
            Ok(bulk_array(
                match range_bounds(items.len(), arg_int(args, 1)?, arg_int(args, 2)?) {
                    Some((start, stop)) => items[start..=stop].to_vec(),
                    None => Vec::new(),
                },
            ))
        }
        "HSET" => {
            let stored = node.data.entry(args[0].clone()).or_insert_with(|| Stored {
                entry: Entry::Hash(BTreeMap::new()),
                expires_at: None,
            });
            let Entry::Hash(fields) = &mut stored.entry else {
                return Err(WRONGTYPE.to_string());
            };
            let added = args[1..]
                .chunks(2)
                .filter(|pair| fields.insert(pair[0].clone(), pair[1].clone()).is_none())
                .count();
            Ok(int(added))
        }
        "HGET" => match node.get(&args[0]).map(|s| &s.entry) {
            None => Ok(RespValue::null_bulk_string()),
            Some(Entry::Hash(fields)) => Ok(fields
                .get(&args[1])
                .cloned()
                .map_or_else(RespValue::null_bulk_string, RespValue::bulk_string)),
            Some(_) => Err(WRONGTYPE.to_string()),
        },
        "ZADD" => {
            let stored = node.data.entry(args[0].clone()).or_insert_with(|| Stored {
                entry: Entry::ZSet(Vec::new()),
                expires_at: None,
            });
            let Entry::ZSet(pairs) = &mut stored.entry else {
                return Err(WRONGTYPE.to_string());
            };
            let mut added = 0;
            for pair in args[1..].chunks(2) {
                let score: f64 = String::from_utf8_lossy(&pair[0])
                    .parse()
                    .map_err(|_| "ERR value is not a valid float".to_string())?;
                match pairs.iter_mut().find(|(_, m)| *m == pair[1]) {
                    Some(existing) => existing.0 = score,
                    None => {
                        pairs.push((score, pair[1].clone()));
                        added += 1;
                    }
                }
            }
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            Ok(int(added))
        }
        "ZRANGE" => {
            let members: Vec<Bytes> = match node.get(&args[0]).map(|s| &s.entry) {
                None => Vec::new(),
                Some(Entry::ZSet(pairs)) => pairs.iter().map(|(_, m)| m.clone()).collect(),
                Some(_) => return Err(WRONGTYPE.to_string()),
            };
            Ok(bulk_array(
                match range_bounds(members.len(), arg_int(args, 1)?, arg_int(args, 2)?) {
                    Some((start, stop)) => members[start..=stop].to_vec(),
                    None => Vec::new(),
                },
            ))
        }
        "PFADD" => {
            let mut elements = hll_elements(node.get(&args[0]))?;
            let existed = node.data.contains_key(&args[0]);
            let changed = args[1..]
                .iter()
                .filter(|e| elements.insert((*e).clone()))
                .count();
            node.put(args[0].clone(), Entry::Str(hll_blob(&elements)));
            Ok(int(usize::from(changed > 0 || !existed)))
        }
        "PFCOUNT" => {
            let mut union = BTreeSet::new();
            for key in args {
                union.extend(hll_elements(node.get(key))?);
            }
            Ok(int(union.len()))
        }
        "PFMERGE" => {
            let mut union = hll_elements(node.get(&args[0]))?;
            for key in &args[1..] {
                union.extend(hll_elements(node.get(key))?);
            }
            node.put(args[0].clone(), Entry::Str(hll_blob(&union)));
            Ok(RespValue::ok())
        }
        other => Err(format!("ERR unknown command '{}'", other)),
    }
}

/// Client over the mock, discovering the layout with CLUSTER SLOTS
pub async fn cluster_client(mock: &Arc<MockCluster>) -> ClusterClient {
    let (client, _) = client_and_router(mock, Mode::Cluster, RouterSettings::default()).await;
    client
}

/// Client plus the router behind it, for tests that poke at the topology
pub async fn client_and_router(
    mock: &Arc<MockCluster>,
    mode: Mode,
    settings: RouterSettings,
) -> (ClusterClient, Arc<ClusterRouter>) {
    let transport: Arc<dyn Transport> = mock.clone();
    let discovery: Arc<dyn TopologyDiscovery> = match mode {
        Mode::Cluster => Arc::new(ClusterSlotsDiscovery::new(
            transport.clone(),
            vec![N1.to_string()],
            settings.command_timeout,
        )),
        Mode::Standalone => Arc::new(StaticDiscovery::new(mock.shards())),
    };
    let router = Arc::new(ClusterRouter::new(
        Arc::new(CommandTable::build(mode).unwrap()),
        Arc::new(TopologyMap::new(Topology::empty())),
        transport,
        discovery,
        settings,
    ));
    router.refresh().await.unwrap();
    mock.clear_calls();
    (ClusterClient::from_router(router.clone()), router)
}
