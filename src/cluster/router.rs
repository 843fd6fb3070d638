//! Cluster router
//!
//! Resolves a command to its descriptor, picks the target node(s) from the
//! current topology snapshot, dispatches with a per-call deadline, follows one
//! MOVED/ASK redirect and merges fan-out replies.

use super::discovery::TopologyDiscovery;
use super::slot::key_slot;
use super::topology::{Topology, TopologyMap};
use super::types::Node;
use crate::command::{merge, CommandDescriptor, CommandTable, KeySpec, RoutingPolicy};
use crate::error::{AikvError, RedirectKind, Result};
use crate::observability::RouterMetrics;
use crate::protocol::{DefaultDecoder, RespValue, ResponseDecoder, Value};
use crate::transport::Transport;
use bytes::Bytes;
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Router tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    /// Deadline for one dispatch to one node
    pub command_timeout: Duration,
    /// MOVED replies tolerated before a full topology refresh; 0 disables it
    pub refresh_after_redirects: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(5000),
            refresh_after_redirects: 8,
        }
    }
}

pub struct ClusterRouter {
    table: Arc<CommandTable>,
    topology: Arc<TopologyMap>,
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn TopologyDiscovery>,
    decoder: Arc<dyn ResponseDecoder>,
    settings: RouterSettings,
    metrics: Arc<RouterMetrics>,
}

impl ClusterRouter {
    pub fn new(
        table: Arc<CommandTable>,
        topology: Arc<TopologyMap>,
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn TopologyDiscovery>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            table,
            topology,
            transport,
            discovery,
            decoder: Arc::new(DefaultDecoder),
            settings,
            metrics: Arc::new(RouterMetrics::new()),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn ResponseDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RouterMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn topology(&self) -> &Arc<TopologyMap> {
        &self.topology
    }

    pub fn metrics(&self) -> &Arc<RouterMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> RouterSettings {
        self.settings
    }

    /// Rebuild the topology from discovery
    pub async fn refresh(&self) -> Result<Arc<Topology>> {
        self.metrics.refreshes.inc();
        self.topology.refresh(self.discovery.as_ref()).await
    }

    /// Route a command natively, by name.
    ///
    /// Emulated commands are routed like any other here: their keys must share a slot.
    pub async fn route(&self, command: &str, args: &[Bytes]) -> Result<Value> {
        let (descriptor, consumed) = self.table.resolve(command, args)?;
        self.route_descriptor(descriptor, &args[consumed..]).await
    }

    /// Route a command whose descriptor is already resolved.
    ///
    /// `args` excludes the command name and subcommand.
    pub async fn route_descriptor(&self, descriptor: &CommandDescriptor, args: &[Bytes]) -> Result<Value> {
        match descriptor.routing {
            RoutingPolicy::SlotOf(spec) => {
                let slot = self.slot_for(descriptor, spec, args)?;
                let raw = self.dispatch_to_slot(descriptor, slot, args).await?;
                self.decoder.decode(descriptor, raw)
            }
            RoutingPolicy::AllNodes | RoutingPolicy::AllMasters => {
                self.fan_out(descriptor, args).await
            }
            RoutingPolicy::AnyNode => self.any_node(descriptor, args).await,
            RoutingPolicy::Blocked => Err(AikvError::UnsupportedInCluster {
                command: descriptor.name.to_string(),
            }),
        }
    }

    /// The one slot every key argument hashes to
    pub fn slot_for(&self, descriptor: &CommandDescriptor, spec: KeySpec, args: &[Bytes]) -> Result<u16> {
        let keys = spec.keys(args)?;
        let Some((first, rest)) = keys.split_first() else {
            return Err(AikvError::WrongArgCount(descriptor.name.to_lowercase()));
        };
        let slot = key_slot(first);
        if rest.iter().any(|key| key_slot(key) != slot) {
            self.metrics.cross_slot_rejections.inc();
            return Err(AikvError::CrossSlot {
                command: descriptor.name.to_string(),
            });
        }
        Ok(slot)
    }

    fn deadline(&self, descriptor: &CommandDescriptor, args: &[Bytes]) -> Duration {
        if !descriptor.blocking {
            return self.settings.command_timeout;
        }
        // A zero (block forever) timeout is still bounded by the command timeout
        let block = args
            .last()
            .and_then(|arg| std::str::from_utf8(arg).ok())
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_default();
        self.settings.command_timeout + block
    }

    async fn execute_on(
        &self,
        node: &Node,
        descriptor: &CommandDescriptor,
        args: &[Bytes],
        asking: bool,
    ) -> Result<RespValue> {
        self.metrics.dispatches.inc();
        debug!(command = descriptor.name, node = %node.addr, asking, "Dispatching");

        let deadline = self.deadline(descriptor, args);
        let call = async {
            if asking {
                self.transport.execute_asking(node, descriptor.name, args).await
            } else {
                self.transport.execute(node, descriptor.name, args).await
            }
        };

        match tokio::time::timeout(deadline, call).await {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(AikvError::Timeout { node })) => Err(AikvError::NodeUnavailable {
                node,
                reason: "timed out".to_string(),
            }),
            Ok(Err(AikvError::Io(e))) => Err(AikvError::NodeUnavailable {
                node: node.addr.clone(),
                reason: e.to_string(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AikvError::NodeUnavailable {
                node: node.addr.clone(),
                reason: format!("no reply within {:?}", deadline),
            }),
        }
    }

    async fn owner_of(&self, slot: u16) -> Result<Arc<Node>> {
        if let Some(node) = self.topology.snapshot().owner(slot) {
            return Ok(node.clone());
        }

        debug!(slot, "Slot has no known owner; refreshing topology");
        let topology = match self.refresh().await {
            Ok(topology) => topology,
            Err(_) => self.topology.snapshot(),
        };
        topology
            .owner(slot)
            .cloned()
            .ok_or(AikvError::SlotNotCovered(slot))
    }

    async fn dispatch_to_slot(&self, descriptor: &CommandDescriptor, slot: u16, args: &[Bytes]) -> Result<RespValue> {
        let node = self.owner_of(slot).await?;
        let (kind, moved_slot, addr) = match self.execute_on(&node, descriptor, args, false).await {
            Err(AikvError::Redirected { kind, slot, addr }) => (kind, slot, addr),
            other => return other,
        };

        self.metrics.redirects.inc();
        self.metrics.retries.inc();
        warn!(
            command = descriptor.name,
            slot = moved_slot,
            from = %node.addr,
            to = %addr,
            "{} redirect",
            kind
        );

        // One retry only; a second redirect is returned to the caller
        match kind {
            RedirectKind::Moved => {
                let mut topology = self.topology.apply_redirect(moved_slot, &addr);
                let threshold = self.settings.refresh_after_redirects;
                if threshold > 0 && self.topology.note_redirect() >= threshold {
                    if let Ok(refreshed) = self.refresh().await {
                        topology = refreshed;
                    }
                }
                let target = topology
                    .owner(moved_slot)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(Node::master(addr.as_str())));
                self.execute_on(&target, descriptor, args, false).await
            }
            RedirectKind::Ask => {
                let target = self
                    .topology
                    .snapshot()
                    .node_by_addr(&addr)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(Node::master(addr.as_str())));
                self.execute_on(&target, descriptor, args, true).await
            }
        }
    }

    /// Send to every target of the current snapshot and merge.
    ///
    /// If the topology moved to a different target set while replies were in
    /// flight, the round is re-issued once against the new snapshot.
    async fn fan_out(&self, descriptor: &CommandDescriptor, args: &[Bytes]) -> Result<Value> {
        let masters_only = descriptor.routing == RoutingPolicy::AllMasters;

        for attempt in 0..2 {
            let snapshot = self.topology.snapshot();
            let targets: Vec<Arc<Node>> = if masters_only {
                snapshot.all_masters()
            } else {
                snapshot.all_nodes().to_vec()
            };
            if targets.is_empty() {
                return Err(no_known_nodes());
            }

            self.metrics.fan_outs.inc();
            let replies = join_all(targets.iter().map(|node| async move {
                let reply = match self.execute_on(node, descriptor, args, false).await {
                    Ok(raw) => self.decoder.decode(descriptor, raw),
                    Err(e) => Err(e),
                };
                (node.clone(), reply)
            }))
            .await;

            let current = self.topology.snapshot();
            if current.generation() != snapshot.generation()
                && current.addrs(masters_only) != snapshot.addrs(masters_only)
            {
                warn!(
                    command = descriptor.name,
                    attempt,
                    "Topology changed during fan-out"
                );
                if attempt == 0 {
                    self.metrics.retries.inc();
                    continue;
                }
                break;
            }

            return merge(descriptor.merge, descriptor.name, replies);
        }

        Err(AikvError::TopologyChanged {
            command: descriptor.name.to_string(),
        })
    }

    /// Try nodes in random order until one answers
    async fn any_node(&self, descriptor: &CommandDescriptor, args: &[Bytes]) -> Result<Value> {
        let snapshot = self.topology.snapshot();
        let mut candidates = snapshot.all_masters();
        if candidates.is_empty() {
            candidates = snapshot.all_nodes().to_vec();
        }
        candidates.shuffle(&mut rand::thread_rng());

        let mut last_error = None;
        for node in candidates {
            match self.execute_on(&node, descriptor, args, false).await {
                Ok(raw) => return self.decoder.decode(descriptor, raw),
                Err(e @ AikvError::NodeUnavailable { .. }) => {
                    debug!(command = descriptor.name, node = %node.addr, "Trying another node: {}", e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(no_known_nodes))
    }
}

fn no_known_nodes() -> AikvError {
    AikvError::NodeUnavailable {
        node: "cluster".to_string(),
        reason: "no known nodes".to_string(),
    }
}
