//! Slot ownership map.
//!
//! A [`Topology`] is an immutable snapshot: slot owners plus every known node.
//! [`TopologyMap`] holds the current snapshot and swaps it wholesale, so readers
//! never observe a half-applied update.

use super::discovery::TopologyDiscovery;
use super::slot::SLOT_COUNT;
use super::types::{Node, ShardInfo, SlotRange};
use crate::error::{AikvError, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Immutable view of which node owns which slot
#[derive(Debug, Clone)]
pub struct Topology {
    generation: u64,
    /// Masters first in discovery order, then replicas
    nodes: Vec<Arc<Node>>,
    /// Index into `nodes` for every slot
    owners: Box<[Option<u32>]>,
}

impl Topology {
    /// A snapshot that knows nothing
    pub fn empty() -> Self {
        Self {
            generation: 0,
            nodes: Vec::new(),
            owners: vec![None; SLOT_COUNT as usize].into_boxed_slice(),
        }
    }

    /// One node owning the whole keyspace
    pub fn single(addr: impl Into<String>) -> Self {
        Self::from_shards(0, &[ShardInfo::new(SlotRange::full(), Node::master(addr))])
    }

    pub fn from_shards(generation: u64, shards: &[ShardInfo]) -> Self {
        let mut topology = Self::empty();
        topology.generation = generation;

        for shard in shards {
            let index = topology.intern(&shard.master);
            for slot in shard.range.start..shard.range.end {
                topology.owners[slot as usize] = Some(index);
            }
        }
        for replica in shards.iter().flat_map(|shard| shard.replicas.iter()) {
            topology.intern(replica);
        }
        topology
    }

    fn intern(&mut self, node: &Node) -> u32 {
        if let Some(index) = self.nodes.iter().position(|n| n.addr == node.addr) {
            return index as u32;
        }
        self.nodes.push(Arc::new(node.clone()));
        (self.nodes.len() - 1) as u32
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Node serving `slot`, if any
    pub fn owner(&self, slot: u16) -> Option<&Arc<Node>> {
        self.owners
            .get(slot as usize)
            .copied()
            .flatten()
            .and_then(|index| self.nodes.get(index as usize))
    }

    pub fn all_nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn all_masters(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().filter(|n| n.is_master()).cloned().collect()
    }

    pub fn node_by_addr(&self, addr: &str) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|n| n.addr == addr)
    }

    /// Number of slots with a known owner
    pub fn covered_slots(&self) -> usize {
        self.owners.iter().filter(|o| o.is_some()).count()
    }

    /// Copy of this snapshot with `slot` reassigned to `addr`.
    ///
    /// An address not seen before is added as a new master.
    pub fn with_owner(&self, generation: u64, slot: u16, addr: &str) -> Self {
        let mut next = self.clone();
        next.generation = generation;
        let index = match next.nodes.iter().position(|n| n.addr == addr) {
            Some(index) => index as u32,
            None => next.intern(&Node::master(addr)),
        };
        if let Some(owner) = next.owners.get_mut(slot as usize) {
            *owner = Some(index);
        }
        next
    }

    /// Addresses a fan-out with the given role filter would reach
    pub fn addrs(&self, masters_only: bool) -> HashSet<&str> {
        self.nodes
            .iter()
            .filter(|n| !masters_only || n.is_master())
            .map(|n| n.addr.as_str())
            .collect()
    }
}

/// Shared, swappable topology
#[derive(Debug)]
pub struct TopologyMap {
    current: RwLock<Arc<Topology>>,
    generation: AtomicU64,
    redirects: AtomicU64,
    refreshes: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl TopologyMap {
    pub fn new(topology: Topology) -> Self {
        let generation = topology.generation();
        Self {
            current: RwLock::new(Arc::new(topology)),
            generation: AtomicU64::new(generation),
            redirects: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<Topology> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Install a freshly built topology under a new generation
    pub fn replace_shards(&self, shards: &[ShardInfo]) -> Arc<Topology> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(Topology::from_shards(self.next_generation(), shards));
        *current = next.clone();
        next
    }

    /// Record a MOVED redirect: `slot` now lives at `addr`
    pub fn apply_redirect(&self, slot: u16, addr: &str) -> Arc<Topology> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.owner(slot).map(|n| n.addr.as_str()) == Some(addr) {
            return current.clone();
        }
        let next = Arc::new(current.with_owner(self.next_generation(), slot, addr));
        debug!(slot, addr, generation = next.generation(), "Slot owner updated");
        *current = next.clone();
        next
    }

    /// Count a MOVED redirect; returns the count since the last refresh
    pub fn note_redirect(&self) -> u64 {
        self.redirects.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Rebuild the map from discovery.
    ///
    /// Concurrent callers wait for the refresh in flight instead of issuing their own.
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self, discovery: &dyn TopologyDiscovery) -> Result<Arc<Topology>> {
        let seen = self.refreshes.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;
        let current = self.snapshot();
        if self.refreshes.load(Ordering::SeqCst) != seen {
            // Someone else refreshed while we waited
            return Ok(current);
        }

        let candidates: Vec<String> = current
            .all_masters()
            .iter()
            .map(|n| n.addr.clone())
            .collect();
        let shards = match discovery.discover(&candidates).await {
            Ok(shards) => shards,
            Err(e) => {
                warn!("Topology refresh failed: {}", e);
                return Err(e);
            }
        };
        if shards.is_empty() {
            return Err(AikvError::Protocol(
                "discovery returned no slot ranges".to_string(),
            ));
        }

        let next = self.replace_shards(&shards);
        self.redirects.store(0, Ordering::SeqCst);
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        info!(
            generation = next.generation(),
            nodes = next.all_nodes().len(),
            covered = next.covered_slots(),
            "Topology refreshed"
        );
        Ok(next)
    }
}
