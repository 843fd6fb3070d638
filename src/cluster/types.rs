//! Cluster type definitions
//!
//! Nodes, their roles and the slot ranges they serve, as learned from discovery.

use super::slot::SLOT_COUNT;
use crate::error::{AikvError, Result};
use std::fmt;

/// Opaque node identifier; the address when the server reports no id
pub type NodeId = String;

/// Role of a node within its shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeRole {
    #[default]
    Master,
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Replica => write!(f, "replica"),
        }
    }
}

/// A server process reachable at `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub id: NodeId,
    pub addr: String,
    pub role: NodeRole,
}

impl Node {
    pub fn master(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        Self {
            id: addr.clone(),
            addr,
            role: NodeRole::Master,
        }
    }

    pub fn replica(addr: impl Into<String>) -> Self {
        Self {
            role: NodeRole::Replica,
            ..Self::master(addr)
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.addr, self.role)
    }
}

/// A half-open range of slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    /// Start slot (inclusive)
    pub start: u16,
    /// End slot (exclusive)
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range
    pub fn new(start: u16, end: u16) -> Self {
        assert!(start < end, "start must be less than end");
        assert!(end <= SLOT_COUNT, "end must be <= 16384");
        Self { start, end }
    }

    /// Range from the inclusive bounds a server reports
    pub fn from_inclusive(first: i64, last: i64) -> Result<Self> {
        if first < 0 || last < first || last >= i64::from(SLOT_COUNT) {
            return Err(AikvError::Protocol(format!(
                "invalid slot range {}-{}",
                first, last
            )));
        }
        Ok(Self {
            start: first as u16,
            end: (last + 1) as u16,
        })
    }

    /// Every slot in the keyspace
    pub fn full() -> Self {
        Self::new(0, SLOT_COUNT)
    }

    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot < self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{})", self.start, self.end)
    }
}

/// One slot range with the master serving it and its replicas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub range: SlotRange,
    pub master: Node,
    pub replicas: Vec<Node>,
}

impl ShardInfo {
    pub fn new(range: SlotRange, master: Node) -> Self {
        Self {
            range,
            master,
            replicas: Vec::new(),
        }
    }

    pub fn with_replica(mut self, replica: Node) -> Self {
        self.replicas.push(replica);
        self
    }
}
