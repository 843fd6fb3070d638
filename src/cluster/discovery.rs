//! Topology discovery: where the slot layout comes from.

use super::types::{Node, NodeRole, ShardInfo, SlotRange};
use crate::error::{AikvError, Result};
use crate::protocol::Value;
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait TopologyDiscovery: Send + Sync {
    /// Fetch the current slot layout.
    ///
    /// `known` lists addresses the caller already knows about; implementations
    /// may ask them before falling back to their own seeds.
    async fn discover(&self, known: &[String]) -> Result<Vec<ShardInfo>>;
}

/// A fixed layout, for standalone servers and tests
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    shards: Vec<ShardInfo>,
}

impl StaticDiscovery {
    pub fn new(shards: Vec<ShardInfo>) -> Self {
        Self { shards }
    }

    /// One server owning every slot
    pub fn single(addr: impl Into<String>) -> Self {
        Self::new(vec![ShardInfo::new(SlotRange::full(), Node::master(addr))])
    }
}

#[async_trait]
impl TopologyDiscovery for StaticDiscovery {
    async fn discover(&self, _known: &[String]) -> Result<Vec<ShardInfo>> {
        Ok(self.shards.clone())
    }
}

/// Asks nodes for `CLUSTER SLOTS`, first the known ones then the seeds.
///
/// Each node gets `query_timeout` to answer before the next one is tried.
pub struct ClusterSlotsDiscovery {
    transport: Arc<dyn Transport>,
    seeds: Vec<String>,
    query_timeout: Duration,
}

impl ClusterSlotsDiscovery {
    pub fn new(transport: Arc<dyn Transport>, seeds: Vec<String>, query_timeout: Duration) -> Self {
        Self {
            transport,
            seeds,
            query_timeout,
        }
    }
}

#[async_trait]
impl TopologyDiscovery for ClusterSlotsDiscovery {
    async fn discover(&self, known: &[String]) -> Result<Vec<ShardInfo>> {
        let mut candidates: Vec<&String> = known.iter().collect();
        for seed in &self.seeds {
            if !candidates.contains(&seed) {
                candidates.push(seed);
            }
        }

        let mut last_error = None;
        for addr in candidates {
            let node = Node::master(addr.as_str());
            let query = self.transport.execute(&node, "CLUSTER SLOTS", &[]);
            let reply = tokio::time::timeout(self.query_timeout, query)
                .await
                .unwrap_or_else(|_| {
                    Err(AikvError::Timeout {
                        node: addr.to_string(),
                    })
                });
            match reply {
                Ok(raw) => match Value::from_resp(raw).and_then(|v| parse_cluster_slots(v, addr)) {
                    Ok(shards) if !shards.is_empty() => {
                        debug!("Discovered {} slot ranges from {}", shards.len(), addr);
                        return Ok(shards);
                    }
                    Ok(_) => warn!("{} reported no slot ranges", addr),
                    Err(e) => {
                        warn!("Unusable CLUSTER SLOTS reply from {}: {}", addr, e);
                        last_error = Some(e);
                    }
                },
                Err(e) => {
                    debug!("Discovery via {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AikvError::Config("no seed nodes to discover the cluster from".to_string())
        }))
    }
}

/// Parse a `CLUSTER SLOTS` reply.
///
/// Each entry is `[first, last, [host, port, id?, ...], replica...]`. An empty
/// host means "the node you asked", whose address is `queried`.
pub fn parse_cluster_slots(reply: Value, queried: &str) -> Result<Vec<ShardInfo>> {
    let mut shards = Vec::new();
    for entry in reply.into_array()? {
        let mut fields = entry.into_array()?.into_iter();
        let (Some(first), Some(last), Some(master)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(AikvError::Protocol(
                "CLUSTER SLOTS entry is too short".to_string(),
            ));
        };
        let range = SlotRange::from_inclusive(first.as_int()?, last.as_int()?)?;
        let mut shard = ShardInfo::new(range, parse_node(master, queried, NodeRole::Master)?);
        for replica in fields {
            shard.replicas.push(parse_node(replica, queried, NodeRole::Replica)?);
        }
        shards.push(shard);
    }
    Ok(shards)
}

fn parse_node(value: Value, queried: &str, role: NodeRole) -> Result<Node> {
    let mut fields = value.into_array()?.into_iter();
    let (Some(host), Some(port)) = (fields.next(), fields.next()) else {
        return Err(AikvError::Protocol(
            "CLUSTER SLOTS node is missing host or port".to_string(),
        ));
    };
    let host = String::from_utf8_lossy(&host.into_bytes()?).into_owned();
    let port = port.as_int()?;

    let addr = if host.is_empty() || host == "?" {
        let queried_host = queried.rsplit_once(':').map_or(queried, |(h, _)| h);
        format!("{}:{}", queried_host, port)
    } else {
        format!("{}:{}", host, port)
    };

    let id = match fields.next() {
        Some(Value::Data(id)) => String::from_utf8_lossy(&id).into_owned(),
        _ => addr.clone(),
    };

    Ok(Node { id, addr, role })
}
