//! Folding per-node replies into one result.

use super::descriptor::MergePolicy;
use crate::cluster::types::Node;
use crate::error::{AikvError, Result};
use crate::protocol::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// Reply collected from one node
pub type NodeReply = (Arc<Node>, Result<Value>);

/// Combine replies according to `policy`.
///
/// Strict policies (`Union`, `Sum`, `AllTrue`) fail with
/// [`AikvError::PartialFailure`] if any node failed. `PerNode` annotates failures
/// in place and only fails when every node did.
pub fn merge(policy: MergePolicy, command: &str, replies: Vec<NodeReply>) -> Result<Value> {
    match policy {
        MergePolicy::Single => single(command, replies),
        MergePolicy::FirstSuccess => first_success(command, replies),
        MergePolicy::Union => strict(command, replies).and_then(union),
        MergePolicy::Sum => strict(command, replies).and_then(sum),
        MergePolicy::AllTrue => strict(command, replies).and_then(all_true),
        MergePolicy::PerNode => per_node(command, replies),
    }
}

fn single(command: &str, mut replies: Vec<NodeReply>) -> Result<Value> {
    if replies.len() != 1 {
        return Err(AikvError::Protocol(format!(
            "{} expects one reply, got {}",
            command,
            replies.len()
        )));
    }
    let (_, reply) = replies.remove(0);
    reply
}

fn first_success(command: &str, replies: Vec<NodeReply>) -> Result<Value> {
    let mut last_error = None;
    for (_, reply) in replies {
        match reply {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| AikvError::Protocol(format!("{} got no replies", command))))
}

fn strict(command: &str, replies: Vec<NodeReply>) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(replies.len());
    let mut failed = Vec::new();
    for (node, reply) in replies {
        match reply {
            Ok(value) => values.push(value),
            Err(e) => failed.push((node.addr.clone(), e.to_string())),
        }
    }
    if !failed.is_empty() {
        warn!(command, failed = failed.len(), "Fan-out failed on some nodes");
        return Err(AikvError::PartialFailure {
            command: command.to_string(),
            failed,
        });
    }
    Ok(values)
}

fn union(values: Vec<Value>) -> Result<Value> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for value in values {
        for item in value.into_array()? {
            if let Value::Data(ref data) = item {
                if !seen.insert(data.clone()) {
                    continue;
                }
            }
            merged.push(item);
        }
    }
    Ok(Value::Array(merged))
}

fn sum(values: Vec<Value>) -> Result<Value> {
    let mut total = 0i64;
    for value in &values {
        total += value.as_int()?;
    }
    Ok(Value::Int(total))
}

fn all_true(values: Vec<Value>) -> Result<Value> {
    let mut all = true;
    for value in &values {
        all &= value.as_bool()?;
    }
    Ok(Value::Bool(all))
}

fn per_node(command: &str, replies: Vec<NodeReply>) -> Result<Value> {
    let mut nodes = BTreeMap::new();
    let mut failed = Vec::new();
    let total = replies.len();
    for (node, reply) in replies {
        let entry = match reply {
            Ok(value) => value,
            Err(e) => {
                failed.push((node.addr.clone(), e.to_string()));
                Value::Error(e.to_string())
            }
        };
        nodes.insert(node.addr.clone(), entry);
    }

    if !failed.is_empty() {
        if failed.len() == total {
            return Err(AikvError::PartialFailure {
                command: command.to_string(),
                failed,
            });
        }
        warn!(command, failed = failed.len(), "Per-node reply carries failures");
    }
    Ok(Value::Nodes(nodes))
}
