//! Node connections.
//!
//! The router talks to nodes only through [`Transport`]; [`TcpTransport`] is the
//! production implementation, tests plug in an in-memory cluster.

use crate::cluster::types::Node;
use crate::error::{AikvError, RedirectKind, Result};
use crate::protocol::{encode_command, RespParser, RespValue};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Sends one command to one node.
///
/// Error replies come back as `Err`: redirects as [`AikvError::Redirected`],
/// cross-slot refusals as [`AikvError::CrossSlot`], anything else as
/// [`AikvError::Response`]. See [`reply_error`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, node: &Node, command: &str, args: &[Bytes]) -> Result<RespValue>;

    /// Send `ASKING` then the command, on the same connection.
    async fn execute_asking(&self, node: &Node, command: &str, args: &[Bytes]) -> Result<RespValue> {
        self.execute(node, "ASKING", NO_ARGS).await?;
        self.execute(node, command, args).await
    }
}

/// Classify an error reply sent by a node in answer to `command`
pub fn reply_error(command: &str, message: &str) -> AikvError {
    let mut parts = message.split_whitespace();
    let kind = match parts.next() {
        Some("MOVED") => Some(RedirectKind::Moved),
        Some("ASK") => Some(RedirectKind::Ask),
        Some("CROSSSLOT") => {
            return AikvError::CrossSlot {
                command: command.to_string(),
            }
        }
        _ => None,
    };

    if let Some(kind) = kind {
        let slot = parts.next().and_then(|s| s.parse::<u16>().ok());
        let addr = parts.next();
        if let (Some(slot), Some(addr)) = (slot, addr) {
            return AikvError::Redirected {
                kind,
                slot,
                addr: addr.to_string(),
            };
        }
    }
    AikvError::Response(message.to_string())
}

struct NodeConnection {
    stream: TcpStream,
    parser: RespParser,
}

impl NodeConnection {
    async fn open(addr: &str, connect_timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| AikvError::NodeUnavailable {
                node: addr.to_string(),
                reason: format!("connect timed out after {:?}", connect_timeout),
            })?
            .map_err(|e| AikvError::NodeUnavailable {
                node: addr.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", addr);
        Ok(Self {
            stream,
            parser: RespParser::new(8192),
        })
    }

    async fn request(&mut self, command: &str, args: &[Bytes]) -> Result<RespValue> {
        self.stream.write_all(&encode_command(command, args)).await?;
        self.stream.flush().await?;

        loop {
            if let Some(frame) = self.parser.parse()? {
                return Ok(frame);
            }
            let n = self.stream.read_buf(self.parser.buffer_mut()).await?;
            if n == 0 {
                return Err(AikvError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )));
            }
        }
    }
}

type ConnectionSlot = Arc<Mutex<Option<NodeConnection>>>;

const NO_ARGS: &[Bytes] = &[];

/// One lazily opened TCP connection per node address
pub struct TcpTransport {
    connections: Mutex<HashMap<String, ConnectionSlot>>,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            connect_timeout,
        }
    }

    async fn slot(&self, addr: &str) -> ConnectionSlot {
        let mut connections = self.connections.lock().await;
        connections
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Run requests in order on the node's connection, opening it if needed.
    /// The last reply is returned.
    ///
    /// The connection is taken out of its slot for the exchange and put back
    /// only once every reply has been read. A broken exchange, or a future
    /// dropped mid-flight, closes it, so no late reply is ever read by the
    /// next caller.
    async fn round_trip(&self, node: &Node, requests: &[(&str, &[Bytes])]) -> Result<RespValue> {
        let slot = self.slot(&node.addr).await;
        let mut guard = slot.lock().await;

        let mut connection = match guard.take() {
            Some(connection) => connection,
            None => NodeConnection::open(&node.addr, self.connect_timeout).await?,
        };

        let mut last = RespValue::Null;
        for (command, args) in requests {
            match connection.request(command, args).await {
                Ok(frame) => {
                    if let Some(message) = frame.as_error() {
                        let err = reply_error(command, message);
                        *guard = Some(connection);
                        return Err(err);
                    }
                    last = frame;
                }
                Err(e) => {
                    warn!("Dropping connection to {}: {}", node.addr, e);
                    return Err(match e {
                        AikvError::Io(io) => AikvError::NodeUnavailable {
                            node: node.addr.clone(),
                            reason: io.to_string(),
                        },
                        other => other,
                    });
                }
            }
        }
        *guard = Some(connection);
        Ok(last)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn execute(&self, node: &Node, command: &str, args: &[Bytes]) -> Result<RespValue> {
        self.round_trip(node, &[(command, args)]).await
    }

    async fn execute_asking(&self, node: &Node, command: &str, args: &[Bytes]) -> Result<RespValue> {
        self.round_trip(node, &[("ASKING", NO_ARGS), (command, args)]).await
    }
}
