//! Cluster-aware client for Redis protocol compatible key-value stores.
//!
//! Commands go through [`ClusterClient::dispatch`]. Keyed commands are sent to
//! the node owning the key's slot, keyless ones are fanned out and merged, and
//! multi-key commands whose keys span slots are emulated from single-key steps.

pub mod client;
pub mod cluster;
pub mod command;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod transport;

pub use client::ClusterClient;
pub use command::Mode;
pub use config::ClientConfig;
pub use error::{AikvError, RedirectKind, Result};
pub use protocol::Value;
pub use transport::{TcpTransport, Transport};
