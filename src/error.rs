use std::fmt;
use thiserror::Error;

/// Kind of redirection a node answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// The slot has permanently moved; the topology map must be updated.
    Moved,
    /// The slot is being migrated; retry once on the target with ASKING.
    Ask,
}

impl fmt::Display for RedirectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Moved => write!(f, "MOVED"),
            Self::Ask => write!(f, "ASK"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AikvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Wrong number of arguments for '{0}' command")]
    WrongArgCount(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("CROSSSLOT keys in '{command}' don't hash to the same slot")]
    CrossSlot { command: String },

    #[error("'{command}' cannot run transparently in cluster mode; address a specific node instead")]
    UnsupportedInCluster { command: String },

    #[error("{kind} {slot} {addr}")]
    Redirected {
        kind: RedirectKind,
        slot: u16,
        addr: String,
    },

    #[error("Timed out waiting for node {node}")]
    Timeout { node: String },

    #[error("Node {node} unavailable: {reason}")]
    NodeUnavailable { node: String, reason: String },

    #[error("Slot {0} is not served by any known node")]
    SlotNotCovered(u16),

    #[error("'{command}' failed on {} node(s): {}", .failed.len(), format_failures(.failed))]
    PartialFailure {
        command: String,
        failed: Vec<(String, String)>,
    },

    #[error("Cluster topology changed while '{command}' was fanned out")]
    TopologyChanged { command: String },

    #[error("{0}")]
    Response(String),

    #[error("'{command}' failed at step '{step}': {source}")]
    Emulation {
        command: String,
        step: &'static str,
        #[source]
        source: Box<AikvError>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

fn format_failures(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(node, reason)| format!("{} ({})", node, reason))
        .collect::<Vec<_>>()
        .join(", ")
}

impl AikvError {
    /// Wrap an error raised by one step of an emulated multi-key operation.
    pub fn at_step(command: &str, step: &'static str, source: AikvError) -> Self {
        AikvError::Emulation {
            command: command.to_string(),
            step,
            source: Box::new(source),
        }
    }

    /// True for failures worth retrying the whole call for: network trouble,
    /// timeouts and topology churn. Routing and atomicity errors are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            AikvError::Io(_)
            | AikvError::Timeout { .. }
            | AikvError::NodeUnavailable { .. }
            | AikvError::Redirected { .. }
            | AikvError::SlotNotCovered(_)
            | AikvError::TopologyChanged { .. }
            | AikvError::PartialFailure { .. } => true,
            AikvError::Emulation { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// True when the keys themselves must be restructured (hash tags) for the call to work.
    pub fn is_routing_error(&self) -> bool {
        match self {
            AikvError::CrossSlot { .. } | AikvError::UnsupportedInCluster { .. } => true,
            AikvError::Emulation { source, .. } => source.is_routing_error(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AikvError>;
