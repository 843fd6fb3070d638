//! Observability: logging setup and routing counters

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{Counter, RouterMetrics};
