//! Cluster awareness: slot hashing, topology, routing and multi-key emulation.
//!
//! ```text
//!            dispatch(command, args)
//!                     │
//!          ┌──────────┴──────────┐
//!          ▼                     ▼
//!   MultiKeyEmulator ───▶  ClusterRouter ───▶ Transport ───▶ nodes
//!   (cross-slot ops)       │        ▲
//!                          ▼        │ MOVED / refresh
//!                     TopologyMap ◀─┘
//! ```

pub mod discovery;
pub mod emulator;
pub mod lease;
pub mod router;
pub mod slot;
pub mod topology;
pub mod types;

pub use discovery::{ClusterSlotsDiscovery, StaticDiscovery, TopologyDiscovery};
pub use emulator::{MultiKeyEmulator, SortSpec};
pub use lease::TemporaryKeyLease;
pub use router::{ClusterRouter, RouterSettings};
pub use slot::{hash_tag, key_slot, SLOT_COUNT};
pub use topology::{Topology, TopologyMap};
pub use types::{Node, NodeId, NodeRole, ShardInfo, SlotRange};
