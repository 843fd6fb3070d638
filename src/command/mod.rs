//! Command metadata: how each command is routed, merged and typed.

pub mod descriptor;
pub mod merge;

pub use descriptor::{
    CommandDescriptor, CommandTable, Emulation, KeySpec, MergePolicy, Mode, ReplyKind,
    RoutingPolicy, SetOp,
};
pub use merge::{merge, NodeReply};
