//! Command descriptor table.
//!
//! Every command reachable through [`crate::ClusterClient::dispatch`] has exactly
//! one [`CommandDescriptor`] telling the router where it goes, how fan-out replies
//! are merged and how raw replies are typed. The table is built once per client
//! and validated at construction; the cluster table differs from the standalone one
//! only by which descriptor is registered under a name.

use crate::error::{AikvError, Result};
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Deployment the table is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Partitioned keyspace served by several masters
    #[default]
    Cluster,
    /// A single server owning the whole keyspace
    Standalone,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => write!(f, "cluster"),
            Self::Standalone => write!(f, "standalone"),
        }
    }
}

/// Where the key arguments of a command sit, relative to the arguments that
/// follow the command name (and subcommand, for container commands).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    /// One key at a fixed position.
    At(usize),
    /// The first `n` arguments.
    First(usize),
    /// Every `step`-th argument from `first`, stopping `trailing` arguments before the end.
    Range {
        first: usize,
        step: usize,
        trailing: usize,
    },
    /// `leading` fixed keys, then a key count at `count_at` followed by that many keys.
    Counted { leading: usize, count_at: usize },
}

impl KeySpec {
    /// Collect the key arguments out of `args`.
    ///
    /// Returns an empty list when the arguments are too short to hold a key.
    pub fn keys<'a>(&self, args: &'a [Bytes]) -> Result<Vec<&'a Bytes>> {
        let keys = match *self {
            KeySpec::At(i) => args.get(i).into_iter().collect(),
            KeySpec::First(n) => {
                if args.len() < n {
                    Vec::new()
                } else {
                    args[..n].iter().collect()
                }
            }
            KeySpec::Range {
                first,
                step,
                trailing,
            } => {
                let end = args.len().saturating_sub(trailing);
                if first >= end {
                    Vec::new()
                } else {
                    args[first..end].iter().step_by(step.max(1)).collect()
                }
            }
            KeySpec::Counted { leading, count_at } => {
                let Some(raw) = args.get(count_at) else {
                    return Ok(Vec::new());
                };
                let count = std::str::from_utf8(raw)
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .ok_or_else(|| {
                        AikvError::InvalidArgument(format!(
                            "numkeys should be a non-negative integer, got '{}'",
                            String::from_utf8_lossy(raw)
                        ))
                    })?;
                let start = count_at + 1;
                if args.len() < start + count || leading > count_at {
                    return Ok(Vec::new());
                }
                args[..leading]
                    .iter()
                    .chain(args[start..start + count].iter())
                    .collect()
            }
        };
        Ok(keys)
    }
}

/// Which node(s) receive a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// The single node owning the slot of the key arguments; all keys must share a slot.
    SlotOf(KeySpec),
    /// Every known node, masters and replicas.
    AllNodes,
    /// Every known master.
    AllMasters,
    /// Any one node; the command carries no data affinity.
    AnyNode,
    /// Mutates node-local state; refused unless the caller addresses a node explicitly.
    Blocked,
}

/// How per-node replies are folded into one result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Exactly one reply; returned as is.
    Single,
    /// The first successful reply.
    FirstSuccess,
    /// Deduplicated concatenation of list replies; every node must succeed.
    Union,
    /// Sum of integer replies; every node must succeed.
    Sum,
    /// Logical AND of boolean replies; every node must succeed.
    AllTrue,
    /// One entry per node address; failed nodes are annotated, not fatal.
    PerNode,
}

/// How a raw reply is typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Structural conversion with no command-specific interpretation.
    Generic,
    /// Integer reply.
    Int,
    /// 1/0 integer reply as a boolean.
    Bool,
    /// Status reply: OK (or any status) is true, nil is false.
    Ok,
    /// PONG is true.
    Pong,
    /// Floating point number sent as a bulk string.
    Float,
    /// Array of members as an unordered set.
    Set,
}

/// Client-side protocol replacing a multi-key command whose keys may span slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emulation {
    /// SDIFF/SINTER/SUNION and their STORE variants.
    SetAlgebra { op: SetOp, store: bool },
    /// SMOVE as SREM then SADD.
    SetMove,
    /// PFMERGE through co-located temporary keys.
    HyperLogLogMerge,
    /// RENAME through DUMP/RESTORE.
    Rename,
    /// RENAMENX as EXISTS then RENAME.
    RenameNx,
    /// DEL/UNLINK/EXISTS/TOUCH issued per key and summed.
    PerKeySum,
    /// MGET as per-key GET.
    MultiGet,
    /// MSET as per-pair SET.
    MultiSet,
    /// MSETNX as EXISTS on every key then MSET.
    MultiSetNx,
    /// RPOPLPUSH as RPOP then LPUSH.
    PopPush,
    /// BRPOPLPUSH as BRPOP then LPUSH.
    BlockingPopPush,
    /// SORT evaluated client side.
    Sort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Diff,
    Inter,
    Union,
}

/// Static description of one command
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandDescriptor {
    /// Upper-case command name; container commands carry their subcommand ("CONFIG GET").
    pub name: &'static str,
    pub routing: RoutingPolicy,
    pub merge: MergePolicy,
    pub reply: ReplyKind,
    /// Set when the command runs through the multi-key emulator instead of the router.
    pub emulation: Option<Emulation>,
    /// The last argument is a server-side blocking timeout in seconds.
    pub blocking: bool,
}

impl CommandDescriptor {
    const fn new(name: &'static str, routing: RoutingPolicy, merge: MergePolicy, reply: ReplyKind) -> Self {
        Self {
            name,
            routing,
            merge,
            reply,
            emulation: None,
            blocking: false,
        }
    }

    const fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    const fn emulated(mut self, emulation: Emulation) -> Self {
        self.emulation = Some(emulation);
        self
    }
}

use KeySpec::{At, Counted, First};
use MergePolicy as M;
use ReplyKind as R;
use RoutingPolicy::{AllMasters, AllNodes, AnyNode, Blocked, SlotOf};

const ALL_KEYS: KeySpec = KeySpec::Range {
    first: 0,
    step: 1,
    trailing: 0,
};
const KEY_VALUE_PAIRS: KeySpec = KeySpec::Range {
    first: 0,
    step: 2,
    trailing: 0,
};
const KEYS_THEN_TIMEOUT: KeySpec = KeySpec::Range {
    first: 0,
    step: 1,
    trailing: 1,
};

const fn key(name: &'static str, reply: ReplyKind) -> CommandDescriptor {
    CommandDescriptor::new(name, SlotOf(At(0)), M::Single, reply)
}

const fn keys(name: &'static str, spec: KeySpec, reply: ReplyKind) -> CommandDescriptor {
    CommandDescriptor::new(name, SlotOf(spec), M::Single, reply)
}

const fn fan(name: &'static str, routing: RoutingPolicy, merge: MergePolicy, reply: ReplyKind) -> CommandDescriptor {
    CommandDescriptor::new(name, routing, merge, reply)
}

const fn any(name: &'static str, reply: ReplyKind) -> CommandDescriptor {
    CommandDescriptor::new(name, AnyNode, M::FirstSuccess, reply)
}

const fn blocked(name: &'static str, reply: ReplyKind) -> CommandDescriptor {
    CommandDescriptor::new(name, Blocked, M::Single, reply)
}

/// Native descriptors, valid against any deployment that routes by slot.
const NATIVE: &[CommandDescriptor] = &[
    // Strings
    key("APPEND", R::Int),
    key("BITCOUNT", R::Int),
    key("BITPOS", R::Int),
    keys("BITOP", KeySpec::Range { first: 1, step: 1, trailing: 0 }, R::Int),
    key("DECR", R::Int),
    key("DECRBY", R::Int),
    key("GET", R::Generic),
    key("GETBIT", R::Int),
    key("GETDEL", R::Generic),
    key("GETEX", R::Generic),
    key("GETRANGE", R::Generic),
    key("GETSET", R::Generic),
    key("INCR", R::Int),
    key("INCRBY", R::Int),
    key("INCRBYFLOAT", R::Float),
    keys("MGET", ALL_KEYS, R::Generic),
    keys("MSET", KEY_VALUE_PAIRS, R::Ok),
    keys("MSETNX", KEY_VALUE_PAIRS, R::Bool),
    key("PSETEX", R::Ok),
    key("SET", R::Ok),
    key("SETBIT", R::Int),
    key("SETEX", R::Ok),
    key("SETNX", R::Bool),
    key("SETRANGE", R::Int),
    key("STRLEN", R::Int),
    key("SUBSTR", R::Generic),
    // Keys
    keys("COPY", First(2), R::Bool),
    keys("DEL", ALL_KEYS, R::Int),
    key("DUMP", R::Generic),
    keys("EXISTS", ALL_KEYS, R::Int),
    key("EXPIRE", R::Bool),
    key("EXPIREAT", R::Bool),
    fan("KEYS", AllMasters, M::Union, R::Generic),
    key("MOVE", R::Bool),
    key("OBJECT ENCODING", R::Generic),
    key("OBJECT FREQ", R::Int),
    key("OBJECT IDLETIME", R::Int),
    key("OBJECT REFCOUNT", R::Int),
    key("PERSIST", R::Bool),
    key("PEXPIRE", R::Bool),
    key("PEXPIREAT", R::Bool),
    key("PTTL", R::Int),
    any("RANDOMKEY", R::Generic),
    keys("RENAME", First(2), R::Ok),
    keys("RENAMENX", First(2), R::Bool),
    key("RESTORE", R::Ok),
    any("SCAN", R::Generic),
    key("SORT", R::Generic),
    keys("TOUCH", ALL_KEYS, R::Int),
    key("TTL", R::Int),
    key("TYPE", R::Generic),
    keys("UNLINK", ALL_KEYS, R::Int),
    // Lists
    keys("BLMOVE", First(2), R::Generic).blocking(),
    keys("BLPOP", KEYS_THEN_TIMEOUT, R::Generic).blocking(),
    keys("BRPOP", KEYS_THEN_TIMEOUT, R::Generic).blocking(),
    keys("BRPOPLPUSH", First(2), R::Generic).blocking(),
    key("LINDEX", R::Generic),
    key("LINSERT", R::Int),
    key("LLEN", R::Int),
    keys("LMOVE", First(2), R::Generic),
    key("LPOP", R::Generic),
    key("LPOS", R::Generic),
    key("LPUSH", R::Int),
    key("LPUSHX", R::Int),
    key("LRANGE", R::Generic),
    key("LREM", R::Int),
    key("LSET", R::Ok),
    key("LTRIM", R::Ok),
    key("RPOP", R::Generic),
    keys("RPOPLPUSH", First(2), R::Generic),
    key("RPUSH", R::Int),
    key("RPUSHX", R::Int),
    // Hashes
    key("HDEL", R::Int),
    key("HEXISTS", R::Bool),
    key("HGET", R::Generic),
    key("HGETALL", R::Generic),
    key("HINCRBY", R::Int),
    key("HKEYS", R::Generic),
    key("HLEN", R::Int),
    key("HMGET", R::Generic),
    key("HSET", R::Int),
    key("HSETNX", R::Bool),
    key("HVALS", R::Generic),
    // Sets
    key("SADD", R::Int),
    key("SCARD", R::Int),
    keys("SDIFF", ALL_KEYS, R::Set),
    keys("SDIFFSTORE", ALL_KEYS, R::Int),
    keys("SINTER", ALL_KEYS, R::Set),
    keys("SINTERSTORE", ALL_KEYS, R::Int),
    key("SISMEMBER", R::Bool),
    key("SMEMBERS", R::Set),
    key("SMISMEMBER", R::Generic),
    keys("SMOVE", First(2), R::Bool),
    key("SPOP", R::Generic),
    key("SRANDMEMBER", R::Generic),
    key("SREM", R::Int),
    key("SSCAN", R::Generic),
    keys("SUNION", ALL_KEYS, R::Set),
    keys("SUNIONSTORE", ALL_KEYS, R::Int),
    // Sorted sets
    keys("BZPOPMAX", KEYS_THEN_TIMEOUT, R::Generic).blocking(),
    keys("BZPOPMIN", KEYS_THEN_TIMEOUT, R::Generic).blocking(),
    key("ZADD", R::Int),
    key("ZCARD", R::Int),
    key("ZCOUNT", R::Int),
    keys("ZDIFF", Counted { leading: 0, count_at: 0 }, R::Generic),
    keys("ZDIFFSTORE", Counted { leading: 1, count_at: 1 }, R::Int),
    key("ZINCRBY", R::Float),
    keys("ZINTER", Counted { leading: 0, count_at: 0 }, R::Generic),
    keys("ZINTERSTORE", Counted { leading: 1, count_at: 1 }, R::Int),
    key("ZLEXCOUNT", R::Int),
    key("ZMSCORE", R::Generic),
    key("ZPOPMAX", R::Generic),
    key("ZPOPMIN", R::Generic),
    key("ZRANDMEMBER", R::Generic),
    key("ZRANGE", R::Generic),
    key("ZRANGEBYLEX", R::Generic),
    key("ZRANGEBYSCORE", R::Generic),
    key("ZRANK", R::Generic),
    key("ZREM", R::Int),
    key("ZREMRANGEBYLEX", R::Int),
    key("ZREMRANGEBYRANK", R::Int),
    key("ZREMRANGEBYSCORE", R::Int),
    key("ZREVRANGE", R::Generic),
    key("ZREVRANGEBYSCORE", R::Generic),
    key("ZREVRANK", R::Generic),
    key("ZSCAN", R::Generic),
    key("ZSCORE", R::Float),
    keys("ZUNION", Counted { leading: 0, count_at: 0 }, R::Generic),
    keys("ZUNIONSTORE", Counted { leading: 1, count_at: 1 }, R::Int),
    // HyperLogLog
    key("PFADD", R::Int),
    keys("PFCOUNT", ALL_KEYS, R::Int),
    keys("PFMERGE", ALL_KEYS, R::Ok),
    // Connection
    fan("PING", AllNodes, M::AllTrue, R::Pong),
    fan("ECHO", AllNodes, M::PerNode, R::Generic),
    any("SELECT", R::Ok),
    // Server
    fan("BGREWRITEAOF", AllNodes, M::AllTrue, R::Ok),
    fan("BGSAVE", AllNodes, M::AllTrue, R::Ok),
    any("CLIENT ID", R::Int),
    fan("CLIENT GETNAME", AllNodes, M::PerNode, R::Generic),
    fan("CLIENT KILL", AllNodes, M::Sum, R::Int),
    fan("CLIENT LIST", AllNodes, M::PerNode, R::Generic),
    any("CLIENT SETNAME", R::Ok),
    any("COMMAND", R::Generic),
    any("COMMAND COUNT", R::Int),
    any("COMMAND INFO", R::Generic),
    fan("CONFIG GET", AllNodes, M::PerNode, R::Generic),
    fan("CONFIG RESETSTAT", AllNodes, M::AllTrue, R::Ok),
    fan("CONFIG REWRITE", AllNodes, M::AllTrue, R::Ok),
    fan("CONFIG SET", AllNodes, M::AllTrue, R::Ok),
    fan("DBSIZE", AllMasters, M::Sum, R::Int),
    fan("FLUSHALL", AllMasters, M::AllTrue, R::Ok),
    fan("FLUSHDB", AllMasters, M::AllTrue, R::Ok),
    fan("INFO", AllNodes, M::PerNode, R::Generic),
    fan("LASTSAVE", AllNodes, M::PerNode, R::Int),
    any("LOLWUT", R::Generic),
    any("REPLICAOF", R::Ok),
    fan("ROLE", AllNodes, M::PerNode, R::Generic),
    fan("SAVE", AllNodes, M::AllTrue, R::Ok),
    any("SHUTDOWN", R::Ok),
    any("SLAVEOF", R::Ok),
    fan("SLOWLOG GET", AllNodes, M::PerNode, R::Generic),
    fan("SLOWLOG LEN", AllNodes, M::PerNode, R::Int),
    fan("SLOWLOG RESET", AllNodes, M::AllTrue, R::Ok),
    any("SWAPDB", R::Ok),
    fan("TIME", AllNodes, M::PerNode, R::Generic),
    // Cluster introspection
    any("CLUSTER INFO", R::Generic),
    any("CLUSTER KEYSLOT", R::Int),
    any("CLUSTER MYID", R::Generic),
    any("CLUSTER NODES", R::Generic),
    any("CLUSTER SLOTS", R::Generic),
];

/// Descriptors registered over the native ones when the keyspace is partitioned.
const CLUSTER_OVERRIDES: &[CommandDescriptor] = &[
    // Node-local state; never broadcast silently
    blocked("BITOP", R::Int),
    blocked("CLIENT SETNAME", R::Ok),
    blocked("MOVE", R::Bool),
    blocked("REPLICAOF", R::Ok),
    blocked("SCAN", R::Generic),
    blocked("SELECT", R::Ok),
    blocked("SHUTDOWN", R::Ok),
    blocked("SLAVEOF", R::Ok),
    blocked("SWAPDB", R::Ok),
    // Multi-key commands rebuilt from single-key primitives
    keys("SDIFF", ALL_KEYS, R::Set).emulated(Emulation::SetAlgebra { op: SetOp::Diff, store: false }),
    keys("SDIFFSTORE", ALL_KEYS, R::Int).emulated(Emulation::SetAlgebra { op: SetOp::Diff, store: true }),
    keys("SINTER", ALL_KEYS, R::Set).emulated(Emulation::SetAlgebra { op: SetOp::Inter, store: false }),
    keys("SINTERSTORE", ALL_KEYS, R::Int).emulated(Emulation::SetAlgebra { op: SetOp::Inter, store: true }),
    keys("SUNION", ALL_KEYS, R::Set).emulated(Emulation::SetAlgebra { op: SetOp::Union, store: false }),
    keys("SUNIONSTORE", ALL_KEYS, R::Int).emulated(Emulation::SetAlgebra { op: SetOp::Union, store: true }),
    keys("SMOVE", First(2), R::Bool).emulated(Emulation::SetMove),
    keys("PFMERGE", ALL_KEYS, R::Ok).emulated(Emulation::HyperLogLogMerge),
    keys("RENAME", First(2), R::Ok).emulated(Emulation::Rename),
    keys("RENAMENX", First(2), R::Bool).emulated(Emulation::RenameNx),
    keys("DEL", ALL_KEYS, R::Int).emulated(Emulation::PerKeySum),
    keys("UNLINK", ALL_KEYS, R::Int).emulated(Emulation::PerKeySum),
    keys("EXISTS", ALL_KEYS, R::Int).emulated(Emulation::PerKeySum),
    keys("TOUCH", ALL_KEYS, R::Int).emulated(Emulation::PerKeySum),
    keys("MGET", ALL_KEYS, R::Generic).emulated(Emulation::MultiGet),
    keys("MSET", KEY_VALUE_PAIRS, R::Ok).emulated(Emulation::MultiSet),
    keys("MSETNX", KEY_VALUE_PAIRS, R::Bool).emulated(Emulation::MultiSetNx),
    keys("RPOPLPUSH", First(2), R::Generic).emulated(Emulation::PopPush),
    keys("BRPOPLPUSH", First(2), R::Generic).blocking().emulated(Emulation::BlockingPopPush),
    key("SORT", R::Generic).emulated(Emulation::Sort),
];

/// Immutable name → descriptor mapping
#[derive(Debug, Clone)]
pub struct CommandTable {
    mode: Mode,
    entries: HashMap<&'static str, CommandDescriptor>,
}

impl CommandTable {
    /// Build and validate the table for a deployment mode.
    ///
    /// Cluster mode registers the cluster descriptors over the native ones.
    /// Standalone mode sends everything to the one server: every policy collapses
    /// to `AnyNode` and nothing is emulated.
    pub fn build(mode: Mode) -> Result<Self> {
        let mut entries = HashMap::with_capacity(NATIVE.len());
        for descriptor in NATIVE {
            if entries.insert(descriptor.name, *descriptor).is_some() {
                return Err(AikvError::Config(format!(
                    "duplicate command descriptor: {}",
                    descriptor.name
                )));
            }
        }

        match mode {
            Mode::Cluster => {
                let mut overridden = std::collections::HashSet::new();
                for descriptor in CLUSTER_OVERRIDES {
                    if !overridden.insert(descriptor.name) {
                        return Err(AikvError::Config(format!(
                            "duplicate cluster descriptor: {}",
                            descriptor.name
                        )));
                    }
                    if entries.insert(descriptor.name, *descriptor).is_none() {
                        return Err(AikvError::Config(format!(
                            "cluster descriptor without native command: {}",
                            descriptor.name
                        )));
                    }
                }
            }
            Mode::Standalone => {
                for descriptor in entries.values_mut() {
                    descriptor.routing = AnyNode;
                    descriptor.merge = M::FirstSuccess;
                }
            }
        }

        for descriptor in entries.values() {
            validate(descriptor)?;
        }

        Ok(Self { mode, entries })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a descriptor by its exact upper-case name
    pub fn get(&self, name: &str) -> Option<&CommandDescriptor> {
        self.entries.get(name)
    }

    /// Resolve a command invocation to its descriptor.
    ///
    /// Container commands ("CONFIG GET") are matched on the command plus its first
    /// argument. Returns the descriptor and how many leading arguments were consumed
    /// as the subcommand.
    pub fn resolve(&self, command: &str, args: &[Bytes]) -> Result<(&CommandDescriptor, usize)> {
        let name = command.trim().to_uppercase();

        if let Some(first) = args.first() {
            let sub = String::from_utf8_lossy(first).to_uppercase();
            if let Some(descriptor) = self.entries.get(format!("{} {}", name, sub).as_str()) {
                return Ok((descriptor, 1));
            }
        }

        // A full "CONFIG GET" style name passed in one string
        self.entries
            .get(name.as_str())
            .map(|descriptor| (descriptor, 0))
            .ok_or(AikvError::UnknownCommand(name))
    }
}

fn validate(descriptor: &CommandDescriptor) -> Result<()> {
    let compatible = match descriptor.routing {
        SlotOf(_) | Blocked => descriptor.merge == M::Single,
        AnyNode => descriptor.merge == M::FirstSuccess,
        AllNodes | AllMasters => !matches!(descriptor.merge, M::Single | M::FirstSuccess),
    };
    if !compatible {
        return Err(AikvError::Config(format!(
            "{}: merge {:?} cannot combine {:?} replies",
            descriptor.name, descriptor.merge, descriptor.routing
        )));
    }

    if descriptor.emulation.is_some() && !matches!(descriptor.routing, SlotOf(_)) {
        return Err(AikvError::Config(format!(
            "{}: emulated commands must describe their keys",
            descriptor.name
        )));
    }

    if descriptor.name.split(' ').count() > 2 || descriptor.name != descriptor.name.to_uppercase() {
        return Err(AikvError::Config(format!(
            "malformed command name: {}",
            descriptor.name
        )));
    }

    Ok(())
}
