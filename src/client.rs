//! The client facade.
//!
//! [`ClusterClient::dispatch`] is the single entry point: it resolves the
//! command, hands multi-key commands to the emulator and everything else to the
//! router. The typed methods are thin wrappers over it.

use crate::cluster::discovery::{ClusterSlotsDiscovery, StaticDiscovery, TopologyDiscovery};
use crate::cluster::emulator::{MultiKeyEmulator, SortSpec};
use crate::cluster::router::ClusterRouter;
use crate::cluster::slot::key_slot;
use crate::cluster::topology::{Topology, TopologyMap};
use crate::command::{CommandTable, Mode};
use crate::config::ClientConfig;
use crate::error::{AikvError, Result};
use crate::observability::RouterMetrics;
use crate::protocol::Value;
use crate::transport::{TcpTransport, Transport};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

fn arg(value: impl AsRef<[u8]>) -> Bytes {
    Bytes::copy_from_slice(value.as_ref())
}

fn args<I, T>(items: I) -> Vec<Bytes>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    items.into_iter().map(arg).collect()
}

pub struct ClusterClient {
    router: Arc<ClusterRouter>,
    emulator: MultiKeyEmulator,
}

impl ClusterClient {
    /// Connect over TCP and load the topology
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(config.connect_timeout()));
        let discovery: Arc<dyn TopologyDiscovery> = match config.cluster.mode {
            Mode::Cluster => Arc::new(ClusterSlotsDiscovery::new(
                transport.clone(),
                config.cluster.seeds.clone(),
                config.router_settings().command_timeout,
            )),
            Mode::Standalone => {
                let seed = config.cluster.seeds.first().ok_or_else(|| {
                    AikvError::Config("standalone mode needs a server address".to_string())
                })?;
                Arc::new(StaticDiscovery::single(seed.clone()))
            }
        };
        Self::with_transport(config, transport, discovery).await
    }

    /// Build on a caller-supplied transport and discovery, then load the topology
    pub async fn with_transport(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn TopologyDiscovery>,
    ) -> Result<Self> {
        let table = Arc::new(CommandTable::build(config.cluster.mode)?);
        let topology = Arc::new(TopologyMap::new(Topology::empty()));
        let router = Arc::new(ClusterRouter::new(
            table,
            topology,
            transport,
            discovery,
            config.router_settings(),
        ));
        let snapshot = router.refresh().await?;
        info!(
            mode = %config.cluster.mode,
            masters = snapshot.all_masters().len(),
            "Client ready"
        );
        Ok(Self::from_router(router))
    }

    pub fn from_router(router: Arc<ClusterRouter>) -> Self {
        Self {
            emulator: MultiKeyEmulator::new(router.clone()),
            router,
        }
    }

    /// Run any command.
    ///
    /// `command` may be a plain name or a container command; the subcommand can
    /// also be passed as the first argument (`dispatch("CONFIG", ["GET", "x"])`).
    pub async fn dispatch(&self, command: &str, args: &[Bytes]) -> Result<Value> {
        let (descriptor, consumed) = self.router.table().resolve(command, args)?;
        let args = &args[consumed..];

        if descriptor.name == "CLUSTER KEYSLOT" {
            let [key] = args else {
                return Err(AikvError::WrongArgCount("cluster keyslot".to_string()));
            };
            return Ok(Value::Int(i64::from(key_slot(key))));
        }

        if descriptor.emulation.is_some() {
            self.emulator.run(descriptor, args).await
        } else {
            self.router.route_descriptor(descriptor, args).await
        }
    }

    pub fn mode(&self) -> Mode {
        self.router.table().mode()
    }

    pub fn metrics(&self) -> Arc<RouterMetrics> {
        self.router.metrics().clone()
    }

    /// Slot of `key`, computed locally
    pub fn key_slot(&self, key: impl AsRef<[u8]>) -> u16 {
        key_slot(key.as_ref())
    }

    /// Reload the slot layout now
    pub async fn refresh_topology(&self) -> Result<()> {
        self.router.refresh().await.map(|_| ())
    }

    pub async fn ping(&self) -> Result<bool> {
        self.dispatch("PING", &[]).await?.as_bool()
    }

    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.dispatch("GET", &[arg(key)]).await?.into_optional_bytes()
    }

    pub async fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<bool> {
        self.dispatch("SET", &[arg(key), arg(value)]).await?.as_bool()
    }

    pub async fn del<T: AsRef<[u8]>>(&self, keys: &[T]) -> Result<i64> {
        self.dispatch("DEL", &args(keys)).await?.as_int()
    }

    pub async fn exists<T: AsRef<[u8]>>(&self, keys: &[T]) -> Result<i64> {
        self.dispatch("EXISTS", &args(keys)).await?.as_int()
    }

    pub async fn mget<T: AsRef<[u8]>>(&self, keys: &[T]) -> Result<Vec<Option<Bytes>>> {
        self.dispatch("MGET", &args(keys))
            .await?
            .into_array()?
            .into_iter()
            .map(Value::into_optional_bytes)
            .collect()
    }

    pub async fn mset<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, pairs: &[(K, V)]) -> Result<bool> {
        let flat: Vec<Bytes> = pairs.iter().flat_map(|(k, v)| [arg(k), arg(v)]).collect();
        self.dispatch("MSET", &flat).await?.as_bool()
    }

    pub async fn msetnx<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, pairs: &[(K, V)]) -> Result<bool> {
        let flat: Vec<Bytes> = pairs.iter().flat_map(|(k, v)| [arg(k), arg(v)]).collect();
        self.dispatch("MSETNX", &flat).await?.as_bool()
    }

    pub async fn rename(&self, source: impl AsRef<[u8]>, destination: impl AsRef<[u8]>) -> Result<bool> {
        self.dispatch("RENAME", &[arg(source), arg(destination)])
            .await?
            .as_bool()
    }

    pub async fn renamenx(&self, source: impl AsRef<[u8]>, destination: impl AsRef<[u8]>) -> Result<bool> {
        self.dispatch("RENAMENX", &[arg(source), arg(destination)])
            .await?
            .as_bool()
    }

    pub async fn keys(&self, pattern: impl AsRef<[u8]>) -> Result<Vec<Bytes>> {
        self.dispatch("KEYS", &[arg(pattern)])
            .await?
            .into_array()?
            .into_iter()
            .map(Value::into_bytes)
            .collect()
    }

    pub async fn dbsize(&self) -> Result<i64> {
        self.dispatch("DBSIZE", &[]).await?.as_int()
    }

    pub async fn flushall(&self) -> Result<bool> {
        self.dispatch("FLUSHALL", &[]).await?.as_bool()
    }

    pub async fn sadd<T: AsRef<[u8]>>(&self, key: impl AsRef<[u8]>, members: &[T]) -> Result<i64> {
        let mut all = vec![arg(key)];
        all.extend(args(members));
        self.dispatch("SADD", &all).await?.as_int()
    }

    pub async fn srem<T: AsRef<[u8]>>(&self, key: impl AsRef<[u8]>, members: &[T]) -> Result<i64> {
        let mut all = vec![arg(key)];
        all.extend(args(members));
        self.dispatch("SREM", &all).await?.as_int()
    }

    pub async fn smembers(&self, key: impl AsRef<[u8]>) -> Result<BTreeSet<Bytes>> {
        self.dispatch("SMEMBERS", &[arg(key)]).await?.into_set()
    }

    pub async fn sdiff<T: AsRef<[u8]>>(&self, keys: &[T]) -> Result<BTreeSet<Bytes>> {
        self.dispatch("SDIFF", &args(keys)).await?.into_set()
    }

    pub async fn sinter<T: AsRef<[u8]>>(&self, keys: &[T]) -> Result<BTreeSet<Bytes>> {
        self.dispatch("SINTER", &args(keys)).await?.into_set()
    }

    pub async fn sunion<T: AsRef<[u8]>>(&self, keys: &[T]) -> Result<BTreeSet<Bytes>> {
        self.dispatch("SUNION", &args(keys)).await?.into_set()
    }

    pub async fn sdiffstore<T: AsRef<[u8]>>(&self, destination: impl AsRef<[u8]>, keys: &[T]) -> Result<i64> {
        self.store("SDIFFSTORE", destination, keys).await
    }

    pub async fn sinterstore<T: AsRef<[u8]>>(&self, destination: impl AsRef<[u8]>, keys: &[T]) -> Result<i64> {
        self.store("SINTERSTORE", destination, keys).await
    }

    pub async fn sunionstore<T: AsRef<[u8]>>(&self, destination: impl AsRef<[u8]>, keys: &[T]) -> Result<i64> {
        self.store("SUNIONSTORE", destination, keys).await
    }

    async fn store<T: AsRef<[u8]>>(&self, command: &str, destination: impl AsRef<[u8]>, keys: &[T]) -> Result<i64> {
        let mut all = vec![arg(destination)];
        all.extend(args(keys));
        self.dispatch(command, &all).await?.as_int()
    }

    pub async fn smove(
        &self,
        source: impl AsRef<[u8]>,
        destination: impl AsRef<[u8]>,
        member: impl AsRef<[u8]>,
    ) -> Result<bool> {
        self.dispatch("SMOVE", &[arg(source), arg(destination), arg(member)])
            .await?
            .as_bool()
    }

    pub async fn pfadd<T: AsRef<[u8]>>(&self, key: impl AsRef<[u8]>, elements: &[T]) -> Result<bool> {
        let mut all = vec![arg(key)];
        all.extend(args(elements));
        self.dispatch("PFADD", &all).await?.as_bool()
    }

    pub async fn pfcount<T: AsRef<[u8]>>(&self, keys: &[T]) -> Result<i64> {
        self.dispatch("PFCOUNT", &args(keys)).await?.as_int()
    }

    pub async fn pfmerge<T: AsRef<[u8]>>(&self, destination: impl AsRef<[u8]>, sources: &[T]) -> Result<bool> {
        let mut all = vec![arg(destination)];
        all.extend(args(sources));
        self.dispatch("PFMERGE", &all).await?.as_bool()
    }

    pub async fn lpush<T: AsRef<[u8]>>(&self, key: impl AsRef<[u8]>, values: &[T]) -> Result<i64> {
        let mut all = vec![arg(key)];
        all.extend(args(values));
        self.dispatch("LPUSH", &all).await?.as_int()
    }

    pub async fn rpush<T: AsRef<[u8]>>(&self, key: impl AsRef<[u8]>, values: &[T]) -> Result<i64> {
        let mut all = vec![arg(key)];
        all.extend(args(values));
        self.dispatch("RPUSH", &all).await?.as_int()
    }

    pub async fn lrange(&self, key: impl AsRef<[u8]>, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        self.dispatch("LRANGE", &[arg(key), arg(start.to_string()), arg(stop.to_string())])
            .await?
            .into_array()?
            .into_iter()
            .map(Value::into_bytes)
            .collect()
    }

    pub async fn rpoplpush(&self, source: impl AsRef<[u8]>, destination: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        self.dispatch("RPOPLPUSH", &[arg(source), arg(destination)])
            .await?
            .into_optional_bytes()
    }

    pub async fn hset(
        &self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<i64> {
        self.dispatch("HSET", &[arg(key), arg(field), arg(value)])
            .await?
            .as_int()
    }

    /// SORT; the reply is the element list, or the stored count with `STORE`
    pub async fn sort(&self, spec: &SortSpec) -> Result<Value> {
        self.dispatch("SORT", &spec.to_args()).await
    }

    /// INFO from every node, keyed by node address
    pub async fn info(&self) -> Result<Value> {
        self.dispatch("INFO", &[]).await
    }
}
