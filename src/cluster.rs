//! Cluster coordinator: seed-driven bootstrap with retry, topology and
//! store registry, replica selection and retry policy (§4.F). The only
//! type in this crate that owns [`Connection`]s — [`crate::store::Store`]
//! only holds an `Arc<Cluster>` back-reference, never its own sockets.

use crate::config::ClusterClientConfig;
use crate::connection::{self, Connection, Health};
use crate::deferred::{self, Deferred};
use crate::error::{ClientError, Error, ServerError};
use crate::metadata::{self, ClusterTopology, StoreConfig};
use crate::router::{preference_list, validate_routing_strategy, PartitionRing};
use crate::store::Store;
use crate::wire;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Entry point: discovers topology from a seed node and routes reads
/// across the cluster it describes.
pub struct Cluster {
    seed_host: String,
    seed_port: u16,
    config: ClusterClientConfig,
    topology: Mutex<Option<Arc<ClusterTopology>>>,
    stores: Mutex<HashMap<String, Arc<StoreConfig>>>,
    connections: Mutex<HashMap<u32, Arc<Connection>>>,
    bootstrap: Mutex<Option<Deferred<()>>>,
    /// Lets `&self` methods hand out an owned `Arc<Cluster>` to spawned
    /// tasks without requiring every caller to hold one themselves.
    self_ref: Weak<Cluster>,
}

impl Cluster {
    /// Construct a cluster bound to a seed `(host, port)`. Does not dial
    /// anything until [`Cluster::connect`] is called.
    pub fn new(seed_host: impl Into<String>, seed_port: u16, config: ClusterClientConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            seed_host: seed_host.into(),
            seed_port,
            config,
            topology: Mutex::new(None),
            stores: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            bootstrap: Mutex::new(None),
            self_ref: weak.clone(),
        })
    }

    fn arc(&self) -> Arc<Cluster> {
        self.self_ref.upgrade().expect("Cluster outlives its own methods")
    }

    /// Trigger (or join) a bootstrap attempt. Idempotent: concurrent
    /// callers before bootstrap completes all resolve against the same
    /// attempt, and once complete the deferred resolves immediately for
    /// every subsequent caller (§4.F, §8 bootstrap idempotence).
    pub fn connect(&self) -> Deferred<()> {
        let mut guard = self.bootstrap.lock().unwrap();
        if let Some(existing) = guard.as_ref() {
            return existing.clone();
        }
        let (resolver, deferred) = deferred::channel();
        *guard = Some(deferred.clone());
        drop(guard);

        tokio::spawn(run_bootstrap(self.arc(), resolver));
        deferred
    }

    /// A store facade for `name`. Does not validate that `name` is a
    /// known store yet — that happens lazily on the first `get`, once
    /// bootstrap has supplied the store registry (§4.G).
    pub fn store(&self, name: impl Into<String>) -> Store {
        Store::new(self.arc(), name.into())
    }

    /// Graceful shutdown: close every owned connection and stop
    /// answering new bootstrap/get calls.
    pub fn close(&self) -> Deferred<()> {
        let (resolver, deferred) = deferred::channel();
        let connections = {
            let mut guard = self.connections.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        tokio::spawn(async move {
            for (_, conn) in connections {
                let _ = conn.close().await;
            }
            resolver.succeed(());
        });
        deferred
    }

    pub(crate) async fn store_config(&self, name: &str) -> Result<Arc<StoreConfig>, Error> {
        self.connect().await?;
        let stores = self.stores.lock().unwrap();
        stores.get(name).cloned().ok_or_else(|| ClientError::UnknownStore(name.to_string()).into())
    }

    /// Route `frame` (already built by the caller from an encoded key)
    /// through the replica-retry policy and return the response body
    /// bytes (§4.F). `encoded_key` is used only for routing, not
    /// resent — it's embedded in `frame` already.
    pub(crate) async fn dispatch_get(&self, store: &Arc<StoreConfig>, encoded_key: &[u8]) -> Result<Vec<u8>, Error> {
        validate_routing_strategy(&store.routing_strategy, store.replication_factor)?;

        let topology = self
            .topology
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ServerError::BootstrapFailed("topology unavailable".into()))?;

        let ring = PartitionRing::new(topology.partition_owners.clone());
        let preference = preference_list(encoded_key, &ring, store.replication_factor as usize);
        if preference.is_empty() {
            return Err(ServerError::NoAvailableConnection.into());
        }

        let connections = self.connections.lock().unwrap();
        let conns: Option<Vec<Arc<Connection>>> = preference
            .iter()
            .map(|&p| topology.partition_owners[p])
            .map(|node_id| connections.get(&node_id).cloned())
            .collect();
        let conns = conns.ok_or_else(|| ServerError::NoAvailableConnection)?;
        drop(connections);

        let frame = wire::build_get(&store.name, encoded_key);
        dispatch_sequence(conns, frame).await
    }

    /// Fallback path for callers with no routing metadata: sample up to
    /// two distinct connections uniformly and use them in sequence
    /// (§4.F "Random selection").
    pub(crate) async fn dispatch_get_random(&self, store: &Arc<StoreConfig>, key: &[u8]) -> Result<Vec<u8>, Error> {
        let mut conns: Vec<Arc<Connection>> = {
            let connections = self.connections.lock().unwrap();
            connections.values().cloned().collect()
        };
        if conns.is_empty() {
            return Err(ServerError::NoAvailableConnection.into());
        }
        conns.shuffle(&mut rand::thread_rng());
        conns.truncate(2);

        let frame = wire::build_get(&store.name, key);
        dispatch_sequence(conns, frame).await
    }
}

/// Sequential-then-parallel replica retry (§4.F, §8 scenarios 6-7): a
/// healthy head is tried alone; a server-class failure drops it and
/// recurses into the rest; a client-class failure is terminal. A bad
/// head instead fans the request out to every remaining connection in
/// parallel, so a recovering node still gets a chance to answer.
async fn dispatch_sequence(mut remaining: Vec<Arc<Connection>>, frame: Vec<u8>) -> Result<Vec<u8>, Error> {
    loop {
        if remaining.is_empty() {
            return Err(ServerError::NoAvailableConnection.into());
        }

        if remaining[0].health() == Health::Good {
            match send_and_parse(&remaining[0], &frame).await {
                Ok(value) => return Ok(value),
                Err(err @ Error::Client(_)) => return Err(err),
                Err(Error::Server(e)) => {
                    warn!("replica {} returned server error, trying next: {e}", remaining[0].addr());
                    remaining.remove(0);
                }
            }
        } else {
            return parallel_fanout(&remaining, &frame).await;
        }
    }
}

async fn parallel_fanout(conns: &[Arc<Connection>], frame: &[u8]) -> Result<Vec<u8>, Error> {
    let mut set = JoinSet::new();
    for conn in conns {
        let conn = conn.clone();
        let frame = frame.to_vec();
        set.spawn(async move { send_and_parse(&conn, &frame).await });
    }

    let mut last_server_error: Option<Error> = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err @ Error::Client(_))) => return Err(err),
            Ok(Err(e @ Error::Server(_))) => last_server_error = Some(e),
            Err(join_err) => last_server_error = Some(ServerError::Io(join_err.to_string()).into()),
        }
    }

    Err(last_server_error.unwrap_or_else(|| ServerError::NoAvailableConnection.into()))
}

async fn send_and_parse(conn: &Connection, frame: &[u8]) -> Result<Vec<u8>, Error> {
    let body = conn.submit(frame.to_vec()).await?;
    wire::parse_get(&body)
}

async fn run_bootstrap(cluster: Arc<Cluster>, mut resolver: crate::deferred::Resolver<()>) {
    loop {
        match try_bootstrap(&cluster).await {
            Ok(()) => {
                info!("bootstrap complete");
                resolver.succeed(());
                return;
            }
            Err(e) => {
                warn!("bootstrap attempt failed: {e}, retrying in {:?}", cluster.config.bootstrap_retry_interval);
                resolver.fail(e);
                tokio::time::sleep(cluster.config.bootstrap_retry_interval).await;
                let (new_resolver, new_deferred) = deferred::channel();
                *cluster.bootstrap.lock().unwrap() = Some(new_deferred);
                resolver = new_resolver;
            }
        }
    }
}

async fn try_bootstrap(cluster: &Cluster) -> Result<(), Error> {
    let seed_addr = resolve_addr(&cluster.seed_host, cluster.seed_port).await?;

    let cluster_xml = fetch_metadata(seed_addr, &cluster.config, "cluster.xml").await?;
    let topology = metadata::parse_cluster_xml(&cluster_xml)?;

    let stores_xml = fetch_metadata(seed_addr, &cluster.config, "stores.xml").await?;
    let store_configs = metadata::parse_stores_xml(&stores_xml)?;

    let mut new_connections = HashMap::with_capacity(topology.nodes.len());
    for (&node_id, node) in &topology.nodes {
        let addr = resolve_addr(&node.host, node.port).await?;
        new_connections.insert(node_id, Arc::new(Connection::connect(addr, cluster.config.clone())));
    }

    let mut stores_map = HashMap::with_capacity(store_configs.len());
    for sc in store_configs {
        stores_map.insert(sc.name.clone(), Arc::new(sc));
    }

    let old_connections = {
        let mut conns = cluster.connections.lock().unwrap();
        std::mem::replace(&mut *conns, new_connections)
    };
    *cluster.topology.lock().unwrap() = Some(Arc::new(topology));
    *cluster.stores.lock().unwrap() = stores_map;

    for (_, old) in old_connections {
        let _ = old.close();
    }

    Ok(())
}

async fn fetch_metadata(seed_addr: SocketAddr, config: &ClusterClientConfig, key: &str) -> Result<String, Error> {
    let frame = wire::build_get("metadata", key.as_bytes());
    let body = connection::one_shot_request(seed_addr, &config.protocol_tag, &frame).await?;
    let value = wire::parse_get(&body)?;
    String::from_utf8(value).map_err(|e| ServerError::MalformedResponse(format!("{key} is not valid utf-8: {e}")).into())
}

async fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, Error> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ServerError::DnsFailure(format!("{host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| ServerError::DnsFailure(format!("{host}:{port} resolved to no addresses")).into())
}
