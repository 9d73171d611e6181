//! Async client for a distributed, partitioned, read-only key-value
//! store: consistent-hash routing, a length-prefixed protobuf wire
//! protocol, a versioned binary record codec, and a cluster coordinator
//! that bootstraps topology from a seed node and hides transient
//! failures behind replica retry and reconnect.
//!
//! Typical use:
//! ```no_run
//! use pkv_client::{cluster::Cluster, config::ClusterClientConfig, codec::Value};
//!
//! # async fn example() -> Result<(), pkv_client::error::Error> {
//! let cluster = Cluster::new("seed.example.com", 6666, ClusterClientConfig::default());
//! cluster.connect().await?;
//! let store = cluster.store("users");
//! let value = store.get(&Value::Bytes(b"user:42".to_vec())).await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod codec;
pub mod compression;
pub mod config;
pub mod connection;
pub mod deferred;
pub mod error;
pub mod hash;
pub mod metadata;
pub mod proto;
pub mod router;
pub mod store;
pub mod url;
pub mod wire;

pub use cluster::Cluster;
pub use config::ClusterClientConfig;
pub use deferred::Deferred;
pub use error::{ClientError, Error, ServerError};
pub use store::Store;
