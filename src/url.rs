//! Convenience factory: `proto://host:port/store` -> a connected
//! [`Store`] (§6 "Library surface"). The scheme is accepted but ignored
//! — it exists so store URLs read like any other service endpoint, not
//! because this client dispatches on it.

use crate::cluster::Cluster;
use crate::config::ClusterClientConfig;
use crate::deferred::Deferred;
use crate::error::{ClientError, Error};
use crate::store::Store;
use std::sync::Arc;
use url::Url;

/// Parse `url`, bootstrap a [`Cluster`] against its host/port, and
/// return a [`Store`] for the path segment plus the cluster's bootstrap
/// future (so callers can await readiness or fire-and-forget).
pub fn connect(url: &str, config: ClusterClientConfig) -> Result<(Store, Deferred<()>), Error> {
    let parsed = Url::parse(url).map_err(|e| ClientError::InvalidUrl(format!("{url}: {e}")))?;

    let host = parsed.host_str().ok_or_else(|| ClientError::InvalidUrl(format!("{url}: missing host")))?.to_string();
    let port = parsed.port().ok_or_else(|| ClientError::InvalidUrl(format!("{url}: missing port")))?;
    let store_name = parsed.path().trim_start_matches('/');
    if store_name.is_empty() {
        return Err(ClientError::InvalidUrl(format!("{url}: missing store path segment")).into());
    }

    let cluster: Arc<Cluster> = Cluster::new(host, port, config);
    let bootstrap = cluster.connect();
    let store = cluster.store(store_name);
    Ok((store, bootstrap))
}
