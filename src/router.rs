//! Consistent-hash router: maps a key to an ordered preference list of
//! up to `R` partitions whose owning nodes are all distinct.

use crate::error::{ClientError, Error};
use crate::hash::fnv_hash;

/// Dense `partition_id -> node_id` table, indexed `0..partitions.len()`.
/// Built once per bootstrap from `ClusterTopology` and never mutated.
#[derive(Debug, Clone)]
pub struct PartitionRing {
    /// `ring[partition_id] == node_id`
    owners: Vec<u32>,
}

impl PartitionRing {
    /// Build a ring from an explicit `partition_id -> node_id` table.
    /// Callers (bootstrap) are responsible for validating the invariants
    /// in spec §3 (every id present exactly once) before constructing
    /// this — `cluster.rs` does that validation against the parsed
    /// topology directly, since the error needs to name the missing/
    /// duplicate partition.
    pub fn new(owners: Vec<u32>) -> Self {
        Self { owners }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner_of(&self, partition: usize) -> u32 {
        self.owners[partition]
    }
}

/// Routing strategy name accepted from `stores.xml`.
pub const CONSISTENT_ROUTING: &str = "consistent-routing";

/// Validate a store's routing configuration (§4.A errors).
pub fn validate_routing_strategy(strategy: &str, replication_factor: i64) -> Result<(), Error> {
    if strategy != CONSISTENT_ROUTING {
        return Err(ClientError::UnsupportedRoutingStrategy(strategy.to_string()).into());
    }
    if replication_factor <= 0 {
        return Err(ClientError::InvalidReplicationFactor(replication_factor).into());
    }
    Ok(())
}

/// Walk the ring clockwise from `hash(key) mod P`, collecting distinct
/// node owners until `replication_factor` nodes are found or the walk
/// returns to the starting partition. Returns the preference list as
/// partition ids (§4.A).
pub fn preference_list(key: &[u8], ring: &PartitionRing, replication_factor: usize) -> Vec<usize> {
    if ring.is_empty() || replication_factor == 0 {
        return Vec::new();
    }

    let p = ring.len();
    let master = (fnv_hash(key) as u64 as usize) % p;

    let mut seen_nodes = std::collections::HashSet::new();
    let mut result = Vec::new();

    let mut i = master;
    loop {
        let node = ring.owner_of(i);
        if seen_nodes.insert(node) {
            result.push(i);
            if result.len() >= replication_factor {
                break;
            }
        }
        i = (i + 1) % p;
        if i == master {
            break;
        }
    }

    result
}
