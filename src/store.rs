//! Per-store entry point (§4.G): encodes a key, routes and submits a
//! get through its owning [`Cluster`], then decodes the returned value.
//! Holds only a non-owning back-reference to the cluster — the cluster
//! is the unique owner of connections and the store registry (§9
//! "State ownership").

use crate::cluster::Cluster;
use crate::codec::{decode_record, encode_record, parse_schema_text, Schema, SchemaVersions, Value};
use crate::compression::CompressorKind;
use crate::deferred::{self, Deferred};
use crate::error::{ClientError, Error};
use crate::metadata::SerializerSpec;
use std::sync::Arc;

pub struct Store {
    cluster: Arc<Cluster>,
    name: String,
}

impl Store {
    pub(crate) fn new(cluster: Arc<Cluster>, name: String) -> Self {
        Self { cluster, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch and decode the value for `key`, routed to its owning
    /// replicas by consistent hashing. Parks behind the cluster's
    /// bootstrap future if metadata isn't loaded yet (§4.G).
    pub fn get(&self, key: &Value) -> Deferred<Value> {
        self.dispatch(key, DispatchMode::Routed)
    }

    /// Fetch and decode the value for `key` without consulting the
    /// partition ring: samples up to two connections from the cluster's
    /// pool at random and tries them in sequence (§4.F "Random
    /// selection"). For callers with no routing metadata of their own —
    /// e.g. ad-hoc inspection tools that just want any replica to answer.
    pub fn get_unrouted(&self, key: &Value) -> Deferred<Value> {
        self.dispatch(key, DispatchMode::Random)
    }

    fn dispatch(&self, key: &Value, mode: DispatchMode) -> Deferred<Value> {
        let (resolver, deferred) = deferred::channel();
        let cluster = self.cluster.clone();
        let name = self.name.clone();
        let key = key.clone();

        tokio::spawn(async move {
            match run_get(&cluster, &name, &key, mode).await {
                Ok(v) => resolver.succeed(v),
                Err(e) => resolver.fail(e),
            }
        });

        deferred
    }
}

/// Which of the cluster's two dispatch paths (§4.F) a `get` should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchMode {
    /// Consistent-hash preference list, sequential-then-parallel retry.
    Routed,
    /// No routing metadata: sample up to two connections at random.
    Random,
}

async fn run_get(cluster: &Arc<Cluster>, store_name: &str, key: &Value, mode: DispatchMode) -> Result<Value, Error> {
    let config = cluster.store_config(store_name).await?;

    if !config.is_read_only() {
        return Err(ClientError::NotReadOnly(store_name.to_string()).into());
    }

    let key_bytes = encode_side(&config.key_serializer, key)?;
    let response_bytes = match mode {
        DispatchMode::Routed => cluster.dispatch_get(&config, &key_bytes).await?,
        DispatchMode::Random => cluster.dispatch_get_random(&config, &key_bytes).await?,
    };
    let value_bytes = CompressorKind::parse(&config.value_serializer.compression)?.decode(&response_bytes)?;
    decode_side(&config.value_serializer, &value_bytes)
}

/// `keyCompressor.encode(keySerializer.encode(key))` / the value-side
/// mirror (§4.G). `identity` serializers pass `Value::Bytes` straight
/// through; anything else round-trips through the schema-driven record
/// codec using the schema set declared for that side in `stores.xml`.
fn encode_side(spec: &SerializerSpec, value: &Value) -> Result<Vec<u8>, Error> {
    let raw = if spec.type_name == "identity" {
        match value {
            Value::Bytes(b) => b.clone(),
            other => return Err(ClientError::SchemaMismatch(format!("identity serializer requires raw bytes, got {other:?}")).into()),
        }
    } else {
        let schemas = compile_schemas(spec)?;
        encode_record(value, &schemas, spec.has_version_tag)?
    };
    CompressorKind::parse(&spec.compression)?.encode(&raw)
}

fn decode_side(spec: &SerializerSpec, raw: &[u8]) -> Result<Value, Error> {
    if spec.type_name == "identity" {
        return Ok(Value::Bytes(raw.to_vec()));
    }
    let schemas = compile_schemas(spec)?;
    decode_record(raw, &schemas, spec.has_version_tag)
}

fn compile_schemas(spec: &SerializerSpec) -> Result<SchemaVersions, Error> {
    let mut schemas: SchemaVersions = SchemaVersions::new();
    for (&version, text) in &spec.schemas {
        let schema: Schema = parse_schema_text(text)?;
        schemas.insert(version, schema);
    }
    if schemas.is_empty() {
        return Err(ClientError::SchemaMismatch(format!("no schema declared for serializer type {:?}", spec.type_name)).into());
    }
    Ok(schemas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SerializerSpec;
    use std::collections::HashMap;

    fn identity_spec() -> SerializerSpec {
        SerializerSpec { type_name: "identity".into(), schemas: HashMap::new(), has_version_tag: false, compression: "none".into() }
    }

    #[test]
    fn identity_encode_decode_round_trips() {
        let spec = identity_spec();
        let value = Value::Bytes(b"raw-key".to_vec());
        let encoded = encode_side(&spec, &value).unwrap();
        assert_eq!(encoded, b"raw-key");
        assert_eq!(decode_side(&spec, &encoded).unwrap(), value);
    }

    #[test]
    fn identity_rejects_non_bytes_value() {
        let spec = identity_spec();
        assert!(encode_side(&spec, &Value::I32(5)).is_err());
    }

    #[test]
    fn schema_driven_round_trips_through_compression() {
        let mut schemas = HashMap::new();
        schemas.insert(1u8, r#""string""#.to_string());
        let spec = SerializerSpec { type_name: "json".into(), schemas, has_version_tag: true, compression: "gzip".into() };

        let value = Value::Str("hello".to_string());
        let encoded = encode_side(&spec, &value).unwrap();
        let decoded = decode_side(&spec, &encoded).unwrap();
        assert_eq!(decoded, value);
    }
}
