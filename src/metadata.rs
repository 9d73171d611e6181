//! Bootstrap metadata: parses the two UTF-8 XML documents a seed node
//! serves under the pseudo-store `metadata` (§4.F, §6) — `cluster.xml`
//! into a [`ClusterTopology`], `stores.xml` into a list of
//! [`StoreConfig`]. Uses `quick_xml`'s pull-event reader the way the
//! external-XML-collaborator note in the spec calls for; this crate
//! never hands an XML tree to callers, only the parsed structs.

use crate::error::{ClientError, Error};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub node_id: u32,
    pub host: String,
    pub port: u16,
    pub partition_ids: Vec<usize>,
}

/// Parsed once per successful bootstrap; replaced atomically on
/// re-bootstrap, never mutated in place (§3).
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    pub name: String,
    pub nodes: HashMap<u32, NodeDescriptor>,
    /// `partition_id -> node_id`, dense over `0..partition_count`.
    pub partition_owners: Vec<u32>,
}

impl ClusterTopology {
    pub fn partition_count(&self) -> usize {
        self.partition_owners.len()
    }
}

#[derive(Debug, Clone)]
pub struct SerializerSpec {
    pub type_name: String,
    /// `version -> schema text`, empty for the `identity` serializer type.
    pub schemas: HashMap<u8, String>,
    pub has_version_tag: bool,
    pub compression: String,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub name: String,
    pub persistence: String,
    pub routing_strategy: String,
    pub replication_factor: i64,
    pub key_serializer: SerializerSpec,
    pub value_serializer: SerializerSpec,
}

impl StoreConfig {
    pub fn is_read_only(&self) -> bool {
        self.persistence == "read-only"
    }
}

/// Parse `cluster.xml` (§6): `/cluster/name`, and for each
/// `/cluster/server`: `id`, `host`, `socket-port`, `partitions`
/// (comma- or whitespace-separated). Validates every partition id in
/// `[0, P)` is assigned exactly once (§4.F step 2).
pub fn parse_cluster_xml(xml: &str) -> Result<ClusterTopology, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut name = String::new();
    let mut nodes: HashMap<u32, NodeDescriptor> = HashMap::new();
    let mut owners: HashMap<usize, u32> = HashMap::new();
    let mut max_partition = 0usize;

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current_server: Option<PartialServer> = None;
    let mut text_buf = String::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let tag = tag_name(&e);
                if tag == "server" {
                    current_server = Some(PartialServer::default());
                }
                path.push(tag);
                text_buf.clear();
            }
            Event::Text(t) => {
                text_buf.push_str(&t.unescape().map_err(xml_err)?);
            }
            Event::End(_) => {
                let tag = path.pop().unwrap_or_default();
                let text = std::mem::take(&mut text_buf);
                match (path.last().map(String::as_str), tag.as_str()) {
                    (Some("cluster"), "name") => name = text,
                    (Some("server"), "id") => {
                        if let Some(s) = current_server.as_mut() {
                            s.id = Some(parse_nonneg(&text, "server id")?);
                        }
                    }
                    (Some("server"), "host") => {
                        if let Some(s) = current_server.as_mut() {
                            s.host = text;
                        }
                    }
                    (Some("server"), "socket-port") => {
                        if let Some(s) = current_server.as_mut() {
                            s.port = Some(
                                text.parse::<u16>()
                                    .map_err(|_| ClientError::SchemaMismatch(format!("invalid socket-port {text:?}")))?,
                            );
                        }
                    }
                    (Some("server"), "partitions") => {
                        if let Some(s) = current_server.as_mut() {
                            s.partition_ids = parse_partition_list(&text)?;
                        }
                    }
                    (_, "server") => {
                        let server = current_server.take().ok_or_else(|| {
                            ClientError::SchemaMismatch("malformed cluster.xml: unmatched </server>".into())
                        })?;
                        let id = server
                            .id
                            .ok_or_else(|| ClientError::SchemaMismatch("server missing <id>".into()))?;
                        for &p in &server.partition_ids {
                            if owners.insert(p, id).is_some() {
                                return Err(ClientError::SchemaMismatch(format!("partition {p} assigned more than once")).into());
                            }
                            max_partition = max_partition.max(p + 1);
                        }
                        nodes.insert(
                            id,
                            NodeDescriptor { node_id: id, host: server.host, port: server.port.unwrap_or(0), partition_ids: server.partition_ids },
                        );
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let mut partition_owners = vec![u32::MAX; max_partition];
    for (p, node) in &owners {
        partition_owners[*p] = *node;
    }
    if partition_owners.iter().any(|&n| n == u32::MAX) {
        return Err(ClientError::SchemaMismatch("cluster.xml: partition table has gaps".into()).into());
    }

    Ok(ClusterTopology { name, nodes, partition_owners })
}

#[derive(Default)]
struct PartialServer {
    id: Option<u32>,
    host: String,
    port: Option<u16>,
    partition_ids: Vec<usize>,
}

/// Parse `stores.xml` (§6): for each `/stores/store`, `name`,
/// `persistence`, `routing-strategy`, `replication-factor`, and the two
/// serializer blocks.
pub fn parse_stores_xml(xml: &str) -> Result<Vec<StoreConfig>, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stores = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<PartialStore> = None;
    let mut current_serializer_side: Option<&'static str> = None;
    let mut text_buf = String::new();
    let mut pending_version: Option<SchemaVersionTag> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) => {
                let tag = tag_name(&e);
                if tag == "store" {
                    current = Some(PartialStore::default());
                }
                if tag == "key-serializer" {
                    current_serializer_side = Some("key");
                }
                if tag == "value-serializer" {
                    current_serializer_side = Some("value");
                }
                if tag == "schema-info" {
                    pending_version = Some(parse_version_tag(attr(&e, "version")?)?);
                }
                path.push(tag.clone());
                text_buf.clear();
            }
            // Self-closing elements (`<tag/>`) never get a matching `End`,
            // so they must not be pushed onto `path` — only `schema-info`
            // plausibly appears this way (an empty schema, which is
            // invalid anyway and will surface as a later lookup miss).
            Event::Empty(e) => {
                let tag = tag_name(&e);
                if tag == "schema-info" {
                    pending_version = Some(parse_version_tag(attr(&e, "version")?)?);
                }
            }
            Event::Text(t) => {
                text_buf.push_str(&t.unescape().map_err(xml_err)?);
            }
            Event::End(_) => {
                let tag = path.pop().unwrap_or_default();
                let text = std::mem::take(&mut text_buf);
                let parent = path.last().map(String::as_str);

                match (parent, tag.as_str()) {
                    (Some("store"), "name") => set_store(&mut current, |s| s.name = text),
                    (Some("store"), "persistence") => set_store(&mut current, |s| s.persistence = text),
                    (Some("store"), "routing-strategy") => set_store(&mut current, |s| s.routing_strategy = text),
                    (Some("store"), "replication-factor") => {
                        let v = text.parse::<i64>().map_err(|_| ClientError::SchemaMismatch(format!("invalid replication-factor {text:?}")))?;
                        set_store(&mut current, |s| s.replication_factor = v);
                    }
                    (Some("key-serializer"), "type") | (Some("value-serializer"), "type") => {
                        if let Some(side) = current_serializer_side {
                            set_store(&mut current, |s| {
                                let spec = side_mut(s, side);
                                spec.type_name = text.clone();
                            });
                        }
                    }
                    (Some("compression"), "type") => {
                        // nested form `<compression><type>gzip</type></compression>`
                        if let Some(side) = current_serializer_side {
                            set_store(&mut current, |s| {
                                let spec = side_mut(s, side);
                                spec.compression = text.clone();
                            });
                        }
                    }
                    (_, "schema-info") => {
                        if let (Some(side), Some(tag)) = (current_serializer_side, pending_version.take()) {
                            set_store(&mut current, |s| {
                                let spec = side_mut(s, side);
                                match tag {
                                    // `version="none"`: single untagged schema,
                                    // stored at key 0, no leading version byte
                                    // on the wire (§3, §4.C, §8 "Version framing").
                                    SchemaVersionTag::None => {
                                        spec.schemas.insert(0, text.clone());
                                    }
                                    SchemaVersionTag::Numeric(v) => {
                                        spec.schemas.insert(v, text.clone());
                                        spec.has_version_tag = true;
                                    }
                                }
                            });
                        }
                    }
                    (_, "compression") if parent != Some("store") => {
                        // text-content form `<compression>gzip</compression>`
                        if let Some(side) = current_serializer_side {
                            set_store(&mut current, |s| {
                                let spec = side_mut(s, side);
                                if spec.compression.is_empty() {
                                    spec.compression = text.clone();
                                }
                            });
                        }
                    }
                    (_, "key-serializer") => current_serializer_side = None,
                    (_, "value-serializer") => current_serializer_side = None,
                    (_, "store") => {
                        let s = current.take().ok_or_else(|| ClientError::SchemaMismatch("unmatched </store>".into()))?;
                        stores.push(s.finish()?);
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(stores)
}

/// A `schema-info`'s `version` attribute: either the literal `"none"`
/// (single untagged schema) or a numeric version (§3, §4.C).
enum SchemaVersionTag {
    None,
    Numeric(u8),
}

/// Missing `version` attribute defaults to `"0"` (numeric), matching the
/// common single-version-but-still-tagged declaration; only the literal
/// string `none` selects the untagged framing mode.
fn parse_version_tag(attr_value: Option<String>) -> Result<SchemaVersionTag, Error> {
    let text = attr_value.unwrap_or_else(|| "0".to_string());
    if text.trim().eq_ignore_ascii_case("none") {
        return Ok(SchemaVersionTag::None);
    }
    text.trim()
        .parse::<u8>()
        .map(SchemaVersionTag::Numeric)
        .map_err(|_| ClientError::SchemaMismatch(format!("invalid schema-info version {text:?}")).into())
}

#[derive(Default)]
struct PartialSerializer {
    type_name: String,
    schemas: HashMap<u8, String>,
    has_version_tag: bool,
    compression: String,
}

#[derive(Default)]
struct PartialStore {
    name: String,
    persistence: String,
    routing_strategy: String,
    replication_factor: i64,
    key_serializer: PartialSerializer,
    value_serializer: PartialSerializer,
}

impl PartialStore {
    fn finish(self) -> Result<StoreConfig, Error> {
        Ok(StoreConfig {
            name: self.name,
            persistence: self.persistence,
            routing_strategy: self.routing_strategy,
            replication_factor: self.replication_factor,
            key_serializer: SerializerSpec {
                type_name: self.key_serializer.type_name,
                schemas: self.key_serializer.schemas,
                has_version_tag: self.key_serializer.has_version_tag,
                compression: self.key_serializer.compression,
            },
            value_serializer: SerializerSpec {
                type_name: self.value_serializer.type_name,
                schemas: self.value_serializer.schemas,
                has_version_tag: self.value_serializer.has_version_tag,
                compression: self.value_serializer.compression,
            },
        })
    }
}

fn set_store(current: &mut Option<PartialStore>, f: impl FnOnce(&mut PartialStore)) {
    if let Some(s) = current.as_mut() {
        f(s);
    }
}

fn side_mut<'a>(s: &'a mut PartialStore, side: &str) -> &'a mut PartialSerializer {
    if side == "key" {
        &mut s.key_serializer
    } else {
        &mut s.value_serializer
    }
}

fn tag_name(e: &quick_xml::events::BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attr(e: &quick_xml::events::BytesStart, key: &str) -> Result<Option<String>, Error> {
    for a in e.attributes() {
        let a = a.map_err(|err| ClientError::SchemaMismatch(format!("malformed xml attribute: {err}")))?;
        if a.key.as_ref() == key.as_bytes() {
            let v = a.unescape_value().map_err(xml_err)?;
            return Ok(Some(v.into_owned()));
        }
    }
    Ok(None)
}

fn parse_nonneg(text: &str, field: &str) -> Result<u32, Error> {
    text.trim()
        .parse::<u32>()
        .map_err(|_| ClientError::SchemaMismatch(format!("invalid non-negative integer for {field}: {text:?}")).into())
}

/// `partitions` is comma- or whitespace-separated (§6).
fn parse_partition_list(text: &str) -> Result<Vec<usize>, Error> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| ClientError::SchemaMismatch(format!("invalid partition id {s:?}")).into())
        })
        .collect()
}

fn xml_err(e: quick_xml::Error) -> Error {
    ClientError::SchemaMismatch(format!("malformed xml: {e}")).into()
}
