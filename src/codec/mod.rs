//! Binary record codec: versioned, schema-driven encode/decode of keys
//! and values (§4.C). Not JSON despite the `json` serializer type name
//! used in `stores.xml` — see [`schema::parse_schema_text`].

pub mod primitive;
pub mod record;
pub mod schema;

pub use primitive::Primitive;
pub use record::{decode_record, decode_value, encode_record, encode_value, Value};
pub use schema::{parse_schema_text, Schema, SchemaVersions};
