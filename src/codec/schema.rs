//! Recursive schema tree and its parser. A schema node is a map (ordered
//! field-name -> sub-schema), a one-element list, or a primitive (§4.C).

use super::primitive::Primitive;
use crate::error::{ClientError, Error};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Primitive(Primitive),
    List(Box<Schema>),
    /// Fields in canonical (lexicographic by name) order — this is the
    /// write order and the order fields are read back in.
    Map(Vec<(String, Schema)>),
}

/// Per-(store, version) schema table. Version `0` is used verbatim when
/// `hasVersionTag` is false (the schema version is literally `"none"`).
pub type SchemaVersions = BTreeMap<u8, Schema>;

/// Parse one schema-info body. Tolerates both JSON-style
/// (`{"a": "string"}`) and single-quoted (`{'a': 'string'}`) object/array
/// literals, since `stores.xml` in the wild contains both (§6).
pub fn parse_schema_text(text: &str) -> Result<Schema, Error> {
    let trimmed = text.trim();
    let normalized = if trimmed.contains('\'') && !trimmed.contains('"') {
        trimmed.replace('\'', "\"")
    } else {
        trimmed.to_string()
    };

    let json: serde_json::Value = serde_json::from_str(&normalized)
        .map_err(|e| ClientError::SchemaMismatch(format!("invalid schema text: {e}")))?;

    from_json(&json)
}

fn from_json(value: &serde_json::Value) -> Result<Schema, Error> {
    match value {
        serde_json::Value::String(name) => Ok(Schema::Primitive(Primitive::parse(name)?)),
        serde_json::Value::Array(items) => {
            if items.len() != 1 {
                return Err(ClientError::SchemaMismatch(format!(
                    "list schema must have exactly one element schema, found {}",
                    items.len()
                ))
                .into());
            }
            Ok(Schema::List(Box::new(from_json(&items[0])?)))
        }
        serde_json::Value::Object(map) => {
            let mut fields: Vec<(String, Schema)> =
                map.iter().map(|(k, v)| Ok((k.clone(), from_json(v)?))).collect::<Result<_, Error>>()?;
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(Schema::Map(fields))
        }
        other => Err(ClientError::SchemaMismatch(format!("unexpected schema node: {other}")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitive() {
        assert_eq!(parse_schema_text("\"string\"").unwrap(), Schema::Primitive(Primitive::String));
    }

    #[test]
    fn parses_json_style_map_sorted_lexicographically() {
        let schema = parse_schema_text(r#"{"zeta": "int32", "alpha": "string"}"#).unwrap();
        match schema {
            Schema::Map(fields) => {
                assert_eq!(fields[0].0, "alpha");
                assert_eq!(fields[1].0, "zeta");
            }
            _ => panic!("expected map"),
        }
    }

    #[test]
    fn parses_single_quoted_style() {
        let schema = parse_schema_text("{'name': 'string', 'age': 'int32'}").unwrap();
        assert!(matches!(schema, Schema::Map(_)));
    }

    #[test]
    fn parses_single_element_list() {
        let schema = parse_schema_text(r#"["int64"]"#).unwrap();
        assert_eq!(schema, Schema::List(Box::new(Schema::Primitive(Primitive::Int64))));
    }

    #[test]
    fn rejects_multi_element_list() {
        assert!(parse_schema_text(r#"["int64", "int32"]"#).is_err());
    }

    #[test]
    fn rejects_unknown_primitive() {
        assert!(parse_schema_text("\"uuid\"").is_err());
    }

    #[test]
    fn parses_nested_map_with_list() {
        let schema = parse_schema_text(r#"{"tags": ["string"], "id": "int64"}"#).unwrap();
        match schema {
            Schema::Map(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].0, "id");
                assert_eq!(fields[1].0, "tags");
                assert_eq!(fields[1].1, Schema::List(Box::new(Schema::Primitive(Primitive::String))));
            }
            _ => panic!("expected map"),
        }
    }
}
