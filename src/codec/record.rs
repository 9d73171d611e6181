//! Recursive encode/decode of [`Value`] trees against a [`Schema`], plus
//! the version-tag framing described in spec §4.C / §8.

use super::primitive::{f32_null_bits, f64_null_bits, read_exact_bytes, read_length, write_length, Primitive};
use super::schema::{Schema, SchemaVersions};
use crate::error::{ClientError, Error};
use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::collections::BTreeMap;
use std::io::Cursor;

/// A decoded/encodable record value. Dynamically typed because the
/// schema driving it is itself data loaded at runtime from `stores.xml`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Milliseconds since epoch.
    Date(i64),
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Encode `value` against `schema` into `out`.
pub fn encode_value(value: &Value, schema: &Schema, out: &mut Vec<u8>) -> Result<(), Error> {
    match schema {
        Schema::Primitive(p) => encode_primitive(value, *p, out),
        Schema::List(elem_schema) => encode_list(value, elem_schema, out),
        Schema::Map(fields) => encode_map(value, fields, out),
    }
}

/// Decode a [`Value`] from `cursor` per `schema`.
pub fn decode_value(cursor: &mut Cursor<&[u8]>, schema: &Schema) -> Result<Value, Error> {
    match schema {
        Schema::Primitive(p) => decode_primitive(cursor, *p),
        Schema::List(elem_schema) => decode_list(cursor, elem_schema),
        Schema::Map(fields) => decode_map(cursor, fields),
    }
}

fn encode_primitive(value: &Value, kind: Primitive, out: &mut Vec<u8>) -> Result<(), Error> {
    use Primitive::*;
    match (kind, value) {
        (Boolean, Value::Null) => out.write_u8(0x80).map_err(io_err),
        (Boolean, Value::Bool(b)) => out.write_u8(if *b { 1 } else { 0 }).map_err(io_err),

        (Int8, Value::Null) => out.write_i8(i8::MIN).map_err(io_err),
        (Int8, Value::I8(v)) => write_int(out, *v as i64, i8::MIN as i64, |o, v| o.write_i8(v as i8)),

        (Int16, Value::Null) => out.write_i16::<BE>(i16::MIN).map_err(io_err),
        (Int16, Value::I16(v)) => write_int(out, *v as i64, i16::MIN as i64, |o, v| o.write_i16::<BE>(v as i16)),

        (Int32, Value::Null) => out.write_i32::<BE>(i32::MIN).map_err(io_err),
        (Int32, Value::I32(v)) => write_int(out, *v as i64, i32::MIN as i64, |o, v| o.write_i32::<BE>(v as i32)),

        (Int64, Value::Null) => out.write_i64::<BE>(i64::MIN).map_err(io_err),
        (Int64, Value::I64(v)) => {
            if *v == i64::MIN {
                return Err(ClientError::ValueOutOfRange("int64 value equals MIN sentinel".into()).into());
            }
            out.write_i64::<BE>(*v).map_err(io_err)
        }

        (Date, Value::Null) => out.write_i64::<BE>(i64::MIN).map_err(io_err),
        (Date, Value::Date(v)) => {
            if *v == i64::MIN {
                return Err(ClientError::ValueOutOfRange("date value equals MIN sentinel".into()).into());
            }
            out.write_i64::<BE>(*v).map_err(io_err)
        }

        (Float32, Value::Null) => out.write_u32::<BE>(f32_null_bits()).map_err(io_err),
        (Float32, Value::F32(v)) => {
            if v.to_bits() == f32_null_bits() {
                return Err(ClientError::ValueOutOfRange("float32 value equals NULL sentinel".into()).into());
            }
            out.write_u32::<BE>(v.to_bits()).map_err(io_err)
        }

        (Float64, Value::Null) => out.write_u64::<BE>(f64_null_bits()).map_err(io_err),
        (Float64, Value::F64(v)) => {
            if v.to_bits() == f64_null_bits() {
                return Err(ClientError::ValueOutOfRange("float64 value equals NULL sentinel".into()).into());
            }
            out.write_u64::<BE>(v.to_bits()).map_err(io_err)
        }

        (String, Value::Null) => write_length(out, None),
        (String, Value::Str(s)) => {
            write_length(out, Some(s.len()))?;
            out.extend_from_slice(s.as_bytes());
            Ok(())
        }

        (Bytes, Value::Null) => write_length(out, None),
        (Bytes, Value::Bytes(b)) => {
            write_length(out, Some(b.len()))?;
            out.extend_from_slice(b);
            Ok(())
        }

        (expected, got) => Err(ClientError::SchemaMismatch(format!(
            "value {got:?} does not match primitive schema {expected:?}"
        ))
        .into()),
    }
}

fn write_int(
    out: &mut Vec<u8>,
    value: i64,
    min: i64,
    writer: impl FnOnce(&mut Vec<u8>, i64) -> std::io::Result<()>,
) -> Result<(), Error> {
    if value == min {
        return Err(ClientError::ValueOutOfRange(format!("integer value equals MIN sentinel ({min})")).into());
    }
    writer(out, value).map_err(io_err)
}

fn decode_primitive(cursor: &mut Cursor<&[u8]>, kind: Primitive) -> Result<Value, Error> {
    use Primitive::*;
    Ok(match kind {
        Boolean => {
            let b = cursor.read_u8().map_err(io_err)?;
            if b == 0x80 {
                Value::Null
            } else {
                Value::Bool(b != 0)
            }
        }
        Int8 => {
            let v = cursor.read_i8().map_err(io_err)?;
            if v == i8::MIN {
                Value::Null
            } else {
                Value::I8(v)
            }
        }
        Int16 => {
            let v = cursor.read_i16::<BE>().map_err(io_err)?;
            if v == i16::MIN {
                Value::Null
            } else {
                Value::I16(v)
            }
        }
        Int32 => {
            let v = cursor.read_i32::<BE>().map_err(io_err)?;
            if v == i32::MIN {
                Value::Null
            } else {
                Value::I32(v)
            }
        }
        Int64 => {
            let v = cursor.read_i64::<BE>().map_err(io_err)?;
            if v == i64::MIN {
                Value::Null
            } else {
                Value::I64(v)
            }
        }
        Date => {
            let v = cursor.read_i64::<BE>().map_err(io_err)?;
            if v == i64::MIN {
                Value::Null
            } else {
                Value::Date(v)
            }
        }
        Float32 => {
            let bits = cursor.read_u32::<BE>().map_err(io_err)?;
            if bits == f32_null_bits() {
                Value::Null
            } else {
                Value::F32(f32::from_bits(bits))
            }
        }
        Float64 => {
            let bits = cursor.read_u64::<BE>().map_err(io_err)?;
            if bits == f64_null_bits() {
                Value::Null
            } else {
                Value::F64(f64::from_bits(bits))
            }
        }
        String => match read_length(cursor)? {
            None => Value::Null,
            Some(len) => {
                let bytes = read_exact_bytes(cursor, len)?;
                Value::Str(std::string::String::from_utf8(bytes).map_err(|e| {
                    Error::from(ClientError::SchemaMismatch(format!("invalid utf-8 in string field: {e}")))
                })?)
            }
        },
        Bytes => match read_length(cursor)? {
            None => Value::Null,
            Some(len) => Value::Bytes(read_exact_bytes(cursor, len)?),
        },
    })
}

fn encode_list(value: &Value, elem_schema: &Schema, out: &mut Vec<u8>) -> Result<(), Error> {
    match value {
        Value::Null => write_length(out, None),
        Value::List(items) => {
            write_length(out, Some(items.len()))?;
            for item in items {
                encode_value(item, elem_schema, out)?;
            }
            Ok(())
        }
        other => Err(ClientError::SchemaMismatch(format!("value {other:?} does not match list schema")).into()),
    }
}

fn decode_list(cursor: &mut Cursor<&[u8]>, elem_schema: &Schema) -> Result<Value, Error> {
    match read_length(cursor)? {
        None => Ok(Value::Null),
        Some(n) => {
            let mut items = Vec::with_capacity(n.min(1 << 16));
            for _ in 0..n {
                items.push(decode_value(cursor, elem_schema)?);
            }
            Ok(Value::List(items))
        }
    }
}

const MAP_NULL: u8 = 0xFF;
const MAP_PRESENT: u8 = 0x01;

fn encode_map(value: &Value, fields: &[(std::string::String, Schema)], out: &mut Vec<u8>) -> Result<(), Error> {
    match value {
        Value::Null => {
            out.push(MAP_NULL);
            Ok(())
        }
        Value::Map(m) => {
            if m.len() != fields.len() || fields.iter().any(|(name, _)| !m.contains_key(name)) {
                return Err(ClientError::SchemaMismatch(
                    "record's key set does not match the schema's key set".into(),
                )
                .into());
            }
            out.push(MAP_PRESENT);
            for (name, field_schema) in fields {
                // presence already checked above
                encode_value(&m[name], field_schema, out)?;
            }
            Ok(())
        }
        other => Err(ClientError::SchemaMismatch(format!("value {other:?} does not match map schema")).into()),
    }
}

fn decode_map(cursor: &mut Cursor<&[u8]>, fields: &[(std::string::String, Schema)]) -> Result<Value, Error> {
    let marker = cursor.read_u8().map_err(io_err)?;
    match marker {
        MAP_NULL => Ok(Value::Null),
        MAP_PRESENT => {
            let mut map = BTreeMap::new();
            for (name, field_schema) in fields {
                map.insert(name.clone(), decode_value(cursor, field_schema)?);
            }
            Ok(Value::Map(map))
        }
        other => Err(ClientError::SchemaMismatch(format!("unexpected map marker byte {other:#x}")).into()),
    }
}

/// Encode a full record with version-tag framing (§4.C, §8).
///
/// With `has_version_tag`, the writer always uses the highest-numbered
/// schema and prefixes the output with that version byte. Without it,
/// there is exactly one schema (keyed `0`) and no prefix is written.
pub fn encode_record(value: &Value, schemas: &SchemaVersions, has_version_tag: bool) -> Result<Vec<u8>, Error> {
    let (&version, schema) = schemas
        .iter()
        .next_back()
        .ok_or_else(|| Error::from(ClientError::SchemaMismatch("no schema versions declared".into())))?;

    let mut out = Vec::new();
    if has_version_tag {
        out.push(version);
    }
    encode_value(value, schema, &mut out)?;
    Ok(out)
}

/// Decode a full record, selecting the schema by the leading version
/// byte when `has_version_tag` is set, or schema `0` otherwise.
pub fn decode_record(bytes: &[u8], schemas: &SchemaVersions, has_version_tag: bool) -> Result<Value, Error> {
    let mut cursor = Cursor::new(bytes);
    let version = if has_version_tag {
        cursor.read_u8().map_err(io_err)?
    } else {
        0
    };
    let schema = schemas
        .get(&version)
        .ok_or(ClientError::UnknownSchemaVersion(version))?;
    decode_value(&mut cursor, schema)
}

fn io_err(e: std::io::Error) -> Error {
    ClientError::SchemaMismatch(format!("truncated or malformed record: {e}")).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::schema::parse_schema_text;

    fn schemas_with(version: u8, text: &str) -> SchemaVersions {
        let mut m = SchemaVersions::new();
        m.insert(version, parse_schema_text(text).unwrap());
        m
    }

    #[test]
    fn short_string_round_trip_matches_spec_vector() {
        let schemas = schemas_with(0, "\"string\"");
        let encoded = encode_record(&Value::Str("hello".into()), &schemas, true).unwrap();
        assert_eq!(encoded, vec![0x00, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o']);

        let decoded = decode_record(&encoded, &schemas, true).unwrap();
        assert_eq!(decoded, Value::Str("hello".into()));
    }

    #[test]
    fn mid_range_string_matches_spec_vector() {
        let schemas = schemas_with(0, "\"string\"");
        let text = "hellohello".repeat(1700);
        let encoded = encode_record(&Value::Str(text.clone()), &schemas, true).unwrap();
        assert_eq!(&encoded[..3], &[0x00, 0x42, 0x68]);
        assert_eq!(&encoded[3..], text.as_bytes());
    }

    #[test]
    fn large_string_matches_spec_vector() {
        let schemas = schemas_with(0, "\"string\"");
        let text = "hellohello".repeat(3400);
        let encoded = encode_record(&Value::Str(text.clone()), &schemas, true).unwrap();
        assert_eq!(&encoded[..5], &[0x00, 0xC0, 0x00, 0x84, 0xD0]);
        assert_eq!(&encoded[5..], text.as_bytes());
    }

    #[test]
    fn no_version_tag_omits_prefix_and_uses_schema_zero() {
        let schemas = schemas_with(0, "\"int32\"");
        let encoded = encode_record(&Value::I32(42), &schemas, false).unwrap();
        assert_eq!(encoded, vec![0x00, 0x00, 0x00, 0x2A]);
        assert_eq!(decode_record(&encoded, &schemas, false).unwrap(), Value::I32(42));
    }

    #[test]
    fn version_tag_uses_highest_schema_version() {
        let mut schemas = SchemaVersions::new();
        schemas.insert(0, parse_schema_text("\"int32\"").unwrap());
        schemas.insert(3, parse_schema_text("\"int64\"").unwrap());
        let encoded = encode_record(&Value::I64(7), &schemas, true).unwrap();
        assert_eq!(encoded[0], 3);
    }

    #[test]
    fn unknown_schema_version_is_client_error() {
        let schemas = schemas_with(0, "\"int32\"");
        let mut bytes = vec![5u8];
        bytes.extend_from_slice(&42i32.to_be_bytes());
        let err = decode_record(&bytes, &schemas, true).unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::UnknownSchemaVersion(5))));
    }

    #[test]
    fn null_round_trips_for_each_primitive() {
        let cases = [
            ("\"boolean\"", Value::Null),
            ("\"int8\"", Value::Null),
            ("\"int16\"", Value::Null),
            ("\"int32\"", Value::Null),
            ("\"int64\"", Value::Null),
            ("\"float32\"", Value::Null),
            ("\"float64\"", Value::Null),
            ("\"date\"", Value::Null),
            ("\"string\"", Value::Null),
            ("\"bytes\"", Value::Null),
        ];
        for (schema_text, value) in cases {
            let schemas = schemas_with(0, schema_text);
            let encoded = encode_record(&value, &schemas, false).unwrap();
            assert_eq!(decode_record(&encoded, &schemas, false).unwrap(), Value::Null, "{schema_text}");
        }
    }

    #[test]
    fn int8_min_is_rejected_on_write_but_decodes_as_null() {
        let schemas = schemas_with(0, "\"int8\"");
        let err = encode_record(&Value::I8(i8::MIN), &schemas, false).unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::ValueOutOfRange(_))));

        // -128 on the wire decodes as NULL, never as a real value (the
        // asymmetry spec.md §9 requires preserving verbatim).
        let bytes = vec![i8::MIN as u8];
        assert_eq!(decode_record(&bytes, &schemas, false).unwrap(), Value::Null);
    }

    #[test]
    fn float_sentinel_value_is_rejected_on_write() {
        let schemas = schemas_with(0, "\"float32\"");
        let sentinel = f32::from_bits(f32_null_bits());
        assert!(encode_record(&Value::F32(sentinel), &schemas, false).is_err());
    }

    #[test]
    fn map_round_trip_with_exact_key_set() {
        let schemas = schemas_with(0, r#"{"name": "string", "age": "int32"}"#);
        let mut m = BTreeMap::new();
        m.insert("name".to_string(), Value::Str("ada".into()));
        m.insert("age".to_string(), Value::I32(30));
        let value = Value::Map(m);

        let encoded = encode_record(&value, &schemas, false).unwrap();
        assert_eq!(decode_record(&encoded, &schemas, false).unwrap(), value);
    }

    #[test]
    fn map_rejects_missing_or_extra_keys() {
        let schemas = schemas_with(0, r#"{"name": "string", "age": "int32"}"#);
        let mut missing_age = BTreeMap::new();
        missing_age.insert("name".to_string(), Value::Str("ada".into()));
        assert!(encode_record(&Value::Map(missing_age), &schemas, false).is_err());

        let mut extra = BTreeMap::new();
        extra.insert("name".to_string(), Value::Str("ada".into()));
        extra.insert("age".to_string(), Value::I32(1));
        extra.insert("extra".to_string(), Value::Bool(true));
        assert!(encode_record(&Value::Map(extra), &schemas, false).is_err());
    }

    #[test]
    fn null_map_round_trips() {
        let schemas = schemas_with(0, r#"{"name": "string"}"#);
        let encoded = encode_record(&Value::Null, &schemas, false).unwrap();
        assert_eq!(encoded, vec![0xFF]);
        assert_eq!(decode_record(&encoded, &schemas, false).unwrap(), Value::Null);
    }

    #[test]
    fn list_of_records_round_trips() {
        let schemas = schemas_with(0, r#"["int32"]"#);
        let value = Value::List(vec![Value::I32(1), Value::I32(2), Value::I32(3)]);
        let encoded = encode_record(&value, &schemas, false).unwrap();
        assert_eq!(decode_record(&encoded, &schemas, false).unwrap(), value);
    }

    #[test]
    fn null_list_round_trips() {
        let schemas = schemas_with(0, r#"["int32"]"#);
        let encoded = encode_record(&Value::Null, &schemas, false).unwrap();
        assert_eq!(decode_record(&encoded, &schemas, false).unwrap(), Value::Null);
    }

    #[test]
    fn nested_map_with_list_field_round_trips() {
        let schemas = schemas_with(0, r#"{"id": "int64", "tags": ["string"]}"#);
        let mut m = BTreeMap::new();
        m.insert("id".to_string(), Value::I64(9));
        m.insert(
            "tags".to_string(),
            Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]),
        );
        let value = Value::Map(m);
        let encoded = encode_record(&value, &schemas, false).unwrap();
        assert_eq!(decode_record(&encoded, &schemas, false).unwrap(), value);
    }
}
