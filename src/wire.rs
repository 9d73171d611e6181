//! Request/response frame codec (§4.B): `uint32` big-endian length prefix
//! around a protobuf body. Only `GET`/`should_route=false` requests are
//! produced — write-path message types are a non-goal and unmodeled.

use crate::error::{ClientError, Error, ServerError};
use crate::proto::{request::RequestType as WireRequestType, Error as WireError, GetRequest, GetResponse, Request};
use prost::Message;

/// Build the wire frame (length prefix + protobuf body) for a `GET`.
pub fn build_get(store: &str, key: &[u8]) -> Vec<u8> {
    let request = Request {
        r#type: WireRequestType::Get as i32,
        should_route: Some(false),
        store: store.to_string(),
        get: Some(GetRequest { key: key.to_vec() }),
    };
    frame(&request)
}

/// Prefix a length-prefixed frame around an encoded protobuf message.
fn frame(message: &impl Message) -> Vec<u8> {
    let body = message.encode_to_vec();
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Parse a `GetResponse` body (the frame's length prefix has already
/// been stripped by the connection's receive loop) into the winning
/// value's raw bytes, applying §4.B's error/selection rules.
pub fn parse_get(body: &[u8]) -> Result<Vec<u8>, Error> {
    let response = GetResponse::decode(body).map_err(|e| ServerError::MalformedResponse(e.to_string()))?;

    if let Some(err) = &response.error {
        return Err(classify_server_error(err));
    }

    if response.versioned.is_empty() {
        return Err(ClientError::KeyNotFound.into());
    }

    let winner = response
        .versioned
        .iter()
        .enumerate()
        .max_by_key(|(idx, v)| {
            let ts = v.version.as_ref().and_then(|vc| vc.timestamp).unwrap_or(i64::MIN);
            // negate index so the first-encountered entry wins ties,
            // matching Iterator::max_by_key's "later wins ties" default.
            (ts, -(*idx as i64))
        })
        .map(|(_, v)| v)
        .expect("checked non-empty above");

    Ok(winner.value.clone())
}

/// The `error_message`-present-but-no-single-blessed-error-code path
/// (spec §9 Open Questions): messages that read as "missing key" map to
/// `KeyNotFound`, everything else is a generic server fault.
fn classify_server_error(err: &WireError) -> Error {
    let looks_like_missing_key = err.error_message.to_lowercase().contains("not found")
        || err.error_message.to_lowercase().contains("no such key");

    if looks_like_missing_key {
        ClientError::KeyNotFound.into()
    } else {
        ServerError::RemoteFault {
            code: err.error_code,
            message: err.error_message.clone(),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{ClockEntry, VectorClock, Versioned};

    #[test]
    fn build_get_produces_length_prefixed_frame() {
        let frame = build_get("mystore", b"key1");
        let len = u32::from_be_bytes(frame[0..4].try_into().unwrap()) as usize;
        assert_eq!(frame.len(), 4 + len);

        let decoded = Request::decode(&frame[4..]).unwrap();
        assert_eq!(decoded.r#type, WireRequestType::Get as i32);
        assert_eq!(decoded.should_route, Some(false));
        assert_eq!(decoded.store, "mystore");
        assert_eq!(decoded.get.unwrap().key, b"key1");
    }

    fn versioned(value: &[u8], timestamp: i64) -> Versioned {
        Versioned {
            value: value.to_vec(),
            version: Some(VectorClock {
                entries: vec![ClockEntry { node_id: Some(0), version: Some(1) }],
                timestamp: Some(timestamp),
            }),
        }
    }

    #[test]
    fn parse_get_selects_max_timestamp() {
        let response = GetResponse {
            versioned: vec![versioned(b"old", 1), versioned(b"new", 5), versioned(b"mid", 3)],
            error: None,
        };
        let body = response.encode_to_vec();
        assert_eq!(parse_get(&body).unwrap(), b"new");
    }

    #[test]
    fn parse_get_breaks_ties_on_first_encountered() {
        let response = GetResponse {
            versioned: vec![versioned(b"first", 5), versioned(b"second", 5)],
            error: None,
        };
        let body = response.encode_to_vec();
        assert_eq!(parse_get(&body).unwrap(), b"first");
    }

    #[test]
    fn parse_get_empty_versioned_is_key_not_found() {
        let response = GetResponse { versioned: vec![], error: None };
        let body = response.encode_to_vec();
        let err = parse_get(&body).unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::KeyNotFound)));
    }

    #[test]
    fn parse_get_error_maps_not_found_message_to_key_not_found() {
        let response = GetResponse {
            versioned: vec![],
            error: Some(WireError { error_code: 404, error_message: "key not found".into() }),
        };
        let body = response.encode_to_vec();
        let err = parse_get(&body).unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::KeyNotFound)));
    }

    #[test]
    fn parse_get_error_maps_other_messages_to_server_fault() {
        let response = GetResponse {
            versioned: vec![],
            error: Some(WireError { error_code: 500, error_message: "store unavailable".into() }),
        };
        let body = response.encode_to_vec();
        let err = parse_get(&body).unwrap_err();
        assert!(matches!(err, Error::Server(ServerError::RemoteFault { code: 500, .. })));
    }
}
