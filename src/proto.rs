//! Generated protobuf message types for the wire protocol (§4.B,
//! `proto/pkv.proto`). The message codec itself is an external
//! collaborator (`prost`); this module only exposes the generated types.
//! Public so callers (and test fixtures standing in for a server) can
//! construct wire messages directly.

include!(concat!(env!("OUT_DIR"), "/pkv.wire.rs"));
