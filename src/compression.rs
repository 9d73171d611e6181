//! Key/value compressors declared per-store. Only `gzip` and `identity`
//! (no-op) are supported; the binary record codec never sees a streaming
//! API — compressors operate on whole opaque byte strings (§4.D).

use crate::error::{ClientError, Error, ServerError};
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressorKind {
    Identity,
    Gzip,
}

impl CompressorKind {
    /// Parse the `type` attribute from a store's `compression` element.
    /// An empty string or `"none"` is identity; anything other than
    /// `"gzip"` is a configuration-time error.
    pub fn parse(type_name: &str) -> Result<Self, Error> {
        match type_name {
            "" | "none" => Ok(CompressorKind::Identity),
            "gzip" => Ok(CompressorKind::Gzip),
            other => Err(ClientError::UnsupportedCompressor(other.to_string()).into()),
        }
    }

    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            CompressorKind::Identity => Ok(data.to_vec()),
            CompressorKind::Gzip => {
                let mut encoder = GzEncoder::new(data, Compression::default());
                let mut out = Vec::new();
                encoder
                    .read_to_end(&mut out)
                    .map_err(|e| ServerError::Io(e.to_string()))?;
                Ok(out)
            }
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            CompressorKind::Identity => Ok(data.to_vec()),
            CompressorKind::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| ServerError::Io(e.to_string()))?;
                Ok(out)
            }
        }
    }
}
