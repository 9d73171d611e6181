//! Error taxonomy.
//!
//! Every fallible public operation returns [`Error`], which is either a
//! [`ClientError`] (request is malformed, or the server's answer is a
//! client-fault — never retried across replicas) or a [`ServerError`]
//! (transient/remote fault — retried across replicas by the cluster).

/// Top-level error returned by all public client operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Server(#[from] ServerError),
}

impl Error {
    /// Whether this error is eligible for cross-replica retry (§7: only
    /// `ServerError`s are).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Server(_))
    }

    pub fn key_not_found() -> Self {
        Error::Client(ClientError::KeyNotFound)
    }
}

/// Request is malformed, or the server's answer is semantically a
/// client-fault. Never retried across replicas.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("key not found")]
    KeyNotFound,

    #[error("unknown store: {0}")]
    UnknownStore(String),

    #[error("store {0} is not read-only")]
    NotReadOnly(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("unrecognised schema version {0}")]
    UnknownSchemaVersion(u8),

    #[error("unsupported routing strategy: {0}")]
    UnsupportedRoutingStrategy(String),

    #[error("unsupported compressor type: {0}")]
    UnsupportedCompressor(String),

    #[error("invalid replication factor: {0}")]
    InvalidReplicationFactor(i64),

    #[error("malformed store url: {0}")]
    InvalidUrl(String),
}

/// Transient or remote fault. Retried across replicas by the cluster, and
/// internally transparent to the caller until all replicas are exhausted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServerError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("dns resolution failed: {0}")]
    DnsFailure(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("bootstrap failed: {0}")]
    BootstrapFailed(String),

    #[error("failed to parse response body: {0}")]
    MalformedResponse(String),

    #[error("no connection can handle the request")]
    NoAvailableConnection,

    #[error("shutdown requested")]
    ShutdownRequested,

    #[error("i/o error: {0}")]
    Io(String),

    #[error("server returned error {code}: {message}")]
    RemoteFault { code: i32, message: String },
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Server(ServerError::from(e))
    }
}
