//! Error types for session store operations.

/// Reasons a client-supplied token could not be opened (or a token could
/// not be sealed).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// No token was supplied, or it was empty.
    #[error("token is missing")]
    Missing,

    /// The token exceeds the maximum encoded length.
    #[error("token is too long ({0} bytes)")]
    TooLong(usize),

    /// The token could not be decoded into its parts.
    #[error("token is malformed: {0}")]
    Malformed(&'static str),

    /// None of the configured keys verifies the token's signature.
    #[error("token signature is invalid")]
    InvalidSignature,

    /// The token was issued longer ago than the configured maximum age.
    #[error("token has expired")]
    Expired,

    /// No signing key is configured.
    #[error("no signing key configured")]
    NoKeys,
}

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The storage namespace for a session id is missing where it was
    /// expected to exist.
    #[error("invalid session bucket {namespace}/{id}")]
    InvalidSession { namespace: String, id: String },

    /// The serialized payload exceeds the configured ceiling.
    #[error("session payload is too big ({size} bytes, limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The payload codec failed in either direction.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The token codec rejected a token.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// The database engine failed (I/O, lock timeout, missing table).
    #[error("storage error: {0}")]
    Storage(#[from] r2d2_sqlite::rusqlite::Error),

    /// A connection could not be checked out of the pool in time.
    #[error("storage pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Filesystem error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid store configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A background blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl SessionError {
    /// Whether this error originates in the storage engine.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Pool(_) | Self::Io(_))
    }

    /// Whether this error came from opening the client token.
    pub fn is_token(&self) -> bool {
        matches!(self, Self::Token(_))
    }
}

impl From<bincode::Error> for SessionError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<crate::config::ConfigError> for SessionError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, SessionError>;
