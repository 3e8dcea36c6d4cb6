//! Error types for the relay.

use post_types::WireError;

/// Main error type for relay operations.
///
/// Variants correspond one-to-one with HTTP statuses; the mapping lives in
/// the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The request was malformed or violated a protocol shape.
    #[error("{0}")]
    Validation(String),

    /// Credentials, challenges, or signatures failed verification.
    #[error("{0}")]
    Auth(String),

    /// A federation peer or target failed a trust check.
    #[error("{0}")]
    Trust(String),

    /// The referenced user, challenge, or resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The caller exceeded a rate limit.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A cryptographic operation failed internally.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// A federation peer was unreachable or sent garbage.
    #[error("federation transport failure: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WireError> for RelayError {
    fn from(err: WireError) -> Self {
        RelayError::Validation(err.to_string())
    }
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An insert violated a uniqueness constraint.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Constraint description reported by the database.
        constraint: String,
    },

    /// Every sampled candidate id collided with an existing row.
    #[error("could not allocate an unused user id after {0} attempts")]
    IdSpaceExhausted(u32),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
