//! Parse and framing errors.

use thiserror::Error;

/// Errors produced while parsing identities, addresses, or envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// A user id was not exactly sixteen ASCII digits.
    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    /// An `id@host` address failed to parse.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A sender label contained the NUL separator byte.
    #[error("sender label contains a NUL byte")]
    NulInSender,

    /// The framed region exceeds what a 24-bit length prefix can describe.
    #[error("framed region of {len} bytes exceeds the 24-bit length prefix")]
    FrameTooLarge {
        /// Length of the oversized region in bytes.
        len: usize,
    },

    /// The buffer ended before a complete envelope was read.
    #[error("truncated envelope")]
    TruncatedEnvelope,

    /// The envelope bytes were structurally invalid.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(&'static str),
}
