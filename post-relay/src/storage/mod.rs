//! Durable storage for identities, federation peers, and the relay's own
//! signing keys.
//!
//! Mailboxes are deliberately not stored here; they are transit buffers and
//! live in process memory.

mod sqlite;

pub use sqlite::{SqliteStore, REFETCH_DATE_FORMAT};

use chrono::NaiveDate;

/// A federation peer's pinned trust material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Peer hostname, as used in addresses and fetch URLs.
    pub url: String,
    /// Peer's ML-DSA-87 public key.
    pub public_key: Vec<u8>,
    /// Date (UTC) from which the key must be refetched before use.
    pub refetch_date: NaiveDate,
}
