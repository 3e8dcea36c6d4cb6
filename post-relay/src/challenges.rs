//! Pending authentication challenges.
//!
//! A challenge is handed out by `/authenticate/init` and consumed exactly
//! once by `/authenticate/verify`. Challenges live in process memory only;
//! a restart voids them and clients simply re-initiate.

use dashmap::DashMap;
use post_types::UserId;

/// What `/authenticate/init` recorded about an outstanding challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    /// Public key the response signature must verify against.
    pub public_key: Vec<u8>,
    /// Identity claimed at init time. `None` means the caller presented a
    /// bare public key and is registering a new identity.
    pub claimed_user: Option<UserId>,
}

/// In-memory store of outstanding challenges, keyed by challenge text.
#[derive(Debug, Default)]
pub struct ChallengeStore {
    pending: DashMap<String, PendingChallenge>,
}

impl ChallengeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly issued challenge.
    pub fn insert(&self, challenge: String, pending: PendingChallenge) {
        self.pending.insert(challenge, pending);
    }

    /// Consume a challenge.
    ///
    /// The removal is atomic, so concurrent responders race for a single
    /// win and a challenge never verifies twice.
    pub fn take(&self, challenge: &str) -> Option<PendingChallenge> {
        self.pending.remove(challenge).map(|(_, pending)| pending)
    }

    /// Number of challenges awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}
