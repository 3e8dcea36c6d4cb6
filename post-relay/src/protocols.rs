//! Session-protocol coordination for SMP and PFS.
//!
//! Both sub-protocols are short-lived two-party exchanges relayed through
//! the recipient's mailbox. The server never interprets step contents; it
//! enforces exactly one rule: at most one live (undelivered) entry per
//! (recipient, sender) within a class, so a restarted handshake cannot be
//! interleaved with stale steps from its previous run.

use std::sync::Arc;

use post_types::{QueueRecord, UserId};

use crate::error::{RelayError, Result};
use crate::mailbox::{MailboxStore, QueueClass};
use crate::storage::SqliteStore;

/// Coordinates one session-protocol class (SMP or PFS).
#[derive(Clone)]
pub struct ProtocolCoordinator {
    class: QueueClass,
    store: Arc<SqliteStore>,
    mailbox: Arc<dyn MailboxStore>,
}

impl ProtocolCoordinator {
    /// Coordinator for Socialist Millionaire Protocol steps.
    pub fn smp(store: Arc<SqliteStore>, mailbox: Arc<dyn MailboxStore>) -> Self {
        Self {
            class: QueueClass::Smp,
            store,
            mailbox,
        }
    }

    /// Coordinator for forward-secrecy key announcements.
    pub fn pfs(store: Arc<SqliteStore>, mailbox: Arc<dyn MailboxStore>) -> Self {
        Self {
            class: QueueClass::Pfs,
            store,
            mailbox,
        }
    }

    /// Queue a step for `recipient`, discarding any undelivered step from
    /// the same sender in this class.
    ///
    /// No sequencing semantics are enforced; ordering correctness is the
    /// clients' job.
    pub async fn submit(&self, recipient: &UserId, record: QueueRecord) -> Result<()> {
        if !self.store.user_exists(recipient).await? {
            return Err(RelayError::NotFound("recipient does not exist".to_string()));
        }
        self.mailbox
            .append_replacing(recipient, self.class, record)
            .await?;
        Ok(())
    }

    /// Drain every queued step for `recipient` in this class, FIFO.
    pub async fn drain_for(&self, recipient: &UserId) -> Result<Vec<QueueRecord>> {
        Ok(self.mailbox.drain(recipient, self.class).await?)
    }
}

impl std::fmt::Debug for ProtocolCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolCoordinator")
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}
