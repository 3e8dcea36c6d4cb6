//! Per-recipient mailbox queues.
//!
//! Each recipient owns three structured classes (SMP, PFS, message) plus one
//! binary queue of framed envelopes for the generic relay path. Appends and
//! drains on a single recipient serialize on that recipient's lock, so a
//! record appended concurrently with a drain lands either fully before or
//! fully after it — never inside the gap.

use crate::error::StoreResult;
use async_trait::async_trait;
use dashmap::DashMap;
use post_types::params::ACK_TOKEN_LEN;
use post_types::{Envelope, QueueRecord, UserId};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The three structured mailbox classes, in delivery-priority order.
///
/// SMP steps deliver before PFS announcements, which deliver before
/// messages, so a client always completes authentication before key
/// rotation and key rotation before decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueClass {
    /// Socialist Millionaire Protocol steps.
    Smp,
    /// Forward-secrecy key announcements.
    Pfs,
    /// Pad batches and pad-encrypted messages.
    Message,
}

impl QueueClass {
    /// All classes, highest delivery priority first.
    pub const PRIORITY: [QueueClass; 3] = [QueueClass::Smp, QueueClass::Pfs, QueueClass::Message];
}

/// Mailbox backend seam.
///
/// The production store is in-process ([`MemoryMailbox`]); queues are
/// transit buffers, not durable storage, so a restart dropping them is
/// acceptable by design of the client protocol (clients re-poll and
/// re-submit).
#[async_trait]
pub trait MailboxStore: Send + Sync {
    /// Append a record to the back of one class queue.
    async fn append(
        &self,
        recipient: &UserId,
        class: QueueClass,
        record: QueueRecord,
    ) -> StoreResult<()>;

    /// Append a record, first discarding any undelivered records in the
    /// same class from the same sender.
    ///
    /// The discard and the append happen under one lock: a drain observes
    /// either the old record or the new one, never both.
    async fn append_replacing(
        &self,
        recipient: &UserId,
        class: QueueClass,
        record: QueueRecord,
    ) -> StoreResult<()>;

    /// Atomically read and clear one class queue, preserving FIFO order.
    async fn drain(&self, recipient: &UserId, class: QueueClass) -> StoreResult<Vec<QueueRecord>>;

    /// Append a framed envelope to the binary queue.
    async fn append_envelope(&self, recipient: &UserId, envelope: &Envelope) -> StoreResult<()>;

    /// Atomically read and clear the binary queue, returning the stored
    /// envelopes as one concatenated byte run.
    async fn drain_envelopes(&self, recipient: &UserId) -> StoreResult<Vec<u8>>;

    /// Remove binary-queue entries whose 32-byte ack prefix exactly equals
    /// one of `acks`. Returns how many entries were removed.
    async fn acknowledge(&self, recipient: &UserId, acks: &[[u8; ACK_TOKEN_LEN]])
        -> StoreResult<usize>;

    /// Number of recipients with mailbox state (gauge for `/metrics`).
    fn recipient_count(&self) -> usize;
}

/// The three structured queues for one recipient.
#[derive(Debug, Default)]
struct ClassQueues {
    smp: VecDeque<QueueRecord>,
    pfs: VecDeque<QueueRecord>,
    message: VecDeque<QueueRecord>,
}

impl ClassQueues {
    fn queue_mut(&mut self, class: QueueClass) -> &mut VecDeque<QueueRecord> {
        match class {
            QueueClass::Smp => &mut self.smp,
            QueueClass::Pfs => &mut self.pfs,
            QueueClass::Message => &mut self.message,
        }
    }
}

/// In-process mailbox store backed by dashmap.
///
/// Map entries are created on first touch and never removed, so a handle
/// cloned out of the map always refers to the live queue for that
/// recipient. An idle recipient costs three empty `VecDeque`s.
#[derive(Debug, Default)]
pub struct MemoryMailbox {
    structured: DashMap<UserId, Arc<Mutex<ClassQueues>>>,
    binary: DashMap<UserId, Arc<Mutex<VecDeque<Vec<u8>>>>>,
}

impl MemoryMailbox {
    /// Create an empty mailbox store.
    pub fn new() -> Self {
        Self::default()
    }

    fn structured_for(&self, recipient: &UserId) -> Arc<Mutex<ClassQueues>> {
        self.structured
            .entry(recipient.clone())
            .or_default()
            .clone()
    }

    fn binary_for(&self, recipient: &UserId) -> Arc<Mutex<VecDeque<Vec<u8>>>> {
        self.binary.entry(recipient.clone()).or_default().clone()
    }
}

#[async_trait]
impl MailboxStore for MemoryMailbox {
    async fn append(
        &self,
        recipient: &UserId,
        class: QueueClass,
        record: QueueRecord,
    ) -> StoreResult<()> {
        let queues = self.structured_for(recipient);
        let mut guard = queues.lock().await;
        guard.queue_mut(class).push_back(record);
        Ok(())
    }

    async fn append_replacing(
        &self,
        recipient: &UserId,
        class: QueueClass,
        record: QueueRecord,
    ) -> StoreResult<()> {
        let queues = self.structured_for(recipient);
        let mut guard = queues.lock().await;
        let queue = guard.queue_mut(class);
        queue.retain(|existing| existing.sender() != record.sender());
        queue.push_back(record);
        Ok(())
    }

    async fn drain(&self, recipient: &UserId, class: QueueClass) -> StoreResult<Vec<QueueRecord>> {
        let queues = self.structured_for(recipient);
        let mut guard = queues.lock().await;
        Ok(std::mem::take(guard.queue_mut(class)).into())
    }

    async fn append_envelope(&self, recipient: &UserId, envelope: &Envelope) -> StoreResult<()> {
        let queue = self.binary_for(recipient);
        let mut guard = queue.lock().await;
        guard.push_back(envelope.to_bytes());
        Ok(())
    }

    async fn drain_envelopes(&self, recipient: &UserId) -> StoreResult<Vec<u8>> {
        let queue = self.binary_for(recipient);
        let mut guard = queue.lock().await;
        let mut out = Vec::new();
        for entry in guard.drain(..) {
            out.extend_from_slice(&entry);
        }
        Ok(out)
    }

    async fn acknowledge(
        &self,
        recipient: &UserId,
        acks: &[[u8; ACK_TOKEN_LEN]],
    ) -> StoreResult<usize> {
        if acks.is_empty() {
            return Ok(0);
        }
        let queue = self.binary_for(recipient);
        let mut guard = queue.lock().await;
        let before = guard.len();
        guard.retain(|entry| {
            entry.len() < ACK_TOKEN_LEN
                || !acks.iter().any(|ack| &entry[..ACK_TOKEN_LEN] == ack)
        });
        Ok(before - guard.len())
    }

    fn recipient_count(&self) -> usize {
        // A recipient may appear in either map; the larger map is a lower
        // bound, which is close enough for a coarse gauge.
        self.structured.len().max(self.binary.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use post_types::SmpRecord;

    fn user(id: &str) -> UserId {
        id.parse().unwrap()
    }

    fn smp_step(sender: &str, step: i8) -> QueueRecord {
        QueueRecord::Smp(SmpRecord {
            sender: user(sender),
            step,
            question: None,
            nonce: None,
            proof: None,
        })
    }

    #[tokio::test]
    async fn drain_preserves_fifo_order() {
        let mailbox = MemoryMailbox::new();
        let bob = user("2222222222222222");

        mailbox
            .append(&bob, QueueClass::Message, smp_step("1111111111111111", 1))
            .await
            .unwrap();
        mailbox
            .append(&bob, QueueClass::Message, smp_step("3333333333333333", 2))
            .await
            .unwrap();

        let drained = mailbox.drain(&bob, QueueClass::Message).await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].sender(), &user("1111111111111111"));
        assert_eq!(drained[1].sender(), &user("3333333333333333"));

        // Drain cleared the queue.
        assert!(mailbox.drain(&bob, QueueClass::Message).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_replacing_discards_only_same_sender() {
        let mailbox = MemoryMailbox::new();
        let bob = user("2222222222222222");

        mailbox
            .append_replacing(&bob, QueueClass::Smp, smp_step("1111111111111111", 1))
            .await
            .unwrap();
        mailbox
            .append_replacing(&bob, QueueClass::Smp, smp_step("3333333333333333", 1))
            .await
            .unwrap();
        // Alice restarts her handshake; her stale step must vanish.
        mailbox
            .append_replacing(&bob, QueueClass::Smp, smp_step("1111111111111111", 2))
            .await
            .unwrap();

        let drained = mailbox.drain(&bob, QueueClass::Smp).await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].sender(), &user("3333333333333333"));
        assert_eq!(drained[1], smp_step("1111111111111111", 2));
    }

    #[tokio::test]
    async fn overwrite_is_scoped_to_one_class() {
        let mailbox = MemoryMailbox::new();
        let bob = user("2222222222222222");

        mailbox
            .append_replacing(&bob, QueueClass::Smp, smp_step("1111111111111111", 1))
            .await
            .unwrap();
        mailbox
            .append_replacing(&bob, QueueClass::Pfs, smp_step("1111111111111111", 1))
            .await
            .unwrap();

        // Replacing in PFS leaves the SMP entry alone.
        mailbox
            .append_replacing(&bob, QueueClass::Pfs, smp_step("1111111111111111", 2))
            .await
            .unwrap();

        assert_eq!(mailbox.drain(&bob, QueueClass::Smp).await.unwrap().len(), 1);
        let pfs = mailbox.drain(&bob, QueueClass::Pfs).await.unwrap();
        assert_eq!(pfs, vec![smp_step("1111111111111111", 2)]);
    }

    #[tokio::test]
    async fn recipients_are_isolated() {
        let mailbox = MemoryMailbox::new();
        let bob = user("2222222222222222");
        let carol = user("4444444444444444");

        mailbox
            .append(&bob, QueueClass::Smp, smp_step("1111111111111111", 1))
            .await
            .unwrap();

        assert!(mailbox.drain(&carol, QueueClass::Smp).await.unwrap().is_empty());
        assert_eq!(mailbox.drain(&bob, QueueClass::Smp).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn binary_drain_concatenates_envelopes() {
        let mailbox = MemoryMailbox::new();
        let bob = user("2222222222222222");

        let first = Envelope::seal("1111111111111111", b"one").unwrap();
        let second = Envelope::seal("3333333333333333@peer.example", b"two").unwrap();
        mailbox.append_envelope(&bob, &first).await.unwrap();
        mailbox.append_envelope(&bob, &second).await.unwrap();

        let drained = mailbox.drain_envelopes(&bob).await.unwrap();
        let parsed = Envelope::decode_all(&drained).unwrap();
        assert_eq!(parsed, vec![first, second]);

        assert!(mailbox.drain_envelopes(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn acknowledge_removes_exact_prefixes_only() {
        let mailbox = MemoryMailbox::new();
        let bob = user("2222222222222222");

        let keep = Envelope::seal("1111111111111111", b"keep").unwrap();
        let gone = Envelope::seal("1111111111111111", b"gone").unwrap();
        mailbox.append_envelope(&bob, &keep).await.unwrap();
        mailbox.append_envelope(&bob, &gone).await.unwrap();

        let removed = mailbox.acknowledge(&bob, &[*gone.ack_token()]).await.unwrap();
        assert_eq!(removed, 1);

        // An already-deleted or never-issued token removes nothing.
        let removed = mailbox
            .acknowledge(&bob, &[*gone.ack_token(), [0u8; ACK_TOKEN_LEN]])
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let drained = mailbox.drain_envelopes(&bob).await.unwrap();
        assert_eq!(Envelope::decode_all(&drained).unwrap(), vec![keep]);
    }

    #[tokio::test]
    async fn recipient_count_tracks_touched_mailboxes() {
        let mailbox = MemoryMailbox::new();
        assert_eq!(mailbox.recipient_count(), 0);

        mailbox
            .append(&user("2222222222222222"), QueueClass::Smp, smp_step("1111111111111111", 1))
            .await
            .unwrap();
        let envelope = Envelope::seal("1111111111111111", b"x").unwrap();
        mailbox
            .append_envelope(&user("4444444444444444"), &envelope)
            .await
            .unwrap();

        // One structured recipient, one binary recipient.
        assert_eq!(mailbox.recipient_count(), 1);
        assert_eq!(mailbox.structured.len(), 1);
        assert_eq!(mailbox.binary.len(), 1);
    }
}
