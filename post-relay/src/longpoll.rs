//! Bounded long-poll read loop over a recipient's mailbox.
//!
//! Each cycle drains all three queue classes in priority order (SMP, then
//! PFS, then messages) and returns the union as soon as anything shows up.
//! Between cycles the task parks on a timer; dropping the request future
//! (client disconnect) cancels the wait without touching the queues. After
//! the configured number of attempts the poll returns explicitly empty so
//! the client knows to re-issue.

use std::time::Duration;

use post_types::{QueueRecord, UserId};

use crate::config::LongpollConfig;
use crate::error::Result;
use crate::mailbox::{MailboxStore, QueueClass};

/// Poll the structured queues until something arrives or the ceiling
/// elapses.
///
/// Draining clears the queues in the same atomic step, so records are
/// handed to the caller exactly once.
pub async fn poll_structured(
    mailbox: &dyn MailboxStore,
    recipient: &UserId,
    config: &LongpollConfig,
) -> Result<Vec<QueueRecord>> {
    let interval = Duration::from_millis(config.interval_ms);
    for attempt in 0..config.attempts {
        if attempt > 0 {
            tokio::time::sleep(interval).await;
        }
        let mut batch = Vec::new();
        for class in QueueClass::PRIORITY {
            batch.extend(mailbox.drain(recipient, class).await?);
        }
        if !batch.is_empty() {
            return Ok(batch);
        }
    }
    Ok(Vec::new())
}

/// Poll the binary envelope queue until something arrives or the ceiling
/// elapses. Returns concatenated envelope frames, empty if nothing came.
pub async fn poll_binary(
    mailbox: &dyn MailboxStore,
    recipient: &UserId,
    config: &LongpollConfig,
) -> Result<Vec<u8>> {
    let interval = Duration::from_millis(config.interval_ms);
    for attempt in 0..config.attempts {
        if attempt > 0 {
            tokio::time::sleep(interval).await;
        }
        let drained = mailbox.drain_envelopes(recipient).await?;
        if !drained.is_empty() {
            return Ok(drained);
        }
    }
    Ok(Vec::new())
}
