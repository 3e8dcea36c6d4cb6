//! Application-layer ciphertext relay.
//!
//! Handles the `message` mailbox class (pad batches and pad-encrypted
//! messages) and the binary envelope queue used by the generic relay path.
//! Payloads are structurally validated and relayed byte-for-byte; nothing
//! here can read them.

use std::sync::Arc;

use post_types::params::{ML_DSA_87_SIG_LEN, OTP_BATCH_CT_LEN, OTP_MESSAGE_MAX_LEN};
use post_types::{Envelope, MessageKind, MessageRecord, QueueRecord, UserId};
use serde::Deserialize;

use crate::error::{RelayError, Result};
use crate::mailbox::{MailboxStore, QueueClass};
use crate::storage::SqliteStore;
use crate::validate::{decode_b64_exact, decode_b64_max};

/// Inner shape of a pad-batch submission. Parsed for validation only; the
/// original string is what gets relayed.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OtpBatchPayload {
    ciphertext_blob: String,
    #[allow(dead_code)]
    replay_protection_number: i64,
}

/// Inner shape of a pad-encrypted message submission.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OtpMessagePayload {
    message_encrypted: String,
    #[allow(dead_code)]
    replay_protection_number: i64,
}

/// Validates and enqueues message-class records and binary envelopes.
#[derive(Clone)]
pub struct MessageRelay {
    store: Arc<SqliteStore>,
    mailbox: Arc<dyn MailboxStore>,
}

impl MessageRelay {
    /// Build the relay.
    pub fn new(store: Arc<SqliteStore>, mailbox: Arc<dyn MailboxStore>) -> Self {
        Self { store, mailbox }
    }

    /// Queue a freshly encrypted pad batch for `recipient`.
    ///
    /// The inner JSON must carry exactly `ciphertext_blob` (base64 of
    /// [`OTP_BATCH_CT_LEN`] bytes) and an integer
    /// `replay_protection_number`; the signature is length-checked only,
    /// since it is verified end-to-end by the recipient.
    pub async fn submit_otp_batch(
        &self,
        sender: &UserId,
        recipient: &UserId,
        json_payload: String,
        payload_signature: String,
    ) -> Result<()> {
        decode_b64_exact("payload_signature", &payload_signature, ML_DSA_87_SIG_LEN)?;
        self.require_recipient(recipient).await?;

        let inner: OtpBatchPayload = serde_json::from_str(&json_payload)
            .map_err(|_| malformed_inner())?;
        decode_b64_exact("ciphertext_blob", &inner.ciphertext_blob, OTP_BATCH_CT_LEN)
            .map_err(|_| malformed_inner())?;

        self.enqueue(sender, recipient, MessageKind::NewOtpBatch, json_payload, payload_signature)
            .await
    }

    /// Queue a pad-encrypted message for `recipient`.
    pub async fn submit_otp_message(
        &self,
        sender: &UserId,
        recipient: &UserId,
        json_payload: String,
        payload_signature: String,
    ) -> Result<()> {
        decode_b64_exact("payload_signature", &payload_signature, ML_DSA_87_SIG_LEN)?;
        self.require_recipient(recipient).await?;

        let inner: OtpMessagePayload = serde_json::from_str(&json_payload)
            .map_err(|_| malformed_inner())?;
        decode_b64_max("message_encrypted", &inner.message_encrypted, OTP_MESSAGE_MAX_LEN)
            .map_err(|_| malformed_inner())?;

        self.enqueue(sender, recipient, MessageKind::NewMessage, json_payload, payload_signature)
            .await
    }

    /// Frame `payload` from a local `sender` and append it to `recipient`'s
    /// binary queue.
    pub async fn submit_envelope(
        &self,
        sender: &UserId,
        recipient: &UserId,
        payload: &[u8],
    ) -> Result<()> {
        self.require_recipient(recipient).await?;
        let envelope = Envelope::seal(sender.as_str(), payload)?;
        self.mailbox.append_envelope(recipient, &envelope).await?;
        Ok(())
    }

    /// Drain the message class for `recipient`.
    pub async fn drain_for(&self, recipient: &UserId) -> Result<Vec<QueueRecord>> {
        Ok(self.mailbox.drain(recipient, QueueClass::Message).await?)
    }

    /// Drain `recipient`'s binary queue into one concatenated byte run.
    pub async fn drain_envelopes(&self, recipient: &UserId) -> Result<Vec<u8>> {
        Ok(self.mailbox.drain_envelopes(recipient).await?)
    }

    /// Delete acknowledged envelopes from `recipient`'s binary queue.
    pub async fn acknowledge(&self, recipient: &UserId, acks: &[[u8; 32]]) -> Result<usize> {
        Ok(self.mailbox.acknowledge(recipient, acks).await?)
    }

    async fn require_recipient(&self, recipient: &UserId) -> Result<()> {
        if self.store.user_exists(recipient).await? {
            Ok(())
        } else {
            Err(RelayError::NotFound("recipient does not exist".to_string()))
        }
    }

    async fn enqueue(
        &self,
        sender: &UserId,
        recipient: &UserId,
        msg_type: MessageKind,
        json_payload: String,
        payload_signature: String,
    ) -> Result<()> {
        let record = QueueRecord::Message(MessageRecord {
            sender: sender.clone(),
            msg_type,
            json_payload,
            payload_signature,
        });
        self.mailbox
            .append(recipient, QueueClass::Message, record)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for MessageRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRelay").finish_non_exhaustive()
    }
}

fn malformed_inner() -> RelayError {
    RelayError::Validation("inner JSON payload is malformed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MemoryMailbox;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    async fn fixture() -> (MessageRelay, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let mailbox: Arc<dyn MailboxStore> = Arc::new(MemoryMailbox::new());
        (MessageRelay::new(store.clone(), mailbox), store)
    }

    fn ids() -> (UserId, UserId) {
        (
            "1111111111111111".parse().unwrap(),
            "2222222222222222".parse().unwrap(),
        )
    }

    fn signature() -> String {
        BASE64.encode(vec![7u8; ML_DSA_87_SIG_LEN])
    }

    fn batch_payload(blob_len: usize) -> String {
        serde_json::json!({
            "ciphertext_blob": BASE64.encode(vec![1u8; blob_len]),
            "replay_protection_number": 3,
        })
        .to_string()
    }

    #[tokio::test]
    async fn batch_is_validated_and_relayed_verbatim() {
        let (relay, store) = fixture().await;
        let (alice, bob) = ids();
        store.create_user(&bob, &[1u8; 32]).await.unwrap();

        let payload = batch_payload(OTP_BATCH_CT_LEN);
        relay
            .submit_otp_batch(&alice, &bob, payload.clone(), signature())
            .await
            .unwrap();

        let drained = relay.drain_for(&bob).await.unwrap();
        assert_eq!(drained.len(), 1);
        match &drained[0] {
            QueueRecord::Message(record) => {
                assert_eq!(record.sender, alice);
                assert_eq!(record.msg_type, MessageKind::NewOtpBatch);
                // Relayed as the submitted string, not re-serialized.
                assert_eq!(record.json_payload, payload);
            }
            other => panic!("expected message record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_ciphertext_length_is_exact() {
        let (relay, store) = fixture().await;
        let (alice, bob) = ids();
        store.create_user(&bob, &[1u8; 32]).await.unwrap();

        for bad_len in [OTP_BATCH_CT_LEN - 1, OTP_BATCH_CT_LEN + 1, 0] {
            let err = relay
                .submit_otp_batch(&alice, &bob, batch_payload(bad_len), signature())
                .await
                .unwrap_err();
            assert!(matches!(err, RelayError::Validation(_)), "len {bad_len}");
        }
    }

    #[tokio::test]
    async fn inner_payload_fields_are_strict() {
        let (relay, store) = fixture().await;
        let (alice, bob) = ids();
        store.create_user(&bob, &[1u8; 32]).await.unwrap();

        let cases = [
            // Not JSON at all.
            "not json".to_string(),
            // Missing replay_protection_number.
            serde_json::json!({"ciphertext_blob": BASE64.encode(vec![1u8; OTP_BATCH_CT_LEN])})
                .to_string(),
            // Non-integer replay counter.
            serde_json::json!({
                "ciphertext_blob": BASE64.encode(vec![1u8; OTP_BATCH_CT_LEN]),
                "replay_protection_number": "7",
            })
            .to_string(),
            // Unknown extra field.
            serde_json::json!({
                "ciphertext_blob": BASE64.encode(vec![1u8; OTP_BATCH_CT_LEN]),
                "replay_protection_number": 7,
                "extra": true,
            })
            .to_string(),
        ];
        for payload in cases {
            let err = relay
                .submit_otp_batch(&alice, &bob, payload.clone(), signature())
                .await
                .unwrap_err();
            match err {
                RelayError::Validation(msg) => assert!(msg.contains("inner JSON")),
                other => panic!("expected validation error for {payload:?}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn message_ciphertext_is_bounded_not_exact() {
        let (relay, store) = fixture().await;
        let (alice, bob) = ids();
        store.create_user(&bob, &[1u8; 32]).await.unwrap();

        let payload = |len: usize| {
            serde_json::json!({
                "message_encrypted": BASE64.encode(vec![2u8; len]),
                "replay_protection_number": 1,
            })
            .to_string()
        };

        relay
            .submit_otp_message(&alice, &bob, payload(1), signature())
            .await
            .unwrap();
        relay
            .submit_otp_message(&alice, &bob, payload(OTP_MESSAGE_MAX_LEN), signature())
            .await
            .unwrap();
        let err = relay
            .submit_otp_message(&alice, &bob, payload(OTP_MESSAGE_MAX_LEN + 1), signature())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        // Messages accumulate; no overwrite discipline in this class.
        assert_eq!(relay.drain_for(&bob).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn signature_length_is_checked_not_verified() {
        let (relay, store) = fixture().await;
        let (alice, bob) = ids();
        store.create_user(&bob, &[1u8; 32]).await.unwrap();

        let err = relay
            .submit_otp_batch(
                &alice,
                &bob,
                batch_payload(OTP_BATCH_CT_LEN),
                BASE64.encode([7u8; 64]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_recipient_is_not_found() {
        let (relay, _) = fixture().await;
        let (alice, bob) = ids();

        let err = relay
            .submit_otp_batch(&alice, &bob, batch_payload(OTP_BATCH_CT_LEN), signature())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));

        let err = relay.submit_envelope(&alice, &bob, b"blob").await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn envelopes_round_trip_through_the_binary_queue() {
        let (relay, store) = fixture().await;
        let (alice, bob) = ids();
        store.create_user(&bob, &[1u8; 32]).await.unwrap();

        relay.submit_envelope(&alice, &bob, b"first").await.unwrap();
        relay.submit_envelope(&alice, &bob, b"second").await.unwrap();

        let drained = relay.drain_envelopes(&bob).await.unwrap();
        let envelopes = Envelope::decode_all(&drained).unwrap();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].sender(), alice.as_str());
        assert_eq!(envelopes[0].payload(), b"first");
        assert_eq!(envelopes[1].payload(), b"second");
    }

    #[tokio::test]
    async fn acknowledged_envelopes_are_deleted() {
        let (relay, store) = fixture().await;
        let (alice, bob) = ids();
        store.create_user(&bob, &[1u8; 32]).await.unwrap();

        relay.submit_envelope(&alice, &bob, b"seen").await.unwrap();
        relay.submit_envelope(&alice, &bob, b"new").await.unwrap();

        // Learn the ack token of the first envelope without draining.
        let drained = relay.drain_envelopes(&bob).await.unwrap();
        let envelopes = Envelope::decode_all(&drained).unwrap();
        for envelope in &envelopes {
            relay.mailbox.append_envelope(&bob, envelope).await.unwrap();
        }

        let removed = relay
            .acknowledge(&bob, &[*envelopes[0].ack_token()])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let rest = relay.drain_envelopes(&bob).await.unwrap();
        let rest = Envelope::decode_all(&rest).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].payload(), b"new");
    }
}
