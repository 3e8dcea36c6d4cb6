//! Queue records for the structured mailbox classes.
//!
//! Each record is tagged with a `data_type` field on the wire, matching its
//! queue class. The relay validates shapes on ingress and stores records
//! verbatim; contents stay opaque ciphertext and base64 material.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// A record held in one of the three structured mailbox classes.
///
/// Serialized with a `data_type` tag of `smp`, `pfs`, or `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "data_type", rename_all = "lowercase")]
pub enum QueueRecord {
    /// A Socialist Millionaire Protocol step.
    Smp(SmpRecord),
    /// A forward-secrecy key announcement.
    Pfs(PfsRecord),
    /// A pad batch or pad-encrypted message.
    Message(MessageRecord),
}

impl QueueRecord {
    /// The local user who submitted the record.
    pub fn sender(&self) -> &UserId {
        match self {
            QueueRecord::Smp(r) => &r.sender,
            QueueRecord::Pfs(r) => &r.sender,
            QueueRecord::Message(r) => &r.sender,
        }
    }
}

/// One step of the Socialist Millionaire Protocol between two users.
///
/// `step` is `1` (question + nonce), `2` (proof + nonce), `3` (proof), or
/// `-1` (failure notice, no other material).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmpRecord {
    /// Who submitted the step.
    pub sender: UserId,
    /// Protocol step number.
    pub step: i8,
    /// Base64 verification question, step 1 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Base64 nonce, steps 1 and 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Base64 proof, steps 2 and 3.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

/// A forward-secrecy KEM key announcement.
///
/// The optional signing-key pair travels together: both fields present
/// (first contact) or both absent (the recipient already holds the key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PfsRecord {
    /// Who submitted the announcement.
    pub sender: UserId,
    /// Base64 ML-KEM-1024 public key with hash-chain commitment appended.
    pub kem_publickey_hashchain: String,
    /// Base64 ML-DSA-87 signature over the announcement.
    pub kem_hashchain_signature: String,
    /// Base64 ML-DSA-87 public key, first contact only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_public_key: Option<String>,
    /// Base64 self-signature over the signing key, first contact only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_signature: Option<String>,
    /// Whether this announcement starts or rotates a session.
    pub pfs_type: PfsType,
}

/// Kind of forward-secrecy announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PfsType {
    /// First announcement of a session.
    Init,
    /// Key rotation within an established session.
    Rotate,
}

/// A pad batch or a pad-encrypted message for the `message` class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageRecord {
    /// Who submitted the record.
    pub sender: UserId,
    /// Whether the payload carries a pad batch or a message.
    pub msg_type: MessageKind,
    /// The submitted JSON payload, stored verbatim.
    pub json_payload: String,
    /// Base64 ML-DSA-87 signature over the JSON payload.
    pub payload_signature: String,
}

/// Kind of `message`-class record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A freshly encrypted batch of one-time pads.
    NewOtpBatch,
    /// A message encrypted against previously delivered pads.
    NewMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> UserId {
        "1111222233334444".parse().unwrap()
    }

    #[test]
    fn smp_record_wire_shape() {
        let record = QueueRecord::Smp(SmpRecord {
            sender: sender(),
            step: 1,
            question: Some("cXVlc3Rpb24=".into()),
            nonce: Some("bm9uY2U=".into()),
            proof: None,
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["data_type"], "smp");
        assert_eq!(json["sender"], "1111222233334444");
        assert_eq!(json["step"], 1);
        assert_eq!(json["question"], "cXVlc3Rpb24=");
        // Absent material is omitted entirely, not serialized as null.
        assert!(json.get("proof").is_none());
    }

    #[test]
    fn failure_step_round_trips() {
        let record = QueueRecord::Smp(SmpRecord {
            sender: sender(),
            step: -1,
            question: None,
            nonce: None,
            proof: None,
        });
        let json = serde_json::to_string(&record).unwrap();
        let back: QueueRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn pfs_type_strings() {
        assert_eq!(serde_json::to_string(&PfsType::Init).unwrap(), "\"init\"");
        assert_eq!(serde_json::to_string(&PfsType::Rotate).unwrap(), "\"rotate\"");
    }

    #[test]
    fn message_kind_strings() {
        assert_eq!(
            serde_json::to_string(&MessageKind::NewOtpBatch).unwrap(),
            "\"new_otp_batch\""
        );
        assert_eq!(
            serde_json::to_string(&MessageKind::NewMessage).unwrap(),
            "\"new_message\""
        );
    }

    #[test]
    fn pfs_record_tag_and_optionals() {
        let record = QueueRecord::Pfs(PfsRecord {
            sender: sender(),
            kem_publickey_hashchain: "a2V5".into(),
            kem_hashchain_signature: "c2ln".into(),
            signing_public_key: None,
            signing_key_signature: None,
            pfs_type: PfsType::Rotate,
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["data_type"], "pfs");
        assert_eq!(json["pfs_type"], "rotate");
        assert!(json.get("signing_public_key").is_none());

        let back: QueueRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.sender(), &sender());
    }

    #[test]
    fn message_record_tag() {
        let record = QueueRecord::Message(MessageRecord {
            sender: sender(),
            msg_type: MessageKind::NewMessage,
            json_payload: "{\"otp_ciphertext\":\"...\"}".into(),
            payload_signature: "c2ln".into(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["data_type"], "message");
        assert_eq!(json["msg_type"], "new_message");
    }
}
