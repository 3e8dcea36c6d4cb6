//! Binary envelope framing for the generic relay path.
//!
//! Wire shape:
//!
//! ```text
//! ack_token (32) || length (3, big-endian) || sender || 0x00 || payload
//! ```
//!
//! The length prefix covers `sender || 0x00 || payload`. The ack token is
//! random per envelope, so two deliveries of identical ciphertext are not
//! byte-equal at rest; clients echo it back to delete the stored copy.
//! Sender labels are `id` for local traffic and `id@host` for federated
//! traffic, and must never contain the NUL separator.

use rand::RngCore;

use crate::params::{ACK_TOKEN_LEN, ENVELOPE_LEN_PREFIX, ENVELOPE_SEP, MAX_FRAMED_LEN};
use crate::WireError;

/// One framed envelope on the generic relay path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    ack_token: [u8; ACK_TOKEN_LEN],
    sender: String,
    payload: Vec<u8>,
}

impl Envelope {
    /// Frame `payload` from `sender`, drawing a fresh ack token from the
    /// OS RNG.
    ///
    /// Fails if the sender label contains a NUL byte or the framed region
    /// would not fit the 24-bit length prefix.
    pub fn seal(sender: &str, payload: &[u8]) -> Result<Self, WireError> {
        if sender.as_bytes().contains(&ENVELOPE_SEP) {
            return Err(WireError::NulInSender);
        }
        let framed = sender.len() + 1 + payload.len();
        if framed > MAX_FRAMED_LEN {
            return Err(WireError::FrameTooLarge { len: framed });
        }
        let mut ack_token = [0u8; ACK_TOKEN_LEN];
        rand::rngs::OsRng.fill_bytes(&mut ack_token);
        Ok(Self {
            ack_token,
            sender: sender.to_owned(),
            payload: payload.to_vec(),
        })
    }

    /// The random acknowledgement token.
    pub fn ack_token(&self) -> &[u8; ACK_TOKEN_LEN] {
        &self.ack_token
    }

    /// The sender label (`id` or `id@host`).
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// The opaque payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize to the wire shape.
    pub fn to_bytes(&self) -> Vec<u8> {
        let framed = self.sender.len() + 1 + self.payload.len();
        let mut out = Vec::with_capacity(ACK_TOKEN_LEN + ENVELOPE_LEN_PREFIX + framed);
        out.extend_from_slice(&self.ack_token);
        out.extend_from_slice(&(framed as u32).to_be_bytes()[1..4]);
        out.extend_from_slice(self.sender.as_bytes());
        out.push(ENVELOPE_SEP);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse one envelope from the front of `bytes`.
    ///
    /// Returns the envelope and the number of bytes consumed, so a
    /// concatenated mailbox drain can be walked envelope by envelope.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), WireError> {
        let header = ACK_TOKEN_LEN + ENVELOPE_LEN_PREFIX;
        if bytes.len() < header {
            return Err(WireError::TruncatedEnvelope);
        }
        let mut ack_token = [0u8; ACK_TOKEN_LEN];
        ack_token.copy_from_slice(&bytes[..ACK_TOKEN_LEN]);
        let len = &bytes[ACK_TOKEN_LEN..header];
        let framed = u32::from_be_bytes([0, len[0], len[1], len[2]]) as usize;
        let total = header + framed;
        if bytes.len() < total {
            return Err(WireError::TruncatedEnvelope);
        }
        let body = &bytes[header..total];
        let sep = body
            .iter()
            .position(|&b| b == ENVELOPE_SEP)
            .ok_or(WireError::MalformedEnvelope("missing sender separator"))?;
        let sender = std::str::from_utf8(&body[..sep])
            .map_err(|_| WireError::MalformedEnvelope("sender is not UTF-8"))?
            .to_owned();
        Ok((
            Self {
                ack_token,
                sender,
                payload: body[sep + 1..].to_vec(),
            },
            total,
        ))
    }

    /// Parse a concatenation of envelopes, as produced by a mailbox drain.
    pub fn decode_all(mut bytes: &[u8]) -> Result<Vec<Self>, WireError> {
        let mut out = Vec::new();
        while !bytes.is_empty() {
            let (envelope, consumed) = Self::parse(bytes)?;
            out.push(envelope);
            bytes = &bytes[consumed..];
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let envelope = Envelope::seal("1111222233334444", b"ciphertext").unwrap();
        let bytes = envelope.to_bytes();
        let (parsed, consumed) = Envelope::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed, envelope);
        assert_eq!(parsed.sender(), "1111222233334444");
        assert_eq!(parsed.payload(), b"ciphertext");
    }

    #[test]
    fn ack_tokens_differ_per_seal() {
        let a = Envelope::seal("1111222233334444", b"same bytes").unwrap();
        let b = Envelope::seal("1111222233334444", b"same bytes").unwrap();
        assert_ne!(a.ack_token(), b.ack_token());
        assert_ne!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn federated_sender_labels_survive() {
        let envelope = Envelope::seal("1111222233334444@peer.example", b"x").unwrap();
        let (parsed, _) = Envelope::parse(&envelope.to_bytes()).unwrap();
        assert_eq!(parsed.sender(), "1111222233334444@peer.example");
    }

    #[test]
    fn nul_in_sender_is_rejected() {
        assert_eq!(
            Envelope::seal("111\0222233334444", b"x"),
            Err(WireError::NulInSender)
        );
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let payload = vec![0u8; MAX_FRAMED_LEN];
        let err = Envelope::seal("1111222233334444", &payload).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { .. }));
    }

    #[test]
    fn truncation_is_detected() {
        let bytes = Envelope::seal("1111222233334444", b"payload")
            .unwrap()
            .to_bytes();
        assert_eq!(
            Envelope::parse(&bytes[..bytes.len() - 1]),
            Err(WireError::TruncatedEnvelope)
        );
        assert_eq!(Envelope::parse(&bytes[..10]), Err(WireError::TruncatedEnvelope));
    }

    #[test]
    fn missing_separator_is_rejected() {
        let mut bytes = vec![0u8; ACK_TOKEN_LEN];
        bytes.extend_from_slice(&[0, 0, 3]);
        bytes.extend_from_slice(b"abc");
        assert!(matches!(
            Envelope::parse(&bytes),
            Err(WireError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn decode_all_walks_a_drain() {
        let first = Envelope::seal("1111222233334444", b"one").unwrap();
        let second = Envelope::seal("5555666677778888@peer.example", b"two").unwrap();
        let mut drained = first.to_bytes();
        drained.extend_from_slice(&second.to_bytes());

        let parsed = Envelope::decode_all(&drained).unwrap();
        assert_eq!(parsed, vec![first, second]);
        assert!(Envelope::decode_all(&[]).unwrap().is_empty());
    }
}
