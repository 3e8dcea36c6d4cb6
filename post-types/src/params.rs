//! Fixed protocol parameters.
//!
//! Blindpost pins one algorithm suite per protocol generation instead of
//! negotiating. Every length the relay checks on ingress is defined here,
//! so a size change is a deliberate, single-site edit.

// --- ML-DSA-87 (FIPS 204) ---

/// ML-DSA-87 public key length in bytes.
pub const ML_DSA_87_PK_LEN: usize = 2592;
/// ML-DSA-87 private key length in bytes.
pub const ML_DSA_87_SK_LEN: usize = 4896;
/// ML-DSA-87 signature length in bytes.
pub const ML_DSA_87_SIG_LEN: usize = 4627;

// --- ML-KEM-1024 (FIPS 203) ---

/// ML-KEM-1024 encapsulation key length in bytes.
pub const ML_KEM_1024_PK_LEN: usize = 1568;
/// ML-KEM-1024 decapsulation key length in bytes.
pub const ML_KEM_1024_SK_LEN: usize = 3168;
/// ML-KEM-1024 ciphertext length in bytes.
pub const ML_KEM_1024_CT_LEN: usize = 1568;

// --- Classic McEliece 8192128f ---

/// Classic McEliece 8192128f public key length in bytes.
pub const MCELIECE_8192128F_PK_LEN: usize = 1_357_824;
/// Classic McEliece 8192128f private key length in bytes.
pub const MCELIECE_8192128F_SK_LEN: usize = 14_120;
/// Classic McEliece 8192128f ciphertext length in bytes.
pub const MCELIECE_8192128F_CT_LEN: usize = 208;
/// Number of one-time-pad batches a McEliece key serves before rotation.
pub const MCELIECE_ROTATE_BATCHES: u32 = 3;

// --- Authentication ---

/// Random challenge length in bytes. Clients sign the raw challenge.
pub const CHALLENGE_LEN: usize = 11_264;

// --- One-time pads ---

/// One-time-pad length in bytes.
pub const OTP_PAD_LEN: usize = 11_264;
/// Pad chunk length: pads are encrypted 32 bytes at a time.
pub const OTP_PAD_CHUNK_LEN: usize = 32;
/// Hybrid ciphertext length for one pad chunk: an ML-KEM-1024 ciphertext
/// concatenated with a Classic McEliece ciphertext.
pub const HYBRID_CHUNK_CT_LEN: usize = ML_KEM_1024_CT_LEN + MCELIECE_8192128F_CT_LEN;
/// Exact ciphertext length of one encrypted pad batch.
pub const OTP_BATCH_CT_LEN: usize = (OTP_PAD_LEN / OTP_PAD_CHUNK_LEN) * HYBRID_CHUNK_CT_LEN;
/// Maximum ciphertext length of a pad-encrypted message: one full pad.
pub const OTP_MESSAGE_MAX_LEN: usize = OTP_PAD_LEN;

// --- Socialist Millionaire Protocol ---

/// SMP nonce length in bytes.
pub const SMP_NONCE_LEN: usize = 64;
/// SMP proof length in bytes.
pub const SMP_PROOF_LEN: usize = 64;
/// Maximum SMP question length in bytes, after decoding.
pub const SMP_QUESTION_MAX_LEN: usize = 512;

// --- Forward-secrecy key announcements ---

/// Hash-chain commitment length in bytes.
pub const PFS_HASH_CHAIN_LEN: usize = 64;
/// Length of a KEM key announcement: an ML-KEM-1024 public key with the
/// hash-chain commitment appended.
pub const PFS_KEM_ANNOUNCE_LEN: usize = ML_KEM_1024_PK_LEN + PFS_HASH_CHAIN_LEN;

// --- Identities and addressing ---

/// User identities are exactly this many ASCII digits.
pub const USER_ID_LEN: usize = 16;
/// Longest accepted host part of a federated address, per RFC 1035.
pub const MAX_HOST_LEN: usize = 253;

// --- Binary envelope framing ---

/// Acknowledgement token length prefixed to every relayed envelope.
pub const ACK_TOKEN_LEN: usize = 32;
/// Length-prefix width in bytes (24-bit big-endian).
pub const ENVELOPE_LEN_PREFIX: usize = 3;
/// Separator byte between the sender label and the payload.
pub const ENVELOPE_SEP: u8 = 0x00;
/// Largest framed region (sender + separator + payload) a 24-bit length
/// prefix can describe.
pub const MAX_FRAMED_LEN: usize = (1 << 24) - 1;

// --- Argon2id (client-side KDF, documented for interoperability) ---

/// Argon2id memory cost in KiB.
pub const ARGON2_MEM_KIB: u32 = 262_144;
/// Argon2id iteration count.
pub const ARGON2_ITERS: u32 = 3;
/// Argon2id lane count.
pub const ARGON2_LANES: u32 = 4;
/// Argon2id salt length in bytes.
pub const ARGON2_SALT_LEN: usize = 16;
/// Argon2id output tag length in bytes.
pub const ARGON2_TAG_LEN: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_divides_evenly_into_chunks() {
        assert_eq!(OTP_PAD_LEN % OTP_PAD_CHUNK_LEN, 0);
        assert_eq!(OTP_PAD_LEN / OTP_PAD_CHUNK_LEN, 352);
    }

    #[test]
    fn hybrid_chunk_is_kem_plus_mceliece() {
        assert_eq!(HYBRID_CHUNK_CT_LEN, 1776);
    }

    #[test]
    fn batch_ciphertext_length() {
        assert_eq!(OTP_BATCH_CT_LEN, 625_152);
    }

    #[test]
    fn kem_announcement_carries_hash_chain() {
        assert_eq!(PFS_KEM_ANNOUNCE_LEN, 1632);
    }

    #[test]
    fn challenge_matches_pad_length() {
        // Clients reuse the pad-sized buffer when signing login challenges.
        assert_eq!(CHALLENGE_LEN, OTP_PAD_LEN);
    }
}
