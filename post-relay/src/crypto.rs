//! ML-DSA-87 signing and verification.
//!
//! The relay verifies login challenges and federation envelopes, and signs
//! its own federation identity. All other cryptography is end-to-end and
//! never touches this module.

use std::fmt;

use fips204::ml_dsa_87;
use fips204::traits::{SerDes, Signer, Verifier};
use post_types::params::{ML_DSA_87_PK_LEN, ML_DSA_87_SIG_LEN, ML_DSA_87_SK_LEN};
use zeroize::Zeroizing;

use crate::error::{RelayError, Result};

const _: () = assert!(ml_dsa_87::PK_LEN == ML_DSA_87_PK_LEN);
const _: () = assert!(ml_dsa_87::SK_LEN == ML_DSA_87_SK_LEN);
const _: () = assert!(ml_dsa_87::SIG_LEN == ML_DSA_87_SIG_LEN);

/// The signature suite the relay speaks.
///
/// A single production implementation exists ([`MlDsa87`]); the seam keeps
/// algorithm details out of callers and lets tests inject failures.
pub trait SignatureScheme: Send + Sync {
    /// Public key length in bytes.
    fn public_key_len(&self) -> usize;

    /// Signature length in bytes.
    fn signature_len(&self) -> usize;

    /// Generate a fresh keypair as `(public, private)` bytes.
    fn generate_keypair(&self) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>)>;

    /// Sign `message` with stored private-key bytes.
    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>>;

    /// Verify `signature` over `message` against `public_key`.
    ///
    /// Malformed keys or signatures verify as `false`, never as an error;
    /// callers cannot tell which part failed.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// ML-DSA-87 (FIPS 204) backed by the `fips204` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlDsa87;

impl SignatureScheme for MlDsa87 {
    fn public_key_len(&self) -> usize {
        ML_DSA_87_PK_LEN
    }

    fn signature_len(&self) -> usize {
        ML_DSA_87_SIG_LEN
    }

    fn generate_keypair(&self) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>)> {
        let (pk, sk) = ml_dsa_87::try_keygen()
            .map_err(|e| RelayError::Crypto(format!("ML-DSA-87 keygen: {e}")))?;
        Ok((
            pk.into_bytes().to_vec(),
            Zeroizing::new(sk.into_bytes().to_vec()),
        ))
    }

    fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        let sk_bytes: [u8; ML_DSA_87_SK_LEN] = private_key
            .try_into()
            .map_err(|_| RelayError::Crypto("stored private key has wrong length".to_string()))?;
        let sk = ml_dsa_87::PrivateKey::try_from_bytes(sk_bytes)
            .map_err(|e| RelayError::Crypto(format!("ML-DSA-87 private key: {e}")))?;
        let signature = sk
            .try_sign(message, &[])
            .map_err(|e| RelayError::Crypto(format!("ML-DSA-87 sign: {e}")))?;
        Ok(signature.to_vec())
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let pk_bytes: [u8; ML_DSA_87_PK_LEN] = match public_key.try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let sig: [u8; ML_DSA_87_SIG_LEN] = match signature.try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let pk = match ml_dsa_87::PublicKey::try_from_bytes(pk_bytes) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        pk.verify(message, &sig, &[])
    }
}

/// The relay's own signing keypair, generated at first startup and loaded
/// from the store thereafter.
pub struct ServerKeys {
    /// Public key bytes, served at the federation info endpoint.
    pub public_key: Vec<u8>,
    /// Private key bytes, zeroed on drop.
    pub private_key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for ServerKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerKeys")
            .field("public_key_len", &self.public_key.len())
            .field("private_key", &"REDACTED")
            .finish()
    }
}
