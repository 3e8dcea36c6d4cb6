//! Stateless session credentials.
//!
//! A credential is `base64url(user_id) "." base64url(mac)` where the MAC is
//! HMAC-SHA-512 over a domain-separation prefix and the user id, keyed with
//! the server's session secret. Credentials carry no expiry; they stay valid
//! until the secret rotates, and the server stores nothing per session.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use post_types::UserId;
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::error::{RelayError, Result};

type HmacSha512 = Hmac<Sha512>;

const MAC_CONTEXT: &[u8] = b"blindpost-session-v1:";

/// Issues and verifies bearer credentials.
#[derive(Clone)]
pub struct SessionTokens {
    secret: Arc<Zeroizing<Vec<u8>>>,
}

impl SessionTokens {
    /// Build from the resolved session secret.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret: Arc::new(Zeroizing::new(secret)),
        }
    }

    /// Issue a credential for `user`.
    pub fn issue(&self, user: &UserId) -> Result<String> {
        let mut mac = self.keyed()?;
        mac.update(MAC_CONTEXT);
        mac.update(user.as_str().as_bytes());
        let tag = mac.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(user.as_str()),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    /// Verify a presented credential and return the authenticated identity.
    ///
    /// Every failure mode returns the same error, so a caller cannot learn
    /// which part of the credential was wrong.
    pub fn verify(&self, token: &str) -> Result<UserId> {
        let (id_part, mac_part) = token.split_once('.').ok_or_else(unauthorized)?;
        let id_bytes = URL_SAFE_NO_PAD.decode(id_part).map_err(|_| unauthorized())?;
        let id_str = String::from_utf8(id_bytes).map_err(|_| unauthorized())?;
        let user: UserId = id_str.parse().map_err(|_| unauthorized())?;
        let tag = URL_SAFE_NO_PAD.decode(mac_part).map_err(|_| unauthorized())?;

        let mut mac = self.keyed()?;
        mac.update(MAC_CONTEXT);
        mac.update(user.as_str().as_bytes());
        // verify_slice is constant-time.
        mac.verify_slice(&tag).map_err(|_| unauthorized())?;
        Ok(user)
    }

    fn keyed(&self) -> Result<HmacSha512> {
        HmacSha512::new_from_slice(&self.secret)
            .map_err(|_| RelayError::Crypto("session secret rejected by HMAC".to_string()))
    }
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("secret", &"REDACTED")
            .finish()
    }
}

fn unauthorized() -> RelayError {
    RelayError::Auth("invalid session credential".to_string())
}
