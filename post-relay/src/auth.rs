//! Challenge/response authentication and identity allocation.
//!
//! There are no passwords. `/authenticate/init` hands out a pad-sized random
//! challenge bound to a claimed identity or a bare public key; the client
//! proves key possession by signing the raw challenge bytes. A bare public
//! key registers a freshly allocated 16-digit identity on first successful
//! verification.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use post_types::params::CHALLENGE_LEN;
use post_types::UserId;
use rand::RngCore;

use crate::challenges::{ChallengeStore, PendingChallenge};
use crate::crypto::SignatureScheme;
use crate::error::{RelayError, Result, StoreError};
use crate::server::RelayMetrics;
use crate::storage::SqliteStore;
use crate::tokens::SessionTokens;

/// Random-id draws before registration gives up.
///
/// With 10^16 possible ids a collision streak this long means the id space
/// is effectively full (or the RNG is broken); either way, stop.
const MAX_ID_ALLOCATION_ATTEMPTS: u32 = 64;

/// Issues login challenges and verifies signed responses.
pub struct AuthService {
    store: Arc<SqliteStore>,
    challenges: ChallengeStore,
    scheme: Arc<dyn SignatureScheme>,
    tokens: SessionTokens,
    metrics: Arc<RelayMetrics>,
}

impl AuthService {
    /// Build the service.
    pub fn new(
        store: Arc<SqliteStore>,
        scheme: Arc<dyn SignatureScheme>,
        tokens: SessionTokens,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            store,
            challenges: ChallengeStore::new(),
            scheme,
            tokens,
            metrics,
        }
    }

    /// Open a challenge for a claimed identity or a bare public key.
    ///
    /// Exactly one of `user_id` / `public_key` must be supplied (empty
    /// strings count as absent). A known identity resolves to its stored
    /// key; a bare key starts a registration attempt.
    pub async fn open_challenge(
        &self,
        user_id: Option<&str>,
        public_key: Option<&str>,
    ) -> Result<String> {
        let user_id = user_id.filter(|s| !s.is_empty());
        let public_key = public_key.filter(|s| !s.is_empty());

        let pending = match (user_id, public_key) {
            (Some(id), None) => {
                let user: UserId = id
                    .parse()
                    .map_err(|_| RelayError::Validation("malformed user_id".to_string()))?;
                let key = self
                    .store
                    .user_public_key(&user)
                    .await?
                    .ok_or_else(|| RelayError::NotFound("user id is not registered".to_string()))?;
                PendingChallenge {
                    public_key: key,
                    claimed_user: Some(user),
                }
            }
            (None, Some(key_b64)) => {
                let key = BASE64.decode(key_b64).map_err(|_| {
                    RelayError::Validation("invalid base64 for public_key".to_string())
                })?;
                if key.len() != self.scheme.public_key_len() {
                    return Err(RelayError::Validation(
                        "malformed ML-DSA-87 public key".to_string(),
                    ));
                }
                PendingChallenge {
                    public_key: key,
                    claimed_user: None,
                }
            }
            _ => {
                return Err(RelayError::Validation(
                    "exactly one of user_id and public_key must be supplied".to_string(),
                ))
            }
        };

        let mut bytes = vec![0u8; CHALLENGE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let challenge = BASE64.encode(&bytes);

        self.challenges.insert(challenge.clone(), pending);
        self.metrics.challenges_issued.fetch_add(1, Ordering::Relaxed);
        Ok(challenge)
    }

    /// Verify a signed challenge; log in or register, and issue a session
    /// credential.
    ///
    /// The challenge is consumed before the signature is examined, so a
    /// failed response burns it.
    pub async fn verify_challenge(
        &self,
        challenge: &str,
        signature: &str,
    ) -> Result<(UserId, String)> {
        let pending = self
            .challenges
            .take(challenge)
            .ok_or_else(|| RelayError::NotFound("unknown or already-used challenge".to_string()))?;

        let challenge_bytes = BASE64
            .decode(challenge)
            .map_err(|_| RelayError::Validation("invalid base64 for challenge".to_string()))?;
        let signature = BASE64
            .decode(signature)
            .map_err(|_| RelayError::Validation("invalid base64 for signature".to_string()))?;

        if !self
            .scheme
            .verify(&pending.public_key, &challenge_bytes, &signature)
        {
            self.metrics.auth_failures.fetch_add(1, Ordering::Relaxed);
            return Err(RelayError::Auth("invalid signature".to_string()));
        }

        let user = match pending.claimed_user {
            Some(user) => {
                self.metrics.logins.fetch_add(1, Ordering::Relaxed);
                user
            }
            None => self.register(&pending.public_key).await?,
        };

        let token = self.tokens.issue(&user)?;
        Ok((user, token))
    }

    /// Allocate a fresh identity for `public_key` by rejection sampling.
    async fn register(&self, public_key: &[u8]) -> Result<UserId> {
        // Cheap precheck; the unique constraint below is what actually
        // guards the race.
        if self.store.user_id_for_key(public_key).await?.is_some() {
            self.metrics.auth_failures.fetch_add(1, Ordering::Relaxed);
            return Err(RelayError::Auth(
                "public key is already registered".to_string(),
            ));
        }

        for _ in 0..MAX_ID_ALLOCATION_ATTEMPTS {
            let candidate = UserId::random();
            match self.store.create_user(&candidate, public_key).await {
                Ok(()) => {
                    self.metrics.registrations.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("Registered new identity {}", candidate);
                    return Ok(candidate);
                }
                Err(StoreError::UniqueViolation { constraint })
                    if constraint.contains("public_key") =>
                {
                    // Lost a concurrent registration race for the same key.
                    self.metrics.auth_failures.fetch_add(1, Ordering::Relaxed);
                    return Err(RelayError::Auth(
                        "public key is already registered".to_string(),
                    ));
                }
                Err(StoreError::UniqueViolation { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::IdSpaceExhausted(MAX_ID_ALLOCATION_ATTEMPTS).into())
    }

    /// The challenge store, exposed for the metrics gauge.
    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("outstanding_challenges", &self.challenges.outstanding())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MlDsa87;

    async fn service() -> AuthService {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        AuthService::new(
            store,
            Arc::new(MlDsa87),
            SessionTokens::new(vec![42u8; 64]),
            Arc::new(RelayMetrics::default()),
        )
    }

    fn sign_challenge(challenge: &str, private_key: &[u8]) -> String {
        let bytes = BASE64.decode(challenge).unwrap();
        BASE64.encode(MlDsa87.sign(private_key, &bytes).unwrap())
    }

    #[tokio::test]
    async fn register_then_log_in() {
        let auth = service().await;
        let (public, private) = MlDsa87.generate_keypair().unwrap();
        let public_b64 = BASE64.encode(&public);

        // Registration: bare public key.
        let challenge = auth.open_challenge(None, Some(&public_b64)).await.unwrap();
        let signature = sign_challenge(&challenge, &private);
        let (user, token) = auth.verify_challenge(&challenge, &signature).await.unwrap();
        assert_eq!(user.as_str().len(), 16);
        assert!(!token.is_empty());

        // Login: claimed identity, key resolved from the store.
        let challenge = auth
            .open_challenge(Some(user.as_str()), None)
            .await
            .unwrap();
        let signature = sign_challenge(&challenge, &private);
        let (again, _) = auth.verify_challenge(&challenge, &signature).await.unwrap();
        assert_eq!(again, user);

        assert_eq!(auth.metrics.registrations.load(Ordering::Relaxed), 1);
        assert_eq!(auth.metrics.logins.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn challenge_is_single_use() {
        let auth = service().await;
        let (public, private) = MlDsa87.generate_keypair().unwrap();
        let challenge = auth
            .open_challenge(None, Some(&BASE64.encode(&public)))
            .await
            .unwrap();
        let signature = sign_challenge(&challenge, &private);

        auth.verify_challenge(&challenge, &signature).await.unwrap();
        let err = auth
            .verify_challenge(&challenge, &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn bad_signature_burns_the_challenge() {
        let auth = service().await;
        let (public, private) = MlDsa87.generate_keypair().unwrap();
        let challenge = auth
            .open_challenge(None, Some(&BASE64.encode(&public)))
            .await
            .unwrap();

        // Sign the wrong bytes.
        let wrong = BASE64.encode(MlDsa87.sign(&private, b"not the challenge").unwrap());
        let err = auth.verify_challenge(&challenge, &wrong).await.unwrap_err();
        assert!(matches!(err, RelayError::Auth(_)));
        assert_eq!(auth.metrics.auth_failures.load(Ordering::Relaxed), 1);

        // A correct retry now misses: the failed attempt consumed it.
        let good = sign_challenge(&challenge, &private);
        let err = auth.verify_challenge(&challenge, &good).await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_public_key_cannot_register_twice() {
        let auth = service().await;
        let (public, private) = MlDsa87.generate_keypair().unwrap();
        let public_b64 = BASE64.encode(&public);

        let challenge = auth.open_challenge(None, Some(&public_b64)).await.unwrap();
        let signature = sign_challenge(&challenge, &private);
        auth.verify_challenge(&challenge, &signature).await.unwrap();

        let challenge = auth.open_challenge(None, Some(&public_b64)).await.unwrap();
        let signature = sign_challenge(&challenge, &private);
        let err = auth
            .verify_challenge(&challenge, &signature)
            .await
            .unwrap_err();
        match err {
            RelayError::Auth(msg) => assert!(msg.contains("already registered")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn init_requires_exactly_one_identifier() {
        let auth = service().await;
        let err = auth.open_challenge(None, None).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        let err = auth
            .open_challenge(Some("1111222233334444"), Some("aGk="))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        // Empty strings count as absent.
        let err = auth.open_challenge(Some(""), Some("")).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn init_rejects_unknown_user_and_bad_key() {
        let auth = service().await;

        let err = auth
            .open_challenge(Some("1111222233334444"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));

        let err = auth
            .open_challenge(Some("not-digits"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        let err = auth.open_challenge(None, Some("!!!")).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        // Valid base64, wrong length.
        let err = auth.open_challenge(None, Some("aGk=")).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }
}
