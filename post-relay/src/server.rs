//! Relay server composition root.
//!
//! `RelayServer` owns the shared state behind every HTTP handler: the
//! identity store, the in-process mailboxes, and one service per protocol
//! concern, all wired against the same metrics and rate limiters.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthService;
use crate::config::Config;
use crate::crypto::{MlDsa87, ServerKeys, SignatureScheme};
use crate::error::Result;
use crate::federation::{FederationGateway, HttpPeerTransport, PeerTransport};
use crate::limits::RateLimits;
use crate::mailbox::{MailboxStore, MemoryMailbox};
use crate::messages::MessageRelay;
use crate::protocols::ProtocolCoordinator;
use crate::storage::SqliteStore;
use crate::tokens::SessionTokens;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`; increments take no locks.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total login/registration challenges issued.
    pub challenges_issued: AtomicU64,
    /// Total successful logins (existing identities).
    pub logins: AtomicU64,
    /// Total successful registrations (new identities).
    pub registrations: AtomicU64,
    /// Total authentication failures (bad signatures, bad tokens,
    /// duplicate keys).
    pub auth_failures: AtomicU64,
    /// Total requests rejected for malformed or out-of-shape bodies.
    pub validation_failures: AtomicU64,
    /// Total SMP steps accepted.
    pub smp_submissions: AtomicU64,
    /// Total PFS key announcements accepted.
    pub pfs_submissions: AtomicU64,
    /// Total message-class records accepted (pad batches and messages).
    pub message_submissions: AtomicU64,
    /// Total envelopes accepted on the generic relay path (local and
    /// outbound combined).
    pub relayed_envelopes: AtomicU64,
    /// Total envelopes accepted from federation peers.
    pub federation_inbound: AtomicU64,
    /// Total envelopes delivered to federation peers.
    pub federation_outbound: AtomicU64,
    /// Total long-polls that returned empty after the full ceiling.
    pub longpoll_empties: AtomicU64,
    /// Total rate limit rejections (global + per-identity).
    pub rate_limit_hits: AtomicU64,
}

/// Main relay server.
pub struct RelayServer {
    config: Config,
    store: Arc<SqliteStore>,
    /// In-process mailbox queues (transit buffers, not durable storage).
    mailbox: Arc<dyn MailboxStore>,
    /// Operational metrics (counters; gauges are read live).
    metrics: Arc<RelayMetrics>,
    /// Rate limiters for the global and per-identity budgets.
    limits: RateLimits,
    tokens: SessionTokens,
    auth: AuthService,
    smp: ProtocolCoordinator,
    pfs: ProtocolCoordinator,
    messages: MessageRelay,
    federation: FederationGateway,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("config", &self.config)
            .field("limits", &self.limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl RelayServer {
    /// Build the server with the production peer transport.
    pub fn new(
        config: Config,
        store: SqliteStore,
        keys: ServerKeys,
        session_secret: Vec<u8>,
    ) -> Result<Self> {
        let transport = HttpPeerTransport::new(Duration::from_secs(
            config.federation.request_timeout_secs,
        ))?;
        Self::with_transport(config, store, keys, session_secret, Arc::new(transport))
    }

    /// Build the server with an injected peer transport (tests).
    pub fn with_transport(
        config: Config,
        store: SqliteStore,
        keys: ServerKeys,
        session_secret: Vec<u8>,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self> {
        let store = Arc::new(store);
        let mailbox: Arc<dyn MailboxStore> = Arc::new(MemoryMailbox::new());
        let metrics = Arc::new(RelayMetrics::default());
        let scheme: Arc<dyn SignatureScheme> = Arc::new(MlDsa87);
        let keys = Arc::new(keys);

        let limits = RateLimits::new(&config.limits, metrics.clone());
        let tokens = SessionTokens::new(session_secret);
        let auth = AuthService::new(
            store.clone(),
            scheme.clone(),
            tokens.clone(),
            metrics.clone(),
        );
        let smp = ProtocolCoordinator::smp(store.clone(), mailbox.clone());
        let pfs = ProtocolCoordinator::pfs(store.clone(), mailbox.clone());
        let messages = MessageRelay::new(store.clone(), mailbox.clone());
        let federation = FederationGateway::new(
            &config,
            store.clone(),
            mailbox.clone(),
            scheme,
            keys,
            transport,
            metrics.clone(),
        )?;

        Ok(Self {
            config,
            store,
            mailbox,
            metrics,
            limits,
            tokens,
            auth,
            smp,
            pfs,
            messages,
            federation,
        })
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the identity store.
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Get access to the mailbox queues.
    pub fn mailbox(&self) -> &Arc<dyn MailboxStore> {
        &self.mailbox
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Get access to the rate limiters.
    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Get access to the session-credential verifier.
    pub fn tokens(&self) -> &SessionTokens {
        &self.tokens
    }

    /// Get access to the authentication service.
    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    /// Get access to the SMP coordinator.
    pub fn smp(&self) -> &ProtocolCoordinator {
        &self.smp
    }

    /// Get access to the PFS coordinator.
    pub fn pfs(&self) -> &ProtocolCoordinator {
        &self.pfs
    }

    /// Get access to the message relay.
    pub fn messages(&self) -> &MessageRelay {
        &self.messages
    }

    /// Get access to the federation gateway.
    pub fn federation(&self) -> &FederationGateway {
        &self.federation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use post_types::UserId;
    use std::sync::atomic::Ordering;
    use zeroize::Zeroizing;

    fn test_keys() -> ServerKeys {
        // Construction never signs; placeholder bytes keep the test fast.
        ServerKeys {
            public_key: vec![1u8; post_types::params::ML_DSA_87_PK_LEN],
            private_key: Zeroizing::new(vec![2u8; post_types::params::ML_DSA_87_SK_LEN]),
        }
    }

    async fn test_server() -> RelayServer {
        let store = SqliteStore::in_memory().await.unwrap();
        RelayServer::new(Config::default(), store, test_keys(), vec![9u8; 64]).unwrap()
    }

    #[tokio::test]
    async fn builds_with_default_config() {
        let relay = test_server().await;
        assert_eq!(relay.config().server.domain, "localhost");
        assert_eq!(relay.mailbox().recipient_count(), 0);
        assert_eq!(relay.auth().challenges().outstanding(), 0);
        assert_eq!(relay.limits().tracked_users(), 0);
    }

    #[tokio::test]
    async fn metrics_start_at_zero_and_count_up() {
        let relay = test_server().await;
        assert_eq!(relay.metrics().smp_submissions.load(Ordering::Relaxed), 0);

        relay.metrics().smp_submissions.fetch_add(1, Ordering::Relaxed);
        relay.metrics().smp_submissions.fetch_add(1, Ordering::Relaxed);
        assert_eq!(relay.metrics().smp_submissions.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn services_share_one_store() {
        let relay = test_server().await;
        let user: UserId = "5555666677778888".parse().unwrap();
        relay.store().create_user(&user, &[3u8; 32]).await.unwrap();

        // Visible through a service built on the same store.
        let record = post_types::QueueRecord::Smp(post_types::SmpRecord {
            sender: "1111222233334444".parse().unwrap(),
            step: -1,
            question: None,
            nonce: None,
            proof: None,
        });
        relay.smp().submit(&user, record).await.unwrap();
        assert_eq!(relay.smp().drain_for(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn token_issue_and_verify_round_trip() {
        let relay = test_server().await;
        let user: UserId = "1234123412341234".parse().unwrap();
        let token = relay.tokens().issue(&user).unwrap();
        assert_eq!(relay.tokens().verify(&token).unwrap(), user);
    }
}
