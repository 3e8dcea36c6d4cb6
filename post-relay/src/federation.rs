//! Federation between independent relay servers.
//!
//! Peers are trusted via self-signed identity documents fetched from
//! `/federation/info` and pinned until their `refetch_date`. Every relayed
//! envelope is signed by the origin server over
//! `destination_host || recipient || sender || payload`, so a peer can
//! neither forge another server's traffic nor replay an envelope at a
//! different destination.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Days, NaiveDate, Utc};
use post_types::{Envelope, UserId};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError};
use crate::crypto::{ServerKeys, SignatureScheme};
use crate::error::{RelayError, Result};
use crate::mailbox::MailboxStore;
use crate::server::RelayMetrics;
use crate::storage::{PeerRecord, SqliteStore, REFETCH_DATE_FORMAT};
use crate::validate::DomainValidator;

/// A server's self-signed identity document, served at `/federation/info`.
///
/// `signature` covers `domain || refetch_date` (UTF-8, no scheme prefix)
/// under the server's own signing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationInfo {
    /// Base64 ML-DSA-87 public key.
    pub public_key: String,
    /// `YYYY-MM-DD` date from which peers must re-verify this document.
    pub refetch_date: String,
    /// Base64 self-signature.
    pub signature: String,
}

/// The `metadata` part accompanying a relayed envelope.
///
/// Extra fields from other implementations are tolerated; only these three
/// are part of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    /// Recipient id on the destination server.
    pub recipient: String,
    /// Sender id on the origin server.
    pub sender: String,
    /// Origin server's domain (the destination uses it to resolve trust).
    pub url: String,
}

/// Transport-level failures, split so the scheme fallback can tell a
/// connection failure from a protocol one.
#[derive(Debug, thiserror::Error)]
pub enum PeerTransportError {
    /// The peer could not be reached at all (connect or timeout).
    #[error("connection failed: {0}")]
    Connect(String),
    /// The peer answered with a non-success HTTP status.
    #[error("peer returned HTTP status {0}")]
    Status(u16),
    /// The peer answered with something unparseable.
    #[error("peer response malformed: {0}")]
    Malformed(String),
}

/// Network seam for peer servers; tests inject fakes here.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Fetch `{base}/federation/info`.
    async fn fetch_info(
        &self,
        base: &str,
    ) -> std::result::Result<FederationInfo, PeerTransportError>;

    /// Post metadata and `signature || payload` to `{base}/federation/send`.
    async fn send_envelope(
        &self,
        base: &str,
        metadata: &EnvelopeMetadata,
        blob: Vec<u8>,
    ) -> std::result::Result<(), PeerTransportError>;
}

/// Production transport over HTTPS/HTTP via reqwest.
#[derive(Debug, Clone)]
pub struct HttpPeerTransport {
    client: reqwest::Client,
}

impl HttpPeerTransport {
    /// Build a client with the configured peer-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("federation http client: {e}")))?;
        Ok(Self { client })
    }
}

fn classify(e: reqwest::Error) -> PeerTransportError {
    if e.is_connect() || e.is_timeout() {
        PeerTransportError::Connect(e.to_string())
    } else if let Some(status) = e.status() {
        PeerTransportError::Status(status.as_u16())
    } else {
        PeerTransportError::Malformed(e.to_string())
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn fetch_info(
        &self,
        base: &str,
    ) -> std::result::Result<FederationInfo, PeerTransportError> {
        let response = self
            .client
            .get(format!("{base}/federation/info"))
            .send()
            .await
            .map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PeerTransportError::Status(status.as_u16()));
        }
        response
            .json::<FederationInfo>()
            .await
            .map_err(|e| PeerTransportError::Malformed(e.to_string()))
    }

    async fn send_envelope(
        &self,
        base: &str,
        metadata: &EnvelopeMetadata,
        blob: Vec<u8>,
    ) -> std::result::Result<(), PeerTransportError> {
        let metadata = serde_json::to_string(metadata)
            .map_err(|e| PeerTransportError::Malformed(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("metadata", metadata)
            .part(
                "blob",
                reqwest::multipart::Part::bytes(blob).file_name("envelope"),
            );
        let response = self
            .client
            .post(format!("{base}/federation/send"))
            .multipart(form)
            .send()
            .await
            .map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PeerTransportError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Validates, signs, and relays envelopes between trusted peer servers.
pub struct FederationGateway {
    store: Arc<SqliteStore>,
    mailbox: Arc<dyn MailboxStore>,
    scheme: Arc<dyn SignatureScheme>,
    keys: Arc<ServerKeys>,
    transport: Arc<dyn PeerTransport>,
    validator: DomainValidator,
    enabled: bool,
    own_domain: String,
    metrics: Arc<RelayMetrics>,
}

impl FederationGateway {
    /// Build the gateway from config and shared state.
    pub fn new(
        config: &Config,
        store: Arc<SqliteStore>,
        mailbox: Arc<dyn MailboxStore>,
        scheme: Arc<dyn SignatureScheme>,
        keys: Arc<ServerKeys>,
        transport: Arc<dyn PeerTransport>,
        metrics: Arc<RelayMetrics>,
    ) -> Result<Self> {
        let validator = DomainValidator::from_config(&config.server.domain, &config.federation)?;
        Ok(Self {
            store,
            mailbox,
            scheme,
            keys,
            transport,
            validator,
            enabled: config.federation.enabled,
            own_domain: config.server.domain.trim().to_ascii_lowercase(),
            metrics,
        })
    }

    /// This server's identity document, served even when relaying is
    /// disabled (it only describes us).
    ///
    /// The refetch date is tomorrow: peers re-verify at most daily and
    /// never trust a key older than a day past its attestation.
    pub fn describe_self(&self) -> Result<FederationInfo> {
        let today = Utc::now().date_naive();
        let refetch = today.checked_add_days(Days::new(1)).unwrap_or(today);
        let refetch_date = refetch.format(REFETCH_DATE_FORMAT).to_string();
        let message = [self.own_domain.as_bytes(), refetch_date.as_bytes()].concat();
        let signature = self.scheme.sign(&self.keys.private_key, &message)?;
        Ok(FederationInfo {
            public_key: BASE64.encode(&self.keys.public_key),
            refetch_date,
            signature: BASE64.encode(signature),
        })
    }

    /// Accept an envelope relayed from a peer and queue it for a local
    /// recipient.
    pub async fn relay_inbound(
        &self,
        origin: &str,
        sender: &str,
        recipient: &str,
        blob: &[u8],
    ) -> Result<()> {
        if !self.enabled {
            return Err(RelayError::Validation("federation is disabled".to_string()));
        }
        if blob.len() <= self.scheme.signature_len() {
            return Err(RelayError::Validation(
                "blob too short to carry a signature".to_string(),
            ));
        }

        let origin = origin.trim().to_ascii_lowercase();
        self.validator.check_remote_host(&origin)?;

        let sender: UserId = sender
            .parse()
            .map_err(|_| RelayError::Validation("malformed sender id".to_string()))?;
        let recipient: UserId = recipient
            .parse()
            .map_err(|_| RelayError::Validation("malformed recipient id".to_string()))?;
        if !self.store.user_exists(&recipient).await? {
            return Err(RelayError::NotFound("recipient does not exist".to_string()));
        }

        let peer = self.resolve_peer(&origin).await?;
        let (signature, payload) = blob.split_at(self.scheme.signature_len());
        let message = [
            self.own_domain.as_bytes(),
            recipient.as_str().as_bytes(),
            sender.as_str().as_bytes(),
            payload,
        ]
        .concat();
        if !self.scheme.verify(&peer.public_key, &message, signature) {
            // One opaque rejection for every verification failure; the
            // error must not reveal which part failed.
            return Err(RelayError::Trust("federation envelope rejected".to_string()));
        }

        let label = format!("{sender}@{origin}");
        let envelope = Envelope::seal(&label, payload)?;
        self.mailbox.append_envelope(&recipient, &envelope).await?;
        self.metrics.federation_inbound.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Relayed envelope from {} to {}", label, recipient);
        Ok(())
    }

    /// Sign `payload` and deliver it to `recipient` on the peer at `host`.
    pub async fn relay_outbound(
        &self,
        sender: &UserId,
        recipient: &UserId,
        host: &str,
        payload: &[u8],
    ) -> Result<()> {
        if !self.enabled {
            return Err(RelayError::Validation("federation is disabled".to_string()));
        }
        let host = host.trim().to_ascii_lowercase();
        self.validator.check_remote_host(&host)?;

        let message = [
            host.as_bytes(),
            recipient.as_str().as_bytes(),
            sender.as_str().as_bytes(),
            payload,
        ]
        .concat();
        let signature = self.scheme.sign(&self.keys.private_key, &message)?;
        let mut blob = signature;
        blob.extend_from_slice(payload);

        let metadata = EnvelopeMetadata {
            recipient: recipient.as_str().to_string(),
            sender: sender.as_str().to_string(),
            url: self.own_domain.clone(),
        };

        match self
            .transport
            .send_envelope(&format!("https://{host}"), &metadata, blob.clone())
            .await
        {
            Ok(()) => {}
            Err(PeerTransportError::Connect(e)) => {
                tracing::warn!("Secure relay to {} failed ({}), retrying over http", host, e);
                self.transport
                    .send_envelope(&format!("http://{host}"), &metadata, blob)
                    .await
                    .map_err(|e| RelayError::Transport(format!("peer {host}: {e}")))?;
            }
            Err(e) => return Err(RelayError::Transport(format!("peer {host}: {e}"))),
        }

        self.metrics.federation_outbound.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Relayed envelope for {}@{}", recipient, host);
        Ok(())
    }

    /// The pinned trust record for `url`, refetched when its date is due.
    ///
    /// A stale record is never used: if the refresh fails, the caller gets
    /// the transport error.
    async fn resolve_peer(&self, url: &str) -> Result<PeerRecord> {
        let today = Utc::now().date_naive();
        if let Some(peer) = self.store.peer(url).await? {
            if today < peer.refetch_date {
                return Ok(peer);
            }
            tracing::debug!("Trust record for {} is due ({}), refetching", url, peer.refetch_date);
        }
        self.fetch_peer(url).await
    }

    /// Fetch, verify, and pin a peer's identity document.
    async fn fetch_peer(&self, url: &str) -> Result<PeerRecord> {
        let info = match self.transport.fetch_info(&format!("https://{url}")).await {
            Ok(info) => info,
            Err(PeerTransportError::Connect(e)) => {
                tracing::warn!("Secure fetch from {} failed ({}), retrying over http", url, e);
                self.transport
                    .fetch_info(&format!("http://{url}"))
                    .await
                    .map_err(|e| RelayError::Transport(format!("peer {url}: {e}")))?
            }
            Err(e) => return Err(RelayError::Transport(format!("peer {url}: {e}"))),
        };

        let public_key = BASE64
            .decode(&info.public_key)
            .map_err(|_| RelayError::Trust(format!("peer {url}: public key is not base64")))?;
        if public_key.len() != self.scheme.public_key_len() {
            return Err(RelayError::Trust(format!(
                "peer {url}: public key is {} bytes, expected {}",
                public_key.len(),
                self.scheme.public_key_len()
            )));
        }
        let signature = BASE64
            .decode(&info.signature)
            .map_err(|_| RelayError::Trust(format!("peer {url}: signature is not base64")))?;
        if signature.len() != self.scheme.signature_len() {
            return Err(RelayError::Trust(format!(
                "peer {url}: signature is {} bytes, expected {}",
                signature.len(),
                self.scheme.signature_len()
            )));
        }

        let message = [url.as_bytes(), info.refetch_date.as_bytes()].concat();
        if !self.scheme.verify(&public_key, &message, &signature) {
            return Err(RelayError::Trust(format!(
                "peer {url}: identity self-signature is invalid"
            )));
        }
        let refetch_date = NaiveDate::parse_from_str(&info.refetch_date, REFETCH_DATE_FORMAT)
            .map_err(|_| RelayError::Trust(format!("peer {url}: malformed refetch_date")))?;

        let peer = PeerRecord {
            url: url.to_string(),
            public_key,
            refetch_date,
        };
        self.store.upsert_peer(&peer).await?;
        tracing::info!("Pinned federation peer {} until {}", url, refetch_date);
        Ok(peer)
    }
}

impl std::fmt::Debug for FederationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationGateway")
            .field("enabled", &self.enabled)
            .field("own_domain", &self.own_domain)
            .finish_non_exhaustive()
    }
}
