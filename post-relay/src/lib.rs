//! # post-relay
//!
//! Zero-knowledge relay server for Blindpost.
//!
//! This crate implements a relay server that:
//! - Authenticates clients by challenge signature, never by password
//! - Queues opaque post-quantum ciphertext in per-recipient mailboxes
//! - Coordinates the SMP and PFS session protocols without reading them
//! - Relays envelopes to and from federated peer servers
//! - Never sees plaintext, contact lists, or long-term client keys
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                       ┌── Client B
//!            │       HTTP/JSON       │
//!            ├──────────────────────►│ (long-poll)
//!            │                       │
//!        ┌───┴───────────────────────┴───┐
//!        │          post-relay           │
//!        │  ┌─────────┐  ┌────────────┐  │        ┌────────────┐
//!        │  │ SQLite  │  │ mailboxes  │  │◄──────►│ peer relay │
//!        │  │ (ids)   │  │ (in-proc)  │  │  fed.  └────────────┘
//!        │  └─────────┘  └────────────┘  │
//!        └───────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! Clients authenticate via `/authenticate/*` (ML-DSA-87 challenge
//! signatures), then submit and poll through the mailbox routes:
//! - `/smp/*`, `/pfs/send_keys` - session-protocol steps, one live entry
//!   per sender
//! - `/messages/*`, `/data/*` - pad batches, messages, and framed binary
//!   envelopes
//! - `/federation/*` - server-to-server relay with self-signed trust

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod challenges;
pub mod config;
pub mod crypto;
pub mod error;
pub mod federation;
pub mod http;
pub mod limits;
pub mod longpoll;
pub mod mailbox;
pub mod messages;
pub mod protocols;
pub mod server;
pub mod storage;
pub mod tokens;
pub mod validate;
