//! # blindpost-types
//!
//! Protocol vocabulary for Blindpost, a zero-knowledge messaging relay.
//!
//! The relay never sees plaintext: clients exchange post-quantum encrypted
//! material and the server only validates shapes and moves opaque bytes.
//! This crate defines the pieces both sides agree on:
//!
//! - [`UserId`] and [`Address`] - numeric identities and `id@host` routing
//! - [`QueueRecord`] - tagged mailbox records for the `smp`, `pfs` and
//!   `message` queue classes
//! - [`Envelope`] - binary framing for the generic relay path, with a
//!   per-envelope acknowledgement token
//! - [`params`] - the fixed algorithm and framing sizes every relay pins
//! - [`WireError`] - parse and framing failures
//!
//! No I/O happens here; the relay server crate builds on these types.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
pub mod params;
mod records;

pub use envelope::Envelope;
pub use error::WireError;
pub use ids::{Address, UserId};
pub use records::{MessageKind, MessageRecord, PfsRecord, PfsType, QueueRecord, SmpRecord};
