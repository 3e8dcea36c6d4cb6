//! Federation endpoints: the identity document and the inbound envelope
//! drop-off. Neither takes a bearer token; inbound trust rests on the
//! origin server's signature.

use std::sync::Arc;

use axum::extract::Multipart;
use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::error::{RelayError, Result};
use crate::federation::EnvelopeMetadata;
use crate::server::RelayServer;

use super::{read_metadata_and_blob, success};

/// `GET /federation/info`
///
/// Served even while relaying is disabled; the document only describes
/// this server.
pub(super) async fn info_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let info = relay.federation().describe_self()?;
    Ok(success(json!({
        "public_key": info.public_key,
        "refetch_date": info.refetch_date,
        "signature": info.signature,
    })))
}

/// `POST /federation/send`
pub(super) async fn send_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    multipart: Multipart,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;

    let (metadata, blob) = read_metadata_and_blob(multipart).await?;
    if blob.len() > relay.config().storage.max_blob_len {
        return Err(RelayError::Validation(format!(
            "blob exceeds {} bytes",
            relay.config().storage.max_blob_len
        )));
    }
    let meta: EnvelopeMetadata = serde_json::from_str(&metadata)
        .map_err(|_| RelayError::Validation("malformed federation metadata".to_string()))?;

    relay
        .federation()
        .relay_inbound(&meta.url, &meta.sender, &meta.recipient, &blob)
        .await?;
    Ok(success(json!({})))
}
