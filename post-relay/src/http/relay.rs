//! Message relay endpoints: pad batches, pad-encrypted messages, the
//! generic envelope path, and the two long-polls.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Multipart, Query};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use post_types::{Address, UserId};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{RelayError, Result};
use crate::longpoll;
use crate::server::RelayServer;
use crate::validate::{decode_b64_max, parse_acks};

use super::{identity, success};

#[derive(Debug, Deserialize)]
pub(super) struct SendPayloadRequest {
    recipient: String,
    json_payload: String,
    payload_signature: String,
}

/// `POST /messages/send_pads`
pub(super) async fn send_pads_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    Json(body): Json<SendPayloadRequest>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let sender = identity(&relay, &headers)?;
    relay.limits().check_user(&sender)?;

    let recipient = parse_recipient(&body.recipient)?;
    relay
        .messages()
        .submit_otp_batch(&sender, &recipient, body.json_payload, body.payload_signature)
        .await?;
    relay
        .metrics()
        .message_submissions
        .fetch_add(1, Ordering::Relaxed);
    Ok(success(json!({})))
}

/// `POST /messages/send_message`
pub(super) async fn send_message_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    Json(body): Json<SendPayloadRequest>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let sender = identity(&relay, &headers)?;
    relay.limits().check_user(&sender)?;

    let recipient = parse_recipient(&body.recipient)?;
    relay
        .messages()
        .submit_otp_message(&sender, &recipient, body.json_payload, body.payload_signature)
        .await?;
    relay
        .metrics()
        .message_submissions
        .fetch_add(1, Ordering::Relaxed);
    Ok(success(json!({})))
}

#[derive(Debug, Deserialize)]
pub(super) struct SendBlobRequest {
    recipient: String,
    blob: String,
}

/// `POST /messages/send` (base64 JSON variant of the generic relay)
pub(super) async fn send_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    Json(body): Json<SendBlobRequest>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let sender = identity(&relay, &headers)?;
    relay.limits().check_user(&sender)?;

    let blob = decode_b64_max("blob", &body.blob, relay.config().storage.max_blob_len)?;
    dispatch(&relay, &sender, &body.recipient, &blob).await?;
    Ok(success(json!({})))
}

/// `POST /data/send` (multipart variant of the generic relay)
pub(super) async fn data_send_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let sender = identity(&relay, &headers)?;
    relay.limits().check_user(&sender)?;

    let (metadata, blob) = super::read_metadata_and_blob(multipart).await?;
    if blob.len() > relay.config().storage.max_blob_len {
        return Err(RelayError::Validation(format!(
            "blob exceeds {} bytes",
            relay.config().storage.max_blob_len
        )));
    }

    #[derive(Debug, Deserialize)]
    struct Meta {
        recipient: String,
    }
    let meta: Meta = serde_json::from_str(&metadata)
        .map_err(|_| RelayError::Validation("metadata must be JSON with a recipient".to_string()))?;

    dispatch(&relay, &sender, &meta.recipient, &blob).await?;
    Ok(success(json!({})))
}

/// Route a blob to a local mailbox or a federation peer based on the
/// recipient address.
async fn dispatch(
    relay: &RelayServer,
    sender: &UserId,
    recipient: &str,
    blob: &[u8],
) -> Result<()> {
    let address: Address = recipient
        .parse()
        .map_err(|_| RelayError::Validation("malformed recipient address".to_string()))?;
    match address {
        Address::Local(recipient) => {
            relay.messages().submit_envelope(sender, &recipient, blob).await?;
        }
        Address::Remote { user, host } => {
            relay
                .federation()
                .relay_outbound(sender, &user, &host, blob)
                .await?;
        }
    }
    relay
        .metrics()
        .relayed_envelopes
        .fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// `GET /messages/longpoll`
pub(super) async fn messages_longpoll_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let user = identity(&relay, &headers)?;

    let records = longpoll::poll_structured(
        relay.mailbox().as_ref(),
        &user,
        &relay.config().longpoll,
    )
    .await?;
    if records.is_empty() {
        relay
            .metrics()
            .longpoll_empties
            .fetch_add(1, Ordering::Relaxed);
    }
    Ok(success(json!({"messages": records})))
}

#[derive(Debug, Deserialize)]
pub(super) struct DataPollQuery {
    #[serde(default)]
    acks: Option<String>,
}

/// `GET /data/longpoll?acks=`
///
/// Acknowledgements are applied before the poll starts, so a re-delivered
/// envelope the client already processed never comes back again.
pub(super) async fn data_longpoll_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    Query(query): Query<DataPollQuery>,
) -> Result<Response> {
    relay.limits().check_global()?;
    let user = identity(&relay, &headers)?;

    if let Some(raw) = query.acks.as_deref().filter(|s| !s.is_empty()) {
        let acks = parse_acks(raw)?;
        let removed = relay.messages().acknowledge(&user, &acks).await?;
        if removed > 0 {
            tracing::debug!("Dropped {} acknowledged envelopes for {}", removed, user);
        }
    }

    let bytes =
        longpoll::poll_binary(relay.mailbox().as_ref(), &user, &relay.config().longpoll).await?;
    if bytes.is_empty() {
        relay
            .metrics()
            .longpoll_empties
            .fetch_add(1, Ordering::Relaxed);
    }
    Ok(([(CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

fn parse_recipient(raw: &str) -> Result<UserId> {
    raw.parse()
        .map_err(|_| RelayError::Validation("malformed recipient id".to_string()))
}
