//! HTTP surface of the relay.
//!
//! One handler module per route group: authentication, session protocols
//! (SMP and PFS), message relay and long-polling, federation, and the
//! operational endpoints. Handlers stay thin; protocol rules live in the
//! service modules.
//!
//! JSON responses follow one envelope: `{"status": "success", ...}` on the
//! happy path, `{"status": "failure", "error": ...}` otherwise. The sender
//! identity for every authenticated operation comes from the bearer token,
//! never from the request body.

mod auth;
mod federation;
pub mod health;
mod metrics;
mod protocols;
mod relay;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use post_types::UserId;
use serde_json::json;

use crate::error::{RelayError, Result};
use crate::server::RelayServer;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<RelayServer>) -> Router {
    // Blob limits are enforced on decoded bytes in the handlers; the body
    // limit only needs to admit the base64 and multipart overhead.
    let body_limit = relay.config().storage.max_blob_len * 2;

    Router::new()
        .route("/authenticate/init", post(auth::init_handler))
        .route("/authenticate/verify", post(auth::verify_handler))
        .route("/get_user", get(auth::get_user_handler))
        .route("/smp/initiate", post(protocols::smp_initiate_handler))
        .route("/smp/step_2", post(protocols::smp_step_2_handler))
        .route("/smp/step_3", post(protocols::smp_step_3_handler))
        .route("/smp/failure", post(protocols::smp_failure_handler))
        .route("/pfs/send_keys", post(protocols::pfs_send_keys_handler))
        .route("/messages/send_pads", post(relay::send_pads_handler))
        .route("/messages/send_message", post(relay::send_message_handler))
        .route("/messages/send", post(relay::send_handler))
        .route("/messages/longpoll", get(relay::messages_longpoll_handler))
        .route("/data/send", post(relay::data_send_handler))
        .route("/data/longpoll", get(relay::data_longpoll_handler))
        .route("/federation/info", get(federation::info_handler))
        .route("/federation/send", post(federation::send_handler))
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(track_failures))
        .layer(Extension(relay))
}

/// Resolve the caller's identity from the `Authorization: Bearer` header.
fn identity(relay: &RelayServer, headers: &HeaderMap) -> Result<UserId> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            relay.metrics().auth_failures.fetch_add(1, Ordering::Relaxed);
            RelayError::Auth("missing bearer token".to_string())
        })?;
    let token = value.strip_prefix("Bearer ").ok_or_else(|| {
        relay.metrics().auth_failures.fetch_add(1, Ordering::Relaxed);
        RelayError::Auth("authorization scheme must be Bearer".to_string())
    })?;
    relay.tokens().verify(token).map_err(|e| {
        relay.metrics().auth_failures.fetch_add(1, Ordering::Relaxed);
        e
    })
}

/// Success envelope with extra top-level fields.
fn success(extra: serde_json::Value) -> Json<serde_json::Value> {
    let mut body = json!({"status": "success"});
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            body.insert(key.clone(), value.clone());
        }
    }
    Json(body)
}

/// Pull the `metadata` text part and the `blob` bytes part out of a
/// multipart body, in any order. Unknown parts are skipped.
async fn read_metadata_and_blob(mut multipart: Multipart) -> Result<(String, Vec<u8>)> {
    let mut metadata = None;
    let mut blob = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RelayError::Validation(format!("multipart: {e}")))?
    {
        match field.name() {
            Some("metadata") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| RelayError::Validation(format!("multipart metadata: {e}")))?;
                metadata = Some(text);
            }
            Some("blob") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| RelayError::Validation(format!("multipart blob: {e}")))?;
                blob = Some(bytes.to_vec());
            }
            _ => {}
        }
    }
    match (metadata, blob) {
        (Some(metadata), Some(blob)) => Ok((metadata, blob)),
        _ => Err(RelayError::Validation(
            "multipart body needs metadata and blob parts".to_string(),
        )),
    }
}

/// Count validation rejections at the edge so handlers stay oblivious.
async fn track_failures(
    Extension(relay): Extension<Arc<RelayServer>>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if response.status() == StatusCode::BAD_REQUEST {
        relay
            .metrics()
            .validation_failures
            .fetch_add(1, Ordering::Relaxed);
    }
    response
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Auth(_) => StatusCode::UNAUTHORIZED,
            RelayError::Trust(_) => StatusCode::FORBIDDEN,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Transport(_) => StatusCode::BAD_GATEWAY,
            RelayError::Store(_)
            | RelayError::Crypto(_)
            | RelayError::Config(_)
            | RelayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal detail stays in the log, not the response.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
            "internal error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({"status": "failure", "error": message}))).into_response()
    }
}
