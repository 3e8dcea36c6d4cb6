//! Authentication endpoints: challenge issue, challenge verify, and the
//! identity existence probe.

use std::sync::Arc;

use axum::extract::Query;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use post_types::UserId;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{RelayError, Result};
use crate::server::RelayServer;

use super::{identity, success};

#[derive(Debug, Deserialize)]
pub(super) struct InitRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
}

/// `POST /authenticate/init`
pub(super) async fn init_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    Json(body): Json<InitRequest>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let challenge = relay
        .auth()
        .open_challenge(body.user_id.as_deref(), body.public_key.as_deref())
        .await?;
    Ok(success(json!({"challenge": challenge})))
}

#[derive(Debug, Deserialize)]
pub(super) struct VerifyRequest {
    challenge: String,
    signature: String,
}

/// `POST /authenticate/verify`
pub(super) async fn verify_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let (user, token) = relay
        .auth()
        .verify_challenge(&body.challenge, &body.signature)
        .await?;
    Ok(success(json!({"user_id": user, "token": token})))
}

#[derive(Debug, Deserialize)]
pub(super) struct GetUserQuery {
    user_id: String,
}

/// `GET /get_user?user_id=`
///
/// Requires authentication: only enrolled users may probe the identity
/// space.
pub(super) async fn get_user_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    Query(query): Query<GetUserQuery>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    identity(&relay, &headers)?;

    let user: UserId = query
        .user_id
        .parse()
        .map_err(|_| RelayError::Validation("malformed user id".to_string()))?;
    if relay.store().user_exists(&user).await? {
        Ok(success(json!({})))
    } else {
        Err(RelayError::NotFound("user does not exist".to_string()))
    }
}
