//! Session-protocol endpoints: SMP steps and PFS key announcements.
//!
//! Base64 material is decoded for length validation only; the record keeps
//! the submitted strings verbatim.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::{Extension, Json};
use post_types::params::{
    ML_DSA_87_PK_LEN, ML_DSA_87_SIG_LEN, PFS_KEM_ANNOUNCE_LEN, SMP_NONCE_LEN, SMP_PROOF_LEN,
    SMP_QUESTION_MAX_LEN,
};
use post_types::{PfsRecord, PfsType, QueueRecord, SmpRecord, UserId};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{RelayError, Result};
use crate::server::RelayServer;
use crate::validate::{decode_b64_exact, decode_b64_max};

use super::{identity, success};

fn parse_recipient(raw: &str) -> Result<UserId> {
    raw.parse()
        .map_err(|_| RelayError::Validation("malformed recipient id".to_string()))
}

#[derive(Debug, Deserialize)]
pub(super) struct SmpInitiateRequest {
    recipient: String,
    question: String,
    nonce: String,
}

/// `POST /smp/initiate` (step 1: question + nonce)
pub(super) async fn smp_initiate_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    Json(body): Json<SmpInitiateRequest>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let sender = identity(&relay, &headers)?;
    relay.limits().check_user(&sender)?;

    decode_b64_max("question", &body.question, SMP_QUESTION_MAX_LEN)?;
    decode_b64_exact("nonce", &body.nonce, SMP_NONCE_LEN)?;
    let recipient = parse_recipient(&body.recipient)?;

    let record = QueueRecord::Smp(SmpRecord {
        sender,
        step: 1,
        question: Some(body.question),
        nonce: Some(body.nonce),
        proof: None,
    });
    relay.smp().submit(&recipient, record).await?;
    relay.metrics().smp_submissions.fetch_add(1, Ordering::Relaxed);
    Ok(success(json!({})))
}

#[derive(Debug, Deserialize)]
pub(super) struct SmpStep2Request {
    recipient: String,
    proof: String,
    nonce: String,
}

/// `POST /smp/step_2` (proof + nonce)
pub(super) async fn smp_step_2_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    Json(body): Json<SmpStep2Request>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let sender = identity(&relay, &headers)?;
    relay.limits().check_user(&sender)?;

    decode_b64_exact("proof", &body.proof, SMP_PROOF_LEN)?;
    decode_b64_exact("nonce", &body.nonce, SMP_NONCE_LEN)?;
    let recipient = parse_recipient(&body.recipient)?;

    let record = QueueRecord::Smp(SmpRecord {
        sender,
        step: 2,
        question: None,
        nonce: Some(body.nonce),
        proof: Some(body.proof),
    });
    relay.smp().submit(&recipient, record).await?;
    relay.metrics().smp_submissions.fetch_add(1, Ordering::Relaxed);
    Ok(success(json!({})))
}

#[derive(Debug, Deserialize)]
pub(super) struct SmpStep3Request {
    recipient: String,
    proof: String,
}

/// `POST /smp/step_3` (proof only)
pub(super) async fn smp_step_3_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    Json(body): Json<SmpStep3Request>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let sender = identity(&relay, &headers)?;
    relay.limits().check_user(&sender)?;

    decode_b64_exact("proof", &body.proof, SMP_PROOF_LEN)?;
    let recipient = parse_recipient(&body.recipient)?;

    let record = QueueRecord::Smp(SmpRecord {
        sender,
        step: 3,
        question: None,
        nonce: None,
        proof: Some(body.proof),
    });
    relay.smp().submit(&recipient, record).await?;
    relay.metrics().smp_submissions.fetch_add(1, Ordering::Relaxed);
    Ok(success(json!({})))
}

#[derive(Debug, Deserialize)]
pub(super) struct SmpFailureRequest {
    recipient: String,
}

/// `POST /smp/failure` (step -1, no material)
pub(super) async fn smp_failure_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    Json(body): Json<SmpFailureRequest>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let sender = identity(&relay, &headers)?;
    relay.limits().check_user(&sender)?;

    let recipient = parse_recipient(&body.recipient)?;

    let record = QueueRecord::Smp(SmpRecord {
        sender,
        step: -1,
        question: None,
        nonce: None,
        proof: None,
    });
    relay.smp().submit(&recipient, record).await?;
    relay.metrics().smp_submissions.fetch_add(1, Ordering::Relaxed);
    Ok(success(json!({})))
}

#[derive(Debug, Deserialize)]
pub(super) struct PfsSendKeysRequest {
    recipient: String,
    kem_publickey_hashchain: String,
    kem_hashchain_signature: String,
    #[serde(default)]
    signing_public_key: Option<String>,
    #[serde(default)]
    signing_key_signature: Option<String>,
    pfs_type: String,
}

/// `POST /pfs/send_keys`
pub(super) async fn pfs_send_keys_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    Json(body): Json<PfsSendKeysRequest>,
) -> Result<Json<Value>> {
    relay.limits().check_global()?;
    let sender = identity(&relay, &headers)?;
    relay.limits().check_user(&sender)?;

    decode_b64_exact(
        "kem_publickey_hashchain",
        &body.kem_publickey_hashchain,
        PFS_KEM_ANNOUNCE_LEN,
    )?;
    decode_b64_exact(
        "kem_hashchain_signature",
        &body.kem_hashchain_signature,
        ML_DSA_87_SIG_LEN,
    )?;

    // The signing keypair travels as a pair or not at all.
    match (&body.signing_public_key, &body.signing_key_signature) {
        (Some(public_key), Some(signature)) => {
            decode_b64_exact("signing_public_key", public_key, ML_DSA_87_PK_LEN)?;
            decode_b64_exact("signing_key_signature", signature, ML_DSA_87_SIG_LEN)?;
        }
        (None, None) => {}
        _ => {
            return Err(RelayError::Validation(
                "signing_public_key and signing_key_signature must be sent together"
                    .to_string(),
            ));
        }
    }

    let pfs_type = match body.pfs_type.as_str() {
        "init" => PfsType::Init,
        "rotate" => PfsType::Rotate,
        _ => {
            return Err(RelayError::Validation(
                "pfs_type must be init or rotate".to_string(),
            ));
        }
    };
    let recipient = parse_recipient(&body.recipient)?;

    let record = QueueRecord::Pfs(PfsRecord {
        sender,
        kem_publickey_hashchain: body.kem_publickey_hashchain,
        kem_hashchain_signature: body.kem_hashchain_signature,
        signing_public_key: body.signing_public_key,
        signing_key_signature: body.signing_key_signature,
        pfs_type,
    });
    relay.pfs().submit(&recipient, record).await?;
    relay.metrics().pfs_submissions.fetch_add(1, Ordering::Relaxed);
    Ok(success(json!({})))
}
