//! Prometheus metrics endpoint.

use crate::server::RelayServer;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<RelayServer>>) -> impl IntoResponse {
    let m = relay.metrics();

    // Gauges — current state
    let queued_recipients = relay.mailbox().recipient_count();
    let open_challenges = relay.auth().challenges().outstanding();
    let tracked_users = relay.limits().tracked_users();

    // Counters — monotonic since startup
    let challenges = m.challenges_issued.load(Ordering::Relaxed);
    let logins = m.logins.load(Ordering::Relaxed);
    let registrations = m.registrations.load(Ordering::Relaxed);
    let auth_failures = m.auth_failures.load(Ordering::Relaxed);
    let validation_failures = m.validation_failures.load(Ordering::Relaxed);
    let smp = m.smp_submissions.load(Ordering::Relaxed);
    let pfs = m.pfs_submissions.load(Ordering::Relaxed);
    let messages = m.message_submissions.load(Ordering::Relaxed);
    let envelopes = m.relayed_envelopes.load(Ordering::Relaxed);
    let federation_in = m.federation_inbound.load(Ordering::Relaxed);
    let federation_out = m.federation_outbound.load(Ordering::Relaxed);
    let longpoll_empties = m.longpoll_empties.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);

    // Storage stats (async queries — best effort)
    let users = relay.store().user_count().await.unwrap_or(0);
    let peers = relay.store().peer_count().await.unwrap_or(0);

    let body = format!(
        r#"# HELP post_relay_info Server information
# TYPE post_relay_info gauge
post_relay_info{{version="{version}"}} 1

# HELP post_relay_users Registered identities
# TYPE post_relay_users gauge
post_relay_users {users}

# HELP post_relay_federation_peers Pinned federation peers
# TYPE post_relay_federation_peers gauge
post_relay_federation_peers {peers}

# HELP post_relay_queued_recipients Recipients with queued mailbox state
# TYPE post_relay_queued_recipients gauge
post_relay_queued_recipients {queued_recipients}

# HELP post_relay_open_challenges Outstanding login challenges
# TYPE post_relay_open_challenges gauge
post_relay_open_challenges {open_challenges}

# HELP post_relay_limiter_tracked_users Identities tracked by the submission limiter
# TYPE post_relay_limiter_tracked_users gauge
post_relay_limiter_tracked_users {tracked_users}

# HELP post_relay_challenges_issued_total Login challenges issued
# TYPE post_relay_challenges_issued_total counter
post_relay_challenges_issued_total {challenges}

# HELP post_relay_logins_total Successful logins
# TYPE post_relay_logins_total counter
post_relay_logins_total {logins}

# HELP post_relay_registrations_total Successful registrations
# TYPE post_relay_registrations_total counter
post_relay_registrations_total {registrations}

# HELP post_relay_auth_failures_total Authentication failures
# TYPE post_relay_auth_failures_total counter
post_relay_auth_failures_total {auth_failures}

# HELP post_relay_validation_failures_total Requests rejected as malformed
# TYPE post_relay_validation_failures_total counter
post_relay_validation_failures_total {validation_failures}

# HELP post_relay_smp_submissions_total SMP steps accepted
# TYPE post_relay_smp_submissions_total counter
post_relay_smp_submissions_total {smp}

# HELP post_relay_pfs_submissions_total PFS key announcements accepted
# TYPE post_relay_pfs_submissions_total counter
post_relay_pfs_submissions_total {pfs}

# HELP post_relay_message_submissions_total Message-class records accepted
# TYPE post_relay_message_submissions_total counter
post_relay_message_submissions_total {messages}

# HELP post_relay_relayed_envelopes_total Envelopes accepted on the generic relay path
# TYPE post_relay_relayed_envelopes_total counter
post_relay_relayed_envelopes_total {envelopes}

# HELP post_relay_federation_inbound_total Envelopes accepted from peers
# TYPE post_relay_federation_inbound_total counter
post_relay_federation_inbound_total {federation_in}

# HELP post_relay_federation_outbound_total Envelopes delivered to peers
# TYPE post_relay_federation_outbound_total counter
post_relay_federation_outbound_total {federation_out}

# HELP post_relay_longpoll_empties_total Long-polls that elapsed empty
# TYPE post_relay_longpoll_empties_total counter
post_relay_longpoll_empties_total {longpoll_empties}

# HELP post_relay_rate_limit_hits_total Rate limit rejections
# TYPE post_relay_rate_limit_hits_total counter
post_relay_rate_limit_hits_total {rate_limits}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
