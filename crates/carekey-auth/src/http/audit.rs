//! Audit middleware and the chain verification endpoint.

use axum::{
    Json,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::extract::{BearerAuth, bearer_token};
use super::state::AuthState;
use crate::AuthResult;
use crate::audit::{AuditEvent, ChainReport};

/// Records one [`AuditEvent`] per request.
///
/// The actor comes from the bearer token when it verifies; anything else is
/// recorded as anonymous. The append happens on the audit writer task, so a
/// ledger failure never affects the response.
///
/// ```ignore
/// router.layer(axum::middleware::from_fn_with_state(state, audit::record_request))
/// ```
pub async fn record_request(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    // Path only; query strings may carry identifiers.
    let endpoint = request.uri().path().to_string();
    let mut event = AuditEvent::builder(request.method().as_str(), endpoint);

    if let Some(token) = bearer_token(request.headers())
        && let Ok(claims) = state.issuer.verify_access(token)
    {
        event = event
            .actor(claims.id, claims.role.map(|role| role.to_string()))
            .session_id(claims.session_id);
    }

    let response = next.run(request).await;
    state.audit.record(event.status(response.status().as_u16()));
    response
}

/// `GET /audit/verify`: recomputes the whole chain. Requires `audit:read`.
pub async fn verify_chain(
    State(state): State<AuthState>,
    auth: BearerAuth,
) -> AuthResult<Json<ChainReport>> {
    auth.require_permission("audit:read")?;
    let report = state.audit.verify_ledger().await?;
    if !report.valid {
        tracing::warn!(broken_at = ?report.broken_at, events = report.events, "audit chain broken");
    }
    Ok(Json(report))
}
