//! Endpoint handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::error::{GatewayError, Result};
use crate::http::auth::BasicCredentials;
use crate::http::server::AppState;
use crate::pubsub::{NodeAddress, RoleMap};

/// `GET /channels/{owner}/{node}/subscriptions`
pub async fn get_subscriptions(
    State(state): State<AppState>,
    Path((owner, node)): Path<(String, String)>,
    credentials: BasicCredentials,
) -> Result<Json<RoleMap>> {
    let node = NodeAddress::new(&owner, &node)?;
    let roles = state
        .subscriptions
        .role_map(&credentials.jid, &credentials.password, &node)
        .await?;
    tracing::debug!(node = %node, caller = %credentials.jid, entries = roles.len(), "Role map served");
    Ok(Json(roles))
}

/// `POST /channels/{owner}/{node}/subscriptions` with a JSON array of booleans.
pub async fn post_subscriptions(
    State(state): State<AppState>,
    Path((owner, node)): Path<(String, String)>,
    credentials: BasicCredentials,
    body: Bytes,
) -> Result<StatusCode> {
    let node = NodeAddress::new(&owner, &node)?;
    let actions: Vec<bool> = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::BadRequest(format!("expected a JSON array of booleans: {}", e)))?;

    state
        .subscriptions
        .apply(&credentials.jid, &credentials.password, &node, &actions)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub sessions: usize,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        sessions: state.sessions.active_sessions(),
    })
}
