//! Root registry endpoints.

use super::state::BrokerState;
use crate::error::ApiResult;
use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use std::collections::BTreeMap;
use tessera_core::Root;

#[derive(Debug, Deserialize)]
pub struct RegisterRootRequest {
    pub name: String,
    pub http: String,
}

/// GET /api/roots
pub async fn list_roots(State(state): State<BrokerState>) -> Json<BTreeMap<String, Root>> {
    Json(state.list_roots().await)
}

/// POST /api/roots
pub async fn register_root(
    State(state): State<BrokerState>,
    Json(req): Json<RegisterRootRequest>,
) -> ApiResult<Json<Root>> {
    let root = state.register_root(&req.name, &req.http).await?;
    Ok(Json(root))
}
