//! Subscriber HTTP handlers.

use super::state::SubscriberState;
use crate::error::ApiResult;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderName;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::collections::BTreeMap;
use tessera_client::Region;
use tessera_core::{DTYPE_HEADER, DatasetId, Metadata, Root, SHAPE_HEADER, format_shape};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub slice: Option<String>,
}

/// GET /api/roots
pub async fn roots(State(state): State<SubscriberState>) -> Json<BTreeMap<String, Root>> {
    Json(state.roots().await)
}

/// GET /api/list[?all=true]
pub async fn list(
    State(state): State<SubscriberState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<String>> {
    Json(state.list(query.all).await)
}

/// POST /api/follow
pub async fn follow(
    State(state): State<SubscriberState>,
    Json(names): Json<Vec<String>>,
) -> ApiResult<Json<Vec<String>>> {
    state.follow(&names).await?;
    Ok(Json(names))
}

/// POST /api/unfollow
pub async fn unfollow(
    State(state): State<SubscriberState>,
    Json(names): Json<Vec<String>>,
) -> ApiResult<Json<Vec<String>>> {
    state.unfollow(&names).await?;
    Ok(Json(names))
}

/// GET /api/info/{*path}
pub async fn info(
    State(state): State<SubscriberState>,
    Path(path): Path<String>,
) -> ApiResult<Json<Metadata>> {
    let id = DatasetId::parse(&path)?;
    Ok(Json(state.info(&id).await?))
}

/// GET /api/download/{*path}[?slice=...]
pub async fn download(
    State(state): State<SubscriberState>,
    Path(path): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let region = state.download(&path, query.slice.as_deref()).await?;
    Ok(region_response(region))
}

/// GET /api/{topic}/download
///
/// Older clients address a dataset by its percent-encoded id and always get
/// the whole of it.
pub async fn download_topic(
    State(state): State<SubscriberState>,
    Path(topic): Path<String>,
) -> ApiResult<Response> {
    let region = state.download(&topic, None).await?;
    Ok(region_response(region))
}

/// GET /api/url/{*path}
pub async fn url(
    State(state): State<SubscriberState>,
    Path(path): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.urls(&path).await?))
}

fn region_response(region: Region) -> Response {
    (
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (HeaderName::from_static(DTYPE_HEADER), region.dtype.to_string()),
            (HeaderName::from_static(SHAPE_HEADER), format_shape(&region.shape)),
        ],
        region.data,
    )
        .into_response()
}
