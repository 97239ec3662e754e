//! Publisher HTTP handlers.

use super::state::PublisherState;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tessera_core::{DatasetPath, Etag};
use tessera_storage::StorageError;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub nchunk: Option<String>,
}

/// GET /api/list
pub async fn list(State(state): State<PublisherState>) -> ApiResult<Json<Vec<DatasetPath>>> {
    let paths = state.walk().await?.into_iter().map(|(path, _)| path).collect();
    Ok(Json(paths))
}

/// GET /api/info/{*path}
///
/// Answers 304 when `If-None-Match` carries the current etag.
pub async fn info(
    State(state): State<PublisherState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = DatasetPath::new(path)?;

    let etag = match state.ledger.get(&path).await {
        Some(etag) => etag,
        None => live_etag(&state, &path).await?,
    };

    if let Some(cached) = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok())
        && Etag::from_header(cached) == etag
    {
        tracing::debug!(%path, %etag, "Not modified");
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    let metadata = state.cache.metadata(&path).await?;
    Ok(([(ETAG, etag.to_string())], Json(metadata)).into_response())
}

async fn live_etag(state: &PublisherState, path: &DatasetPath) -> ApiResult<Etag> {
    let source = state.cache.source_path(path)?;
    let meta = tokio::fs::metadata(&source).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound(path.to_string())
        } else {
            ApiError::Storage(StorageError::from(e))
        }
    })?;
    if !meta.is_file() {
        return Err(ApiError::NotFound(path.to_string()));
    }
    Etag::from_metadata(&meta).map_err(|e| ApiError::Storage(e.into()))
}

/// GET /api/download/{*path}?nchunk=N
///
/// Raw compressed bytes of chunk `N`.
pub async fn download(
    State(state): State<PublisherState>,
    Path(path): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let path = DatasetPath::new(path)?;
    let nchunk = parse_nchunk(query.nchunk.as_deref())?;

    let container = state.cache.open(&path).await?;
    let data = container.read_chunk(nchunk).await?;
    metrics::CHUNKS_SERVED.inc();
    tracing::debug!(%path, nchunk, bytes = data.len(), "Serving chunk");

    Ok(([(CONTENT_TYPE, "application/octet-stream")], data).into_response())
}

fn parse_nchunk(value: Option<&str>) -> ApiResult<u64> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing nchunk parameter".to_string()))?;
    let nchunk: i64 = value
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("nchunk is not an integer: {value:?}")))?;
    u64::try_from(nchunk)
        .map_err(|_| ApiError::BadRequest(format!("nchunk must be >= 0, got {nchunk}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nchunk() {
        assert_eq!(parse_nchunk(Some("0")).unwrap(), 0);
        assert_eq!(parse_nchunk(Some(" 12 ")).unwrap(), 12);
        for bad in [None, Some(""), Some("-1"), Some("1.5"), Some("x")] {
            assert!(
                matches!(parse_nchunk(bad), Err(ApiError::BadRequest(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
