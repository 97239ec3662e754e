//! Publish workers.
//!
//! A worker takes one dataset path at a time off the queue, looks at what is
//! on disk now, announces it on the root's topic and only then records the
//! new etag in the ledger. A crash between the two steps therefore leads to
//! the change being announced again on the next reconcile, never lost.
//!
//! Each item runs in its own task: a panic costs that item only, and
//! cancellation aborts an item in flight. Items for the same path are
//! serialized so the ledger never goes back to an older etag.

use super::state::PublisherState;
use crate::metrics;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tessera_client::{ClientError, PubSubClient};
use tessera_core::{ChangeEvent, DatasetPath, Etag};
use tessera_storage::StorageError;
use tokio_util::sync::CancellationToken;

/// Outbound side of the pub/sub bus.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, data: Value) -> Result<(), ClientError>;
}

#[async_trait]
impl EventSink for PubSubClient {
    async fn publish(&self, topic: &str, data: Value) -> Result<(), ClientError> {
        PubSubClient::publish(self, topic, data).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("publish failed: {0}")]
    Bus(#[from] ClientError),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Drain `queue` until it closes or `cancel` fires.
pub(crate) async fn run(
    id: usize,
    state: PublisherState,
    sink: Arc<dyn EventSink>,
    queue: flume::Receiver<DatasetPath>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker = id, "Worker started");
    loop {
        let path = tokio::select! {
            _ = cancel.cancelled() => break,
            item = queue.recv_async() => match item {
                Ok(path) => path,
                Err(_) => break,
            },
        };

        let item = tokio::spawn({
            let state = state.clone();
            let sink = sink.clone();
            let path = path.clone();
            async move { process(&state, sink.as_ref(), &path).await }
        });
        let abort = item.abort_handle();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                abort.abort();
                tracing::debug!(worker = id, %path, "Abandoned change in flight");
                break;
            }
            outcome = item => outcome,
        };

        // No retry: a later change to the same path triggers it again.
        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                metrics::PUBLISH_FAILURES.inc();
                tracing::error!(worker = id, %path, error = %e, "Failed to publish change, dropping it");
            }
            Err(e) => {
                metrics::PUBLISH_FAILURES.inc();
                tracing::error!(worker = id, %path, error = %e, "Publish task died, dropping change");
            }
        }
    }
    tracing::debug!(worker = id, "Worker stopped");
}

/// Publish whatever happened to `path`. Returns the number of events sent.
pub async fn process(
    state: &PublisherState,
    sink: &dyn EventSink,
    path: &DatasetPath,
) -> Result<usize, PublishError> {
    let source = state.cache.source_path(path)?;
    match tokio::fs::symlink_metadata(&source).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            tracing::debug!(%path, "Ignoring symlink");
            Ok(0)
        }
        Ok(meta) if meta.is_dir() => publish_tree(state, sink, path).await,
        Ok(_) => publish_update(state, sink, path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            publish_deletions(state, sink, path).await
        }
        Err(e) => Err(StorageError::from(e).into()),
    }
}

/// Announce the current version of the file at `path`.
async fn publish_update(
    state: &PublisherState,
    sink: &dyn EventSink,
    path: &DatasetPath,
) -> Result<usize, PublishError> {
    let _guard = state.lock(path).await;
    let source = state.cache.source_path(path)?;
    let meta = match tokio::fs::symlink_metadata(&source).await {
        Ok(meta) if meta.is_file() => meta,
        // Replaced or removed meanwhile; its own event follows.
        Ok(_) => return Ok(0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StorageError::from(e).into()),
    };
    let etag = Etag::from_metadata(&meta).map_err(StorageError::from)?;
    if state.ledger.get(path).await.as_ref() == Some(&etag) {
        tracing::debug!(%path, %etag, "Unchanged since last publish");
        return Ok(0);
    }

    let metadata = state.cache.metadata(path).await?;
    let event = ChangeEvent::updated(path.clone(), metadata, etag.clone());
    sink.publish(state.topic(), serde_json::to_value(&event)?)
        .await?;
    state.ledger.insert(path.clone(), etag.clone()).await?;

    metrics::EVENTS_PUBLISHED.inc();
    tracing::info!(%path, %etag, "Published update");
    Ok(1)
}

/// A directory showed up (e.g. moved into the root): publish what changed in it.
async fn publish_tree(
    state: &PublisherState,
    sink: &dyn EventSink,
    dir: &DatasetPath,
) -> Result<usize, PublishError> {
    let source = state.cache.source_path(dir)?;
    let mut published = 0;
    for (rel, _) in tessera_storage::files::walk(&source, state.skip_dirs()).await? {
        let path = DatasetPath::new(format!("{dir}/{rel}")).map_err(StorageError::from)?;
        published += publish_update(state, sink, &path).await?;
    }
    Ok(published)
}

/// Announce the removal of `path`, or of every known dataset below it when
/// a whole directory went away.
async fn publish_deletions(
    state: &PublisherState,
    sink: &dyn EventSink,
    path: &DatasetPath,
) -> Result<usize, PublishError> {
    let prefix = format!("{path}/");
    let mut gone: Vec<DatasetPath> = state
        .ledger
        .snapshot()
        .await
        .into_keys()
        .filter(|known| known == path || known.as_str().starts_with(&prefix))
        .collect();
    // Unknown paths are announced as well; followers ignore what they never saw.
    if gone.is_empty() {
        gone.push(path.clone());
    }

    let mut published = 0;
    for path in &gone {
        let _guard = state.lock(path).await;
        let source = state.cache.source_path(path)?;
        if tokio::fs::symlink_metadata(&source).await.is_ok() {
            tracing::debug!(%path, "Reappeared before its deletion was published");
            continue;
        }

        let event = ChangeEvent::deleted(path.clone());
        sink.publish(state.topic(), serde_json::to_value(&event)?)
            .await?;
        state.ledger.remove(path).await?;
        state.cache.remove(path).await?;

        metrics::EVENTS_PUBLISHED.inc();
        tracing::info!(%path, "Published deletion");
        published += 1;
    }
    Ok(published)
}
