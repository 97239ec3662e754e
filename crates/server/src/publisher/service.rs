//! Publisher lifecycle: registration, reconcile, watching and shutdown.

use super::state::PublisherState;
use super::watcher;
use super::worker::{self, EventSink};
use anyhow::{Context, Result};
use notify::RecommendedWatcher;
use notify_debouncer_mini::Debouncer;
use std::collections::HashSet;
use std::sync::Arc;
use tessera_client::{ApiClient, PubSubClient};
use tessera_core::config::PublisherConfig;
use tessera_core::{DatasetPath, Etag};
use tessera_storage::StorageResult;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a running publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Reconciling,
    Running,
    Draining,
    Stopped,
}

/// A started publisher: watcher, work queue and workers.
pub struct Publisher {
    state: PublisherState,
    phase: watch::Sender<Phase>,
    pubsub: Option<Arc<PubSubClient>>,
    queue: flume::Sender<DatasetPath>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    watcher: Mutex<Option<Debouncer<RecommendedWatcher>>>,
    reconciled: usize,
}

impl Publisher {
    /// Register with the broker, connect to the bus and start publishing.
    ///
    /// Returns once the initial reconcile has been queued and the watcher is
    /// running.
    pub async fn start(config: PublisherConfig) -> Result<Self> {
        let state = PublisherState::open(config).await?;
        let config = state.config.clone();

        let broker = ApiClient::with_timeout(&config.broker, config.publish_timeout())?;
        broker
            .register_root(&config.name, &config.http)
            .await
            .with_context(|| format!("failed to register root with broker at {}", config.broker))?;
        tracing::info!(root = %config.name, http = %config.http, "Registered with broker");

        // The publisher never follows anything; inbound events are dropped.
        let (pubsub, _events) = PubSubClient::connect(&config.broker, config.publish_timeout())
            .await
            .with_context(|| format!("failed to connect to pub/sub at {}", config.broker))?;
        let pubsub = Arc::new(pubsub);

        Self::launch(state, pubsub.clone(), Some(pubsub)).await
    }

    /// Start workers, watcher and reconcile on top of an opened state.
    pub(crate) async fn launch(
        state: PublisherState,
        sink: Arc<dyn EventSink>,
        pubsub: Option<Arc<PubSubClient>>,
    ) -> Result<Self> {
        let (phase, _) = watch::channel(Phase::Starting);
        let (queue, items) = flume::unbounded();
        let cancel = CancellationToken::new();

        let workers = (0..state.config.nworkers)
            .map(|id| {
                tokio::spawn(worker::run(
                    id,
                    state.clone(),
                    sink.clone(),
                    items.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        let mut publisher = Self {
            state,
            phase,
            pubsub,
            queue,
            cancel,
            workers: Mutex::new(workers),
            watcher: Mutex::new(None),
            reconciled: 0,
        };

        // Watch before walking so a change made during the walk is not missed.
        let debouncer = watcher::watch(
            publisher.state.root.clone(),
            publisher.state.skip_dirs().to_vec(),
            publisher.state.config.debounce(),
            publisher.queue.clone(),
        )
        .context("failed to start filesystem watcher")?;
        *publisher.watcher.lock().await = Some(debouncer);

        publisher.set_phase(Phase::Reconciling);
        publisher.reconciled = publisher.reconcile().await.context("reconcile failed")?;
        tracing::info!(queued = publisher.reconciled, "Reconciled root with ledger");

        publisher.set_phase(Phase::Running);
        Ok(publisher)
    }

    pub fn state(&self) -> &PublisherState {
        &self.state
    }

    /// Subscribe to phase transitions.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Number of items the startup reconcile queued.
    pub fn reconciled(&self) -> usize {
        self.reconciled
    }

    fn set_phase(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        tracing::info!(from = ?previous, to = ?phase, "Publisher phase changed");
    }

    /// Queue every file whose etag differs from the ledger, and every ledger
    /// entry whose file is gone. Returns the number of queued items.
    async fn reconcile(&self) -> StorageResult<usize> {
        let recorded = self.state.ledger.snapshot().await;
        let mut live = HashSet::new();
        let mut queued = 0;

        for (path, meta) in self.state.walk().await? {
            let etag = Etag::from_metadata(&meta)?;
            if recorded.get(&path) != Some(&etag) {
                tracing::debug!(%path, %etag, "Out of date");
                self.enqueue(path.clone());
                queued += 1;
            }
            live.insert(path);
        }

        for path in recorded.into_keys().filter(|p| !live.contains(p)) {
            tracing::debug!(%path, "Deleted while offline");
            self.enqueue(path);
            queued += 1;
        }
        Ok(queued)
    }

    fn enqueue(&self, path: DatasetPath) {
        // Receivers live as long as the workers; a send can only fail during shutdown.
        if self.queue.send(path).is_err() {
            tracing::warn!("Work queue closed");
        }
    }

    /// Stop watching, stop the workers and close the bus connection.
    pub async fn shutdown(&self) {
        self.set_phase(Phase::Draining);

        self.watcher.lock().await.take();
        self.cancel.cancel();
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Worker ended abnormally");
            }
        }

        if let Some(pubsub) = &self.pubsub {
            pubsub
                .disconnect(self.state.config.disconnect_timeout())
                .await;
        }

        self.set_phase(Phase::Stopped);
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
