//! Subscriber startup, event loop and shutdown.

use super::db::RootsDb;
use super::index::MetadataIndex;
use super::state::SubscriberState;
use anyhow::{Context, Result};
use std::sync::Arc;
use tessera_client::{ApiClient, Event, PubSubClient};
use tessera_core::NEW_ROOT_TOPIC;
use tessera_core::config::SubscriberConfig;
use tessera_storage::ChunkCache;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

pub struct Subscriber {
    state: SubscriberState,
    events: Mutex<Option<JoinHandle<()>>>,
}

impl Subscriber {
    /// Load local state, synchronize with the broker and resume following.
    ///
    /// An unreachable broker is not fatal: the stored roots are used and
    /// follow requests fail until the subscriber is restarted.
    pub async fn start(config: SubscriberConfig) -> Result<Self> {
        let db = RootsDb::open(config.db_path())
            .await
            .context("failed to open roots database")?;
        let index = MetadataIndex::open(config.index_path())
            .await
            .context("failed to open metadata index")?;
        let chunks = ChunkCache::new(config.cache_dir())
            .await
            .context("failed to create chunk cache")?;
        let broker = ApiClient::with_timeout(&config.broker, config.request_timeout())?;

        let mut events = None;
        let pubsub = match broker.roots().await {
            Ok(remote) => {
                let changed = db.sync(remote).await?;
                tracing::info!(changed, "Roots synchronized with broker");
                let (pubsub, rx) =
                    PubSubClient::connect(&config.broker, config.request_timeout())
                        .await
                        .with_context(|| {
                            format!("failed to connect to pub/sub at {}", config.broker)
                        })?;
                events = Some(rx);
                Some(Arc::new(pubsub))
            }
            Err(e) => {
                tracing::warn!(broker = %config.broker, error = %e, "Broker not available, using stored roots");
                None
            }
        };

        let state = SubscriberState::new(config, db, index, chunks, broker, pubsub);
        let events = events.map(|rx| tokio::spawn(run_events(state.clone(), rx)));

        if let Some(pubsub) = state.pubsub() {
            pubsub
                .subscribe(vec![NEW_ROOT_TOPIC.to_string()])
                .await
                .context("failed to subscribe to root announcements")?;

            for name in state.db.subscribed().await {
                if let Err(e) = state.follow(std::slice::from_ref(&name)).await {
                    tracing::warn!(root = %name, error = %e, "Failed to resume following root");
                }
            }
        }

        Ok(Self {
            state,
            events: Mutex::new(events),
        })
    }

    pub fn state(&self) -> &SubscriberState {
        &self.state
    }

    /// Close the bus connection and wait for the event loop to finish.
    pub async fn shutdown(&self) {
        let timeout = self.state.config.disconnect_timeout();
        if let Some(pubsub) = self.state.pubsub() {
            pubsub.disconnect(timeout).await;
        }
        if let Some(mut task) = self.events.lock().await.take()
            && tokio::time::timeout(timeout, &mut task).await.is_err()
        {
            tracing::warn!("Event loop did not stop in time, aborting");
            task.abort();
        }
        tracing::info!("Subscriber stopped");
    }
}

async fn run_events(state: SubscriberState, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        if let Err(e) = state.apply_event(&event).await {
            tracing::warn!(topic = %event.topic, error = %e, "Failed to apply event");
        }
    }
    tracing::info!("Pub/sub event stream ended");
}
