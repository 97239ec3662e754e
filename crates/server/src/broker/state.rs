//! Broker state: the root registry and the pub/sub fan-out table.

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tessera_core::config::BrokerConfig;
use tessera_core::{Frame, NEW_ROOT_TOPIC, Root};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// One websocket connection as seen by the fan-out.
struct Connection {
    topics: HashSet<String>,
    outbound: mpsc::UnboundedSender<Frame>,
}

/// Shared broker state.
#[derive(Clone)]
pub struct BrokerState {
    pub config: Arc<BrokerConfig>,
    roots: Arc<RwLock<BTreeMap<String, Root>>>,
    connections: Arc<DashMap<Uuid, Connection>>,
}

impl BrokerState {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config: Arc::new(config),
            roots: Arc::new(RwLock::new(BTreeMap::new())),
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Snapshot of the registry.
    pub async fn list_roots(&self) -> BTreeMap<String, Root> {
        self.roots.read().await.clone()
    }

    /// Insert or replace a root and announce it on [`NEW_ROOT_TOPIC`].
    pub async fn register_root(&self, name: &str, http: &str) -> ApiResult<Root> {
        let name = name.trim();
        if name.is_empty() || name.contains('/') {
            return Err(ApiError::BadRequest(format!("invalid root name: {name:?}")));
        }
        if http.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "root {name} has no http address"
            )));
        }

        let root = Root::new(name, http.trim());
        let count = {
            let mut roots = self.roots.write().await;
            let previous = roots.insert(root.name.clone(), root.clone());
            if let Some(previous) = previous
                && previous.http != root.http
            {
                tracing::info!(
                    root = %root.name,
                    old = %previous.http,
                    new = %root.http,
                    "Root address changed"
                );
            }
            roots.len()
        };
        metrics::ROOTS_REGISTERED.set(count as i64);
        tracing::info!(root = %root.name, http = %root.http, "Root registered");

        let data = serde_json::to_value(&root)
            .map_err(|e| ApiError::Internal(format!("failed to encode root: {e}")))?;
        self.publish(NEW_ROOT_TOPIC, data);
        Ok(root)
    }

    /// Add a connection to the fan-out table.
    ///
    /// Returns its id and the queue of frames to write to the socket.
    pub fn connect(&self) -> (Uuid, mpsc::UnboundedReceiver<Frame>) {
        let id = Uuid::new_v4();
        let (outbound, rx) = mpsc::unbounded_channel();
        self.connections.insert(
            id,
            Connection {
                topics: HashSet::new(),
                outbound,
            },
        );
        metrics::PUBSUB_CONNECTIONS.inc();
        tracing::debug!(connection = %id, "Pub/sub connection opened");
        (id, rx)
    }

    pub fn disconnect(&self, id: Uuid) {
        if self.connections.remove(&id).is_some() {
            metrics::PUBSUB_CONNECTIONS.dec();
            tracing::debug!(connection = %id, "Pub/sub connection closed");
        }
    }

    pub fn subscribe(&self, id: Uuid, topics: Vec<String>) {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            tracing::debug!(connection = %id, ?topics, "Subscribe");
            connection.topics.extend(topics);
        }
    }

    pub fn unsubscribe(&self, id: Uuid, topics: &[String]) {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            tracing::debug!(connection = %id, ?topics, "Unsubscribe");
            for topic in topics {
                connection.topics.remove(topic);
            }
        }
    }

    /// Relay `data` to every connection currently following `topic`.
    ///
    /// Nothing is buffered: connections that subscribe later never see it.
    /// Returns the number of connections the frame was queued for.
    pub fn publish(&self, topic: &str, data: Value) -> usize {
        let frame = Frame::Event {
            topic: topic.to_string(),
            data,
        };
        let mut delivered = 0;
        for connection in self.connections.iter() {
            if connection.topics.contains(topic) && connection.outbound.send(frame.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        metrics::EVENTS_RELAYED.inc_by(delivered as u64);
        tracing::trace!(%topic, delivered, "Published");
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
