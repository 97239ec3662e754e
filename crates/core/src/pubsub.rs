//! Pub/sub wire frames exchanged over the broker websocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic on which the broker announces newly registered roots.
pub const NEW_ROOT_TOPIC: &str = "@new";

/// A single JSON text frame on the `/pubsub` websocket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Client → broker: add topics to this connection's follow set.
    Subscribe { topics: Vec<String> },
    /// Client → broker: remove topics from the follow set.
    Unsubscribe { topics: Vec<String> },
    /// Client → broker: relay `data` to every follower of `topic`.
    Publish { topic: String, data: Value },
    /// Broker → client: a relayed message.
    Event { topic: String, data: Value },
}

impl Frame {
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        serde_json::from_str(text).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}
