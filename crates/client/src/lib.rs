//! Clients for the Tessera services.
//!
//! - [`ApiClient`]: typed HTTP client for the broker, publisher and subscriber
//! - [`PubSubClient`]: websocket client for the broker's pub/sub relay
//! - [`download_url`]: stream a remote resource to disk

pub mod api_client;
pub mod download;
pub mod error;
pub mod pubsub;

pub use api_client::{ApiClient, Info, Region, encode_path, encode_segment};
pub use download::download_url;
pub use error::{ClientError, ClientResult};
pub use pubsub::{Event, PubSubClient};
