//! In-process broker, publisher and subscriber on ephemeral ports.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tessera_client::{ApiClient, Event, PubSubClient};
use tessera_core::config::{BrokerConfig, PublisherConfig, SubscriberConfig};
use tessera_server::broker::{self, BrokerState};
use tessera_server::publisher::{self, Publisher};
use tessera_server::subscriber::{self, Subscriber};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Chunk length used by test publishers, small enough to split tiny files.
#[allow(dead_code)]
pub const TEST_CHUNK_SIZE: u64 = 4;

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn serve(listener: TcpListener, router: axum::Router) -> JoinHandle<()> {
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    })
}

/// A broker listening on 127.0.0.1.
#[allow(dead_code)]
pub struct TestBroker {
    pub addr: String,
    pub state: BrokerState,
    server: JoinHandle<()>,
}

#[allow(dead_code)]
impl TestBroker {
    pub async fn start() -> Self {
        let (listener, addr) = bind().await;
        let state = BrokerState::new(BrokerConfig {
            http: addr.to_string(),
            ..BrokerConfig::default()
        });
        let server = serve(listener, broker::create_router(state.clone()));
        Self {
            addr: addr.to_string(),
            state,
            server,
        }
    }

    /// Open a raw pub/sub connection, e.g. to watch a topic.
    pub async fn connect(&self) -> (PubSubClient, mpsc::UnboundedReceiver<Event>) {
        PubSubClient::connect(&self.addr, Duration::from_secs(5))
            .await
            .expect("Failed to connect to broker")
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// A publisher with its own root and state directories.
#[allow(dead_code)]
pub struct TestPublisher {
    pub addr: String,
    pub publisher: Publisher,
    pub root: TempDir,
    pub statedir: TempDir,
    server: JoinHandle<()>,
}

#[allow(dead_code)]
impl TestPublisher {
    pub async fn start(broker: &str, name: &str) -> Self {
        let root = tempfile::tempdir().expect("Failed to create root directory");
        let statedir = tempfile::tempdir().expect("Failed to create state directory");
        Self::start_in(broker, name, root, statedir).await
    }

    /// Start on existing directories, e.g. after [`TestPublisher::stop`].
    pub async fn start_in(broker: &str, name: &str, root: TempDir, statedir: TempDir) -> Self {
        let (listener, addr) = bind().await;
        let config = PublisherConfig {
            name: name.to_string(),
            root: root.path().to_path_buf(),
            http: addr.to_string(),
            broker: broker.to_string(),
            statedir: statedir.path().to_path_buf(),
            chunk_size: TEST_CHUNK_SIZE,
            debounce_ms: 50,
            ..PublisherConfig::default()
        };
        let publisher = Publisher::start(config)
            .await
            .expect("Failed to start publisher");
        let server = serve(listener, publisher::create_router(publisher.state().clone()));
        Self {
            addr: addr.to_string(),
            publisher,
            root,
            statedir,
            server,
        }
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(&self.addr).unwrap()
    }

    /// Write `rel` under the root via a temp file, so the watcher only
    /// sees the finished file.
    pub fn write(&self, rel: &str, data: &[u8]) {
        let path = self.root.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let temp = path.with_file_name(format!(
            "{}.tmp.test",
            path.file_name().unwrap().to_string_lossy()
        ));
        std::fs::write(&temp, data).unwrap();
        std::fs::rename(temp, path).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.root.path().join(rel)).unwrap();
    }

    /// Wait until the ledger records exactly `paths`.
    pub async fn settle(&self, paths: &[&str]) {
        let state = self.publisher.state();
        crate::common::eventually("publisher ledger", || async move {
            let recorded = state.ledger.snapshot().await;
            recorded.len() == paths.len()
                && recorded.keys().zip(paths).all(|(p, expected)| p.as_str() == *expected)
        })
        .await;
    }

    /// Shut down and hand back the directories.
    pub async fn stop(self) -> (TempDir, TempDir) {
        self.publisher.shutdown().await;
        self.server.abort();
        (self.root, self.statedir)
    }
}

/// A subscriber listening on 127.0.0.1.
#[allow(dead_code)]
pub struct TestSubscriber {
    pub addr: String,
    pub subscriber: Subscriber,
    pub router: axum::Router,
    pub statedir: TempDir,
    server: JoinHandle<()>,
}

#[allow(dead_code)]
impl TestSubscriber {
    pub async fn start(broker: &str) -> Self {
        let statedir = tempfile::tempdir().expect("Failed to create state directory");
        Self::start_in(broker, statedir).await
    }

    pub async fn start_in(broker: &str, statedir: TempDir) -> Self {
        let (listener, addr) = bind().await;
        let config = SubscriberConfig {
            http: addr.to_string(),
            broker: broker.to_string(),
            statedir: statedir.path().to_path_buf(),
            ..SubscriberConfig::default()
        };
        let subscriber = Subscriber::start(config)
            .await
            .expect("Failed to start subscriber");
        let router = subscriber::create_router(subscriber.state().clone());
        let server = serve(listener, router.clone());
        Self {
            addr: addr.to_string(),
            subscriber,
            router,
            statedir,
            server,
        }
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(&self.addr).unwrap()
    }

    pub fn chunk_dir(&self, id: &str) -> std::path::PathBuf {
        let id = tessera_core::DatasetId::parse(id).unwrap();
        self.subscriber.state().chunks.dataset_dir(&id)
    }

    /// Wait until `id` is (or is no longer) listed.
    pub async fn wait_listed(&self, id: &str, listed: bool) {
        let state = self.subscriber.state();
        crate::common::eventually(id, || async move {
            state.list(true).await.iter().any(|i| i == id) == listed
        })
        .await;
    }

    pub async fn stop(self) -> TempDir {
        self.subscriber.shutdown().await;
        self.server.abort();
        self.statedir
    }
}

#[allow(dead_code)]
pub fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}
