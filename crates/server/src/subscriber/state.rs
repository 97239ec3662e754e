//! Subscriber state and operations.

use super::db::RootsDb;
use super::index::{Entry, MetadataIndex};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tessera_client::{ApiClient, ClientError, Event, Info, PubSubClient, Region, encode_path};
use tessera_core::config::SubscriberConfig;
use tessera_core::{
    ChangeEvent, DatasetId, DatasetPath, Metadata, NEW_ROOT_TOPIC, Root, Slice,
};
use tessera_storage::{ChunkCache, StorageError, assemble, decompress_chunk};
use tokio::sync::Mutex;

/// Shared subscriber state.
#[derive(Clone)]
pub struct SubscriberState {
    pub config: Arc<SubscriberConfig>,
    pub db: Arc<RootsDb>,
    pub index: Arc<MetadataIndex>,
    pub chunks: ChunkCache,
    broker: ApiClient,
    pubsub: Option<Arc<PubSubClient>>,
    /// Publisher clients by address.
    clients: Arc<DashMap<String, ApiClient>>,
    /// Serializes chunk fetches and cache invalidation per dataset.
    locks: Arc<DashMap<DatasetId, Arc<Mutex<()>>>>,
}

impl SubscriberState {
    pub fn new(
        config: SubscriberConfig,
        db: RootsDb,
        index: MetadataIndex,
        chunks: ChunkCache,
        broker: ApiClient,
        pubsub: Option<Arc<PubSubClient>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db: Arc::new(db),
            index: Arc::new(index),
            chunks,
            broker,
            pubsub,
            clients: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn pubsub(&self) -> Option<&Arc<PubSubClient>> {
        self.pubsub.as_ref()
    }

    fn bus(&self) -> ApiResult<&PubSubClient> {
        self.pubsub.as_deref().ok_or_else(|| {
            ApiError::Upstream(ClientError::Unavailable(
                "not connected to the broker".to_string(),
            ))
        })
    }

    fn lock(&self, id: &DatasetId) -> Arc<Mutex<()>> {
        self.locks.entry(id.clone()).or_default().clone()
    }

    fn client_for(&self, http: &str) -> ApiResult<ApiClient> {
        if let Some(client) = self.clients.get(http) {
            return Ok(client.clone());
        }
        let client = ApiClient::with_timeout(http, self.config.request_timeout())?;
        self.clients.insert(http.to_string(), client.clone());
        Ok(client)
    }

    async fn root(&self, name: &str) -> ApiResult<Root> {
        self.db
            .get(name)
            .await
            .ok_or_else(|| ApiError::NotFound(format!("{name} not known by the broker")))
    }

    async fn publisher(&self, root: &str) -> ApiResult<ApiClient> {
        let root = self.root(root).await?;
        self.client_for(&root.http)
    }

    /// Pull the root table from the broker.
    pub async fn refresh_roots(&self) -> ApiResult<bool> {
        let remote = self.broker.roots().await?;
        let changed = self.db.sync(remote).await?;
        if changed {
            tracing::info!("Roots table updated from broker");
        }
        Ok(changed)
    }

    pub async fn roots(&self) -> BTreeMap<String, Root> {
        self.db.snapshot().await
    }

    /// Follow `names`: mark them, subscribe to their topics and seed the index.
    pub async fn follow(&self, names: &[String]) -> ApiResult<()> {
        let mut known = self.db.snapshot().await;
        if names.iter().any(|name| !known.contains_key(name)) {
            self.refresh_roots().await?;
            known = self.db.snapshot().await;
        }
        if let Some(missing) = names.iter().find(|name| !known.contains_key(*name)) {
            return Err(ApiError::NotFound(format!(
                "{missing} not known by the broker"
            )));
        }

        let bus = self.bus()?;
        for name in names {
            self.db.set_subscribed(name, true).await?;
            // Subscribe before seeding so no change falls between the two.
            bus.subscribe(vec![name.clone()]).await?;
            let updated = self.seed(&known[name]).await?;
            tracing::info!(root = %name, updated, "Following root");
        }
        Ok(())
    }

    pub async fn unfollow(&self, names: &[String]) -> ApiResult<()> {
        let bus = self.bus()?;
        for name in names {
            if !self.db.set_subscribed(name, false).await? {
                return Err(ApiError::NotFound(format!("{name} not known by the broker")));
            }
            bus.unsubscribe(vec![name.clone()]).await?;
            tracing::info!(root = %name, "Unfollowed root");
        }
        Ok(())
    }

    /// Bring the index for `root` up to date with its publisher.
    ///
    /// Entries whose etag still matches are kept (304). Returns the number
    /// of entries refreshed or dropped.
    async fn seed(&self, root: &Root) -> ApiResult<usize> {
        let client = self.client_for(&root.http)?;
        let paths = client.list_paths().await?;
        let mut changed = 0;

        for path in &paths {
            let id = DatasetId::new(&root.name, path.clone())?;
            let lock = self.lock(&id);
            let _guard = lock.lock().await;

            let cached = self.index.etag(&id).await;
            match client.info(path, cached.as_ref()).await {
                Ok(Info::NotModified) => {}
                Ok(Info::Fresh { etag, metadata }) => {
                    self.chunks.purge(&id).await?;
                    self.index.insert(id, Entry { metadata, etag }).await?;
                    changed += 1;
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(dataset = %id, "Gone before its metadata was fetched");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let live: HashSet<&DatasetPath> = paths.iter().collect();
        for id in self.index.ids_in_root(&root.name).await {
            if !live.contains(id.path()) {
                self.forget(&id).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn forget(&self, id: &DatasetId) -> ApiResult<()> {
        let lock = self.lock(id);
        let _guard = lock.lock().await;
        self.chunks.purge(id).await?;
        self.index.remove(id).await?;
        Ok(())
    }

    /// Apply one frame received from the broker.
    pub async fn apply_event(&self, event: &Event) -> ApiResult<()> {
        if event.topic == NEW_ROOT_TOPIC {
            let root: Root = serde_json::from_value(event.data.clone())
                .map_err(|e| ApiError::BadRequest(format!("malformed root announcement: {e}")))?;
            tracing::info!(root = %root.name, http = %root.http, "New root announced");
            self.db.upsert(root).await?;
            return Ok(());
        }

        let change: ChangeEvent = serde_json::from_value(event.data.clone())
            .map_err(|e| ApiError::BadRequest(format!("malformed change event: {e}")))?;
        let id = DatasetId::new(&event.topic, change.path)?;

        let lock = self.lock(&id);
        let _guard = lock.lock().await;
        // Announced again, e.g. after a publisher restart; cached chunks still hold.
        if change.metadata.is_some()
            && change.etag.is_some()
            && self.index.etag(&id).await == change.etag
        {
            tracing::debug!(dataset = %id, "Update matches indexed version");
            return Ok(());
        }
        match change.metadata {
            Some(metadata) => {
                tracing::info!(dataset = %id, "Dataset updated");
                self.chunks.purge(&id).await?;
                let entry = Entry {
                    metadata,
                    etag: change.etag,
                };
                self.index.insert(id, entry).await?;
            }
            None => {
                tracing::info!(dataset = %id, "Dataset deleted");
                self.chunks.purge(&id).await?;
                self.index.remove(&id).await?;
            }
        }
        Ok(())
    }

    /// Dataset ids of followed roots, or of every known root with `all`.
    pub async fn list(&self, all: bool) -> Vec<String> {
        let followed: HashSet<String> = self.db.subscribed().await.into_iter().collect();
        let mut ids: Vec<String> = self
            .index
            .ids()
            .await
            .into_iter()
            .filter(|id| all || followed.contains(id.root()))
            .map(|id| id.to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Metadata of a dataset, fetched from its publisher when not indexed.
    pub async fn info(&self, id: &DatasetId) -> ApiResult<Metadata> {
        if let Some(entry) = self.index.get(id).await {
            return Ok(entry.metadata);
        }
        let lock = self.lock(id);
        let _guard = lock.lock().await;
        self.metadata_locked(id).await
    }

    /// Caller holds the dataset lock.
    async fn metadata_locked(&self, id: &DatasetId) -> ApiResult<Metadata> {
        if let Some(entry) = self.index.get(id).await {
            return Ok(entry.metadata);
        }

        let client = self.publisher(id.root()).await?;
        match client.info(id.path(), None).await? {
            Info::Fresh { etag, metadata } => {
                // Chunks cached by an earlier run may be outdated.
                self.chunks.purge(id).await?;
                self.index
                    .insert(
                        id.clone(),
                        Entry {
                            metadata: metadata.clone(),
                            etag,
                        },
                    )
                    .await?;
                tracing::debug!(dataset = %id, "Fetched metadata on demand");
                Ok(metadata)
            }
            Info::NotModified => Err(ApiError::Internal(format!(
                "publisher answered 304 for {id} without a cached etag"
            ))),
        }
    }

    /// Download a region of a dataset, fetching missing chunks first.
    pub async fn download(&self, path: &str, slice: Option<&str>) -> ApiResult<Region> {
        let slice = Slice::parse_opt(slice)?;
        let id = DatasetId::parse(path)?;

        let lock = self.lock(&id);
        let guard = lock.lock().await;

        let metadata = self.metadata_locked(&id).await?;
        let layout = metadata.layout()?;
        let selection = slice.resolve(&layout.shape)?;

        let mut compressed: HashMap<u64, Bytes> = HashMap::new();
        let mut publisher = None;
        for n in selection.chunk_indices(&layout) {
            let data = match self.chunks.get(&id, n).await? {
                Some(data) => {
                    metrics::CHUNK_CACHE_HITS.inc();
                    data
                }
                None => {
                    let client = match publisher.clone() {
                        Some(client) => client,
                        None => {
                            let client = self.publisher(id.root()).await?;
                            publisher = Some(client.clone());
                            client
                        }
                    };
                    let data = client.download_chunk(id.path(), n).await?;
                    self.chunks.put(&id, n, &data).await?;
                    metrics::CHUNK_CACHE_MISSES.inc();
                    metrics::CHUNK_FETCH_BYTES.inc_by(data.len() as u64);
                    tracing::debug!(dataset = %id, nchunk = n, bytes = data.len(), "Fetched chunk");
                    data
                }
            };
            compressed.insert(n, data);
        }
        drop(guard);

        let dtype = layout.dtype;
        let shape = selection.out_shape();
        let data = tokio::task::spawn_blocking(move || {
            let chunksize = layout.chunksize() as usize;
            assemble(&layout, &selection, |n| {
                let chunk = compressed
                    .get(&n)
                    .ok_or_else(|| StorageError::NotFound(format!("chunk {n}")))?;
                decompress_chunk(chunk, chunksize)
            })
        })
        .await
        .map_err(|e| ApiError::Internal(format!("region assembly failed: {e}")))??;

        Ok(Region {
            dtype,
            shape,
            data: Bytes::from(data),
        })
    }

    /// Publisher URLs for a root (`[http]`) or a dataset (`[info, download]`).
    pub async fn urls(&self, path: &str) -> ApiResult<Vec<String>> {
        let (name, dataset) = match path.split_once('/') {
            Some((name, dataset)) => (name, Some(DatasetPath::new(dataset)?)),
            None => (path, None),
        };
        let root = self.root(name).await?;
        let http = format!("http://{}", root.http);
        Ok(match dataset {
            Some(dataset) => {
                let dataset = encode_path(dataset.as_str());
                vec![
                    format!("{http}/api/info/{dataset}"),
                    format!("{http}/api/download/{dataset}"),
                ]
            }
            None => vec![http],
        })
    }
}
