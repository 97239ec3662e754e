//! Typed HTTP client for the broker, publisher and subscriber APIs.

use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::header::{ETAG, HeaderMap, IF_NONE_MATCH};
use reqwest::{StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::time::Duration;
use tessera_core::{
    DTYPE_HEADER, DatasetId, DatasetPath, Dtype, Etag, Metadata, Root, SHAPE_HEADER, Slice,
    parse_shape,
};

/// Characters escaped inside a single URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

/// Percent-encode each component of a `/`-separated path, keeping the slashes.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|part| utf8_percent_encode(part, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-encode a whole string as one path segment (slashes included).
pub fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

/// Turn a `host:port` address (or a full URL) into a base URL.
pub fn base_url(addr: &str) -> ClientResult<Url> {
    let url = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    let mut url = Url::parse(&url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Result of a conditional metadata request.
#[derive(Clone, Debug, PartialEq)]
pub enum Info {
    /// The caller's etag is still current.
    NotModified,
    Fresh {
        etag: Option<Etag>,
        metadata: Metadata,
    },
}

/// A region downloaded from a subscriber.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub dtype: Dtype,
    pub shape: Vec<u64>,
    pub data: Bytes,
}

#[derive(Debug, Serialize)]
struct RegisterRootRequest<'a> {
    name: &'a str,
    http: &'a str,
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client for the service listening at `addr` (`host:port`).
    pub fn new(addr: &str) -> ClientResult<Self> {
        Self::with_http(addr, reqwest::Client::new())
    }

    /// Create a client whose requests time out after `timeout`.
    pub fn with_timeout(addr: &str, timeout: Duration) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;
        Self::with_http(addr, http)
    }

    /// Create a client sharing an existing connection pool.
    pub fn with_http(addr: &str, http: reqwest::Client) -> ClientResult<Self> {
        Ok(Self {
            http,
            base_url: base_url(addr)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for an API path (`api/list`).
    pub fn url(&self, path: &str) -> ClientResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> ClientResult<reqwest::Response> {
        let response = req.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED || status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> ClientResult<T> {
        let response = self.send(req).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn send_bytes(&self, req: reqwest::RequestBuilder) -> ClientResult<(HeaderMap, Bytes)> {
        let response = self.send(req).await?;
        let headers = response.headers().clone();
        Ok((headers, response.bytes().await?))
    }

    // ----- broker -----------------------------------------------------------

    /// Roots known to a broker or subscriber.
    pub async fn roots(&self) -> ClientResult<BTreeMap<String, Root>> {
        let url = self.url("api/roots")?;
        self.send_json(self.http.get(url)).await
    }

    /// Register (or update) a root on the broker.
    pub async fn register_root(&self, name: &str, http: &str) -> ClientResult<Root> {
        let url = self.url("api/roots")?;
        let req = RegisterRootRequest { name, http };
        self.send_json(self.http.post(url).json(&req)).await
    }

    // ----- publisher --------------------------------------------------------

    /// Every dataset path published under the root.
    pub async fn list_paths(&self) -> ClientResult<Vec<DatasetPath>> {
        let url = self.url("api/list")?;
        self.send_json(self.http.get(url)).await
    }

    /// Metadata of a published dataset, revalidated against `etag` when given.
    pub async fn info(&self, path: &DatasetPath, etag: Option<&Etag>) -> ClientResult<Info> {
        let url = self.url(&format!("api/info/{}", encode_path(path.as_str())))?;
        let mut req = self.http.get(url);
        if let Some(etag) = etag {
            req = req.header(IF_NONE_MATCH, etag.as_str());
        }
        let response = self.send(req).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(Info::NotModified);
        }
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(Etag::from_header);
        let body = response.bytes().await?;
        let metadata =
            serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))?;
        Ok(Info::Fresh { etag, metadata })
    }

    /// Raw compressed bytes of one chunk of a published dataset.
    pub async fn download_chunk(&self, path: &DatasetPath, nchunk: u64) -> ClientResult<Bytes> {
        let mut url = self.url(&format!("api/download/{}", encode_path(path.as_str())))?;
        url.query_pairs_mut()
            .append_pair("nchunk", &nchunk.to_string());
        let (_, body) = self.send_bytes(self.http.get(url)).await?;
        Ok(body)
    }

    // ----- subscriber -------------------------------------------------------

    /// Dataset identifiers known to a subscriber.
    pub async fn list_datasets(&self, all: bool) -> ClientResult<Vec<String>> {
        let mut url = self.url("api/list")?;
        if all {
            url.query_pairs_mut().append_pair("all", "true");
        }
        self.send_json(self.http.get(url)).await
    }

    pub async fn follow(&self, names: &[String]) -> ClientResult<()> {
        let url = self.url("api/follow")?;
        self.send(self.http.post(url).json(names)).await?;
        Ok(())
    }

    pub async fn unfollow(&self, names: &[String]) -> ClientResult<()> {
        let url = self.url("api/unfollow")?;
        self.send(self.http.post(url).json(names)).await?;
        Ok(())
    }

    /// Metadata of a dataset through a subscriber.
    pub async fn dataset_info(&self, id: &DatasetId) -> ClientResult<Metadata> {
        let url = self.url(&format!("api/info/{}", encode_path(&id.to_id_string())))?;
        self.send_json(self.http.get(url)).await
    }

    /// Download a region of a dataset through a subscriber.
    pub async fn download(&self, id: &DatasetId, slice: &Slice) -> ClientResult<Region> {
        let mut url = self.url(&format!("api/download/{}", encode_path(&id.to_id_string())))?;
        if !slice.is_all() {
            url.query_pairs_mut()
                .append_pair("slice", &slice.to_string());
        }
        let (headers, data) = self.send_bytes(self.http.get(url)).await?;

        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| ClientError::Decode(format!("missing {name} header")))
        };
        let dtype: Dtype = header(DTYPE_HEADER)?.parse()?;
        let shape = parse_shape(&header(SHAPE_HEADER)?)?;
        Ok(Region { dtype, shape, data })
    }

    /// Publisher URLs for a root (`[http]`) or a dataset (`[info, download]`).
    pub async fn urls(&self, path: &str) -> ClientResult<Vec<String>> {
        let url = self.url(&format!("api/url/{}", encode_path(path)))?;
        self.send_json(self.http.get(url)).await
    }

    /// Stream a URL to `localpath`; see [`crate::download_url`].
    pub async fn download_url(
        &self,
        url: &str,
        localpath: &std::path::Path,
    ) -> ClientResult<std::path::PathBuf> {
        crate::download::download_url(&self.http, url, localpath).await
    }
}
