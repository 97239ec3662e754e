use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;
use std::net::TcpListener;
use tessera_client::{ApiClient, ClientError, Info};
use tessera_core::{DatasetId, DatasetPath, Dtype, Etag, Layout, Metadata, Slice};

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn sample_metadata() -> Metadata {
    let layout = Layout::for_bytes(13, 1024).unwrap();
    let cparams = tessera_core::CodecParams {
        codec: "zstd".to_string(),
        clevel: 3,
        typesize: 1,
    };
    Metadata::from_layout(&layout, cparams, 20, "cache/a.txt.tsr".to_string())
}

#[tokio::test]
async fn broker_roots_and_registration() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let roots = server.mock(|when, then| {
        when.method(GET).path("/api/roots");
        then.status(200).json_body(json!({
            "foo": {"name": "foo", "http": "localhost:8001"}
        }));
    });
    let register = server.mock(|when, then| {
        when.method(POST)
            .path("/api/roots")
            .json_body(json!({"name": "foo", "http": "localhost:8001"}));
        then.status(200)
            .json_body(json!({"name": "foo", "http": "localhost:8001"}));
    });

    let client = ApiClient::new(&server.address().to_string()).unwrap();
    let root = client.register_root("foo", "localhost:8001").await.unwrap();
    assert_eq!(root.name, "foo");

    let listed = client.roots().await.unwrap();
    assert_eq!(listed["foo"].http, "localhost:8001");
    assert_eq!(listed["foo"].subscribed, None);

    register.assert();
    roots.assert();
}

#[tokio::test]
async fn publisher_info_handles_revalidation() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let metadata = sample_metadata();

    let not_modified = server.mock(|when, then| {
        when.method(GET)
            .path("/api/info/dir/a.txt")
            .header("if-none-match", "10.5:13");
        then.status(304);
    });
    let fresh = server.mock(|when, then| {
        when.method(GET)
            .path("/api/info/dir/a.txt")
            .header_missing("if-none-match");
        then.status(200)
            .header("etag", "11.25:13")
            .json_body(serde_json::to_value(&metadata).unwrap());
    });

    let client = ApiClient::new(&server.base_url()).unwrap();
    let path = DatasetPath::new("dir/a.txt").unwrap();

    let cached = Etag::from("10.5:13".to_string());
    assert_eq!(client.info(&path, Some(&cached)).await.unwrap(), Info::NotModified);

    match client.info(&path, None).await.unwrap() {
        Info::Fresh { etag, metadata: got } => {
            assert_eq!(etag.unwrap().as_str(), "11.25:13");
            assert_eq!(got, metadata);
        }
        Info::NotModified => panic!("expected fresh metadata"),
    }

    not_modified.assert();
    fresh.assert();
}

#[tokio::test]
async fn publisher_chunk_download_sends_index() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let chunk = server.mock(|when, then| {
        when.method(GET)
            .path("/api/download/dir/b.txt")
            .query_param("nchunk", "2");
        then.status(200).body(b"compressed");
    });

    let client = ApiClient::new(&server.base_url()).unwrap();
    let path = DatasetPath::new("dir/b.txt").unwrap();
    let body = client.download_chunk(&path, 2).await.unwrap();
    assert_eq!(&body[..], b"compressed");
    chunk.assert();
}

#[tokio::test]
async fn subscriber_download_reads_region_headers() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let download = server.mock(|when, then| {
        when.method(GET)
            .path("/api/download/foo/arr.tsr")
            .query_param("slice", "1,2:4");
        then.status(200)
            .header("x-tessera-dtype", "int16")
            .header("x-tessera-shape", "2")
            .body([1u8, 0, 2, 0]);
    });
    let listing = server.mock(|when, then| {
        when.method(GET).path("/api/list").query_param("all", "true");
        then.status(200).json_body(json!(["foo/a.txt", "foo/arr.tsr"]));
    });

    let client = ApiClient::new(&server.base_url()).unwrap();
    let id = DatasetId::parse("foo/arr.tsr").unwrap();
    let region = client
        .download(&id, &Slice::parse("1, 2:4").unwrap())
        .await
        .unwrap();
    assert_eq!(region.dtype, Dtype::Int16);
    assert_eq!(region.shape, vec![2]);
    assert_eq!(&region.data[..], &[1, 0, 2, 0]);

    let all = client.list_datasets(true).await.unwrap();
    assert_eq!(all, vec!["foo/a.txt", "foo/arr.tsr"]);

    download.assert();
    listing.assert();
}

#[tokio::test]
async fn api_client_returns_error_body_on_failure() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/info/missing.txt");
        then.status(404)
            .json_body(json!({"code": "not_found", "message": "missing.txt"}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/follow");
        then.status(500).body("boom");
    });

    let client = ApiClient::new(&server.base_url()).unwrap();
    let err = client
        .info(&DatasetPath::new("missing.txt").unwrap(), None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("API error (404"));

    let err = client.follow(&["foo".to_string()]).await.unwrap_err();
    match err {
        ClientError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_service_is_retryable() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ApiClient::new(&addr.to_string()).unwrap();
    let err = client.roots().await.unwrap_err();
    assert!(matches!(err, ClientError::Unavailable(_)), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn download_url_streams_to_disk() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/download/foo/arr.tsr");
        then.status(200).body(b"container-bytes");
    });

    let dir = tempfile::tempdir().unwrap();
    let client = ApiClient::new(&server.base_url()).unwrap();
    let url = server.url("/api/download/foo/arr.tsr");
    let written = client
        .download_url(&url, &dir.path().join("nested/arr"))
        .await
        .unwrap();

    assert_eq!(written, dir.path().join("nested/arr.tsr"));
    assert_eq!(std::fs::read(&written).unwrap(), b"container-bytes");
}
