//! The multipart protocol over a live HTTP/2 connection

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use parcel_core::*;
use parcel_engine::StorageEngine;
use parcel_server::ParcelServer;
use serde_json::Value;
use std::net::SocketAddr;
use tokio::net::TcpListener;

struct TestServer {
    addr: SocketAddr,
    client: Client<HttpConnector, Full<Bytes>>,
    _temp: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with_config(EngineConfig::default()).await
    }

    async fn start_with_config(config: EngineConfig) -> Self {
        let (engine, temp) = StorageEngine::temp_with_config(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(ParcelServer::new(engine).serve_listener(listener, std::future::pending()));

        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build_http();
        TestServer {
            addr,
            client,
            _temp: temp,
        }
    }

    async fn send(&self, method: Method, path: &str, body: impl Into<Bytes>) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri(format!("http://{}{}", self.addr, path))
            .body(Full::new(body.into()))
            .unwrap();
        let response = self.client.request(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    async fn initiate(&self, path: &str) -> String {
        let (status, body) = self.send(Method::POST, &format!("{}?uploads", path), Bytes::new()).await;
        assert_eq!(status, StatusCode::CREATED);
        let response: InitiateUploadResponse = serde_json::from_slice(&body).unwrap();
        response.upload_id.as_str().to_string()
    }

    async fn put_part(&self, path: &str, upload_id: &str, n: u32, data: &'static [u8]) -> String {
        let (status, body) = self
            .send(
                Method::PUT,
                &format!("{}?uploadId={}&partNumber={}", path, upload_id, n),
                data,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let response: UploadPartResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.part_number.get(), n);
        response.part_tag.as_str().to_string()
    }
}

fn manifest(parts: &[(u32, &str)]) -> Vec<u8> {
    let parts: Vec<Value> = parts
        .iter()
        .map(|(n, tag)| serde_json::json!({"part_number": n, "part_tag": tag}))
        .collect();
    serde_json::to_vec(&serde_json::json!({ "parts": parts })).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let server = TestServer::start().await;
    let (status, body) = server.send(Method::GET, "/health", Bytes::new()).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn multipart_upload_round_trip() {
    let server = TestServer::start().await;
    let path = "/v1/photos/2024/cat%20picture.jpg";

    let upload_id = server.initiate(path).await;
    let tag1 = server.put_part(path, &upload_id, 1, b"hello ").await;
    let tag2 = server.put_part(path, &upload_id, 2, b"world").await;

    let (status, body) = server
        .send(
            Method::POST,
            &format!("{}?uploadId={}", path, upload_id),
            manifest(&[(1, &tag1), (2, &tag2)]),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let metadata: ObjectMetadata = serde_json::from_slice(&body).unwrap();
    assert_eq!(metadata.size, 11);
    assert_eq!(metadata.part_count, 2);

    let (status, body) = server.send(Method::GET, path, Bytes::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"hello world"));

    let (status, body) = server.send(Method::GET, "/v1/photos?uploads", Bytes::new()).await;
    assert_eq!(status, StatusCode::OK);
    let pending: Vec<Value> = serde_json::from_slice(&body).unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn aborted_upload_rejects_further_parts() {
    let server = TestServer::start().await;
    let path = "/v1/logs/app.log";

    let upload_id = server.initiate(path).await;
    server.put_part(path, &upload_id, 1, b"partial").await;

    let (status, _) = server
        .send(Method::DELETE, &format!("{}?uploadId={}", path, upload_id), Bytes::new())
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = server
        .send(
            Method::PUT,
            &format!("{}?uploadId={}&partNumber=2", path, upload_id),
            Bytes::from_static(b"late"),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains(&upload_id));

    let (status, _) = server.send(Method::GET, path, Bytes::new()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let server = TestServer::start().await;
    let path = "/v1/logs/app.log";
    let upload_id = server.initiate(path).await;
    let complete_path = format!("{}?uploadId={}", path, upload_id);

    let (status, _) = server.send(Method::POST, &complete_path, "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server.send(Method::POST, &complete_path, manifest(&[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .send(Method::PUT, &format!("{}&partNumber=0", complete_path), "x")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server.send(Method::POST, "/v1/bad%20bucket/key?uploads", Bytes::new()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server.send(Method::GET, "/nowhere", Bytes::new()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_part_body_is_rejected() {
    let server = TestServer::start_with_config(EngineConfig { max_part_size: 16 }).await;
    let path = "/v1/logs/big.bin";
    let upload_id = server.initiate(path).await;

    let (status, body) = server
        .send(
            Method::PUT,
            &format!("{}?uploadId={}&partNumber=1", path, upload_id),
            vec![b'x'; 4096],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("part size limit"));

    // a part at the limit is still accepted
    server.put_part(path, &upload_id, 1, &[b'y'; 16]).await;
}
