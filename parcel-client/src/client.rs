//! HTTP implementation of the object-store protocol

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use parcel_core::*;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::ClientError;

/// Keys keep their `/` separators; everything else outside the unreserved set is escaped
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Talks to a Parcel server over HTTP/2.
///
/// Cheap to share: wrap it in an `Arc` and hand it to as many sinks as needed.
#[derive(Clone)]
pub struct HttpStore {
    base_url: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpStore {
    /// Create a store for a server at `base_url`, e.g. `http://127.0.0.1:8080`
    pub fn new(base_url: impl Into<String>) -> crate::Result<Self> {
        let base_url = base_url.into();
        let uri: Uri = base_url
            .parse()
            .map_err(|e| ClientError::Connection(format!("Invalid URL: {}", e)))?;
        if uri.scheme_str() != Some("http") || uri.authority().is_none() {
            return Err(ClientError::Connection(format!(
                "Expected http://host:port, got '{}'",
                base_url
            )));
        }

        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build_http();

        Ok(HttpStore {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the server is up
    pub async fn health(&self) -> Result<()> {
        let (status, body) = self.send(Method::GET, "/health".to_string(), Bytes::new()).await?;
        check_status(status, &body, None)
    }

    fn object_path(location: &ObjectLocation) -> String {
        format!(
            "/v1/{}/{}",
            location.bucket,
            utf8_percent_encode(location.key.as_str(), KEY_ENCODE_SET)
        )
    }

    fn upload_path(location: &ObjectLocation, upload_id: &UploadId) -> String {
        format!(
            "{}?uploadId={}",
            Self::object_path(location),
            utf8_percent_encode(upload_id.as_str(), NON_ALPHANUMERIC)
        )
    }

    async fn send(&self, method: Method, path: String, body: Bytes) -> Result<(StatusCode, Bytes)> {
        let uri = format!("{}{}", self.base_url, path);
        let request = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(Full::new(body))
            .map_err(|e| ParcelError::Internal(format!("failed to build request: {}", e)))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| ParcelError::Transport(format!("{} {}: {}", method, uri, e)))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ParcelError::Transport(format!("reading response body: {}", e)))?
            .to_bytes();

        debug!(%method, %uri, %status, bytes = body.len(), "Store request finished");
        Ok((status, body))
    }
}

/// Map a non-success status to the matching store error
fn check_status(status: StatusCode, body: &Bytes, upload_id: Option<&UploadId>) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }

    let message = serde_json::from_slice::<ErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());

    match (status, upload_id) {
        (StatusCode::NOT_FOUND, Some(upload_id)) => Err(ParcelError::UploadNotFound {
            upload_id: upload_id.to_string(),
        }),
        _ => Err(ParcelError::Remote {
            status: status.as_u16(),
            message,
        }),
    }
}

/// Parse a success body; anything malformed is the store breaking the protocol
fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| ParcelError::ProtocolViolation(format!("malformed store response: {}", e)))
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn initiate_upload(&self, location: &ObjectLocation) -> Result<UploadId> {
        let path = format!("{}?uploads", Self::object_path(location));
        let (status, body) = self.send(Method::POST, path, Bytes::new()).await?;
        check_status(status, &body, None)?;
        Ok(decode::<InitiateUploadResponse>(&body)?.upload_id)
    }

    async fn upload_part(
        &self,
        location: &ObjectLocation,
        upload_id: &UploadId,
        part_number: PartNumber,
        data: Bytes,
    ) -> Result<PartTag> {
        let path = format!("{}&partNumber={}", Self::upload_path(location, upload_id), part_number);
        let (status, body) = self.send(Method::PUT, path, data).await?;
        check_status(status, &body, Some(upload_id))?;

        let response: UploadPartResponse = decode(&body)?;
        if response.part_number != part_number {
            return Err(ParcelError::ProtocolViolation(format!(
                "sent part {}, store acknowledged part {}",
                part_number, response.part_number
            )));
        }
        Ok(response.part_tag)
    }

    async fn complete_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<ObjectMetadata> {
        let manifest = CompleteManifest {
            parts: parts.to_vec(),
        };
        let body = Bytes::from(serde_json::to_vec(&manifest)?);
        let (status, body) = self
            .send(Method::POST, Self::upload_path(location, upload_id), body)
            .await?;
        check_status(status, &body, Some(upload_id))?;
        decode(&body)
    }

    async fn abort_upload(&self, location: &ObjectLocation, upload_id: &UploadId) -> Result<()> {
        let (status, body) = self
            .send(Method::DELETE, Self::upload_path(location, upload_id), Bytes::new())
            .await?;
        check_status(status, &body, Some(upload_id))
    }
}
