//! HTTP request handlers for the multipart protocol

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use parcel_core::*;
use parcel_engine::LocalStore;
use percent_encoding::percent_decode_str;
use serde_json::json;
use std::convert::Infallible;
use tracing::{debug, error, info, warn};

use crate::server::{json_response, object_response, simple_response};

type HttpResponse = Response<Full<Bytes>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Largest completion manifest accepted, comfortably above 10 000 entries
const MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;

/// What a `/v1/...` path names
#[derive(Debug, PartialEq, Eq)]
enum Target {
    Bucket(BucketId),
    Object(ObjectLocation),
}

/// Query parameters of the multipart protocol
#[derive(Debug, Default, PartialEq, Eq)]
struct UploadQuery {
    uploads: bool,
    upload_id: Option<UploadId>,
    part_number: Option<PartNumber>,
}

/// Main request handler
pub async fn handle_request(
    req: Request<Incoming>,
    store: LocalStore,
) -> std::result::Result<HttpResponse, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("Handling {} {}", method, path);

    let response = match route(req, &store).await {
        Ok(response) => response,
        Err(e) => error_response(&e),
    };

    info!("{} {} -> {}", method, path, response.status());
    Ok(response)
}

async fn route(req: Request<Incoming>, store: &LocalStore) -> Result<HttpResponse> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if path == "/health" {
        return Ok(match method {
            Method::GET => handle_health(),
            _ => not_found(),
        });
    }
    if !path.starts_with("/v1/") {
        return Ok(not_found());
    }

    let target = parse_object_path(&path)?;
    let query = parse_query(req.uri().query())?;

    match (method, target, query) {
        (Method::GET, Target::Bucket(bucket), UploadQuery { uploads: true, .. }) => {
            handle_list_uploads(store, &bucket).await
        }
        (Method::POST, Target::Object(location), UploadQuery { uploads: true, .. }) => {
            handle_initiate(store, &location).await
        }
        (
            Method::PUT,
            Target::Object(location),
            UploadQuery {
                upload_id: Some(upload_id),
                part_number: Some(part_number),
                ..
            },
        ) => handle_upload_part(req, store, &location, &upload_id, part_number).await,
        (
            Method::POST,
            Target::Object(location),
            UploadQuery {
                upload_id: Some(upload_id),
                ..
            },
        ) => handle_complete(req, store, &location, &upload_id).await,
        (
            Method::DELETE,
            Target::Object(location),
            UploadQuery {
                upload_id: Some(upload_id),
                ..
            },
        ) => handle_abort(store, &location, &upload_id).await,
        (Method::GET, Target::Object(location), UploadQuery { upload_id: None, .. }) => {
            handle_get_object(store, &location).await
        }
        _ => Ok(not_found()),
    }
}

/// Health check handler
fn handle_health() -> HttpResponse {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "service": "parcel"
        }),
    )
}

async fn handle_initiate(store: &LocalStore, location: &ObjectLocation) -> Result<HttpResponse> {
    let upload_id = store.initiate_upload(location).await?;
    let body = serde_json::to_value(InitiateUploadResponse { upload_id })?;
    Ok(json_response(StatusCode::CREATED, &body))
}

async fn handle_upload_part(
    req: Request<Incoming>,
    store: &LocalStore,
    location: &ObjectLocation,
    upload_id: &UploadId,
    part_number: PartNumber,
) -> Result<HttpResponse> {
    let limit = store.storage().config().max_part_size;
    let data = read_body(req, limit).await.map_err(|e| {
        let reason = if e.is::<LengthLimitError>() {
            format!("body exceeds the part size limit of {}", limit)
        } else {
            format!("failed to read body: {}", e)
        };
        ParcelError::InvalidPart {
            part_number: part_number.get(),
            reason,
        }
    })?;

    debug!(
        "Staging part {} of upload {} ({} bytes)",
        part_number,
        upload_id,
        data.len()
    );
    let part_tag = store
        .upload_part(location, upload_id, part_number, data)
        .await?;

    let body = serde_json::to_value(UploadPartResponse {
        part_number,
        part_tag,
    })?;
    Ok(json_response(StatusCode::OK, &body))
}

async fn handle_complete(
    req: Request<Incoming>,
    store: &LocalStore,
    location: &ObjectLocation,
    upload_id: &UploadId,
) -> Result<HttpResponse> {
    let body = read_body(req, MAX_MANIFEST_SIZE)
        .await
        .map_err(|e| ParcelError::InvalidManifest(format!("failed to read body: {}", e)))?;
    let manifest: CompleteManifest = serde_json::from_slice(&body)
        .map_err(|e| ParcelError::InvalidManifest(e.to_string()))?;

    let metadata = store
        .complete_upload(location, upload_id, &manifest.parts)
        .await?;
    Ok(json_response(StatusCode::OK, &serde_json::to_value(metadata)?))
}

async fn handle_abort(
    store: &LocalStore,
    location: &ObjectLocation,
    upload_id: &UploadId,
) -> Result<HttpResponse> {
    store.abort_upload(location, upload_id).await?;
    Ok(simple_response(
        StatusCode::NO_CONTENT,
        "application/json",
        Bytes::new(),
    ))
}

async fn handle_list_uploads(store: &LocalStore, bucket: &BucketId) -> Result<HttpResponse> {
    let uploads = store.list_uploads(bucket).await?;
    Ok(json_response(StatusCode::OK, &serde_json::to_value(uploads)?))
}

/// GET object handler
async fn handle_get_object(store: &LocalStore, location: &ObjectLocation) -> Result<HttpResponse> {
    match store.get_object(location).await? {
        Some(data) => {
            debug!("Retrieved object {} ({} bytes)", location, data.len());
            Ok(object_response(data))
        }
        None => Err(ParcelError::ObjectNotFound {
            key: location.to_string(),
        }),
    }
}

/// Collect a request body, failing with [`LengthLimitError`] as soon as it
/// grows past `limit` bytes
async fn read_body(req: Request<Incoming>, limit: u64) -> std::result::Result<Bytes, BoxError> {
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    Ok(Limited::new(req.into_body(), limit).collect().await?.to_bytes())
}

fn not_found() -> HttpResponse {
    json_response(StatusCode::NOT_FOUND, &json!({"error": "Not found"}))
}

fn status_for(err: &ParcelError) -> StatusCode {
    match err {
        ParcelError::InvalidBucketName(_)
        | ParcelError::InvalidKey(_)
        | ParcelError::InvalidPart { .. }
        | ParcelError::InvalidManifest(_)
        | ParcelError::TooManyParts { .. }
        | ParcelError::InvalidState { .. }
        | ParcelError::ProtocolViolation(_) => StatusCode::BAD_REQUEST,
        ParcelError::UploadNotFound { .. } | ParcelError::ObjectNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &ParcelError) -> HttpResponse {
    let status = status_for(err);
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
    json_response(status, &json!({ "error": err.to_string() }))
}

/// Parse "/v1/{bucket}" or "/v1/{bucket}/{key}". The key may contain `/`
/// and is percent-decoded.
fn parse_object_path(path: &str) -> Result<Target> {
    let rest = path.strip_prefix("/v1/").unwrap_or("");
    let (bucket, key) = match rest.split_once('/') {
        Some((bucket, key)) => (bucket, Some(key)),
        None => (rest, None),
    };

    let bucket = BucketId::new(bucket)?;
    let Some(key) = key else {
        return Ok(Target::Bucket(bucket));
    };

    let key = percent_decode_str(key)
        .decode_utf8()
        .map_err(|_| ParcelError::InvalidKey("key is not valid UTF-8".to_string()))?;
    Ok(Target::Object(ObjectLocation::new(bucket, Key::new(&key)?)))
}

fn parse_query(query: Option<&str>) -> Result<UploadQuery> {
    let mut parsed = UploadQuery::default();

    for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = percent_decode_str(value)
            .decode_utf8()
            .map_err(|_| ParcelError::ProtocolViolation(format!("bad query value for {}", name)))?;

        match name {
            "uploads" => parsed.uploads = true,
            "uploadId" => parsed.upload_id = Some(UploadId::new(value.into_owned())?),
            "partNumber" => {
                let n = value.parse::<u32>().map_err(|_| ParcelError::InvalidPart {
                    part_number: 0,
                    reason: format!("'{}' is not a part number", value),
                })?;
                parsed.part_number = Some(PartNumber::new(n)?);
            }
            _ => {}
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_path() {
        let target = parse_object_path("/v1/photos/cat.jpg").unwrap();
        assert_eq!(
            target,
            Target::Object(ObjectLocation::parse("photos", "cat.jpg").unwrap())
        );

        let target = parse_object_path("/v1/documents/folder/my%20file.txt").unwrap();
        assert_eq!(
            target,
            Target::Object(ObjectLocation::parse("documents", "folder/my file.txt").unwrap())
        );

        assert_eq!(
            parse_object_path("/v1/photos").unwrap(),
            Target::Bucket(BucketId::new("photos").unwrap())
        );

        assert!(parse_object_path("/v1/").is_err());
        assert!(parse_object_path("/v1/bucket/").is_err());
        assert!(parse_object_path("/v1//key").is_err());
    }

    #[test]
    fn test_parse_query() {
        assert_eq!(parse_query(None).unwrap(), UploadQuery::default());
        assert!(parse_query(Some("uploads")).unwrap().uploads);

        let query = parse_query(Some("uploadId=01HZX&partNumber=3")).unwrap();
        assert_eq!(query.upload_id.unwrap().as_str(), "01HZX");
        assert_eq!(query.part_number.unwrap().get(), 3);

        assert!(matches!(
            parse_query(Some("uploadId=u&partNumber=0")),
            Err(ParcelError::InvalidPart { .. })
        ));
        assert!(matches!(
            parse_query(Some("uploadId=u&partNumber=10001")),
            Err(ParcelError::TooManyParts { .. })
        ));
        assert!(parse_query(Some("uploadId=u&partNumber=abc")).is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ParcelError::InvalidManifest("empty".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ParcelError::UploadNotFound {
                upload_id: "x".into()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ParcelError::Storage("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
