//! HTTP/2 server implementation

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE, SERVER};
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper::{Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use parcel_engine::{LocalStore, StorageEngine};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::handlers::handle_request;

const SERVER_NAME: &str = concat!("parcel/", env!("CARGO_PKG_VERSION"));

pub struct ParcelServer {
    store: LocalStore,
}

impl ParcelServer {
    pub fn new(engine: StorageEngine) -> Self {
        Self {
            store: LocalStore::new(engine),
        }
    }

    /// Bind `addr` and serve until the process exits
    pub async fn serve(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener, std::future::pending()).await
    }

    /// Serve connections from an already bound listener until `shutdown`
    /// resolves. Connections in flight keep running on their own tasks.
    pub async fn serve_listener(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> std::io::Result<()> {
        info!("Parcel server listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            let (stream, remote_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
            };
            debug!("New connection from {}", remote_addr);

            let store = self.store.clone();
            tokio::spawn(async move {
                Self::handle_connection(stream, remote_addr, store).await;
            });
        }
    }

    async fn handle_connection(stream: TcpStream, remote_addr: SocketAddr, store: LocalStore) {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req| {
            let store = store.clone();
            async move { handle_request(req, store).await }
        });

        if let Err(err) = http2::Builder::new(TokioExecutor::new())
            .serve_connection(io, service)
            .await
        {
            error!("HTTP/2 connection error from {}: {}", remote_addr, err);
        }
    }
}

/// Response with the common headers set
pub fn simple_response(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    response
}

pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    simple_response(status, "application/json", Bytes::from(body.to_string()))
}

pub fn object_response(data: Vec<u8>) -> Response<Full<Bytes>> {
    simple_response(StatusCode::OK, "application/octet-stream", Bytes::from(data))
}
