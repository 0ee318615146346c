//! Parcel client: a write sink that streams objects into a store as a
//! multipart upload, plus the HTTP store it usually talks to

pub mod buffer;
pub mod client;
pub mod error;
pub mod session;
pub mod sink;
pub mod uploader;

pub use buffer::StagingBuffer;
pub use client::HttpStore;
pub use error::ClientError;
pub use session::{SessionState, UploadSession};
pub use sink::{SinkState, WriteSink};
pub use uploader::PartUploader;

pub type Result<T> = std::result::Result<T, ClientError>;
