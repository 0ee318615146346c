//! HTTP/2 front end for the Parcel multipart object store

pub mod handlers;
pub mod server;

pub use server::ParcelServer;
