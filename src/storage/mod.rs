//! Persistent storage for uploaded binary attachments.

pub mod blobs;

pub use blobs::{BlobStore, StoredBlob};
