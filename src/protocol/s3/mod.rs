//! S3 bucket access for clouddeck
//!
//! This module talks to AWS S3 and S3-compatible services (MinIO, LocalStack,
//! Wasabi) through the official AWS SDK for Rust, and layers the explorer
//! operations on top of it.
//!
//! # Features
//!
//! - One shared connection, lazily restored from persisted parameters
//! - Adaptive uploads: single request for small files, parallel multipart
//!   sessions for large or streamable media
//! - Whole-transfer retry with exponential backoff and jitter
//! - Monotonic progress aggregated across concurrent parts
//! - Paginated folder listings with prefix-bound cursors
//! - Presigned download and share links, batch delete, rename, folders
//!
//! # Examples
//!
//! ## Upload a file
//!
//! ```ignore
//! use clouddeck::protocol::s3::{
//!     ConnectionManager, ConnectionParams, Explorer, FileParamsStore, S3StoreFactory,
//!     StoreOptions, TransferRequest,
//! };
//! use clouddeck::protocol::s3::progress::ProgressReporter;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let location = FileParamsStore::default_location().ok_or("no config directory")?;
//!     let manager = Arc::new(ConnectionManager::new(
//!         Arc::new(S3StoreFactory::new(StoreOptions::default())),
//!         Arc::new(FileParamsStore::new(location)),
//!     ));
//!     manager
//!         .connect(ConnectionParams::new("AKIA...", "secret", "us-east-1", "photos"))
//!         .await?;
//!
//!     let explorer = Explorer::new(manager);
//!     let request = TransferRequest::from_file("clip.mp4", "videos/clip.mp4").await?;
//!     let (reporter, _events) = ProgressReporter::new();
//!     explorer.upload(request, reporter).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Using MinIO or other S3-compatible storage
//!
//! ```ignore
//! use clouddeck::protocol::s3::ConnectionParams;
//!
//! let params = ConnectionParams::new("minioadmin", "minioadmin", "us-east-1", "my-bucket")
//!     .with_endpoint("http://localhost:9000");
//! ```

mod client;
mod config;
mod connection;
mod error;
mod multipart;
mod operations;
mod types;

pub mod explorer;
pub mod listing;
pub mod mock;
pub mod progress;
pub mod recovery;
pub mod strategy;
pub mod transfer;
pub mod upload;

// Re-export main types
pub use client::{S3Client, S3StoreFactory};
pub use config::{ConnectionParams, StoreOptions};
pub use connection::{Connection, ConnectionManager, FileParamsStore, ParamsStore, StoreFactory};
pub use error::{ErrorClass, ErrorKind, S3Error, S3Result};
pub use types::{
    ListRequest, MultipartSession, S3ListResult, S3Object, UploadAttributes, UploadPartInfo,
};

// Re-export the store trait for alternative backends
pub use operations::{ObjectStore, PartProgress};

pub use explorer::{Explorer, ShareLink};
pub use listing::{Entry, Lister, ListingCursor, ListingPage};
pub use strategy::{MediaKind, TransferMode, TransferPlan, TransferPlanner};
pub use transfer::{Payload, TransferRequest};
pub use upload::{UploadOutcome, Uploader};

/// Largest non-streamable payload sent as a single request (50 MiB)
pub const SINGLE_SHOT_CEILING: u64 = 50 * 1024 * 1024;

/// Smallest part of a chunked transfer (10 MiB)
pub const MIN_PART_SIZE: u64 = 10 * 1024 * 1024;

/// Most parts one multipart session may hold
pub const MAX_PARTS: u64 = 10_000;

/// Parts in flight for streamable media
pub const STREAMABLE_CONCURRENCY: usize = 2;

/// Parts in flight for everything else
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Per-request timeout of the transport, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
