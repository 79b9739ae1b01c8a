//! Object store capability consumed by the upload engine

use super::error::S3Result;
use super::types::{ListRequest, MultipartSession, S3ListResult, UploadAttributes, UploadPartInfo};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Callback receiving `(loaded, total)` bytes for one part in flight
pub type PartProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Trait defining the object store operations the explorer relies on.
///
/// Implemented by [`S3Client`](super::S3Client) on top of `aws-sdk-s3` and by
/// [`MockStore`](super::mock::MockStore) for tests.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check that the bucket exists and is reachable
    async fn head_bucket(&self, bucket: &str) -> S3Result<()>;

    /// Upload a whole object in one request
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        attributes: &UploadAttributes,
    ) -> S3Result<()>;

    /// Open a multipart upload session
    async fn start_multipart_session(
        &self,
        bucket: &str,
        key: &str,
        attributes: &UploadAttributes,
    ) -> S3Result<MultipartSession>;

    /// Upload one part of an open session
    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        body: Bytes,
        progress: PartProgress<'_>,
    ) -> S3Result<UploadPartInfo>;

    /// Commit a session; `parts` must be sorted by part number
    async fn complete_multipart_session(
        &self,
        session: &MultipartSession,
        parts: &[UploadPartInfo],
    ) -> S3Result<()>;

    /// Discard a session and every part uploaded to it
    async fn abort_multipart_session(&self, session: &MultipartSession) -> S3Result<()>;

    /// List one page of objects
    async fn list_objects(&self, request: &ListRequest) -> S3Result<S3ListResult>;

    /// Build a time-limited GET URL
    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> S3Result<String>;

    /// Delete up to 1000 keys in one request
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> S3Result<()>;

    /// Server-side copy within a bucket
    async fn copy_object(&self, bucket: &str, source_key: &str, dest_key: &str) -> S3Result<()>;
}
