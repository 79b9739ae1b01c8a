//! S3 client implementation

use super::config::{ConnectionParams, StoreOptions};
use super::connection::StoreFactory;
use super::error::{ErrorKind, S3Error, S3Result};
use super::operations::{ObjectStore, PartProgress};
use super::types::{
    ListRequest, MultipartSession, S3ListResult, S3Object, UploadAttributes, UploadPartInfo,
};
use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use aws_sdk_s3::Client as AwsS3Client;
use aws_smithy_types::body::SdkBody;
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Characters left as-is in a `x-amz-copy-source` header
const COPY_SOURCE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Credentials provider name reported to the SDK
const PROVIDER_NAME: &str = "clouddeck";

/// How often a part upload reports bytes sent
const PROGRESS_TICK: Duration = Duration::from_millis(200);

/// Largest frame handed to the transport at once
const BODY_FRAME_SIZE: usize = 64 * 1024;

/// S3 client for AWS S3 and S3-compatible storage
#[derive(Clone)]
pub struct S3Client {
    /// AWS S3 client
    client: AwsS3Client,

    /// Bucket this client was configured for
    bucket: String,
}

impl S3Client {
    /// Build a client from connection parameters.
    ///
    /// No request is sent; use [`ObjectStore::head_bucket`] to check reachability.
    pub fn new(params: &ConnectionParams, options: &StoreOptions) -> S3Result<Self> {
        params.validate()?;

        let credentials = Credentials::new(
            &params.access_key,
            &params.secret_key,
            params.session_token.clone(),
            None,
            PROVIDER_NAME,
        );

        let timeout_config = TimeoutConfig::builder()
            .operation_attempt_timeout(options.request_timeout)
            .build();

        let retry_config = RetryConfig::standard()
            .with_max_attempts(options.max_attempts.max(1))
            .with_initial_backoff(options.initial_backoff)
            .with_max_backoff(options.max_backoff);

        // Some S3-compatible stores reject the default CRC32 trailers
        let (request_checksums, response_checksums) = if options.verify_checksums {
            (
                RequestChecksumCalculation::WhenSupported,
                ResponseChecksumValidation::WhenSupported,
            )
        } else {
            (
                RequestChecksumCalculation::WhenRequired,
                ResponseChecksumValidation::WhenRequired,
            )
        };

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(params.region.clone()))
            .credentials_provider(credentials)
            .timeout_config(timeout_config)
            .retry_config(retry_config)
            .request_checksum_calculation(request_checksums)
            .response_checksum_validation(response_checksums);

        if let Some(endpoint) = params
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            builder = builder.endpoint_url(endpoint.to_string());
        }

        if params.force_path_style {
            builder = builder.force_path_style(true);
        }

        debug!(
            bucket = %params.bucket,
            region = %params.region,
            endpoint = ?params.endpoint,
            "Built S3 client"
        );

        Ok(Self {
            client: AwsS3Client::from_conf(builder.build()),
            bucket: params.bucket.clone(),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn metadata_map(attributes: &UploadAttributes) -> Option<HashMap<String, String>> {
    if attributes.metadata.is_empty() {
        None
    } else {
        Some(
            attributes
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn head_bucket(&self, bucket: &str) -> S3Result<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| match S3Error::from(e) {
                // HEAD carries no error body, so a bare 404 means the bucket
                S3Error::Service {
                    kind: ErrorKind::NotFound,
                    http_status,
                    ..
                } => S3Error::service(
                    ErrorKind::NoSuchBucket,
                    http_status,
                    format!("Bucket not found: {}", bucket),
                ),
                other => other,
            })?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        attributes: &UploadAttributes,
    ) -> S3Result<()> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(size as i64)
            .set_content_type(attributes.content_type.clone())
            .set_metadata(metadata_map(attributes))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(S3Error::from)?;

        debug!(key, size, "Put object");
        Ok(())
    }

    async fn start_multipart_session(
        &self,
        bucket: &str,
        key: &str,
        attributes: &UploadAttributes,
    ) -> S3Result<MultipartSession> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(attributes.content_type.clone())
            .set_metadata(metadata_map(attributes))
            .send()
            .await
            .map_err(S3Error::from)?;

        let upload_id = response
            .upload_id()
            .ok_or_else(|| S3Error::MultipartUpload("No upload ID returned".to_string()))?
            .to_string();

        Ok(MultipartSession {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        body: Bytes,
        progress: PartProgress<'_>,
    ) -> S3Result<UploadPartInfo> {
        let size = body.len() as u64;
        let sent = Arc::new(AtomicU64::new(0));

        let send = self
            .client
            .upload_part()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .part_number(part_number as i32)
            .content_length(size as i64)
            .body(CountingBody::stream(body, Arc::clone(&sent)))
            .send();
        tokio::pin!(send);

        let mut ticker = tokio::time::interval(PROGRESS_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let response = loop {
            tokio::select! {
                result = &mut send => break result.map_err(S3Error::from)?,
                _ = ticker.tick() => progress(sent.load(Ordering::Relaxed).min(size), size),
            }
        };

        let etag = response
            .e_tag()
            .ok_or_else(|| S3Error::MultipartUpload("No ETag returned for part".to_string()))?
            .to_string();

        progress(size, size);
        Ok(UploadPartInfo::new(part_number, etag, size))
    }

    async fn complete_multipart_session(
        &self,
        session: &MultipartSession,
        parts: &[UploadPartInfo],
    ) -> S3Result<()> {
        let completed_parts: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number as i32)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        let multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .multipart_upload(multipart_upload)
            .send()
            .await
            .map_err(S3Error::from)?;

        Ok(())
    }

    async fn abort_multipart_session(&self, session: &MultipartSession) -> S3Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&session.bucket)
            .key(&session.key)
            .upload_id(&session.upload_id)
            .send()
            .await
            .map_err(S3Error::from)?;

        Ok(())
    }

    async fn list_objects(&self, request: &ListRequest) -> S3Result<S3ListResult> {
        let prefix = Some(request.prefix.clone()).filter(|p| !p.is_empty());
        let response = self
            .client
            .list_objects_v2()
            .bucket(&request.bucket)
            .set_prefix(prefix)
            .set_delimiter(request.delimiter.clone())
            .set_continuation_token(request.cursor.clone())
            .max_keys(request.max_keys)
            .send()
            .await
            .map_err(S3Error::from)?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?.to_string();
                Some(S3Object {
                    key,
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj
                        .last_modified()
                        .and_then(|dt| SystemTime::try_from(*dt).ok()),
                    etag: obj.e_tag().map(|s| s.to_string()),
                })
            })
            .collect();

        let common_prefixes = response
            .common_prefixes()
            .iter()
            .filter_map(|cp| cp.prefix().map(|s| s.to_string()))
            .collect();

        Ok(S3ListResult {
            objects,
            common_prefixes,
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> S3Result<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| S3Error::InvalidConfig(format!("Invalid URL expiry: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(S3Error::from)?;

        Ok(request.uri().to_string())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> S3Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| S3Error::InvalidKey(e.to_string()))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| S3Error::InvalidKey(e.to_string()))?;

        let response = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(S3Error::from)?;

        if let Some(first) = response.errors().first() {
            let failed = response.errors().len();
            warn!(failed, "Batch delete reported per-key failures");
            return Err(S3Error::service(
                ErrorKind::classify(first.code(), None),
                None,
                format!(
                    "{} of {} key(s) not deleted; first: {} ({})",
                    failed,
                    keys.len(),
                    first.key().unwrap_or("?"),
                    first.message().or(first.code()).unwrap_or("unknown error"),
                ),
            ));
        }

        Ok(())
    }

    async fn copy_object(&self, bucket: &str, source_key: &str, dest_key: &str) -> S3Result<()> {
        let copy_source = format!(
            "{}/{}",
            bucket,
            utf8_percent_encode(source_key, COPY_SOURCE_ENCODE_SET)
        );

        self.client
            .copy_object()
            .bucket(bucket)
            .key(dest_key)
            .copy_source(copy_source)
            .send()
            .await
            .map_err(S3Error::from)?;

        Ok(())
    }
}

/// Request body that counts bytes as the transport reads them
struct CountingBody {
    remaining: Bytes,
    sent: Arc<AtomicU64>,
}

impl CountingBody {
    /// Retryable stream over `data`; every fresh read restarts the count
    fn stream(data: Bytes, sent: Arc<AtomicU64>) -> ByteStream {
        ByteStream::new(SdkBody::retryable(move || {
            sent.store(0, Ordering::Relaxed);
            SdkBody::from_body_1_x(CountingBody {
                remaining: data.clone(),
                sent: Arc::clone(&sent),
            })
        }))
    }
}

impl http_body::Body for CountingBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        if self.remaining.is_empty() {
            return Poll::Ready(None);
        }
        let len = self.remaining.len().min(BODY_FRAME_SIZE);
        let chunk = self.remaining.split_to(len);
        self.sent.fetch_add(len as u64, Ordering::Relaxed);
        Poll::Ready(Some(Ok(Frame::data(chunk))))
    }

    fn is_end_stream(&self) -> bool {
        self.remaining.is_empty()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining.len() as u64)
    }
}

/// Builds [`S3Client`] stores for the connection manager
#[derive(Debug, Clone, Default)]
pub struct S3StoreFactory {
    options: StoreOptions,
}

impl S3StoreFactory {
    /// Create a factory applying `options` to every client it builds
    pub fn new(options: StoreOptions) -> Self {
        Self { options }
    }

    /// Transport options used by this factory
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }
}

impl StoreFactory for S3StoreFactory {
    fn build(&self, params: &ConnectionParams) -> S3Result<Arc<dyn ObjectStore>> {
        Ok(Arc::new(S3Client::new(params, &self.options)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let params = ConnectionParams::new("AKIA", "secret", "us-east-1", "test-bucket");
        let client = S3Client::new(&params, &StoreOptions::default()).unwrap();
        assert_eq!(client.bucket(), "test-bucket");
    }

    #[tokio::test]
    async fn test_client_with_missing_bucket() {
        let params = ConnectionParams::new("AKIA", "secret", "us-east-1", "");
        let result = S3Client::new(&params, &StoreOptions::default());
        assert!(matches!(result, Err(S3Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_presigned_url_is_local() {
        let params = ConnectionParams::new("AKIA", "secret", "us-east-1", "photos")
            .with_endpoint("http://localhost:9000");
        let client = S3Client::new(&params, &StoreOptions::default()).unwrap();
        let url = client
            .presigned_get_url("photos", "trip/beach day.jpg", Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:9000/photos/"));
        assert!(url.contains("beach%20day.jpg"));
        assert!(url.contains("X-Amz-Expires=3600"));
    }

    #[test]
    fn test_copy_source_encoding() {
        let encoded = utf8_percent_encode("reports/Q1 2024 (final).pdf", COPY_SOURCE_ENCODE_SET)
            .to_string();
        assert_eq!(encoded, "reports/Q1%202024%20%28final%29.pdf");
    }

    #[tokio::test]
    async fn test_counting_body_reports_bytes_read() {
        let data = Bytes::from(vec![7u8; 3 * BODY_FRAME_SIZE + 5]);
        let sent = Arc::new(AtomicU64::new(0));

        let read = CountingBody::stream(data.clone(), Arc::clone(&sent))
            .collect()
            .await
            .unwrap()
            .into_bytes();
        assert_eq!(read, data);
        assert_eq!(sent.load(Ordering::Relaxed), data.len() as u64);

        // A resent body counts from zero again
        CountingBody::stream(data.clone(), Arc::clone(&sent))
            .collect()
            .await
            .unwrap();
        assert_eq!(sent.load(Ordering::Relaxed), data.len() as u64);
    }

    #[test]
    fn test_counting_body_size_hint() {
        use http_body::Body;

        let body = CountingBody {
            remaining: Bytes::from_static(b"hello"),
            sent: Arc::new(AtomicU64::new(0)),
        };
        assert_eq!(body.size_hint().exact(), Some(5));
        assert!(!body.is_end_stream());
    }

    #[test]
    fn test_factory_validates_params() {
        let factory = S3StoreFactory::default();
        let params = ConnectionParams::new("", "secret", "us-east-1", "photos");
        assert!(factory.build(&params).is_err());
    }
}
