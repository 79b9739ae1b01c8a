//! Connection parameters and transport options

use super::error::{S3Error, S3Result};
use super::recovery::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Parameters needed to reach a bucket
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConnectionParams {
    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// Session token (for temporary credentials)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// Region (e.g., "us-east-1")
    pub region: String,

    /// Bucket name
    pub bucket: String,

    /// Custom endpoint URL (for S3-compatible services like MinIO)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Path-style addressing (required for some S3-compatible services)
    #[serde(default)]
    pub force_path_style: bool,
}

impl ConnectionParams {
    /// Create parameters from the four required fields
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Set a custom endpoint, enabling path-style addressing
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self.force_path_style = true;
        self
    }

    /// Set a session token
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Check that every required field is present and non-empty.
    ///
    /// Runs before any network call is attempted.
    pub fn validate(&self) -> S3Result<()> {
        let required = [
            ("access key", &self.access_key),
            ("secret key", &self.secret_key),
            ("region", &self.region),
            ("bucket", &self.bucket),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(S3Error::InvalidConfig(format!(
                "missing {}",
                missing.join(", ")
            )));
        }

        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(S3Error::InvalidConfig(format!(
                    "endpoint must be an http(s) URL: {}",
                    endpoint
                )));
            }
        }

        Ok(())
    }
}

// Keep secrets out of logs
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Transport-level options applied to every store built by a factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Per-attempt request timeout
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Per-request attempts made by the transport itself
    pub max_attempts: u32,

    /// Initial backoff of the transport's own retries
    #[serde(with = "duration_secs")]
    pub initial_backoff: Duration,

    /// Cap on any single backoff of the transport's own retries
    #[serde(with = "duration_secs")]
    pub max_backoff: Duration,

    /// Compute request checksums and validate response checksums
    pub verify_checksums: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        let retry = RetryPolicy::connection();
        Self {
            request_timeout: Duration::from_secs(super::DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: retry.max_attempts,
            initial_backoff: retry.base_delay,
            max_backoff: retry.max_delay,
            verify_checksums: false,
        }
    }
}


mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
