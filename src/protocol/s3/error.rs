//! Error types for S3 operations

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for S3 operations
pub type S3Result<T> = Result<T, S3Error>;

/// Failure kind reported by the object store.
///
/// The retry policy switches on this value, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidCredentials,
    NoSuchBucket,
    Network,
    RequestTimeout,
    ServerError,
    InvalidRequest,
    Unknown,
}

impl ErrorKind {
    /// Derive a kind from a service error code and/or HTTP status.
    ///
    /// The code wins when it is recognised; HEAD requests carry no body, so
    /// the status is the fallback.
    pub fn classify(code: Option<&str>, http_status: Option<u16>) -> Self {
        if let Some(code) = code {
            match code {
                "NoSuchKey" | "NotFound" | "NoSuchUpload" => return ErrorKind::NotFound,
                "NoSuchBucket" => return ErrorKind::NoSuchBucket,
                "AccessDenied" | "Forbidden" | "AllAccessDisabled" | "AccountProblem" => {
                    return ErrorKind::Forbidden
                }
                "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "InvalidToken"
                | "ExpiredToken" | "InvalidSecurity" | "CredentialsError" => {
                    return ErrorKind::InvalidCredentials
                }
                "RequestTimeout" | "RequestTimeoutException" => return ErrorKind::RequestTimeout,
                "InternalError" | "ServiceUnavailable" | "SlowDown" | "ServerError" => {
                    return ErrorKind::ServerError
                }
                // Checksum negotiation failures surface under these codes
                "InvalidRequest" | "BadDigest" | "InvalidDigest" | "XAmzContentSHA256Mismatch" => {
                    return ErrorKind::InvalidRequest
                }
                _ => {}
            }
        }

        match http_status {
            Some(401) => ErrorKind::InvalidCredentials,
            Some(403) => ErrorKind::Forbidden,
            Some(404) => ErrorKind::NotFound,
            Some(408) => ErrorKind::RequestTimeout,
            Some(status) if status >= 500 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        }
    }

    /// Whether a failure of this kind may heal on its own
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::RequestTimeout
                | ErrorKind::ServerError
                | ErrorKind::InvalidRequest
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::InvalidCredentials => "InvalidCredentials",
            ErrorKind::NoSuchBucket => "NoSuchBucket",
            ErrorKind::Network => "Network",
            ErrorKind::RequestTimeout => "RequestTimeout",
            ErrorKind::ServerError => "ServerError",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Coarse taxonomy of failures as seen by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Missing or invalid connection parameters; the user has to fix them
    Configuration,
    /// Bad credentials or insufficient permissions
    Authorization,
    /// Missing bucket or object
    NotFound,
    /// Network, timeout, 5xx or checksum negotiation artifacts
    Transient,
    /// A chunked transfer whose session was aborted after a part failed
    AbortedTransfer,
    /// Request or local failure that a retry cannot fix
    Rejected,
}

/// Errors that can occur during S3 operations
#[derive(Error, Debug, Clone)]
pub enum S3Error {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No active connection and none could be restored
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Failure reported by the object store or its transport
    #[error("S3 service error ({kind}): {message}")]
    Service {
        kind: ErrorKind,
        http_status: Option<u16>,
        message: String,
    },

    /// Invalid object key
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// Listing cursor used with the wrong prefix
    #[error("Invalid listing cursor: {0}")]
    InvalidCursor(String),

    /// Multipart protocol violation (missing upload id, missing ETag, worker panic)
    #[error("Multipart upload error: {0}")]
    MultipartUpload(String),

    /// Chunked transfer aborted after a part or the commit failed
    #[error("Multipart upload of {key} aborted: {source}")]
    MultipartAborted {
        key: String,
        upload_id: String,
        part_number: Option<u32>,
        source: Box<S3Error>,
    },

    /// Local I/O error while reading a payload
    #[error("I/O error: {0}")]
    Io(String),

    /// Final failure of a retried operation
    #[error("{source} (after {attempts} attempt(s))")]
    Terminal { attempts: u32, source: Box<S3Error> },

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<S3Error>,
    },
}

impl S3Error {
    /// Add context to an error
    pub fn context<S: Into<String>>(self, context: S) -> Self {
        S3Error::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a service error
    pub fn service<S: Into<String>>(kind: ErrorKind, http_status: Option<u16>, message: S) -> Self {
        S3Error::Service {
            kind,
            http_status,
            message: message.into(),
        }
    }

    /// Build a connectivity failure
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::service(ErrorKind::Network, None, message)
    }

    /// Classify this error for the retry policy and for callers
    pub fn class(&self) -> ErrorClass {
        match self {
            S3Error::InvalidConfig(_) | S3Error::NotConnected(_) => ErrorClass::Configuration,
            S3Error::Service { kind, .. } => match kind {
                ErrorKind::Forbidden | ErrorKind::InvalidCredentials => ErrorClass::Authorization,
                ErrorKind::NotFound | ErrorKind::NoSuchBucket => ErrorClass::NotFound,
                ErrorKind::Network
                | ErrorKind::RequestTimeout
                | ErrorKind::ServerError
                | ErrorKind::InvalidRequest => ErrorClass::Transient,
                ErrorKind::Unknown => ErrorClass::Rejected,
            },
            S3Error::MultipartAborted { .. } => ErrorClass::AbortedTransfer,
            S3Error::Terminal { source, .. } | S3Error::WithContext { source, .. } => source.class(),
            S3Error::InvalidKey(_)
            | S3Error::InvalidCursor(_)
            | S3Error::MultipartUpload(_)
            | S3Error::Io(_) => ErrorClass::Rejected,
        }
    }

    /// Check if another attempt of the failed operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            S3Error::Service { kind, .. } => kind.is_retryable(),
            // The session is gone, but a fresh transfer may succeed
            S3Error::MultipartAborted { source, .. } => source.is_retryable(),
            S3Error::WithContext { source, .. } => source.is_retryable(),
            S3Error::Terminal { .. } => false,
            _ => false,
        }
    }

    /// Store-reported kind, looking through wrappers
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            S3Error::Service { kind, .. } => Some(*kind),
            S3Error::MultipartAborted { source, .. }
            | S3Error::Terminal { source, .. }
            | S3Error::WithContext { source, .. } => source.kind(),
            _ => None,
        }
    }

    /// HTTP status of the underlying store failure, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            S3Error::Service { http_status, .. } => *http_status,
            S3Error::MultipartAborted { source, .. }
            | S3Error::Terminal { source, .. }
            | S3Error::WithContext { source, .. } => source.http_status(),
            _ => None,
        }
    }

    /// Number of attempts made before this error became terminal
    pub fn attempts(&self) -> Option<u32> {
        match self {
            S3Error::Terminal { attempts, .. } => Some(*attempts),
            S3Error::WithContext { source, .. } => source.attempts(),
            _ => None,
        }
    }

    /// Strip `Terminal` and `WithContext` wrappers
    pub fn root(&self) -> &S3Error {
        match self {
            S3Error::Terminal { source, .. } | S3Error::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

// Convert io::Error to S3Error
impl From<io::Error> for S3Error {
    fn from(err: io::Error) -> Self {
        S3Error::Io(err.to_string())
    }
}

/// Convert AWS SDK errors to S3Error
impl<E> From<SdkError<E, HttpResponse>> for S3Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    fn from(error: SdkError<E, HttpResponse>) -> Self {
        let message = DisplayErrorContext(&error).to_string();
        match &error {
            SdkError::TimeoutError(_) => S3Error::service(ErrorKind::RequestTimeout, None, message),
            SdkError::DispatchFailure(failure) => {
                let kind = if failure.is_timeout() {
                    ErrorKind::RequestTimeout
                } else {
                    ErrorKind::Network
                };
                S3Error::service(kind, None, message)
            }
            SdkError::ResponseError(_) => S3Error::service(ErrorKind::Network, None, message),
            SdkError::ServiceError(context) => {
                let status = context.raw().status().as_u16();
                let err = context.err();
                let kind = ErrorKind::classify(err.code(), Some(status));
                let message = err
                    .message()
                    .map(str::to_string)
                    .or_else(|| err.code().map(str::to_string))
                    .unwrap_or(message);
                S3Error::service(kind, Some(status), message)
            }
            _ => S3Error::service(ErrorKind::Unknown, None, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let base_error = S3Error::InvalidKey("test".to_string());
        let with_context = base_error.context("Failed to upload");

        assert!(matches!(with_context, S3Error::WithContext { .. }));
        assert_eq!(with_context.class(), ErrorClass::Rejected);
    }

    #[test]
    fn test_classify_by_code() {
        assert_eq!(ErrorKind::classify(Some("NoSuchKey"), Some(404)), ErrorKind::NotFound);
        assert_eq!(ErrorKind::classify(Some("NoSuchBucket"), Some(404)), ErrorKind::NoSuchBucket);
        assert_eq!(ErrorKind::classify(Some("AccessDenied"), Some(403)), ErrorKind::Forbidden);
        assert_eq!(
            ErrorKind::classify(Some("SignatureDoesNotMatch"), Some(403)),
            ErrorKind::InvalidCredentials
        );
        assert_eq!(
            ErrorKind::classify(Some("InvalidAccessKeyId"), Some(403)),
            ErrorKind::InvalidCredentials
        );
        assert_eq!(ErrorKind::classify(Some("SlowDown"), Some(503)), ErrorKind::ServerError);
        assert_eq!(ErrorKind::classify(Some("InvalidRequest"), Some(400)), ErrorKind::InvalidRequest);
        assert_eq!(ErrorKind::classify(Some("BadDigest"), Some(400)), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_classify_by_status_fallback() {
        assert_eq!(ErrorKind::classify(None, Some(404)), ErrorKind::NotFound);
        assert_eq!(ErrorKind::classify(None, Some(403)), ErrorKind::Forbidden);
        assert_eq!(ErrorKind::classify(None, Some(503)), ErrorKind::ServerError);
        assert_eq!(ErrorKind::classify(None, Some(500)), ErrorKind::ServerError);
        assert_eq!(ErrorKind::classify(None, Some(408)), ErrorKind::RequestTimeout);
        // Malformed requests unrelated to checksums stay terminal
        assert_eq!(ErrorKind::classify(Some("MalformedXML"), Some(400)), ErrorKind::Unknown);
        assert_eq!(ErrorKind::classify(None, None), ErrorKind::Unknown);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::RequestTimeout.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());
        assert!(ErrorKind::InvalidRequest.is_retryable());
        assert!(!ErrorKind::Forbidden.is_retryable());
        assert!(!ErrorKind::InvalidCredentials.is_retryable());
        assert!(!ErrorKind::NoSuchBucket.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(
            S3Error::InvalidConfig("missing region".into()).class(),
            ErrorClass::Configuration
        );
        assert_eq!(S3Error::NotConnected("none".into()).class(), ErrorClass::Configuration);
        assert_eq!(
            S3Error::service(ErrorKind::Forbidden, Some(403), "denied").class(),
            ErrorClass::Authorization
        );
        assert_eq!(
            S3Error::service(ErrorKind::NoSuchBucket, Some(404), "gone").class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            S3Error::service(ErrorKind::ServerError, Some(503), "busy").class(),
            ErrorClass::Transient
        );
        assert_eq!(S3Error::Io("disk".into()).class(), ErrorClass::Rejected);
    }

    #[test]
    fn test_aborted_transfer_retryability_follows_cause() {
        let transient = S3Error::MultipartAborted {
            key: "clip.mp4".into(),
            upload_id: "u1".into(),
            part_number: Some(7),
            source: Box::new(S3Error::service(ErrorKind::ServerError, Some(503), "busy")),
        };
        assert!(transient.is_retryable());
        assert_eq!(transient.class(), ErrorClass::AbortedTransfer);
        assert_eq!(transient.http_status(), Some(503));

        let fatal = S3Error::MultipartAborted {
            key: "clip.mp4".into(),
            upload_id: "u1".into(),
            part_number: Some(1),
            source: Box::new(S3Error::service(ErrorKind::Forbidden, Some(403), "denied")),
        };
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_terminal_wrapper_delegates() {
        let err = S3Error::Terminal {
            attempts: 4,
            source: Box::new(S3Error::service(ErrorKind::Network, None, "reset")),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.attempts(), Some(4));
        assert_eq!(err.class(), ErrorClass::Transient);
        assert_eq!(err.kind(), Some(ErrorKind::Network));
        assert!(matches!(err.root(), S3Error::Service { .. }));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let s3_err: S3Error = io_err.into();
        assert!(matches!(s3_err, S3Error::Io(_)));
        assert!(!s3_err.is_retryable());
    }

    #[test]
    fn test_error_display_formats() {
        let err = S3Error::service(ErrorKind::ServerError, Some(503), "slow down");
        assert_eq!(format!("{}", err), "S3 service error (ServerError): slow down");

        let err = S3Error::NotConnected("connect first".to_string());
        assert_eq!(format!("{}", err), "Not connected: connect first");

        let err = S3Error::Terminal {
            attempts: 2,
            source: Box::new(S3Error::Io("disk full".to_string())),
        };
        assert_eq!(format!("{}", err), "I/O error: disk full (after 2 attempt(s))");

        let err = S3Error::InvalidKey("".to_string());
        assert_eq!(format!("{}", err), "Invalid object key: ");
    }
}
