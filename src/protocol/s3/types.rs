//! Type definitions for S3 operations

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// S3 object summary as returned by a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Object {
    /// Object key (path within bucket)
    pub key: String,

    /// Object size in bytes
    pub size: u64,

    /// Last modified timestamp
    pub last_modified: Option<SystemTime>,

    /// ETag (entity tag)
    pub etag: Option<String>,
}

/// Result of one listing call
#[derive(Debug, Clone, Default)]
pub struct S3ListResult {
    /// List of objects
    pub objects: Vec<S3Object>,

    /// Common prefixes (directories)
    pub common_prefixes: Vec<String>,

    /// Continuation token for pagination
    pub continuation_token: Option<String>,

    /// Whether the result is truncated
    pub is_truncated: bool,
}

/// Parameters of one listing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// Bucket to list
    pub bucket: String,

    /// Key prefix; empty for the bucket root
    pub prefix: String,

    /// Grouping delimiter, usually "/"
    pub delimiter: Option<String>,

    /// Continuation token from a previous page
    pub cursor: Option<String>,

    /// Page size
    pub max_keys: i32,
}

/// Headers and user metadata attached to a new object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadAttributes {
    /// Content type
    pub content_type: Option<String>,

    /// User-defined metadata
    pub metadata: BTreeMap<String, String>,
}

impl UploadAttributes {
    /// Attributes with a content type and no metadata
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            metadata: BTreeMap::new(),
        }
    }
}

/// An open multipart upload on the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartSession {
    /// Bucket of the target object
    pub bucket: String,

    /// Target object key
    pub key: String,

    /// Upload ID assigned by the store
    pub upload_id: String,
}

/// Information about an uploaded part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPartInfo {
    /// Part number (1-indexed)
    pub part_number: u32,

    /// ETag of the uploaded part
    pub etag: String,

    /// Size of the part in bytes
    pub size: u64,
}

impl UploadPartInfo {
    /// Create a new upload part info
    pub fn new(part_number: u32, etag: String, size: u64) -> Self {
        Self {
            part_number,
            etag,
            size,
        }
    }
}
