//! Transfer requests and their payload sources

use super::error::{S3Error, S3Result};
use super::strategy::MediaKind;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Byte source with a known length
#[derive(Debug, Clone)]
pub enum Payload {
    /// Bytes already in memory
    Memory(Bytes),
    /// Local file read part by part
    File { path: PathBuf, len: u64 },
}

impl Payload {
    /// Total length in bytes
    pub fn len(&self) -> u64 {
        match self {
            Payload::Memory(bytes) => bytes.len() as u64,
            Payload::File { len, .. } => *len,
        }
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `len` bytes starting at `offset`
    pub async fn read_range(&self, offset: u64, len: u64) -> S3Result<Bytes> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| {
                S3Error::Io(format!(
                    "range {}+{} outside payload of {} bytes",
                    offset,
                    len,
                    self.len()
                ))
            })?;

        match self {
            Payload::Memory(bytes) => Ok(bytes.slice(offset as usize..end as usize)),
            Payload::File { path, .. } => {
                let mut file = File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                let mut buffer = vec![0u8; len as usize];
                file.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }

    /// Read the whole payload
    pub async fn read_all(&self) -> S3Result<Bytes> {
        self.read_range(0, self.len()).await
    }
}

/// Immutable description of one upload
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Target object key
    pub key: String,

    /// Bytes to send
    pub payload: Payload,

    /// Media kind used by the strategy selector
    pub media_kind: MediaKind,

    /// Content type sent with the object
    pub content_type: Option<String>,

    /// User metadata sent with the object
    pub metadata: BTreeMap<String, String>,

    /// Name of the source file, used for the `original-filename` metadata
    pub file_name: String,
}

impl TransferRequest {
    /// Upload a local file to `key`, guessing its content type
    pub async fn from_file(path: impl AsRef<Path>, key: impl Into<String>) -> S3Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(S3Error::Io(format!("{} is not a regular file", path.display())));
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = mime_guess::from_path(path)
            .first()
            .map(|mime| mime.essence_str().to_string());

        Ok(Self {
            key: key.into(),
            payload: Payload::File {
                path: path.to_path_buf(),
                len: metadata.len(),
            },
            media_kind: MediaKind::detect(&file_name, content_type.as_deref()),
            content_type,
            metadata: BTreeMap::new(),
            file_name,
        })
    }

    /// Upload in-memory bytes to `key`
    pub fn from_bytes(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let key = key.into();
        let file_name = key.rsplit('/').next().unwrap_or_default().to_string();
        let content_type = mime_guess::from_path(&file_name)
            .first()
            .map(|mime| mime.essence_str().to_string());

        Self {
            media_kind: MediaKind::detect(&file_name, content_type.as_deref()),
            payload: Payload::Memory(data.into()),
            content_type,
            metadata: BTreeMap::new(),
            file_name,
            key,
        }
    }

    /// Override the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add a user metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Payload size in bytes
    pub fn size(&self) -> u64 {
        self.payload.len()
    }
}
