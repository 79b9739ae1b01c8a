//! Transfer strategy: choose single-shot or chunked upload for a payload

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Broad category of a file, derived once from its name or content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Code,
    Archive,
    Other,
}

impl MediaKind {
    /// Classify by file extension (case-insensitive)
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" | "bmp" | "tiff" | "ico" => {
                MediaKind::Image
            }
            "mp4" | "webm" | "mov" | "avi" | "mkv" | "flv" | "wmv" | "m4v" | "3gp" => {
                MediaKind::Video
            }
            "mp3" | "wav" | "ogg" | "oga" | "aac" | "flac" => MediaKind::Audio,
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "txt" | "rtf" => {
                MediaKind::Document
            }
            "js" | "jsx" | "ts" | "tsx" | "html" | "css" | "json" | "xml" | "py" | "java"
            | "c" | "cpp" | "cs" | "go" | "php" | "rb" | "swift" | "rs" => MediaKind::Code,
            "zip" | "rar" | "7z" | "tar" | "gz" => MediaKind::Archive,
            _ => MediaKind::Other,
        }
    }

    /// Classify by file name
    pub fn from_name(name: &str) -> Self {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(MediaKind::Other)
    }

    /// Classify by MIME type; only the top-level type is considered
    pub fn from_content_type(content_type: &str) -> Self {
        let top = content_type
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match top.as_str() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }

    /// Name first, then content type as a fallback
    pub fn detect(name: &str, content_type: Option<&str>) -> Self {
        match (Self::from_name(name), content_type) {
            (MediaKind::Other, Some(ct)) => Self::from_content_type(ct),
            (kind, _) => kind,
        }
    }

    /// Streamable media is always uploaded in chunks with reduced concurrency
    pub fn is_streamable(self) -> bool {
        matches!(self, MediaKind::Video)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
            MediaKind::Code => "code",
            MediaKind::Archive => "archive",
            MediaKind::Other => "file",
        };
        f.write_str(name)
    }
}

/// How a payload is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    /// One request carrying the whole body
    SingleShot,
    /// Multipart session with parts uploaded concurrently
    Chunked,
}

/// Contiguous byte range of a chunked transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number
    pub number: u32,
    /// Offset of the first byte
    pub offset: u64,
    /// Length in bytes
    pub len: u64,
}

/// Plan computed once per transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
    pub mode: TransferMode,
    pub part_size: u64,
    pub max_concurrent_parts: usize,
}

impl TransferPlan {
    /// Number of parts for a payload of `total` bytes
    pub fn part_count(&self, total: u64) -> u64 {
        match self.mode {
            TransferMode::SingleShot => 1,
            TransferMode::Chunked if total == 0 => 1,
            TransferMode::Chunked => total.div_ceil(self.part_size.max(1)),
        }
    }

    /// Split `total` bytes into gapless parts numbered from 1
    pub fn parts(&self, total: u64) -> Vec<PartRange> {
        if self.mode == TransferMode::SingleShot || total == 0 {
            return vec![PartRange {
                number: 1,
                offset: 0,
                len: total,
            }];
        }

        let part_size = self.part_size.max(1);
        (0..self.part_count(total))
            .map(|index| {
                let offset = index * part_size;
                PartRange {
                    number: (index + 1) as u32,
                    offset,
                    len: part_size.min(total - offset),
                }
            })
            .collect()
    }
}

/// Strategy selector with tunable thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferPlanner {
    /// Largest non-streamable payload sent in one request
    pub single_shot_ceiling: u64,

    /// Smallest part size of a chunked transfer
    pub min_part_size: u64,

    /// Most parts a session may hold
    pub max_parts: u64,

    /// Concurrent parts for streamable media
    pub streamable_concurrency: usize,

    /// Concurrent parts for everything else
    pub default_concurrency: usize,
}

impl Default for TransferPlanner {
    fn default() -> Self {
        Self {
            single_shot_ceiling: super::SINGLE_SHOT_CEILING,
            min_part_size: super::MIN_PART_SIZE,
            max_parts: super::MAX_PARTS,
            streamable_concurrency: super::STREAMABLE_CONCURRENCY,
            default_concurrency: super::DEFAULT_CONCURRENCY,
        }
    }
}

impl TransferPlanner {
    /// Pick a plan for `size` bytes of `kind` media
    pub fn plan(&self, size: u64, kind: MediaKind) -> TransferPlan {
        if size == 0 || (size <= self.single_shot_ceiling && !kind.is_streamable()) {
            return TransferPlan {
                mode: TransferMode::SingleShot,
                part_size: size,
                max_concurrent_parts: 1,
            };
        }

        let part_size = self
            .min_part_size
            .max(size.div_ceil(self.max_parts.max(1)));
        let concurrency = if kind.is_streamable() {
            self.streamable_concurrency
        } else {
            self.default_concurrency
        };

        TransferPlan {
            mode: TransferMode::Chunked,
            part_size,
            max_concurrent_parts: concurrency.max(1),
        }
    }
}
