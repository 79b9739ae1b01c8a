//! Folder listing over delimiter-grouped, paginated object listings

use super::connection::ConnectionManager;
use super::error::{S3Error, S3Result};
use super::types::ListRequest;
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;

/// Keys per listing call
pub const DEFAULT_PAGE_SIZE: i32 = 1000;

/// Folder separator
pub const DELIMITER: &str = "/";

/// One row of a folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Entry {
    /// Common prefix below the listed folder
    Folder {
        /// Name relative to the listed folder, without trailing `/`
        name: String,
        /// Full prefix, with trailing `/`
        prefix: String,
    },
    /// Object directly inside the listed folder
    File {
        /// Name relative to the listed folder
        name: String,
        /// Full key
        key: String,
        /// Size in bytes
        size: u64,
        /// Last modified timestamp
        last_modified: Option<SystemTime>,
    },
}

impl Entry {
    /// Name relative to the listed folder
    pub fn name(&self) -> &str {
        match self {
            Entry::Folder { name, .. } | Entry::File { name, .. } => name,
        }
    }

    /// Full key or prefix
    pub fn key(&self) -> &str {
        match self {
            Entry::Folder { prefix, .. } => prefix,
            Entry::File { key, .. } => key,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Entry::Folder { .. })
    }
}

/// Continuation of a listing; only valid for the prefix it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingCursor {
    prefix: String,
    token: String,
}

impl ListingCursor {
    /// Prefix this cursor belongs to
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// One page of a folder listing
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Folders first, then files
    pub entries: Vec<Entry>,
    /// Cursor for the next page, if any
    pub next_cursor: Option<ListingCursor>,
}

/// Normalize a folder path into a listing prefix: no leading `/`, one trailing `/`
pub fn folder_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Lists folders of the connected bucket
#[derive(Clone)]
pub struct Lister {
    connections: Arc<ConnectionManager>,
    page_size: i32,
}

impl Lister {
    /// Create a lister using [`DEFAULT_PAGE_SIZE`]
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Override the page size
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetch one page of the folder at `path`. Errors propagate without retry.
    pub async fn list_page(
        &self,
        path: &str,
        cursor: Option<&ListingCursor>,
    ) -> S3Result<ListingPage> {
        let prefix = folder_prefix(path);
        if let Some(cursor) = cursor {
            if cursor.prefix != prefix {
                return Err(S3Error::InvalidCursor(format!(
                    "cursor for '{}' used to list '{}'",
                    cursor.prefix, prefix
                )));
            }
        }

        let connection = self.connections.current()?;
        let result = connection
            .store()
            .list_objects(&ListRequest {
                bucket: connection.bucket().to_string(),
                prefix: prefix.clone(),
                delimiter: Some(DELIMITER.to_string()),
                cursor: cursor.map(|c| c.token.clone()),
                max_keys: self.page_size,
            })
            .await?;

        let folders = result.common_prefixes.into_iter().filter_map(|folder| {
            let name = folder
                .strip_prefix(prefix.as_str())?
                .trim_end_matches('/')
                .to_string();
            (!name.is_empty()).then_some(Entry::Folder {
                name,
                prefix: folder,
            })
        });

        let files = result
            .objects
            .into_iter()
            .filter(|object| !object.key.ends_with('/'))
            .map(|object| Entry::File {
                name: object
                    .key
                    .strip_prefix(prefix.as_str())
                    .unwrap_or(&object.key)
                    .to_string(),
                size: object.size,
                last_modified: object.last_modified,
                key: object.key,
            });

        let entries = folders.chain(files).collect();
        let next_cursor = result
            .continuation_token
            .filter(|_| result.is_truncated)
            .map(|token| ListingCursor {
                prefix: prefix.clone(),
                token,
            });

        Ok(ListingPage {
            entries,
            next_cursor,
        })
    }

    /// Follow cursors until `limit` entries are collected or the folder is exhausted
    pub async fn list_folder(&self, path: &str, limit: Option<usize>) -> S3Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut cursor: Option<ListingCursor> = None;

        loop {
            let page = self.list_page(path, cursor.as_ref()).await?;
            entries.extend(page.entries);

            if limit.is_some_and(|limit| entries.len() >= limit) {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }
}
