//! Bucket explorer: the user-facing operations on the connected bucket
//!
//! Uploads go through the retrying [`Uploader`]; every other operation is a
//! single pass against the current connection and propagates errors as-is.

use super::config::ConnectionParams;
use super::connection::{Connection, ConnectionManager};
use super::error::{ErrorKind, S3Error, S3Result};
use super::listing::{folder_prefix, Entry, Lister, ListingCursor, ListingPage};
use super::progress::ProgressReporter;
use super::transfer::TransferRequest;
use super::types::{ListRequest, UploadAttributes};
use super::upload::{UploadOutcome, Uploader};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Validity of download URLs
pub const DOWNLOAD_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// Default validity of share links (1 day)
pub const DEFAULT_SHARE_EXPIRY: Duration = Duration::from_secs(86_400);

/// Longest validity a presigned URL may have (7 days)
pub const MAX_SHARE_EXPIRY: Duration = Duration::from_secs(604_800);

/// Keys per batch delete request
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Content type of folder marker objects
pub const FOLDER_CONTENT_TYPE: &str = "application/x-directory";

/// Time-limited public link to an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareLink {
    /// Presigned URL
    pub url: String,
    /// Validity actually granted
    pub expires_in: Duration,
    /// Instant the URL stops working
    pub expires_at: DateTime<Utc>,
}

/// Entry point for bucket operations
#[derive(Clone)]
pub struct Explorer {
    connections: Arc<ConnectionManager>,
    uploader: Uploader,
    lister: Lister,
}

impl Explorer {
    /// Create an explorer with default upload and listing settings
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            uploader: Uploader::new(Arc::clone(&connections)),
            lister: Lister::new(Arc::clone(&connections)),
            connections,
        }
    }

    /// Replace the uploader
    pub fn with_uploader(mut self, uploader: Uploader) -> Self {
        self.uploader = uploader;
        self
    }

    /// Replace the lister
    pub fn with_lister(mut self, lister: Lister) -> Self {
        self.lister = lister;
        self
    }

    /// Connection manager shared with the uploader and lister
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// The upload engine
    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// Upload a file or buffer, stamping tracking metadata
    pub async fn upload(
        &self,
        request: TransferRequest,
        reporter: ProgressReporter,
    ) -> S3Result<UploadOutcome> {
        validate_key(&request.key)?;

        let size = request.size();
        let name = if request.file_name.is_empty() {
            request.key.rsplit('/').next().unwrap_or_default().to_string()
        } else {
            request.file_name.clone()
        };
        let request = request
            .with_metadata("original-filename", name)
            .with_metadata("upload-timestamp", Utc::now().to_rfc3339())
            .with_metadata("file-size", size.to_string());

        self.uploader.upload(&request, reporter).await
    }

    /// One page of the folder at `path`
    pub async fn list_page(
        &self,
        path: &str,
        cursor: Option<&ListingCursor>,
    ) -> S3Result<ListingPage> {
        self.lister.list_page(path, cursor).await
    }

    /// Entries of the folder at `path`, following pagination
    pub async fn list_folder(&self, path: &str, limit: Option<usize>) -> S3Result<Vec<Entry>> {
        self.lister.list_folder(path, limit).await
    }

    /// Presigned download URL valid for one hour
    pub async fn download_url(&self, key: &str) -> S3Result<String> {
        validate_key(key)?;
        let connection = self.connections.current()?;
        connection
            .store()
            .presigned_get_url(connection.bucket(), key, DOWNLOAD_URL_EXPIRY)
            .await
    }

    /// Presigned share link; expiry is clamped to 1 second..7 days
    pub async fn share_link(&self, key: &str, expires_in: Duration) -> S3Result<ShareLink> {
        validate_key(key)?;
        let expires_in = Duration::from_secs(
            expires_in
                .as_secs()
                .clamp(1, MAX_SHARE_EXPIRY.as_secs()),
        );

        let connection = self.connections.current()?;
        let url = connection
            .store()
            .presigned_get_url(connection.bucket(), key, expires_in)
            .await?;

        let expires_at = Utc::now()
            + chrono::Duration::from_std(expires_in)
                .map_err(|e| S3Error::InvalidConfig(format!("Invalid expiry: {}", e)))?;

        Ok(ShareLink {
            url,
            expires_in,
            expires_at,
        })
    }

    /// Delete `keys` in batches; returns how many keys were sent
    pub async fn delete(&self, keys: &[String]) -> S3Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        for key in keys {
            validate_key(key)?;
        }

        let connection = self.connections.current()?;
        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            connection
                .store()
                .delete_objects(connection.bucket(), batch)
                .await?;
        }

        info!(count = keys.len(), "Deleted objects");
        Ok(keys.len())
    }

    /// Delete a folder marker and every object below it
    pub async fn delete_folder(&self, path: &str) -> S3Result<usize> {
        let prefix = folder_prefix(path);
        if prefix.is_empty() {
            return Err(S3Error::InvalidKey("refusing to delete the bucket root".to_string()));
        }
        let keys = self.keys_under(&prefix).await?;
        self.delete(&keys).await
    }

    /// Rename a file or folder within its parent folder; returns the new key.
    ///
    /// Files are copied then deleted. A folder key (trailing `/`) moves every
    /// object under its prefix. Fails without writing anything when the
    /// source is missing or the destination is taken. If a copy fails, the
    /// copies already made are removed and the source is left untouched.
    pub async fn rename(&self, key: &str, new_name: &str) -> S3Result<String> {
        validate_key(key)?;
        let is_folder = key.ends_with('/');
        validate_name(new_name, is_folder)?;

        let parent = parent_prefix(key);
        let new_key = if is_folder {
            format!("{}{}/", parent, new_name)
        } else {
            format!("{}{}", parent, new_name)
        };
        if new_key == key {
            return Ok(new_key);
        }

        let sources = if is_folder {
            self.keys_under(key).await?
        } else {
            vec![key.to_string()]
        };
        if sources.is_empty() {
            return Err(S3Error::service(
                ErrorKind::NotFound,
                None,
                format!("Folder not found: {}", key),
            ));
        }
        if self.exists(&new_key, is_folder).await? {
            return Err(S3Error::InvalidKey(format!("'{}' already exists", new_key)));
        }

        let connection = self.connections.current()?;
        let mut copied = Vec::with_capacity(sources.len());
        for source in &sources {
            let destination = format!("{}{}", new_key, &source[key.len()..]);
            if let Err(error) = connection
                .store()
                .copy_object(connection.bucket(), source, &destination)
                .await
            {
                self.discard_copies(&connection, &copied).await;
                return Err(error.context(format!("Failed to rename {} to {}", key, new_key)));
            }
            debug!(from = %source, to = %destination, "Copied object");
            copied.push(destination);
        }
        self.delete(&sources).await?;

        info!(from = key, to = %new_key, objects = sources.len(), "Renamed");
        Ok(new_key)
    }

    /// Create a folder marker; returns its key
    pub async fn create_folder(&self, path: &str) -> S3Result<String> {
        let key = folder_prefix(path);
        if key.is_empty() {
            return Err(S3Error::InvalidKey("folder path is empty".to_string()));
        }

        let connection = self.connections.current()?;
        connection
            .store()
            .put_object(
                connection.bucket(),
                &key,
                Bytes::new(),
                &UploadAttributes::with_content_type(FOLDER_CONTENT_TYPE),
            )
            .await?;

        info!(folder = %key, "Created folder");
        Ok(key)
    }

    /// Check that `params` reach a readable bucket
    pub async fn test_connection(&self, params: &ConnectionParams) -> S3Result<()> {
        self.connections.probe(params).await
    }

    /// Whether `key` exists; for folders, whether anything lives under it
    async fn exists(&self, key: &str, is_folder: bool) -> S3Result<bool> {
        let connection = self.connections.current()?;
        // A key sorts before every longer key sharing it as a prefix
        let page = connection
            .store()
            .list_objects(&ListRequest {
                bucket: connection.bucket().to_string(),
                prefix: key.to_string(),
                delimiter: None,
                cursor: None,
                max_keys: 1,
            })
            .await?;

        Ok(page
            .objects
            .first()
            .is_some_and(|object| is_folder || object.key == key))
    }

    /// Best-effort removal of partial rename copies
    async fn discard_copies(&self, connection: &Connection, copied: &[String]) {
        for batch in copied.chunks(DELETE_BATCH_SIZE) {
            if let Err(e) = connection
                .store()
                .delete_objects(connection.bucket(), batch)
                .await
            {
                warn!(error = %e, count = batch.len(), "Could not remove partial copies");
            }
        }
    }

    /// Every key starting with `prefix`, across all pages
    async fn keys_under(&self, prefix: &str) -> S3Result<Vec<String>> {
        let connection = self.connections.current()?;
        let mut keys = Vec::new();
        let mut cursor = None;

        loop {
            let page = connection
                .store()
                .list_objects(&ListRequest {
                    bucket: connection.bucket().to_string(),
                    prefix: prefix.to_string(),
                    delimiter: None,
                    cursor: cursor.take(),
                    max_keys: super::listing::DEFAULT_PAGE_SIZE,
                })
                .await?;

            keys.extend(page.objects.into_iter().map(|object| object.key));
            match page.continuation_token.filter(|_| page.is_truncated) {
                Some(token) => cursor = Some(token),
                None => break,
            }
        }

        Ok(keys)
    }
}

/// Folder containing `key`, with trailing `/`; empty at the root
fn parent_prefix(key: &str) -> &str {
    let trimmed = key.strip_suffix('/').unwrap_or(key);
    match trimmed.rfind('/') {
        Some(at) => &key[..=at],
        None => "",
    }
}

fn validate_key(key: &str) -> S3Result<()> {
    if key.is_empty() || key.len() > 1024 {
        return Err(S3Error::InvalidKey(format!(
            "key must be 1 to 1024 bytes long, got {}",
            key.len()
        )));
    }
    Ok(())
}

/// Folder names: letters, digits, `.`, `_`, `-`. File names may also contain
/// spaces and must carry an extension.
fn validate_name(name: &str, is_folder: bool) -> S3Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');

    let valid = if is_folder {
        !name.is_empty() && name.chars().all(allowed)
    } else {
        match name.rsplit_once('.') {
            Some((stem, extension)) => {
                !stem.is_empty()
                    && stem.chars().all(|c| allowed(c) || c == ' ')
                    && !extension.is_empty()
                    && extension.chars().all(|c| c.is_ascii_alphanumeric())
            }
            None => false,
        }
    };

    if valid {
        Ok(())
    } else if is_folder {
        Err(S3Error::InvalidKey(format!(
            "folder name '{}' may only contain letters, numbers, dots, hyphens and underscores",
            name
        )))
    } else {
        Err(S3Error::InvalidKey(format!(
            "file name '{}' must be a valid name with an extension",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::s3::mock::{MemoryParamsStore, MockOp, MockStore, MockStoreFactory};

    fn explorer(store: Arc<MockStore>) -> Explorer {
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(MockStoreFactory::new(store)),
            Arc::new(MemoryParamsStore::default()),
        ));
        manager
            .initialize(ConnectionParams::new("AKIA", "secret", "us-east-1", "photos"))
            .unwrap();
        Explorer::new(manager)
    }

    #[test]
    fn test_parent_prefix() {
        assert_eq!(parent_prefix("a.txt"), "");
        assert_eq!(parent_prefix("docs/a.txt"), "docs/");
        assert_eq!(parent_prefix("docs/old/"), "docs/");
        assert_eq!(parent_prefix("old/"), "");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Q1 report.pdf", false).is_ok());
        assert!(validate_name("noextension", false).is_err());
        assert!(validate_name("bad/name.txt", false).is_err());
        assert!(validate_name("2024_trip", true).is_ok());
        assert!(validate_name("with space", true).is_err());
        assert!(validate_name("", true).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_stamps_metadata() {
        let store = Arc::new(MockStore::new("photos"));
        let request = TransferRequest::from_bytes("docs/report.pdf", vec![1u8; 64]);

        explorer(store.clone())
            .upload(request, ProgressReporter::default())
            .await
            .unwrap();

        let metadata = store.object_attributes("docs/report.pdf").unwrap().metadata;
        assert_eq!(metadata.get("original-filename").map(String::as_str), Some("report.pdf"));
        assert_eq!(metadata.get("file-size").map(String::as_str), Some("64"));
        let stamped = metadata.get("upload-timestamp").unwrap();
        assert!(DateTime::parse_from_rfc3339(stamped).is_ok());
    }

    #[tokio::test]
    async fn test_share_link_expiry_is_clamped() {
        let store = Arc::new(MockStore::new("photos"));
        store.insert_object("a.txt", "a");
        let explorer = explorer(store);

        let link = explorer
            .share_link("a.txt", Duration::from_secs(30 * 86_400))
            .await
            .unwrap();
        assert_eq!(link.expires_in, MAX_SHARE_EXPIRY);
        assert!(link.url.contains("X-Amz-Expires=604800"));

        let link = explorer.share_link("a.txt", Duration::ZERO).await.unwrap();
        assert_eq!(link.expires_in, Duration::from_secs(1));
        assert!(link.expires_at > Utc::now() - chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_download_url_valid_one_hour() {
        let store = Arc::new(MockStore::new("photos"));
        let url = explorer(store).download_url("a.txt").await.unwrap();
        assert!(url.contains("X-Amz-Expires=3600"));
    }

    #[tokio::test]
    async fn test_delete_batches_and_empty_noop() {
        let store = Arc::new(MockStore::new("photos"));
        let explorer = explorer(store.clone());

        assert_eq!(explorer.delete(&[]).await.unwrap(), 0);
        assert_eq!(store.count(MockOp::Delete), 0);

        let keys: Vec<String> = (0..2500).map(|i| format!("k{}", i)).collect();
        for key in &keys {
            store.insert_object(key.clone(), "x");
        }
        assert_eq!(explorer.delete(&keys).await.unwrap(), 2500);

        let sizes: Vec<u64> = store
            .calls()
            .iter()
            .filter(|c| c.op == MockOp::Delete)
            .map(|c| c.size)
            .collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_rename_file_within_folder() {
        let store = Arc::new(MockStore::new("photos"));
        store.insert_object("docs/old.txt", "body");
        let explorer = explorer(store.clone());

        let new_key = explorer.rename("docs/old.txt", "new.txt").await.unwrap();
        assert_eq!(new_key, "docs/new.txt");
        assert_eq!(store.keys(), vec!["docs/new.txt".to_string()]);
        assert_eq!(store.object("docs/new.txt").unwrap(), Bytes::from_static(b"body"));
    }

    #[tokio::test]
    async fn test_rename_folder_moves_children() {
        let store = Arc::new(MockStore::new("photos"));
        store.insert_object("trips/", "");
        store.insert_object("trips/a.jpg", "a");
        store.insert_object("trips/2024/b.jpg", "b");
        store.insert_object("tripsx.txt", "keep");
        let explorer = explorer(store.clone());

        let new_key = explorer.rename("trips/", "travel").await.unwrap();
        assert_eq!(new_key, "travel/");
        assert_eq!(
            store.keys(),
            vec![
                "travel/".to_string(),
                "travel/2024/b.jpg".to_string(),
                "travel/a.jpg".to_string(),
                "tripsx.txt".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_rename_missing_source_fails_without_delete() {
        let store = Arc::new(MockStore::new("photos"));
        let explorer = explorer(store.clone());

        let err = explorer.rename("ghost.txt", "other.txt").await.unwrap_err();
        assert_eq!(err.http_status(), Some(404));
        assert_eq!(store.count(MockOp::Delete), 0);
    }

    #[tokio::test]
    async fn test_rename_missing_folder_is_not_found() {
        let store = Arc::new(MockStore::new("photos"));
        store.insert_object("trips/a.jpg", "a");
        let explorer = explorer(store.clone());

        let err = explorer.rename("trps/", "travel").await.unwrap_err();
        assert_eq!(err.class(), crate::protocol::s3::ErrorClass::NotFound);
        assert_eq!(store.count(MockOp::Copy), 0);
        assert_eq!(store.count(MockOp::Delete), 0);
        assert_eq!(store.keys(), vec!["trips/a.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_rename_refuses_existing_destination() {
        let store = Arc::new(MockStore::new("photos"));
        store.insert_object("docs/old.txt", "old");
        store.insert_object("docs/new.txt", "keep me");
        store.insert_object("trips/a.jpg", "a");
        store.insert_object("travel/b.jpg", "b");
        let explorer = explorer(store.clone());

        let err = explorer.rename("docs/old.txt", "new.txt").await.unwrap_err();
        assert!(matches!(err, S3Error::InvalidKey(_)));
        assert_eq!(store.object("docs/new.txt").unwrap(), Bytes::from_static(b"keep me"));
        assert!(store.object("docs/old.txt").is_some());

        // A folder without a marker still counts as taken
        let err = explorer.rename("trips/", "travel").await.unwrap_err();
        assert!(matches!(err, S3Error::InvalidKey(_)));
        assert_eq!(store.count(MockOp::Copy), 0);
        assert!(store.object("trips/a.jpg").is_some());
    }

    #[tokio::test]
    async fn test_rename_prefix_sibling_is_not_a_conflict() {
        let store = Arc::new(MockStore::new("photos"));
        store.insert_object("docs/old.txt", "old");
        store.insert_object("docs/new.txt.bak", "backup");
        let explorer = explorer(store.clone());

        let new_key = explorer.rename("docs/old.txt", "new.txt").await.unwrap();
        assert_eq!(new_key, "docs/new.txt");
        assert!(store.object("docs/new.txt.bak").is_some());
    }

    #[tokio::test]
    async fn test_failed_folder_copy_removes_partial_copies() {
        let store = Arc::new(MockStore::new("photos"));
        store.insert_object("trips/a.jpg", "a");
        store.insert_object("trips/b.jpg", "b");
        store.insert_object("trips/c.jpg", "c");
        store.fail_target(
            MockOp::Copy,
            "trips/c.jpg",
            S3Error::service(ErrorKind::ServerError, Some(500), "InternalError"),
        );
        let explorer = explorer(store.clone());

        let err = explorer.rename("trips/", "travel").await.unwrap_err();
        assert!(matches!(err, S3Error::WithContext { .. }));
        assert_eq!(err.http_status(), Some(500));
        assert_eq!(
            store.keys(),
            vec![
                "trips/a.jpg".to_string(),
                "trips/b.jpg".to_string(),
                "trips/c.jpg".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_folder_marker() {
        let store = Arc::new(MockStore::new("photos"));
        let key = explorer(store.clone()).create_folder("docs/reports").await.unwrap();

        assert_eq!(key, "docs/reports/");
        assert_eq!(store.object("docs/reports/").unwrap().len(), 0);
        let attributes = store.object_attributes("docs/reports/").unwrap();
        assert_eq!(attributes.content_type.as_deref(), Some(FOLDER_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_delete_folder_removes_everything_below() {
        let store = Arc::new(MockStore::new("photos"));
        store.insert_object("old/", "");
        store.insert_object("old/a", "a");
        store.insert_object("old/deep/b", "b");
        store.insert_object("older", "keep");
        let explorer = explorer(store.clone());

        assert_eq!(explorer.delete_folder("old").await.unwrap(), 3);
        assert_eq!(store.keys(), vec!["older".to_string()]);
        assert!(explorer.delete_folder("/").await.is_err());
    }
}
