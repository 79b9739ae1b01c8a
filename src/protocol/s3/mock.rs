//! In-memory object store for testing
//!
//! [`MockStore`] implements [`ObjectStore`] on top of a map of keys, records
//! every call it receives and can be scripted to fail specific operations or
//! parts. It is public so integration tests can assert call counts.
//!
//! # Example
//!
//! ```rust
//! use clouddeck::protocol::s3::mock::{MockOp, MockStore};
//! use clouddeck::protocol::s3::{ErrorKind, S3Error};
//!
//! let store = MockStore::new("photos");
//! store.fail_part_always(7, S3Error::service(ErrorKind::ServerError, Some(503), "SlowDown"));
//! assert_eq!(store.count(MockOp::UploadPart), 0);
//! ```

use super::config::ConnectionParams;
use super::connection::{ParamsStore, StoreFactory};
use super::error::{ErrorKind, S3Error, S3Result};
use super::operations::{ObjectStore, PartProgress};
use super::types::{
    ListRequest, MultipartSession, S3ListResult, S3Object, UploadAttributes, UploadPartInfo,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

/// Operations recorded by [`MockStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    HeadBucket,
    PutObject,
    StartMultipart,
    UploadPart,
    CompleteMultipart,
    AbortMultipart,
    List,
    Presign,
    Delete,
    Copy,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Operation
    pub op: MockOp,
    /// Key, prefix or bucket the call targeted
    pub target: String,
    /// Part number for part uploads
    pub part_number: Option<u32>,
    /// Body size for writes, key count for deletes
    pub size: u64,
}

/// Failure injected into matching calls
#[derive(Debug, Clone)]
pub struct ScriptedFailure {
    /// Operation to fail
    pub op: MockOp,
    /// Only fail this part number
    pub part_number: Option<u32>,
    /// Only fail calls targeting this key or prefix
    pub target: Option<String>,
    /// Remaining failures; `None` fails forever
    pub remaining: Option<u32>,
    /// Error returned
    pub error: S3Error,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    attributes: UploadAttributes,
    last_modified: SystemTime,
}

#[derive(Debug, Default)]
struct OpenSession {
    key: String,
    attributes: UploadAttributes,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct MockState {
    objects: BTreeMap<String, StoredObject>,
    sessions: HashMap<String, OpenSession>,
    next_upload: u64,
    calls: Vec<MockCall>,
    failures: Vec<ScriptedFailure>,
    committed: Vec<Vec<u32>>,
    part_delay: Duration,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory object store recording every call
#[derive(Debug)]
pub struct MockStore {
    bucket: String,
    state: Mutex<MockState>,
}

impl MockStore {
    /// Create an empty store serving `bucket`
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay every part upload, so concurrent parts overlap
    pub fn set_part_delay(&self, delay: Duration) {
        self.state().part_delay = delay;
    }

    /// Add an object
    pub fn insert_object(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.state().objects.insert(
            key.into(),
            StoredObject {
                data: data.into(),
                attributes: UploadAttributes::default(),
                last_modified: SystemTime::now(),
            },
        );
    }

    /// Contents of an object
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state().objects.get(key).map(|o| o.data.clone())
    }

    /// Attributes an object was written with
    pub fn object_attributes(&self, key: &str) -> Option<UploadAttributes> {
        self.state().objects.get(key).map(|o| o.attributes.clone())
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    /// Multipart sessions neither committed nor aborted
    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    /// Inject a failure
    pub fn fail(&self, failure: ScriptedFailure) {
        self.state().failures.push(failure);
    }

    /// Fail the next call of `op` once
    pub fn fail_next(&self, op: MockOp, error: S3Error) {
        self.fail(ScriptedFailure {
            op,
            part_number: None,
            target: None,
            remaining: Some(1),
            error,
        });
    }

    /// Fail every call of `op`
    pub fn fail_always(&self, op: MockOp, error: S3Error) {
        self.fail(ScriptedFailure {
            op,
            part_number: None,
            target: None,
            remaining: None,
            error,
        });
    }

    /// Fail every call of `op` targeting `target`
    pub fn fail_target(&self, op: MockOp, target: impl Into<String>, error: S3Error) {
        self.fail(ScriptedFailure {
            op,
            part_number: None,
            target: Some(target.into()),
            remaining: None,
            error,
        });
    }

    /// Fail every upload of part `part_number`
    pub fn fail_part_always(&self, part_number: u32, error: S3Error) {
        self.fail(ScriptedFailure {
            op: MockOp::UploadPart,
            part_number: Some(part_number),
            target: None,
            remaining: None,
            error,
        });
    }

    /// Fail the first `times` uploads of part `part_number`
    pub fn fail_part_times(&self, part_number: u32, times: u32, error: S3Error) {
        self.fail(ScriptedFailure {
            op: MockOp::UploadPart,
            part_number: Some(part_number),
            target: None,
            remaining: Some(times),
            error,
        });
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    /// Number of calls of any kind
    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Number of calls of `op`
    pub fn count(&self, op: MockOp) -> usize {
        self.state().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn head_bucket_count(&self) -> usize {
        self.count(MockOp::HeadBucket)
    }

    pub fn list_count(&self) -> usize {
        self.count(MockOp::List)
    }

    pub fn put_count(&self) -> usize {
        self.count(MockOp::PutObject)
    }

    pub fn commit_count(&self) -> usize {
        self.count(MockOp::CompleteMultipart)
    }

    pub fn abort_count(&self) -> usize {
        self.count(MockOp::AbortMultipart)
    }

    /// Part numbers of every successful commit, in commit order
    pub fn committed_parts(&self) -> Vec<Vec<u32>> {
        self.state().committed.clone()
    }

    /// Highest number of part uploads observed at the same time
    pub fn max_parts_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    fn record(&self, op: MockOp, target: &str, part_number: Option<u32>, size: u64) -> S3Result<()> {
        let mut state = self.state();
        state.calls.push(MockCall {
            op,
            target: target.to_string(),
            part_number,
            size,
        });
        scripted_failure(&mut state, op, target, part_number)
    }

    fn check_bucket(&self, bucket: &str) -> S3Result<()> {
        if bucket == self.bucket {
            Ok(())
        } else {
            Err(S3Error::service(
                ErrorKind::NoSuchBucket,
                Some(404),
                format!("The specified bucket does not exist: {}", bucket),
            ))
        }
    }
}

fn scripted_failure(
    state: &mut MockState,
    op: MockOp,
    target: &str,
    part_number: Option<u32>,
) -> S3Result<()> {
    let position = state.failures.iter().position(|f| {
        f.op == op
            && (f.part_number.is_none() || f.part_number == part_number)
            && f.target.as_deref().map_or(true, |t| t == target)
    });
    let Some(index) = position else {
        return Ok(());
    };

    let error = state.failures[index].error.clone();
    if let Some(remaining) = state.failures[index].remaining.as_mut() {
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            state.failures.remove(index);
        }
    }
    Err(error)
}

struct InFlight<'a>(&'a MockStore);

impl<'a> InFlight<'a> {
    fn enter(store: &'a MockStore) -> Self {
        let mut state = store.state();
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        Self(store)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.state().in_flight -= 1;
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn head_bucket(&self, bucket: &str) -> S3Result<()> {
        self.record(MockOp::HeadBucket, bucket, None, 0)?;
        self.check_bucket(bucket)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        attributes: &UploadAttributes,
    ) -> S3Result<()> {
        self.record(MockOp::PutObject, key, None, body.len() as u64)?;
        self.check_bucket(bucket)?;
        self.state().objects.insert(
            key.to_string(),
            StoredObject {
                data: body,
                attributes: attributes.clone(),
                last_modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn start_multipart_session(
        &self,
        bucket: &str,
        key: &str,
        attributes: &UploadAttributes,
    ) -> S3Result<MultipartSession> {
        self.record(MockOp::StartMultipart, key, None, 0)?;
        self.check_bucket(bucket)?;

        let mut state = self.state();
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.sessions.insert(
            upload_id.clone(),
            OpenSession {
                key: key.to_string(),
                attributes: attributes.clone(),
                parts: BTreeMap::new(),
            },
        );

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
        let _in_flight = InFlight::enter(self);
        let delay = self.state().part_delay;

        if !delay.is_zero() {
            tokio::time::sleep(delay / 2).await;
        }
        progress(size / 2, size);
        if !delay.is_zero() {
            tokio::time::sleep(delay / 2).await;
        }

        self.record(MockOp::UploadPart, &session.key, Some(part_number), size)?;

        let mut state = self.state();
        let open = state.sessions.get_mut(&session.upload_id).ok_or_else(|| {
            S3Error::service(ErrorKind::NotFound, Some(404), "NoSuchUpload")
        })?;
        let etag = format!("\"etag-{}-{}\"", session.upload_id, part_number);
        open.parts.insert(part_number, (etag.clone(), body));
        drop(state);

        progress(size, size);
        Ok(UploadPartInfo::new(part_number, etag, size))
    }

    async fn complete_multipart_session(
        &self,
        session: &MultipartSession,
        parts: &[UploadPartInfo],
    ) -> S3Result<()> {
        self.record(MockOp::CompleteMultipart, &session.key, None, parts.len() as u64)?;

        let mut state = self.state();
        let open = state.sessions.get(&session.upload_id).ok_or_else(|| {
            S3Error::service(ErrorKind::NotFound, Some(404), "NoSuchUpload")
        })?;

        let in_order = parts
            .iter()
            .enumerate()
            .all(|(index, p)| p.part_number as usize == index + 1);
        let etags_match = parts.iter().all(|p| {
            open.parts
                .get(&p.part_number)
                .is_some_and(|(etag, _)| *etag == p.etag)
        });
        if parts.is_empty() || !in_order || !etags_match {
            return Err(S3Error::service(ErrorKind::Unknown, Some(400), "InvalidPartOrder"));
        }

        let mut data = BytesMut::new();
        for p in parts {
            if let Some((_, body)) = open.parts.get(&p.part_number) {
                data.extend_from_slice(body);
            }
        }

        let open = state.sessions.remove(&session.upload_id).unwrap_or_default();
        state.objects.insert(
            open.key,
            StoredObject {
                data: data.freeze(),
                attributes: open.attributes,
                last_modified: SystemTime::now(),
            },
        );
        state
            .committed
            .push(parts.iter().map(|p| p.part_number).collect());
        Ok(())
    }

    async fn abort_multipart_session(&self, session: &MultipartSession) -> S3Result<()> {
        self.record(MockOp::AbortMultipart, &session.key, None, 0)?;
        self.state()
            .sessions
            .remove(&session.upload_id)
            .map(|_| ())
            .ok_or_else(|| S3Error::service(ErrorKind::NotFound, Some(404), "NoSuchUpload"))
    }

    async fn list_objects(&self, request: &ListRequest) -> S3Result<S3ListResult> {
        self.record(MockOp::List, &request.prefix, None, 0)?;
        self.check_bucket(&request.bucket)?;

        let state = self.state();
        // Name -> Some(object) for keys, None for common prefixes
        let mut items: BTreeMap<String, Option<S3Object>> = BTreeMap::new();
        for (key, stored) in state.objects.range(request.prefix.clone()..) {
            let Some(rest) = key.strip_prefix(request.prefix.as_str()) else {
                break;
            };
            let grouped = request
                .delimiter
                .as_deref()
                .filter(|d| !d.is_empty())
                .and_then(|d| rest.find(d).map(|at| at + d.len()));
            match grouped {
                Some(end) => {
                    items.insert(format!("{}{}", request.prefix, &rest[..end]), None);
                }
                None => {
                    items.insert(
                        key.clone(),
                        Some(S3Object {
                            key: key.clone(),
                            size: stored.data.len() as u64,
                            last_modified: Some(stored.last_modified),
                            etag: None,
                        }),
                    );
                }
            }
        }

        let max_keys = if request.max_keys > 0 {
            request.max_keys as usize
        } else {
            1000
        };
        let mut remaining = items
            .into_iter()
            .filter(|(name, _)| request.cursor.as_ref().map_or(true, |c| name > c))
            .peekable();

        let mut result = S3ListResult::default();
        let mut last = None;
        for (name, item) in remaining.by_ref().take(max_keys) {
            match item {
                Some(object) => result.objects.push(object),
                None => result.common_prefixes.push(name.clone()),
            }
            last = Some(name);
        }
        if remaining.peek().is_some() {
            result.is_truncated = true;
            result.continuation_token = last;
        }
        Ok(result)
    }

    async fn presigned_get_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> S3Result<String> {
        self.record(MockOp::Presign, key, None, expires_in.as_secs())?;
        self.check_bucket(bucket)?;
        Ok(format!(
            "https://{}.mock.invalid/{}?X-Amz-Expires={}",
            bucket,
            key,
            expires_in.as_secs()
        ))
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> S3Result<()> {
        self.record(MockOp::Delete, &keys.join(","), None, keys.len() as u64)?;
        self.check_bucket(bucket)?;
        if keys.len() > 1000 {
            return Err(S3Error::service(ErrorKind::Unknown, Some(400), "MalformedXML"));
        }

        let mut state = self.state();
        for key in keys {
            state.objects.remove(key);
        }
        Ok(())
    }

    async fn copy_object(&self, bucket: &str, source_key: &str, dest_key: &str) -> S3Result<()> {
        self.record(MockOp::Copy, source_key, None, 0)?;
        self.check_bucket(bucket)?;

        let mut state = self.state();
        let source = state
            .objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| S3Error::service(ErrorKind::NotFound, Some(404), "NoSuchKey"))?;
        state.objects.insert(dest_key.to_string(), source);
        Ok(())
    }
}

/// Factory handing out one shared [`MockStore`]
#[derive(Debug)]
pub struct MockStoreFactory {
    store: Arc<MockStore>,
    builds: AtomicUsize,
}

impl MockStoreFactory {
    /// Wrap `store`
    pub fn new(store: Arc<MockStore>) -> Self {
        Self {
            store,
            builds: AtomicUsize::new(0),
        }
    }

    /// The shared store
    pub fn store(&self) -> &Arc<MockStore> {
        &self.store
    }

    /// Number of stores built
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl StoreFactory for MockStoreFactory {
    fn build(&self, _params: &ConnectionParams) -> S3Result<Arc<dyn ObjectStore>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.clone())
    }
}

/// Parameters kept in memory instead of on disk
#[derive(Debug, Default)]
pub struct MemoryParamsStore {
    params: Mutex<Option<ConnectionParams>>,
    loads: AtomicUsize,
}

impl MemoryParamsStore {
    /// Start with `params` already saved
    pub fn new(params: Option<ConnectionParams>) -> Self {
        Self {
            params: Mutex::new(params),
            loads: AtomicUsize::new(0),
        }
    }

    /// Currently saved parameters
    pub fn saved(&self) -> Option<ConnectionParams> {
        self.params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `load` calls
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ParamsStore for MemoryParamsStore {
    fn load(&self) -> S3Result<Option<ConnectionParams>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.saved())
    }

    fn save(&self, params: &ConnectionParams) -> S3Result<()> {
        *self.params.lock().unwrap_or_else(PoisonError::into_inner) = Some(params.clone());
        Ok(())
    }

    fn forget(&self) -> S3Result<()> {
        *self.params.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_request(prefix: &str, cursor: Option<&str>, max_keys: i32) -> ListRequest {
        ListRequest {
            bucket: "photos".to_string(),
            prefix: prefix.to_string(),
            delimiter: Some("/".to_string()),
            cursor: cursor.map(str::to_string),
            max_keys,
        }
    }

    #[tokio::test]
    async fn test_list_groups_prefixes() {
        let store = MockStore::new("photos");
        store.insert_object("a.txt", "a");
        store.insert_object("trips/", "");
        store.insert_object("trips/beach.jpg", "b");
        store.insert_object("trips/2024/x.jpg", "x");

        let root = store.list_objects(&list_request("", None, 1000)).await.unwrap();
        assert_eq!(root.common_prefixes, vec!["trips/".to_string()]);
        assert_eq!(root.objects.len(), 1);

        let trips = store.list_objects(&list_request("trips/", None, 1000)).await.unwrap();
        assert_eq!(trips.common_prefixes, vec!["trips/2024/".to_string()]);
        let keys: Vec<_> = trips.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["trips/", "trips/beach.jpg"]);
    }

    #[tokio::test]
    async fn test_list_paginates() {
        let store = MockStore::new("photos");
        for i in 0..5 {
            store.insert_object(format!("f{}", i), "x");
        }

        let first = store.list_objects(&list_request("", None, 2)).await.unwrap();
        assert!(first.is_truncated);
        assert_eq!(first.continuation_token.as_deref(), Some("f1"));

        let last = store.list_objects(&list_request("", Some("f3"), 2)).await.unwrap();
        assert!(!last.is_truncated);
        assert_eq!(last.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure_counts_down() {
        let store = MockStore::new("photos");
        store.fail(ScriptedFailure {
            op: MockOp::HeadBucket,
            part_number: None,
            target: None,
            remaining: Some(2),
            error: S3Error::network("reset"),
        });

        assert!(store.head_bucket("photos").await.is_err());
        assert!(store.head_bucket("photos").await.is_err());
        assert!(store.head_bucket("photos").await.is_ok());
        assert_eq!(store.head_bucket_count(), 3);
    }

    #[tokio::test]
    async fn test_wrong_bucket() {
        let store = MockStore::new("photos");
        let err = store.head_bucket("other").await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoSuchBucket));
    }
}
