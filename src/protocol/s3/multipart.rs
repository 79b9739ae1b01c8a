//! Transfer executor: single-shot puts and chunked multipart uploads
//!
//! A chunked transfer opens one multipart session, spawns one task per part
//! gated by a semaphore sized to the plan's concurrency, and commits only after
//! every task has returned. Any part failure closes the semaphore so no further
//! part starts, aborts the session and surfaces [`S3Error::MultipartAborted`].
//! The executor never retries.

use super::connection::Connection;
use super::error::{S3Error, S3Result};
use super::progress::{ProgressEvent, ProgressTracker};
use super::strategy::{PartRange, TransferMode, TransferPlan};
use super::transfer::Payload;
use super::types::{MultipartSession, UploadAttributes, UploadPartInfo};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Everything a part task needs, cloned once per part
#[derive(Clone)]
struct PartWorker {
    connection: Arc<Connection>,
    session: Arc<MultipartSession>,
    payload: Payload,
    permits: Arc<Semaphore>,
    progress: ProgressTracker,
}

impl PartWorker {
    /// Upload `part` once a permit is free; `None` when the session already failed.
    ///
    /// The first failure closes the semaphore so queued parts never start.
    async fn run(self, part: PartRange) -> Result<Option<UploadPartInfo>, (u32, S3Error)> {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return Ok(None);
        };

        match self.upload(part).await {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                self.permits.close();
                Err((part.number, e))
            }
        }
    }

    async fn upload(&self, part: PartRange) -> S3Result<UploadPartInfo> {
        self.connection.ensure_open()?;
        let body = self.payload.read_range(part.offset, part.len).await?;
        self.connection.ensure_open()?;

        let progress = &self.progress;
        let on_progress =
            move |loaded: u64, _total: u64| progress.update(part.number, part.len, loaded);

        let info = self
            .connection
            .store()
            .upload_part(&self.session, part.number, body, &on_progress)
            .await?;

        self.progress.update(part.number, part.len, part.len);
        self.progress.event(ProgressEvent::PartCompleted {
            part_number: part.number,
            part_bytes: part.len,
        });
        debug!(
            key = %self.session.key,
            part = part.number,
            bytes = part.len,
            "Uploaded part"
        );
        Ok(info)
    }
}

impl Connection {
    /// Run one transfer attempt according to `plan`
    pub async fn execute_transfer(
        self: &Arc<Self>,
        key: &str,
        payload: &Payload,
        plan: &TransferPlan,
        attributes: &UploadAttributes,
        progress: &ProgressTracker,
    ) -> S3Result<()> {
        match plan.mode {
            TransferMode::SingleShot => {
                self.put_single_shot(key, payload, attributes, progress)
                    .await
            }
            TransferMode::Chunked => {
                self.upload_chunked(key, payload, plan, attributes, progress)
                    .await
            }
        }
    }

    /// Upload the whole payload in one request, then report 100%
    pub async fn put_single_shot(
        &self,
        key: &str,
        payload: &Payload,
        attributes: &UploadAttributes,
        progress: &ProgressTracker,
    ) -> S3Result<()> {
        self.ensure_open()?;
        let body = payload.read_all().await?;
        self.ensure_open()?;

        self.store()
            .put_object(self.bucket(), key, body, attributes)
            .await?;

        let total = payload.len();
        progress.update(1, total, total);
        Ok(())
    }

    /// Upload the payload as a multipart session with bounded concurrency
    pub async fn upload_chunked(
        self: &Arc<Self>,
        key: &str,
        payload: &Payload,
        plan: &TransferPlan,
        attributes: &UploadAttributes,
        progress: &ProgressTracker,
    ) -> S3Result<()> {
        let parts = plan.parts(payload.len());
        let part_count = parts.len();

        self.ensure_open()?;
        let session = Arc::new(
            self.store()
                .start_multipart_session(self.bucket(), key, attributes)
                .await?,
        );
        debug!(
            key,
            upload_id = %session.upload_id,
            parts = part_count,
            concurrency = plan.max_concurrent_parts,
            "Started multipart session"
        );

        let worker = PartWorker {
            connection: Arc::clone(self),
            session: Arc::clone(&session),
            payload: payload.clone(),
            permits: Arc::new(Semaphore::new(plan.max_concurrent_parts.max(1))),
            progress: progress.clone(),
        };

        let mut tasks = JoinSet::new();
        for part in parts {
            tasks.spawn(worker.clone().run(part));
        }

        let mut uploaded = Vec::with_capacity(part_count);
        let mut failure: Option<(Option<u32>, S3Error)> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(info))) => uploaded.push(info),
                Ok(Ok(None)) => {}
                Ok(Err((part_number, e))) => {
                    failure.get_or_insert((Some(part_number), e));
                }
                Err(join_error) => {
                    worker.permits.close();
                    failure.get_or_insert((
                        None,
                        S3Error::MultipartUpload(format!("Part task failed: {}", join_error)),
                    ));
                }
            }
        }

        if failure.is_none() && uploaded.len() != part_count {
            failure = Some((
                None,
                S3Error::MultipartUpload(format!(
                    "{} of {} parts uploaded",
                    uploaded.len(),
                    part_count
                )),
            ));
        }

        if let Some((part_number, cause)) = failure {
            return Err(self.abort_session(&session, part_number, cause).await);
        }

        uploaded.sort_by_key(|p| p.part_number);
        let committed = match self.ensure_open() {
            Ok(()) => {
                self.store()
                    .complete_multipart_session(&session, &uploaded)
                    .await
            }
            Err(e) => Err(e),
        };

        match committed {
            Ok(()) => {
                debug!(key, parts = part_count, "Committed multipart session");
                Ok(())
            }
            Err(cause) => Err(self.abort_session(&session, None, cause).await),
        }
    }

    /// Best-effort abort; the abort's own failure is only logged
    async fn abort_session(
        &self,
        session: &MultipartSession,
        part_number: Option<u32>,
        cause: S3Error,
    ) -> S3Error {
        if let Err(abort_error) = self.store().abort_multipart_session(session).await {
            warn!(
                key = %session.key,
                upload_id = %session.upload_id,
                error = %abort_error,
                "Failed to abort multipart session"
            );
        } else {
            debug!(
                key = %session.key,
                upload_id = %session.upload_id,
                "Aborted multipart session"
            );
        }

        S3Error::MultipartAborted {
            key: session.key.clone(),
            upload_id: session.upload_id.clone(),
            part_number,
            source: Box::new(cause),
        }
    }
}
