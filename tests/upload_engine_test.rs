//! End-to-end upload scenarios against the in-memory store

use bytes::Bytes;
use clouddeck::protocol::s3::mock::{MemoryParamsStore, MockOp, MockStore, MockStoreFactory};
use clouddeck::protocol::s3::progress::{ProgressEvent, ProgressReporter, ProgressSnapshot};
use clouddeck::protocol::s3::{
    ConnectionManager, ConnectionParams, ErrorClass, ErrorKind, MediaKind, S3Error,
    TransferMode, TransferRequest, Uploader,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

const MIB: usize = 1024 * 1024;

fn connected_uploader(store: Arc<MockStore>) -> Uploader {
    let manager = Arc::new(ConnectionManager::new(
        Arc::new(MockStoreFactory::new(store)),
        Arc::new(MemoryParamsStore::default()),
    ));
    manager
        .initialize(ConnectionParams::new("AKIA", "secret", "us-east-1", "media"))
        .unwrap();
    Uploader::new(manager)
}

fn snapshots(receiver: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressSnapshot> {
    let mut snapshots = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let ProgressEvent::Progress(snapshot) = event {
            snapshots.push(snapshot);
        }
    }
    snapshots
}

fn assert_monotonic(snapshots: &[ProgressSnapshot]) {
    for pair in snapshots.windows(2) {
        assert!(
            pair[0].percentage <= pair[1].percentage,
            "progress went back from {} to {}",
            pair[0].percentage,
            pair[1].percentage
        );
        assert!(pair[0].bytes_transferred <= pair[1].bytes_transferred);
    }
}

#[tokio::test(start_paused = true)]
async fn test_small_document_single_request() {
    let store = Arc::new(MockStore::new("media"));
    let uploader = connected_uploader(store.clone());
    let request = TransferRequest::from_bytes("report.pdf", vec![1u8; 5_000_000]);
    assert_eq!(request.media_kind, MediaKind::Document);

    let (reporter, mut receiver) = ProgressReporter::new();
    let outcome = uploader.upload(&request, reporter).await.unwrap();

    assert_eq!(outcome.plan.mode, TransferMode::SingleShot);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(store.put_count(), 1);
    assert_eq!(store.count(MockOp::StartMultipart), 0);
    assert_eq!(store.object("report.pdf").map(|b| b.len()), Some(5_000_000));

    let snapshots = snapshots(&mut receiver);
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].percentage, 100);
}

#[tokio::test(start_paused = true)]
async fn test_large_video_chunked_in_order() {
    let store = Arc::new(MockStore::new("media"));
    let uploader = connected_uploader(store.clone());
    let request = TransferRequest::from_bytes("clip.mp4", Bytes::from(vec![3u8; 120 * MIB]));

    let (reporter, mut receiver) = ProgressReporter::new();
    let outcome = uploader.upload(&request, reporter).await.unwrap();

    assert_eq!(outcome.plan.mode, TransferMode::Chunked);
    assert_eq!(outcome.plan.part_size, 10 * MIB as u64);
    assert_eq!(outcome.plan.max_concurrent_parts, 2);
    assert_eq!(outcome.attempts, 1);

    assert_eq!(store.count(MockOp::UploadPart), 12);
    assert_eq!(store.commit_count(), 1);
    assert_eq!(store.committed_parts(), vec![(1..=12).collect::<Vec<u32>>()]);
    assert!(store.max_parts_in_flight() <= 2);
    assert_eq!(store.abort_count(), 0);
    assert_eq!(store.object("clip.mp4").map(|b| b.len()), Some(120 * MIB));

    let snapshots = snapshots(&mut receiver);
    assert_monotonic(&snapshots);
    assert_eq!(snapshots.last().map(|s| s.percentage), Some(100));
}

#[tokio::test(start_paused = true)]
async fn test_persistent_part_failure_exhausts_budget() {
    let store = Arc::new(MockStore::new("media"));
    store.fail_part_always(
        7,
        S3Error::service(ErrorKind::ServerError, Some(503), "SlowDown"),
    );
    let uploader = connected_uploader(store.clone());
    let request = TransferRequest::from_bytes("clip.mp4", Bytes::from(vec![3u8; 120 * MIB]));

    let (reporter, mut receiver) = ProgressReporter::new();
    let err = uploader.upload(&request, reporter).await.unwrap_err();

    assert_eq!(err.attempts(), Some(4));
    assert_eq!(err.class(), ErrorClass::AbortedTransfer);
    assert_eq!(err.http_status(), Some(503));
    match err.root() {
        S3Error::MultipartAborted { part_number, .. } => assert_eq!(*part_number, Some(7)),
        other => panic!("Expected MultipartAborted, got {:?}", other),
    }

    // One fresh session per attempt, each aborted, none committed
    assert_eq!(store.count(MockOp::StartMultipart), 4);
    assert_eq!(store.abort_count(), 4);
    assert_eq!(store.commit_count(), 0);
    assert_eq!(store.open_sessions(), 0);
    assert!(store.object("clip.mp4").is_none());

    let mut retries = 0;
    let mut failed = false;
    let mut percentages = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        match event {
            ProgressEvent::Retrying { .. } => retries += 1,
            ProgressEvent::TransferFailed { .. } => failed = true,
            ProgressEvent::Progress(snapshot) => percentages.push(snapshot.percentage),
            _ => {}
        }
    }
    assert_eq!(retries, 3);
    assert!(failed);
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));
    assert!(percentages.last().copied().unwrap_or(0) < 100);
}

#[tokio::test(start_paused = true)]
async fn test_authorization_failure_is_not_retried() {
    let store = Arc::new(MockStore::new("media"));
    store.fail_always(
        MockOp::PutObject,
        S3Error::service(ErrorKind::Forbidden, Some(403), "AccessDenied"),
    );
    let uploader = connected_uploader(store.clone());
    let request = TransferRequest::from_bytes("notes.txt", "hello");

    let err = uploader
        .upload(&request, ProgressReporter::default())
        .await
        .unwrap_err();

    assert_eq!(err.attempts(), Some(1));
    assert_eq!(err.class(), ErrorClass::Authorization);
    assert_eq!(store.put_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success() {
    let store = Arc::new(MockStore::new("media"));
    store.fail_next(MockOp::PutObject, S3Error::network("connection reset"));
    store.fail_next(
        MockOp::PutObject,
        S3Error::service(ErrorKind::RequestTimeout, Some(408), "RequestTimeout"),
    );
    let uploader = connected_uploader(store.clone());
    let request = TransferRequest::from_bytes("notes.txt", "hello");

    let outcome = uploader
        .upload(&request, ProgressReporter::default())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.retry_delays.len(), 2);
    assert_eq!(store.put_count(), 3);
    assert_eq!(
        store.object("notes.txt"),
        Some(Bytes::from_static(b"hello"))
    );
}
