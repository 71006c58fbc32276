/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! End-to-end transfer tests against the in-process mock grid.

use std::iter;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use irods_transfer_manager::account::Account;
use irods_transfer_manager::error::ErrorKind;
use irods_transfer_manager::io::resume_journal_path;
use irods_transfer_manager::mock::{test_account, Fault, MockGrid};
use irods_transfer_manager::operation::download::DownloadOptions;
use irods_transfer_manager::operation::upload::UploadOptions;
use irods_transfer_manager::types::TaskCount;
use irods_transfer_manager::{Client, Config};

const KIBIBYTE: usize = 1024;
const MEBIBYTE: usize = 1024 * 1024;

fn rand_data(size: usize) -> Bytes {
    iter::repeat_with(fastrand::alphanumeric)
        .take(size)
        .map(|x| x as u8)
        .collect::<Vec<_>>()
        .into()
}

async fn test_client(grid: &MockGrid) -> Client {
    Client::connect(Arc::new(grid.connector()), test_account(), Config::default())
        .await
        .unwrap()
}

async fn test_client_with_config(grid: &MockGrid, config: Config) -> Client {
    Client::connect(Arc::new(grid.connector()), test_account(), config)
        .await
        .unwrap()
}

/// Record every `(processed, total)` pair a transfer reports.
fn recording_progress() -> (
    Arc<Mutex<Vec<(u64, u64)>>>,
    impl Fn(u64, u64) + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback = move |processed, total| {
        sink.lock().unwrap().push((processed, total));
    };
    (seen, callback)
}

#[tokio::test]
async fn upload_download_round_trip() {
    let grid = MockGrid::new();
    let client = test_client(&grid).await;
    let data = rand_data(180 * KIBIBYTE);

    client
        .put_buffer(data.clone(), "/tempZone/home/rods/a.dat", &UploadOptions::default())
        .await
        .unwrap();
    let fetched = client
        .get_buffer(
            "/tempZone/home/rods/a.dat",
            data.len() as u64,
            &DownloadOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(data, fetched);
    assert_eq!(client.metrics().bytes_sent(), data.len() as u64);
    assert_eq!(client.metrics().bytes_received(), data.len() as u64);
}

#[tokio::test]
async fn empty_file_parallel_upload_takes_serial_path() {
    let grid = MockGrid::new();
    let client = test_client(&grid).await;

    let local = tempfile::NamedTempFile::new().unwrap();
    client
        .put_file_parallel(
            local.path(),
            "/tempZone/home/rods/empty.dat",
            &UploadOptions::default().task_count(TaskCount::Explicit(8)),
        )
        .await
        .unwrap();

    assert_eq!(grid.object("/tempZone/home/rods/empty.dat").unwrap(), b"");
    let counters = grid.counters();
    assert_eq!(counters.primary_opens, 0);
    assert_eq!(counters.replica_opens, 0);
}

#[tokio::test]
async fn parallel_upload_uses_the_replica_protocol() {
    let grid = MockGrid::new();
    let client = test_client(&grid).await;
    let data = rand_data(256 * KIBIBYTE);

    let mut local = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut local, &data).unwrap();

    let (seen, callback) = recording_progress();
    client
        .put_file_parallel(
            local.path(),
            "/tempZone/home/rods/par.dat",
            &UploadOptions::default()
                .task_count(TaskCount::Explicit(4))
                .replicate(true)
                .progress(callback),
        )
        .await
        .unwrap();

    assert_eq!(
        grid.object("/tempZone/home/rods/par.dat").unwrap(),
        data.as_ref()
    );

    let counters = grid.counters();
    assert_eq!(counters.primary_opens, 1);
    assert_eq!(counters.replica_opens, 4);
    assert_eq!(counters.replica_closes, 4);
    assert_eq!(counters.close_order_violations, 0);
    assert_eq!(counters.replications, 1);
    assert_eq!(grid.open_replicas("/tempZone/home/rods/par.dat"), 0);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&(0, data.len() as u64)));
    assert_eq!(
        seen.iter().map(|(processed, _)| *processed).max(),
        Some(data.len() as u64)
    );
}

#[tokio::test]
async fn parallel_upload_without_server_support_falls_back_to_serial() {
    let grid = MockGrid::new();
    grid.set_parallel_upload(false);
    let client = test_client(&grid).await;
    let data = rand_data(64 * KIBIBYTE);

    let mut local = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut local, &data).unwrap();

    client
        .put_file_parallel(
            local.path(),
            "/tempZone/home/rods/fallback.dat",
            &UploadOptions::default().task_count(TaskCount::Explicit(4)),
        )
        .await
        .unwrap();

    assert_eq!(
        grid.object("/tempZone/home/rods/fallback.dat").unwrap(),
        data.as_ref()
    );
    assert_eq!(grid.counters().primary_opens, 0);
}

#[tokio::test]
async fn parallel_download_reassembles_the_object() {
    let grid = MockGrid::new();
    let data = rand_data(3 * MEBIBYTE + 17);
    grid.insert_object("/tempZone/home/rods/big.dat", data.clone());

    let client = test_client(&grid).await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("big.dat");

    let (seen, callback) = recording_progress();
    client
        .get_file(
            "/tempZone/home/rods/big.dat",
            data.len() as u64,
            &local,
            &DownloadOptions::default()
                .task_count(TaskCount::Explicit(3))
                .progress(callback),
        )
        .await
        .unwrap();

    let fetched = std::fs::read(&local).unwrap();
    assert_eq!(fetched, data.as_ref());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&(0, data.len() as u64)));
    assert!(seen.iter().all(|(_, total)| *total == data.len() as u64));
    assert_eq!(
        seen.iter().map(|(processed, _)| *processed).max(),
        Some(data.len() as u64)
    );
}

#[tokio::test]
async fn oversubscribed_session_still_downloads_in_parallel() {
    let grid = MockGrid::new();
    let data = rand_data(2 * MEBIBYTE);
    grid.insert_object("/tempZone/home/rods/shared.dat", data.clone());

    // a single pooled connection shared by all four workers
    let config = Config::builder()
        .connection_init_number(0)
        .connection_max_idle(1)
        .connection_max(1)
        .build();
    let client = test_client_with_config(&grid, config).await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("shared.dat");

    client
        .get_file(
            "/tempZone/home/rods/shared.dat",
            data.len() as u64,
            &local,
            &DownloadOptions::default().task_count(TaskCount::Explicit(4)),
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(&local).unwrap(), data.as_ref());
    // every share was returned
    assert_eq!(client.session().shared_connections().await, 0);
}

#[tokio::test]
async fn socket_failure_mid_download_retries_with_a_fresh_connection() {
    let grid = MockGrid::new();
    let data = rand_data(4 * MEBIBYTE);
    grid.insert_object("/tempZone/home/rods/flaky.dat", data.clone());

    let client = test_client(&grid).await;
    let connects_before = grid.counters().connects;

    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("flaky.dat");

    // the second read round-trip dies with an I/O error
    grid.set_fault(Fault::IoErrorOnRead { nth: 2 });
    client
        .get_file(
            "/tempZone/home/rods/flaky.dat",
            data.len() as u64,
            &local,
            &DownloadOptions::default().task_count(TaskCount::Explicit(2)),
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(&local).unwrap(), data.as_ref());
    // the failed worker had to open at least one replacement connection
    assert!(grid.counters().connects > connects_before + 1);
    assert_eq!(client.session().shared_connections().await, 0);
}

#[tokio::test]
async fn interrupted_resumable_download_resumes_and_cleans_up() {
    let grid = MockGrid::new();
    let data = rand_data(3 * MEBIBYTE);
    grid.insert_object("/tempZone/home/rods/resume.dat", data.clone());

    let client = test_client(&grid).await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("resume.dat");
    let journal = resume_journal_path(&local);

    // reads start failing fatally once ~40% of the object has been served
    grid.set_fault(Fault::RemoteErrorAfterBytes {
        limit: (data.len() as u64) * 2 / 5,
        code: -999000,
    });
    let err = client
        .get_file_resumable(
            "/tempZone/home/rods/resume.dat",
            data.len() as u64,
            &local,
            &DownloadOptions::default().task_count(TaskCount::Explicit(2)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TaskFailed(_)));
    assert!(journal.exists(), "journal must survive a failed transfer");

    // second invocation completes from the journal, even with a different
    // requested task count
    grid.clear_fault();
    client
        .get_file_resumable(
            "/tempZone/home/rods/resume.dat",
            data.len() as u64,
            &local,
            &DownloadOptions::default().task_count(TaskCount::Explicit(7)),
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(&local).unwrap(), data.as_ref());
    assert!(!journal.exists(), "journal is deleted after success");
}

#[tokio::test]
async fn resumable_download_of_short_object_is_advisory_incomplete() {
    let grid = MockGrid::new();
    let data = rand_data(10 * KIBIBYTE);
    grid.insert_object("/tempZone/home/rods/short.dat", data.clone());

    let client = test_client(&grid).await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("short.dat");

    // the caller claims twice the actual length; workers EOF early
    let err = client
        .get_file_resumable(
            "/tempZone/home/rods/short.dat",
            (data.len() * 2) as u64,
            &local,
            &DownloadOptions::default().task_count(TaskCount::Explicit(2)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::TransferIncomplete);
    assert!(resume_journal_path(&local).exists());
}

#[tokio::test]
async fn anonymous_session_discards_instead_of_reusing() {
    let grid = MockGrid::new();
    let account = Account::builder()
        .host("mock.grid.invalid")
        .port(1247)
        .zone("tempZone")
        .username("rods")
        .client_username("anonymous")
        .default_resource("demoResc")
        .build();
    let client = Client::connect(Arc::new(grid.connector()), account, Config::default())
        .await
        .unwrap();

    let data = rand_data(8 * KIBIBYTE);
    client
        .put_buffer(data.clone(), "/tempZone/home/public/anon.dat", &UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(
        grid.object("/tempZone/home/public/anon.dat").unwrap(),
        data.as_ref()
    );
    // anonymous sessions never issue transaction resets
    assert_eq!(grid.counters().resets, 0);
}

#[tokio::test]
async fn download_of_missing_object_is_not_found() {
    let grid = MockGrid::new();
    let client = test_client(&grid).await;

    let err = client
        .get_buffer("/tempZone/home/rods/nope.dat", 100, &DownloadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::NotFound);
    assert_eq!(client.metrics().transfer_failures(), 1);
}

#[tokio::test]
async fn empty_object_download_creates_an_empty_file() {
    let grid = MockGrid::new();
    grid.insert_object("/tempZone/home/rods/zero.dat", Vec::new());

    let client = test_client(&grid).await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("zero.dat");

    client
        .get_file(
            "/tempZone/home/rods/zero.dat",
            0,
            &local,
            &DownloadOptions::default().task_count(TaskCount::Explicit(3)),
        )
        .await
        .unwrap();

    assert_eq!(std::fs::metadata(&local).unwrap().len(), 0);
}
