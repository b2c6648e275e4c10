//! Integration tests for chunk-dl transfers
//!
//! Every test runs against a local wiremock server, so no external network is
//! needed. Library tests go through the public API; binary tests spawn the
//! built `chunk-dl` executable.
//!
//! Note: These tests are disabled during CI package verification to avoid
//! compilation overhead during cargo publish.

#![cfg(not(feature = "ci-tests-disabled"))]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chunk_dl::{Error, OverwriteBehavior, Phase, Progress, RetryPolicy, StoreBackend, TransferOptions};
use tempfile::tempdir;
use tokio::io::AsyncReadExt;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DATA: &[u8] = b"abcdefghijklmnopqrstuvwxy";
const CHUNK: u64 = 10;

async fn mount_probe(server: &MockServer, accept_ranges: Option<&str>) {
    let mut template = ResponseTemplate::new(200).insert_header("content-length", DATA.len().to_string().as_str());
    if let Some(value) = accept_ranges {
        template = template.insert_header("accept-ranges", value);
    }
    Mock::given(method("HEAD"))
        .and(path("/files/object.bin"))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn mount_chunk(server: &MockServer, start: usize, end: usize) {
    Mock::given(method("GET"))
        .and(path("/files/object.bin"))
        .and(header("range", format!("bytes={start}-{end}").as_str()))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(DATA[start..=end].to_vec()))
        .mount(server)
        .await;
}

async fn mount_all_chunks(server: &MockServer) {
    mount_probe(server, Some("bytes")).await;
    mount_chunk(server, 0, 9).await;
    mount_chunk(server, 10, 19).await;
    mount_chunk(server, 20, 24).await;
}

fn object_url(server: &MockServer) -> String {
    format!("{}/files/object.bin", server.uri())
}

fn options_with(store: StoreBackend) -> TransferOptions {
    TransferOptions {
        chunk_size: CHUNK,
        store,
        overwrite: OverwriteBehavior::NeverOverwrite,
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(10),
            attempt_timeout: Duration::from_secs(5),
        },
        ..Default::default()
    }
}

fn dir_entries(root: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

#[tokio::test]
async fn test_keyed_store_transfer_to_file() {
    let server = MockServer::start().await;
    mount_all_chunks(&server).await;

    let dir = tempdir().unwrap();
    let output = dir.path().join("object.bin");
    let options = options_with(StoreBackend::Keyed {
        path: dir.path().join("store.db"),
    });

    let report = assert_ok!(
        chunk_dl::get_with_options(&object_url(&server), Some(output.to_str().unwrap()), options).await
    );

    assert_eq!(report.phase, Phase::Completed);
    assert_eq!(report.total_bytes, 25);
    assert_eq!(report.parts_total, 3);
    assert_eq!(report.bytes_written, 25);
    assert_eq!(std::fs::read(&output).unwrap(), DATA);
}

#[tokio::test]
async fn test_directory_store_is_removed_after_success() {
    let server = MockServer::start().await;
    mount_all_chunks(&server).await;

    let staging = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let output = out_dir.path().join("copy.bin");
    let options = options_with(StoreBackend::Directory {
        root: staging.path().to_path_buf(),
    });

    assert_ok!(chunk_dl::get_with_options(&object_url(&server), Some(output.to_str().unwrap()), options).await);

    assert_eq!(std::fs::read(&output).unwrap(), DATA);
    assert!(dir_entries(staging.path()).is_empty(), "chunk directory left behind");
}

#[tokio::test]
async fn test_no_range_support_fails_without_staging() {
    let server = MockServer::start().await;
    mount_probe(&server, None).await;

    let staging = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let output = out_dir.path().join("object.bin");
    let options = options_with(StoreBackend::Directory {
        root: staging.path().to_path_buf(),
    });

    let err = assert_err!(
        chunk_dl::get_with_options(&object_url(&server), Some(output.to_str().unwrap()), options).await
    );

    assert!(matches!(err, Error::PreconditionFailed(_)), "got {err:?}");
    assert!(dir_entries(staging.path()).is_empty(), "store must never be opened");
    assert!(!output.exists(), "no output should remain for a refused transfer");
}

#[tokio::test]
async fn test_failed_forced_transfer_keeps_existing_file() {
    let server = MockServer::start().await;
    mount_probe(&server, None).await;

    let dir = tempdir().unwrap();
    let output = dir.path().join("precious.bin");
    std::fs::write(&output, b"user data").unwrap();
    let options = TransferOptions {
        overwrite: OverwriteBehavior::Force,
        ..options_with(StoreBackend::Keyed {
            path: dir.path().join("store"),
        })
    };

    let err = assert_err!(
        chunk_dl::get_with_options(&object_url(&server), Some(output.to_str().unwrap()), options).await
    );

    assert!(matches!(err, Error::PreconditionFailed(_)), "got {err:?}");
    assert_eq!(std::fs::read(&output).unwrap(), b"user data");
    assert!(!chunk_dl::part_path_for(output.to_str().unwrap()).exists());
}

#[tokio::test]
async fn test_forced_transfer_replaces_existing_file_on_success() {
    let server = MockServer::start().await;
    mount_all_chunks(&server).await;

    let dir = tempdir().unwrap();
    let output = dir.path().join("object.bin");
    std::fs::write(&output, b"stale").unwrap();
    let options = TransferOptions {
        overwrite: OverwriteBehavior::Force,
        ..options_with(StoreBackend::Keyed {
            path: dir.path().join("store"),
        })
    };

    assert_ok!(chunk_dl::get_with_options(&object_url(&server), Some(output.to_str().unwrap()), options).await);

    assert_eq!(std::fs::read(&output).unwrap(), DATA);
    assert!(!chunk_dl::part_path_for(output.to_str().unwrap()).exists());
}

#[tokio::test]
async fn test_concurrent_transfers_share_keyed_store_path() {
    let server = MockServer::start().await;
    mount_all_chunks(&server).await;

    let dir = tempdir().unwrap();
    let store = StoreBackend::Keyed {
        path: dir.path().join("store"),
    };
    let first = dir.path().join("first.bin");
    let second = dir.path().join("second.bin");
    let url = object_url(&server);

    let (a, b) = tokio::join!(
        chunk_dl::get_with_options(&url, Some(first.to_str().unwrap()), options_with(store.clone())),
        chunk_dl::get_with_options(&url, Some(second.to_str().unwrap()), options_with(store.clone())),
    );

    assert_eq!(assert_ok!(a).bytes_written, 25);
    assert_eq!(assert_ok!(b).bytes_written, 25);
    assert_eq!(std::fs::read(&first).unwrap(), DATA);
    assert_eq!(std::fs::read(&second).unwrap(), DATA);
    assert!(dir_entries(&dir.path().join("store")).is_empty(), "per-transfer databases left behind");
}

#[tokio::test]
async fn test_exhausted_retries_keep_fetched_chunks() {
    let server = MockServer::start().await;
    mount_probe(&server, Some("bytes")).await;
    mount_chunk(&server, 0, 9).await;
    Mock::given(method("GET"))
        .and(path("/files/object.bin"))
        .and(header("range", "bytes=10-19"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let staging = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let output = out_dir.path().join("object.bin");
    let options = options_with(StoreBackend::Directory {
        root: staging.path().to_path_buf(),
    });

    let err = assert_err!(
        chunk_dl::get_with_options(&object_url(&server), Some(output.to_str().unwrap()), options).await
    );

    match err {
        Error::FetchFailed { index, .. } => assert_eq!(index, 1),
        other => panic!("expected FetchFailed, got {other:?}"),
    }

    let dirs = dir_entries(staging.path());
    assert_eq!(dirs.len(), 1, "failed transfer keeps its chunk directory");
    let kept = std::fs::read(dirs[0].join("part-0")).unwrap();
    assert_eq!(kept, &DATA[0..10]);
    assert!(!dirs[0].join("part-1").exists());
}

#[tokio::test]
async fn test_stream_api_yields_object_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/files/object.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", DATA.len().to_string().as_str())
                .insert_header("accept-ranges", "bytes"),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_chunk(&server, 0, 9).await;
    mount_chunk(&server, 10, 19).await;
    mount_chunk(&server, 20, 24).await;

    let staging = tempdir().unwrap();
    let options = TransferOptions {
        buffer_size: 4,
        ..options_with(StoreBackend::Directory {
            root: staging.path().to_path_buf(),
        })
    };

    let mut stream = assert_ok!(chunk_dl::get_stream_with_options(&object_url(&server), options).await);
    assert_eq!(stream.total_size(), 25);

    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    let report = assert_ok!(stream.finish().await);

    assert_eq!(received, DATA);
    assert_eq!(report.phase, Phase::Completed);
    assert_eq!(report.destination, "object.bin");
}

#[tokio::test]
async fn test_stream_api_fails_fast_without_ranges() {
    let server = MockServer::start().await;
    mount_probe(&server, Some("none")).await;

    let result = chunk_dl::get_stream(&object_url(&server)).await;
    assert!(matches!(result, Err(Error::PreconditionFailed(_))));
}

#[tokio::test]
async fn test_progress_callback_and_parallel_fetch() {
    let server = MockServer::start().await;
    mount_all_chunks(&server).await;

    let dir = tempdir().unwrap();
    let output = dir.path().join("object.bin");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let options = TransferOptions {
        max_connections: 3,
        progress: Some(Arc::new(move |p: Progress| seen_clone.lock().unwrap().push(p))),
        ..options_with(StoreBackend::Keyed {
            path: dir.path().join("store.db"),
        })
    };

    assert_ok!(chunk_dl::get_with_options(&object_url(&server), Some(output.to_str().unwrap()), options).await);

    assert_eq!(std::fs::read(&output).unwrap(), DATA);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    let last = seen.last().unwrap();
    assert_eq!(last.parts_completed, 3);
    assert_eq!(last.bytes_transferred, 25);
    assert!((last.percent() - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_existing_file_is_not_clobbered() {
    let server = MockServer::start().await;
    mount_all_chunks(&server).await;

    let dir = tempdir().unwrap();
    let output = dir.path().join("object.bin");
    std::fs::write(&output, b"keep me").unwrap();
    let options = options_with(StoreBackend::Keyed {
        path: dir.path().join("store.db"),
    });

    let err = assert_err!(
        chunk_dl::get_with_options(&object_url(&server), Some(output.to_str().unwrap()), options).await
    );

    assert!(matches!(err, Error::IoError(_)));
    assert_eq!(std::fs::read(&output).unwrap(), b"keep me");
}

/// Test dry run mode of the binary
#[test]
fn test_dry_run_mode() {
    let url = "https://example.com/images/disk.img";
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_chunk-dl"))
        .arg(url)
        .arg("--dry-run")
        .output()
        .expect("Failed to run dry-run command");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "Dry run should succeed: {stderr}");
    assert!(stderr.contains("DRY RUN"), "Expected DRY RUN indicator: {stderr}");
    assert!(stderr.contains("disk.img"), "Expected derived file name: {stderr}");
}

#[test]
fn test_conflicting_overwrite_flags_fail() {
    let status = std::process::Command::new(env!("CARGO_BIN_EXE_chunk-dl"))
        .args(["https://example.com/a.bin", "--force", "--no-clobber"])
        .output()
        .expect("Failed to run command")
        .status;
    assert!(!status.success());
}

#[tokio::test]
async fn test_binary_exits_nonzero_without_range_support() {
    let server = MockServer::start().await;
    mount_probe(&server, None).await;

    let dir = tempdir().unwrap();
    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_chunk-dl"))
        .arg(object_url(&server))
        .arg(dir.path().join("object.bin"))
        .arg("--no-clobber")
        .arg("--store-path")
        .arg(dir.path().join("store.db"))
        .output()
        .await
        .expect("Failed to run command");

    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("object.bin").exists());
}

#[tokio::test]
async fn test_binary_streams_to_stdout() {
    let server = MockServer::start().await;
    mount_all_chunks(&server).await;

    let dir = tempdir().unwrap();
    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_chunk-dl"))
        .arg(object_url(&server))
        .arg("-")
        .args(["--chunk-size", "10", "--store", "directory", "--store-path"])
        .arg(dir.path())
        .output()
        .await
        .expect("Failed to run command");

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(output.stdout, DATA);
    assert!(dir_entries(dir.path()).is_empty());
}
