use std::{num::NonZeroU64, path::PathBuf, time::Duration};

use anyhow::Context;
use tempfile::TempDir;
use tracing::{Instrument, error_span};

use crate::{
    ContentCheck, Error, HarnessOpts, RunOutcome, StreamIntegrityHarness, TokioFileSystem,
    test_util::{canary_bytes, setup_test_logging},
};

async fn write_canary(dir: &TempDir, name: &str, len: usize) -> anyhow::Result<PathBuf> {
    let path = dir.path().join(name);
    tokio::fs::write(&path, canary_bytes(len))
        .await
        .context("error writing canary file")?;
    Ok(path)
}

#[tokio::test]
async fn test_real_file_round_trips_byte_for_byte() -> anyhow::Result<()> {
    setup_test_logging();
    let dir = tempfile::tempdir()?;
    // Deliberately not a multiple of the chunk size.
    let path = write_canary(&dir, "canary.bin", 1024 * 1024 + 17).await?;

    let harness = StreamIntegrityHarness::new(HarnessOpts {
        chunk_size: Some(64 * 1024),
        ..Default::default()
    })?;
    let buf = harness.verify_one_iteration(&path).await?;
    let expected = tokio::fs::read(&path).await?;
    assert_eq!(buf.len(), expected.len());
    assert!(buf == expected);
    Ok(())
}

#[tokio::test]
async fn test_real_file_repeated_with_digest() -> anyhow::Result<()> {
    setup_test_logging();
    let dir = tempfile::tempdir()?;
    let path = write_canary(&dir, "canary.bin", 300_001).await?;

    let harness = StreamIntegrityHarness::new(HarnessOpts {
        max_iterations: NonZeroU64::new(50),
        content_check: ContentCheck::Digest,
        chunk_timeout: Some(Duration::from_secs(10)),
        iteration_timeout: Some(Duration::from_secs(30)),
        ..Default::default()
    })?;
    let report = harness
        .run(&path)
        .instrument(error_span!("e2e"))
        .await?;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.iterations_succeeded, 50);
    assert_eq!(report.bytes_verified, 50 * 300_001);
    Ok(())
}

#[tokio::test]
async fn test_real_empty_file() -> anyhow::Result<()> {
    setup_test_logging();
    let dir = tempfile::tempdir()?;
    let path = write_canary(&dir, "empty.bin", 0).await?;

    let harness = StreamIntegrityHarness::new(HarnessOpts {
        max_iterations: NonZeroU64::new(3),
        ..Default::default()
    })?;
    let report = harness.run(&path).await?;
    assert_eq!(report.iterations_succeeded, 3);
    assert_eq!(report.bytes_verified, 0);
    Ok(())
}

#[tokio::test]
async fn test_real_missing_file() -> anyhow::Result<()> {
    setup_test_logging();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("does-not-exist");

    let harness = StreamIntegrityHarness::new_with_fs(
        TokioFileSystem::default(),
        HarnessOpts {
            max_iterations: NonZeroU64::new(3),
            ..Default::default()
        },
    )?;
    let err = harness.run(&path).await.unwrap_err();
    assert_eq!(err.failed_iteration(), Some(1));
    match err.root() {
        Error::Open { path: p, source } => {
            assert_eq!(p, &path);
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("unexpected error {other:?}"),
    }

    let err = harness.verify_one_iteration(&path).await.unwrap_err();
    assert!(matches!(err, Error::Open { .. }), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn test_real_file_cancelled_run_is_success() -> anyhow::Result<()> {
    setup_test_logging();
    let dir = tempfile::tempdir()?;
    let path = write_canary(&dir, "canary.bin", 64 * 1024).await?;

    let opts = HarnessOpts {
        progress_interval: Some(Duration::from_millis(10)),
        ..Default::default()
    };
    let token = opts.cancellation_token.clone();
    let harness = StreamIntegrityHarness::new(opts)?;

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let report = harness.run(&path).await?;
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(report.iterations_succeeded > 0);
    assert_eq!(report.bytes_verified, report.iterations_succeeded * 64 * 1024);
    Ok(())
}
