use std::{
    io,
    num::{NonZeroU64, NonZeroUsize},
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, error_span, info, trace, warn};

use crate::{
    Error, Result,
    chunks::ChunkStream,
    constants::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ITERATIONS, DEFAULT_PROGRESS_INTERVAL},
    metrics::METRICS,
    progress::Progress,
    traits::{FileHandle, FileSystem, TokioFileSystem},
    utils::{FnDropGuard, mb_per_sec},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ContentCheck {
    /// Only compare the reconstructed length against the file size.
    #[default]
    LengthOnly,
    /// Also hash every reconstructed buffer and require it to match the first iteration's.
    Digest,
}

#[derive(Debug, Default, Clone)]
pub struct HarnessOpts {
    /// Max bytes per chunk pulled from the handle. Defaults to 64 KiB.
    pub chunk_size: Option<usize>,

    /// Safety ceiling for the number of iterations. Defaults to one million.
    pub max_iterations: Option<NonZeroU64>,

    /// How long to wait for a single chunk before failing the iteration.
    pub chunk_timeout: Option<Duration>,

    /// How long a whole open/read/close cycle may take.
    pub iteration_timeout: Option<Duration>,

    pub content_check: ContentCheck,

    /// Minimum time between progress summaries. Defaults to 1 second.
    pub progress_interval: Option<Duration>,

    /// Cancelling this stops the run. A cancelled run is not a failure.
    pub cancellation_token: CancellationToken,

    /// The parent span for per-iteration spans. If not provided, will use
    /// the current span.
    pub parent_span: Option<tracing::Id>,
}

impl HarnessOpts {
    fn validate(&self) -> Result<ValidatedHarnessOpts> {
        let chunk_size = NonZeroUsize::new(self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE))
            .ok_or(Error::InvalidConfig("chunk_size = 0"))?;
        if self.chunk_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig("chunk_timeout = 0"));
        }
        if self.iteration_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig("iteration_timeout = 0"));
        }

        Ok(ValidatedHarnessOpts {
            chunk_size,
            max_iterations: self
                .max_iterations
                .map(NonZeroU64::get)
                .unwrap_or(DEFAULT_MAX_ITERATIONS),
            chunk_timeout: self.chunk_timeout,
            iteration_timeout: self.iteration_timeout,
            content_check: self.content_check,
            progress_interval: self.progress_interval.unwrap_or(DEFAULT_PROGRESS_INTERVAL),
            cancellation_token: self.cancellation_token.clone(),
            parent_span: self.parent_span.clone(),
        })
    }
}

#[derive(Clone)]
struct ValidatedHarnessOpts {
    chunk_size: NonZeroUsize,
    max_iterations: u64,
    chunk_timeout: Option<Duration>,
    iteration_timeout: Option<Duration>,
    content_check: ContentCheck,
    progress_interval: Duration,
    cancellation_token: CancellationToken,
    parent_span: Option<tracing::Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every iteration up to the ceiling succeeded.
    Completed,
    /// Stopped through the cancellation token before reaching the ceiling.
    Cancelled,
}

/// Handle acquire/release counts over the harness' lifetime. A handle counts as released
/// whether it was closed explicitly or dropped after a timeout or cancellation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandleStats {
    pub opened: u64,
    pub released: u64,
}

#[derive(Default)]
struct HandleCounters {
    opened: AtomicU64,
    released: AtomicU64,
}

impl HandleCounters {
    fn on_open(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
        METRICS.handles_opened.increment(1);
        METRICS.open_handles.increment(1.0);
    }

    fn on_release(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
        METRICS.handles_released.increment(1);
        METRICS.open_handles.decrement(1.0);
    }

    fn snapshot(&self) -> HandleStats {
        HandleStats {
            opened: self.opened.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub iterations_succeeded: u64,
    pub bytes_verified: u64,
    pub outcome: RunOutcome,
}

/// Repeatedly opens a file, drains it chunk by chunk into a buffer sized from metadata,
/// and checks the reconstructed length. Stops at the first failure.
pub struct StreamIntegrityHarness<F: FileSystem = TokioFileSystem> {
    fs: F,
    opts: ValidatedHarnessOpts,
    handles: HandleCounters,
}

impl StreamIntegrityHarness<TokioFileSystem> {
    pub fn new(opts: HarnessOpts) -> Result<Self> {
        Self::new_with_fs(TokioFileSystem::default(), opts)
    }
}

impl<F: FileSystem> StreamIntegrityHarness<F> {
    pub fn new_with_fs(fs: F, opts: HarnessOpts) -> Result<Self> {
        let opts = opts.validate()?;
        Ok(Self {
            fs,
            opts,
            handles: HandleCounters::default(),
        })
    }

    /// How many handles this harness opened and released so far. Equal counts between
    /// iterations mean nothing leaked.
    pub fn handle_stats(&self) -> HandleStats {
        self.handles.snapshot()
    }

    /// One open → stream → close cycle. Returns the reconstructed buffer, whose length is
    /// the number of bytes actually read.
    ///
    /// The handle is closed on every path where this future runs to completion, and a close
    /// failure is reported rather than ignored. If the future is dropped midway (timeout,
    /// cancellation), the handle is released by its `Drop`.
    pub async fn verify_one_iteration(&self, path: &Path) -> Result<Vec<u8>> {
        match self.opts.iteration_timeout {
            Some(t) => tokio::time::timeout(t, self.open_drain_close(path))
                .await
                .map_err(|_| Error::IterationTimeout)?,
            None => self.open_drain_close(path).await,
        }
    }

    async fn open_drain_close(&self, path: &Path) -> Result<Vec<u8>> {
        let handle = self
            .fs
            .open(path)
            .await
            .map_err(|source| Error::Open {
                path: path.to_owned(),
                source,
            })?;
        self.handles.on_open();
        // Bound before `handle` so it drops after it: runs once the handle is closed, or
        // dropped because this future was.
        let _released = FnDropGuard::new(|| self.handles.on_release());
        let mut handle = handle;
        trace!("opened");

        let drained = self.drain(&mut handle).await;
        let closed = handle.close().await;

        match (drained, closed) {
            (Ok(buf), Ok(())) => Ok(buf),
            (Ok(_), Err(e)) => {
                METRICS.release_failures.increment(1);
                Err(Error::Close(e))
            }
            (Err(e), Ok(())) => Err(e),
            (Err(primary), Err(close)) => {
                METRICS.release_failures.increment(1);
                warn!(error = %close, "error closing handle after a failed read");
                Err(Error::CloseAfterFailure {
                    primary: Box::new(primary),
                    close,
                })
            }
        }
    }

    async fn drain(&self, handle: &mut F::Handle) -> Result<Vec<u8>> {
        let declared = handle.metadata().await.map_err(Error::Metadata)?.size;
        let mut buf = allocate(declared)?;

        let mut chunks = ChunkStream::new(handle, self.opts.chunk_size, self.opts.chunk_timeout);
        let mut offset = 0usize;
        while let Some(chunk) = chunks.next_chunk().await? {
            let end = offset
                .checked_add(chunk.len())
                .filter(|end| *end <= buf.len())
                .ok_or_else(|| Error::Overflow {
                    declared,
                    received: offset as u64 + chunk.len() as u64,
                })?;
            buf[offset..end].copy_from_slice(chunk);
            offset = end;
        }

        trace!(
            declared,
            read = offset,
            chunks = chunks.chunks_read(),
            "stream exhausted"
        );
        buf.truncate(offset);
        Ok(buf)
    }

    async fn run_iteration(
        &self,
        iteration: u64,
        path: &Path,
        reference_digest: &mut Option<blake3::Hash>,
    ) -> Result<u64> {
        // Fetched separately from the handle's own metadata so that drift between the two
        // shows up as a mismatch.
        let reference_size = self
            .fs
            .stat(path)
            .await
            .map_err(|source| classify_stat_error(path, source))?
            .size;

        let buf = self.verify_one_iteration(path).await?;
        let actual = buf.len() as u64;
        if actual != reference_size {
            return Err(Error::SizeMismatch {
                iteration,
                expected: reference_size,
                actual,
            });
        }

        if self.opts.content_check == ContentCheck::Digest {
            let digest = blake3::hash(&buf);
            match reference_digest {
                Some(reference) if *reference != digest => {
                    return Err(Error::ContentMismatch { iteration });
                }
                Some(_) => {}
                None => {
                    debug!(%digest, "recorded reference digest");
                    *reference_digest = Some(digest);
                }
            }
        }

        Ok(actual)
    }

    /// Runs iterations until the ceiling is reached, the cancellation token fires, or
    /// something fails. Failures are wrapped in [`Error::RunAborted`] with the failing
    /// iteration number.
    pub async fn run(&self, path: &Path) -> Result<RunReport> {
        let token = &self.opts.cancellation_token;
        let mut progress = Progress::new(self.opts.progress_interval);
        let mut reference_digest = None;
        let mut succeeded = 0u64;
        let mut outcome = RunOutcome::Completed;

        info!(
            ?path,
            max_iterations = self.opts.max_iterations,
            chunk_size = self.opts.chunk_size.get(),
            content_check = ?self.opts.content_check,
            "starting run"
        );

        for iteration in 1..=self.opts.max_iterations {
            if token.is_cancelled() {
                outcome = RunOutcome::Cancelled;
                break;
            }

            let span = match &self.opts.parent_span {
                Some(parent) => error_span!(parent: parent.clone(), "iteration", iteration),
                None => error_span!("iteration", iteration),
            };
            trace!(parent: &span, "starting iteration");
            METRICS.iterations_started.increment(1);
            let started = Instant::now();

            let res = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                r = self.run_iteration(iteration, path, &mut reference_digest).instrument(span) => Some(r),
            };

            match res {
                None => {
                    debug!(iteration, "cancelled mid-iteration");
                    outcome = RunOutcome::Cancelled;
                    break;
                }
                Some(Ok(len)) => {
                    METRICS.iterations_succeeded.increment(1);
                    METRICS
                        .iteration_duration
                        .record(started.elapsed().as_secs_f64());
                    succeeded += 1;
                    progress.on_iteration_done(iteration, len);
                }
                Some(Err(e)) => {
                    METRICS.iterations_failed.increment(1);
                    error!(iteration, succeeded, error = %e, "error occurred on iteration");
                    return Err(Error::RunAborted {
                        iteration,
                        succeeded,
                        source: Box::new(e),
                    });
                }
            }
        }

        let elapsed = progress.elapsed();
        info!(
            iterations = succeeded,
            ?outcome,
            ?elapsed,
            "run finished, {:.2} MB/s average",
            mb_per_sec(progress.total_bytes(), elapsed.as_secs_f64())
        );

        Ok(RunReport {
            iterations_succeeded: succeeded,
            bytes_verified: progress.total_bytes(),
            outcome,
        })
    }
}

fn allocate(declared: u64) -> Result<Vec<u8>> {
    let len = usize::try_from(declared).map_err(|_| Error::FileTooLarge { size: declared })?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::Allocation { size: declared })?;
    buf.resize(len, 0);
    Ok(buf)
}

// A missing or unreadable path is an open failure no matter which call saw it first.
fn classify_stat_error(path: &Path, source: io::Error) -> Error {
    match source.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => Error::Open {
            path: path.to_owned(),
            source,
        },
        _ => Error::Stat {
            path: path.to_owned(),
            source,
        },
    }
}
