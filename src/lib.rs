// TODO: expose a per-iteration hook so callers can inspect the reconstructed buffer
// (e.g. compare against a known canary pattern) without enabling digest checks.

mod chunks;
mod constants;
#[cfg(test)]
mod e2e_tests;
mod harness;
mod metrics;
mod progress;
#[cfg(test)]
mod test_util;
mod traits;
mod utils;

use std::path::PathBuf;

pub use chunks::ChunkStream;
pub use constants::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ITERATIONS};
pub use harness::{
    ContentCheck, HandleStats, HarnessOpts, RunOutcome, RunReport, StreamIntegrityHarness,
};
pub use traits::{FileHandle, FileMetadata, FileSystem, TokioFileHandle, TokioFileSystem};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("error opening {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error querying metadata of {path:?}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error querying metadata of open handle: {0}")]
    Metadata(#[source] std::io::Error),

    #[error("error reading chunk at offset {offset}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("error closing handle: {0}")]
    Close(#[source] std::io::Error),

    #[error("{primary}; closing the handle afterwards also failed: {close}")]
    CloseAfterFailure {
        primary: Box<Error>,
        close: std::io::Error,
    },

    #[error("timed out waiting for chunk at offset {offset}")]
    ChunkTimeout { offset: u64 },

    #[error("iteration timed out")]
    IterationTimeout,

    #[error("declared file size {size} does not fit in memory on this platform")]
    FileTooLarge { size: u64 },

    #[error("cannot allocate {size} bytes for the accumulated buffer")]
    Allocation { size: u64 },

    #[error("stream yielded more bytes than declared: declared={declared}, received at least {received}")]
    Overflow { declared: u64, received: u64 },

    #[error("iteration {iteration}: reconstructed length mismatch: expected={expected}, actual={actual}")]
    SizeMismatch {
        iteration: u64,
        expected: u64,
        actual: u64,
    },

    #[error("iteration {iteration}: content digest differs from the first iteration")]
    ContentMismatch { iteration: u64 },

    #[error("run aborted on iteration {iteration} after {succeeded} successful iterations: {source}")]
    RunAborted {
        iteration: u64,
        succeeded: u64,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// The iteration a run was aborted on, if this is a run-level failure.
    pub fn failed_iteration(&self) -> Option<u64> {
        match self {
            Error::RunAborted { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }

    /// Strips [`Error::RunAborted`] and returns what actually went wrong.
    pub fn root(&self) -> &Error {
        match self {
            Error::RunAborted { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
