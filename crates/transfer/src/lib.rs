//! Service-independent transfer primitives.
//!
//! Chunk planning and range reads, human-readable sizes, the per-upload
//! session state, output file naming and the progress/cancellation channel
//! shared by uploads and downloads.

mod chunked;
mod progress;
mod size;
mod types;
mod validation;

use std::path::PathBuf;
use std::time::Duration;

pub use chunked::{ChunkPlan, ChunkRange, ChunkReader, read_range};
pub use progress::{
    DEFAULT_MIN_INTERVAL, ProgressCallback, ProgressControl, ProgressEvent, ProgressReporter,
    SpeedCalculator, progress_fn,
};
pub use size::{SizeFormatError, SizeValue, deserialize_size, format_size, parse_size};
pub use types::{
    Chunk, TransferSource, TransferSpec, UploadSession, UploadSnapshot, UploadState,
};
pub use validation::{resolve_output_names, sanitize_file_name};

/// Default upload chunk size: 10 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default copy step for range reads and download writes: 1 MiB.
pub const DEFAULT_CHUNK_COPY_SIZE: usize = 1024 * 1024;

/// Default number of concurrent chunk uploads.
pub const DEFAULT_WORKERS: usize = 4;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default retries after the first attempt.
pub const DEFAULT_RETRIES: u32 = 5;

/// Default base backoff delay.
pub const DEFAULT_BACKOFF_FACTOR: Duration = Duration::from_millis(200);

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "short read from {}: expected {expected} bytes at offset {offset}, got {actual}",
        path.display()
    )]
    ShortRead {
        path: PathBuf,
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("invalid transfer spec: {0}")]
    InvalidSpec(String),

    #[error(transparent)]
    Format(#[from] SizeFormatError),
}
