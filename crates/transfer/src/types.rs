use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_CHUNK_COPY_SIZE, DEFAULT_CHUNK_SIZE, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT, DEFAULT_WORKERS, TransferError,
};

/// A chunk of file data read for upload.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Zero-based chunk index.
    pub index: u64,
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// TransferSpec
// ---------------------------------------------------------------------------

/// What a transfer reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSource {
    /// Local file to upload.
    LocalFile(PathBuf),
    /// Landing page URL to download from.
    RemotePage(String),
}

impl std::fmt::Display for TransferSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferSource::LocalFile(p) => write!(f, "{}", p.display()),
            TransferSource::RemotePage(u) => f.write_str(u),
        }
    }
}

/// Immutable configuration of one engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSpec {
    pub source: TransferSource,
    /// Upload chunk size in bytes.
    pub chunk_size: u64,
    /// Copy step for local reads and download writes.
    pub chunk_copy_size: usize,
    /// Concurrent chunk uploads after chunk 0 (1 = sequential).
    pub workers: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries after the first attempt for idempotent requests.
    pub retries: u32,
    /// Base backoff delay, doubled per retry.
    pub backoff_factor: Duration,
    /// Access key for password-protected downloads.
    pub key: Option<String>,
    /// Explicit local file name for downloads.
    pub output_name: Option<String>,
    /// Demotes retry chatter to debug level.
    pub mute: bool,
}

impl TransferSpec {
    fn with_source(source: TransferSource) -> Self {
        Self {
            source,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_copy_size: DEFAULT_CHUNK_COPY_SIZE,
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            key: None,
            output_name: None,
            mute: false,
        }
    }

    /// Spec for uploading the file at `path` with default settings.
    pub fn upload(path: impl Into<PathBuf>) -> Self {
        Self::with_source(TransferSource::LocalFile(path.into()))
    }

    /// Spec for downloading the landing page at `url` with default settings.
    pub fn download(url: impl Into<String>) -> Self {
        Self::with_source(TransferSource::RemotePage(url.into()))
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_chunk_copy_size(mut self, copy_size: usize) -> Self {
        self.chunk_copy_size = copy_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32, backoff_factor: Duration) -> Self {
        self.retries = retries;
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn muted(mut self, mute: bool) -> Self {
        self.mute = mute;
        self
    }

    /// Checks the invariants: chunk size > 0, copy size > 0, workers >= 1.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidSpec("chunk size must be > 0".into()));
        }
        if self.chunk_copy_size == 0 {
            return Err(TransferError::InvalidSpec(
                "chunk copy size must be > 0".into(),
            ));
        }
        if self.workers == 0 {
            return Err(TransferError::InvalidSpec("worker count must be >= 1".into()));
        }
        Ok(())
    }

    /// Local path, for upload specs.
    pub fn local_path(&self) -> Option<&Path> {
        match &self.source {
            TransferSource::LocalFile(p) => Some(p),
            TransferSource::RemotePage(_) => None,
        }
    }

    /// Landing page URL, for download specs.
    pub fn remote_url(&self) -> Option<&str> {
        match &self.source {
            TransferSource::RemotePage(u) => Some(u),
            TransferSource::LocalFile(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// UploadSession
// ---------------------------------------------------------------------------

/// Lifecycle of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Token generated, server not yet known.
    Init,
    /// Server assigned, chunk 0 in flight.
    ChunkZero,
    /// Chunk 0 acknowledged, remaining chunks dispatching.
    Streaming,
    Succeeded,
    Failed,
}

/// Point-in-time view of an upload session.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSnapshot {
    pub token: String,
    pub file_name: String,
    pub state: UploadState,
    pub server: Option<String>,
    pub total_chunks: u64,
    pub acknowledged_chunks: u64,
    pub acknowledged_bytes: u64,
    pub file_size: u64,
    pub cancelled: bool,
    pub download_url: Option<String>,
    pub error: String,
}

/// Mutable state of one upload (thread-safe).
///
/// Shared between the dispatcher and the chunk workers for the lifetime of
/// a single upload call.
pub struct UploadSession {
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    token: String,
    file_name: String,
    file_size: u64,
    total_chunks: u64,
    server: Option<String>,
    cookies: Vec<String>,
    state: UploadState,
    acknowledged_chunks: u64,
    acknowledged_bytes: u64,
    cancelled: bool,
    metadata: Option<serde_json::Value>,
    download_url: Option<String>,
    error: String,
    started_at: Instant,
    completed_at: Option<Instant>,
}

impl UploadSession {
    /// Creates a session with a fresh random token.
    pub fn new(file_name: impl Into<String>, file_size: u64, total_chunks: u64) -> Self {
        Self::with_token(
            uuid::Uuid::new_v4().simple().to_string(),
            file_name,
            file_size,
            total_chunks,
        )
    }

    /// Creates a session with a caller-chosen token.
    pub fn with_token(
        token: impl Into<String>,
        file_name: impl Into<String>,
        file_size: u64,
        total_chunks: u64,
    ) -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                token: token.into(),
                file_name: file_name.into(),
                file_size,
                total_chunks,
                server: None,
                cookies: Vec::new(),
                state: UploadState::Init,
                acknowledged_chunks: 0,
                acknowledged_bytes: 0,
                cancelled: false,
                metadata: None,
                download_url: None,
                error: String::new(),
                started_at: Instant::now(),
                completed_at: None,
            }),
        }
    }

    /// Records the assigned upload server and enters [`UploadState::ChunkZero`].
    pub fn assign_server(&self, server: impl Into<String>) {
        let mut s = self.inner.write().unwrap();
        s.server = Some(server.into());
        s.state = UploadState::ChunkZero;
    }

    /// Records the cookies the server set while acknowledging chunk 0.
    pub fn record_cookies(&self, names: Vec<String>) {
        let mut s = self.inner.write().unwrap();
        s.cookies = names;
    }

    /// Enters [`UploadState::Streaming`].
    pub fn begin_streaming(&self) {
        let mut s = self.inner.write().unwrap();
        if s.state == UploadState::ChunkZero {
            s.state = UploadState::Streaming;
        }
    }

    /// Counts one acknowledged chunk of `bytes` bytes.
    ///
    /// Returns `(acknowledged_chunks, acknowledged_bytes)` after the update.
    pub fn acknowledge(&self, bytes: u64) -> (u64, u64) {
        let mut s = self.inner.write().unwrap();
        s.acknowledged_chunks += 1;
        s.acknowledged_bytes = (s.acknowledged_bytes + bytes).min(s.file_size);
        (s.acknowledged_chunks, s.acknowledged_bytes)
    }

    /// Stores the acknowledgement that carried the public URL.
    pub fn record_metadata(&self, metadata: serde_json::Value, download_url: String) {
        let mut s = self.inner.write().unwrap();
        s.metadata = Some(metadata);
        s.download_url = Some(download_url);
    }

    /// Marks the session as succeeded.
    pub fn complete(&self) {
        let mut s = self.inner.write().unwrap();
        s.state = UploadState::Succeeded;
        s.completed_at = Some(Instant::now());
    }

    /// Marks the session as failed with an error message.
    ///
    /// The first recorded error is kept.
    pub fn fail(&self, err: &str) {
        let mut s = self.inner.write().unwrap();
        s.state = UploadState::Failed;
        if s.error.is_empty() {
            s.error = err.to_string();
        }
        s.completed_at.get_or_insert_with(Instant::now);
    }

    /// Marks the session as failed because the caller asked to stop.
    pub fn cancel(&self) {
        let mut s = self.inner.write().unwrap();
        s.state = UploadState::Failed;
        s.cancelled = true;
        s.completed_at.get_or_insert_with(Instant::now);
    }

    /// Returns `true` until the session reaches a terminal state.
    pub fn is_active(&self) -> bool {
        let s = self.inner.read().unwrap();
        !matches!(s.state, UploadState::Succeeded | UploadState::Failed)
    }

    pub fn token(&self) -> String {
        self.inner.read().unwrap().token.clone()
    }

    pub fn file_name(&self) -> String {
        self.inner.read().unwrap().file_name.clone()
    }

    pub fn server(&self) -> Option<String> {
        self.inner.read().unwrap().server.clone()
    }

    pub fn cookies(&self) -> Vec<String> {
        self.inner.read().unwrap().cookies.clone()
    }

    pub fn state(&self) -> UploadState {
        self.inner.read().unwrap().state
    }

    pub fn total_chunks(&self) -> u64 {
        self.inner.read().unwrap().total_chunks
    }

    pub fn file_size(&self) -> u64 {
        self.inner.read().unwrap().file_size
    }

    pub fn metadata(&self) -> Option<serde_json::Value> {
        self.inner.read().unwrap().metadata.clone()
    }

    pub fn download_url(&self) -> Option<String> {
        self.inner.read().unwrap().download_url.clone()
    }

    /// Wall time since the session was created, or until it finished.
    pub fn elapsed(&self) -> Duration {
        let s = self.inner.read().unwrap();
        match s.completed_at {
            Some(done) => done.duration_since(s.started_at),
            None => s.started_at.elapsed(),
        }
    }

    /// Returns the current state as a snapshot.
    pub fn snapshot(&self) -> UploadSnapshot {
        let s = self.inner.read().unwrap();
        UploadSnapshot {
            token: s.token.clone(),
            file_name: s.file_name.clone(),
            state: s.state,
            server: s.server.clone(),
            total_chunks: s.total_chunks,
            acknowledged_chunks: s.acknowledged_chunks,
            acknowledged_bytes: s.acknowledged_bytes,
            file_size: s.file_size,
            cancelled: s.cancelled,
            download_url: s.download_url.clone(),
            error: s.error.clone(),
        }
    }
}
