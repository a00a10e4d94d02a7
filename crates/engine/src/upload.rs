//! Chunked upload engine.
//!
//! An upload moves through typed stages. [`UploadInit`] checks the source
//! file and discovers the upload server. Its only way forward is
//! [`UploadInit::send_first_chunk`], which yields [`Streaming`] once chunk 0
//! has been acknowledged, and only `Streaming` can dispatch the remaining
//! chunks. The server pins the session (host and cookies) on chunk 0, so no
//! other chunk may leave before that.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gfm_protocol::constants::{CHUNK_PART_FILENAME, CHUNK_PART_MIME, UPLOAD_CHUNK_PATH, field};
use gfm_protocol::{ChunkResponse, extract_upload_server};
use gfm_transfer::{
    ChunkPlan, ChunkRange, ChunkReader, ProgressCallback, ProgressControl, ProgressReporter,
    TransferError, TransferSpec, UploadSession, UploadState,
};

use crate::config::ServiceConfig;
use crate::error::EngineError;
use crate::http::{HttpSession, is_retryable_status};

const MIB: u64 = 1024 * 1024;

/// How chunks after chunk 0 are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// One chunk at a time, in index order.
    Sequential,
    /// Up to N chunks in flight.
    WorkerPool(usize),
}

impl UploadStrategy {
    /// `Sequential` for one worker, a pool otherwise.
    pub fn from_workers(workers: usize) -> Self {
        if workers <= 1 {
            UploadStrategy::Sequential
        } else {
            UploadStrategy::WorkerPool(workers)
        }
    }

    /// Maximum chunks in flight.
    pub fn concurrency(&self) -> usize {
        match self {
            UploadStrategy::Sequential => 1,
            UploadStrategy::WorkerPool(n) => (*n).max(1),
        }
    }
}

/// Result of an upload that was not rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub success: bool,
    /// Public page of the uploaded file.
    pub download_url: Option<String>,
    /// The caller stopped the upload, through the cancel token or the
    /// progress callback.
    pub cancelled: bool,
    /// Acknowledgement that carried the download URL.
    pub metadata: Option<serde_json::Value>,
    pub file_name: String,
    pub total_chunks: u64,
    pub acknowledged_chunks: u64,
    pub bytes_uploaded: u64,
    /// Names of the cookies the server pinned on chunk 0.
    pub cookies: Vec<String>,
}

/// Uploads local files to the hosting service.
pub struct Uploader {
    http: HttpSession,
    service: ServiceConfig,
}

impl Uploader {
    pub fn new(http: HttpSession, service: ServiceConfig) -> Self {
        Self { http, service }
    }

    /// Asks the home page which host takes uploads right now.
    pub async fn discover_server(&self) -> Result<String, EngineError> {
        let home = &self.service.home_url;
        let html = self.http.get_text(home, "server discovery").await?;
        extract_upload_server(&html)
            .map(str::to_string)
            .ok_or_else(|| EngineError::ServiceUnavailable {
                url: home.clone(),
                reason: "page advertises no upload server".into(),
            })
    }

    /// Uploads the file named by `spec`.
    ///
    /// Returns `Ok` with `cancelled = true` if `cancel` fires or the
    /// progress callback answers [`ProgressControl::Stop`]; chunks already
    /// in flight are allowed to finish.
    pub async fn upload(
        &self,
        spec: &TransferSpec,
        cancel: CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadOutcome, EngineError> {
        let init = UploadInit::prepare(self, spec, cancel, progress).await?;
        let ctx = Arc::clone(&init.ctx);
        if ctx.stop.is_cancelled() {
            return ctx.finish(None);
        }

        match init.send_first_chunk().await {
            Ok(streaming) => {
                streaming
                    .stream_remaining(UploadStrategy::from_workers(spec.workers))
                    .await
            }
            Err(EngineError::Cancelled) => ctx.finish(None),
            Err(e) => ctx.finish(Some(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Upload with a known server, before chunk 0 was sent.
pub struct UploadInit {
    ctx: Arc<ChunkContext>,
}

/// Upload whose chunk 0 was acknowledged; remaining chunks may go out.
pub struct Streaming {
    ctx: Arc<ChunkContext>,
}

impl UploadInit {
    /// Validates the source file, plans the chunks and discovers the server.
    pub async fn prepare(
        uploader: &Uploader,
        spec: &TransferSpec,
        cancel: CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<Self, EngineError> {
        spec.validate()?;
        let path = spec
            .local_path()
            .ok_or_else(|| EngineError::Config("upload needs a local file source".into()))?
            .to_path_buf();

        let meta = tokio::fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::NotFound(path.clone())
            } else {
                EngineError::Io(e)
            }
        })?;
        if !meta.is_file() {
            return Err(EngineError::NotFound(path));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| EngineError::NotFound(path.clone()))?;

        let plan = ChunkPlan::new(meta.len(), spec.chunk_size)?;
        let session = UploadSession::new(&file_name, meta.len(), plan.total_chunks());

        let server = uploader.discover_server().await?;
        session.assign_server(&server);
        let url = format!(
            "{}://{server}/{UPLOAD_CHUNK_PATH}",
            uploader.service.upload_scheme
        );

        info!(
            file = %file_name,
            size = meta.len(),
            chunks = plan.total_chunks(),
            %server,
            "upload started"
        );

        let budget_factor = u32::try_from(spec.chunk_size.div_ceil(MIB).max(1)).unwrap_or(u32::MAX);
        let reporter =
            ProgressReporter::new(meta.len(), Some(file_name.clone()), progress, cancel.clone());

        Ok(Self {
            ctx: Arc::new(ChunkContext {
                http: uploader.http.clone(),
                url,
                path,
                copy_size: spec.chunk_copy_size,
                token: session.token(),
                file_name,
                plan,
                session,
                reporter,
                stop: cancel.child_token(),
                lifetime: uploader.service.lifetime_days,
                budget: spec.timeout.saturating_mul(budget_factor),
                mute: spec.mute,
            }),
        })
    }

    pub fn session(&self) -> &UploadSession {
        &self.ctx.session
    }

    /// Uploads chunk 0 and waits for its acknowledgement.
    pub async fn send_first_chunk(self) -> Result<Streaming, EngineError> {
        let ack = send_chunk(&self.ctx, self.ctx.plan.range(0)).await?;
        if !ack.cookies.is_empty() {
            self.ctx.session.record_cookies(ack.cookies.clone());
        }
        self.ctx.record_ack(&ack);
        self.ctx.session.begin_streaming();
        Ok(Streaming { ctx: self.ctx })
    }
}

impl Streaming {
    pub fn session(&self) -> &UploadSession {
        &self.ctx.session
    }

    /// Dispatches chunks 1.. and waits for all of them.
    ///
    /// Dispatch stops at the first rejection or on cancellation; chunks
    /// already in flight are drained before returning.
    pub async fn stream_remaining(
        self,
        strategy: UploadStrategy,
    ) -> Result<UploadOutcome, EngineError> {
        let total = self.ctx.plan.total_chunks();
        let limit = strategy.concurrency();
        let mut next = 1;
        let mut tasks = JoinSet::new();
        let mut failure: Option<EngineError> = None;

        loop {
            while failure.is_none() && !self.ctx.stop.is_cancelled() && next < total && tasks.len() < limit {
                let ctx = Arc::clone(&self.ctx);
                let range = ctx.plan.range(next);
                tasks.spawn(async move {
                    let ack = send_chunk(&ctx, range).await?;
                    ctx.record_ack(&ack);
                    Ok::<_, EngineError>(())
                });
                next += 1;
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok(Ok(())) | Ok(Err(EngineError::Cancelled)) => {}
                Ok(Err(e)) => {
                    if failure.is_none() {
                        // In-flight chunks finish their current attempt but do not retry.
                        self.ctx.stop.cancel();
                        failure = Some(e);
                    }
                }
                Err(e) => {
                    if failure.is_none() {
                        self.ctx.stop.cancel();
                        failure = Some(e.into());
                    }
                }
            }
        }

        self.ctx.finish(failure)
    }
}

// ---------------------------------------------------------------------------
// Chunk transfer
// ---------------------------------------------------------------------------

/// State shared by every chunk of one upload.
struct ChunkContext {
    http: HttpSession,
    url: String,
    path: PathBuf,
    copy_size: usize,
    token: String,
    file_name: String,
    plan: ChunkPlan,
    session: UploadSession,
    reporter: ProgressReporter,
    /// Fires on caller cancellation (parent token) or on rejection.
    stop: CancellationToken,
    lifetime: u32,
    /// Deadline for one chunk POST including the body write.
    budget: Duration,
    mute: bool,
}

struct ChunkAck {
    range: ChunkRange,
    response: ChunkResponse,
    cookies: Vec<String>,
}

impl ChunkContext {
    fn record_ack(&self, ack: &ChunkAck) -> ProgressControl {
        let (acked, bytes) = self.session.acknowledge(ack.range.len);
        if let Some(url) = ack.response.download_url() {
            self.session
                .record_metadata(ack.response.to_value(), url.to_string());
        }
        let total = self.plan.total_chunks();
        debug!(chunk = ack.range.index, acked, total, "chunk acknowledged");
        let control = self
            .reporter
            .report(acked as f64 / total as f64 * 100.0, bytes);
        if control == ProgressControl::Stop {
            self.stop.cancel();
        }
        control
    }

    fn form(&self, index: u64, data: Bytes) -> Result<Form, EngineError> {
        let len = data.len() as u64;
        let part = Part::stream_with_length(data, len)
            .file_name(CHUNK_PART_FILENAME)
            .mime_str(CHUNK_PART_MIME)
            .map_err(|e| EngineError::Internal(format!("chunk part: {e}")))?;
        Ok(Form::new()
            .text(field::TOKEN, self.token.clone())
            .text(field::NAME, self.file_name.clone())
            .text(field::CHUNK, index.to_string())
            .text(field::CHUNKS, self.plan.total_chunks().to_string())
            .text(field::LIFETIME, self.lifetime.to_string())
            .part(field::FILE, part))
    }

    fn log_retry(&self, chunk: u64, attempt: u64, reason: &str) {
        if self.mute {
            debug!(chunk, attempt, %reason, "retrying chunk");
        } else {
            warn!(chunk, attempt, %reason, "retrying chunk");
        }
    }

    /// Settles the session and builds the outcome.
    fn finish(&self, failure: Option<EngineError>) -> Result<UploadOutcome, EngineError> {
        if let Some(e) = failure {
            self.session.fail(&e.to_string());
            warn!(file = %self.file_name, error = %e, "upload failed");
            return Err(e);
        }

        let snap = self.session.snapshot();
        // A stop answered on the last acknowledgement still counts as a stop.
        if self.stop.is_cancelled() || snap.acknowledged_chunks < snap.total_chunks {
            self.session.cancel();
            info!(
                file = %self.file_name,
                acked = snap.acknowledged_chunks,
                total = snap.total_chunks,
                "upload cancelled"
            );
            return Ok(self.outcome());
        }

        if snap.download_url.is_none() {
            let e = EngineError::UploadRejected {
                chunk: snap.total_chunks - 1,
                reason: "no download url in acknowledgements".into(),
            };
            self.session.fail(&e.to_string());
            return Err(e);
        }

        self.session.complete();
        info!(
            file = %self.file_name,
            url = snap.download_url.as_deref().unwrap_or_default(),
            elapsed = ?self.session.elapsed(),
            "upload completed"
        );
        Ok(self.outcome())
    }

    fn outcome(&self) -> UploadOutcome {
        let snap = self.session.snapshot();
        UploadOutcome {
            success: snap.state == UploadState::Succeeded,
            download_url: snap.download_url,
            cancelled: snap.cancelled,
            metadata: self.session.metadata(),
            file_name: snap.file_name,
            total_chunks: snap.total_chunks,
            acknowledged_chunks: snap.acknowledged_chunks,
            bytes_uploaded: snap.acknowledged_bytes,
            cookies: self.session.cookies(),
        }
    }
}

/// Reads one chunk off the blocking pool.
async fn read_chunk(ctx: &ChunkContext, range: ChunkRange) -> Result<Bytes, EngineError> {
    let path = ctx.path.clone();
    let copy_size = ctx.copy_size;
    let chunk = tokio::task::spawn_blocking(move || {
        let mut reader = ChunkReader::open(&path, copy_size)?;
        let chunk = reader.read_chunk(range)?;
        if chunk.data.len() as u64 != range.len {
            return Err(TransferError::ShortRead {
                path,
                offset: range.offset,
                expected: range.len,
                actual: chunk.data.len() as u64,
            });
        }
        Ok(chunk)
    })
    .await??;
    Ok(Bytes::from(chunk.data))
}

/// Uploads one chunk, retrying transient failures until acknowledged.
///
/// Retries have no delay and stop only when the upload is stopped. A
/// rejection by the server is returned at once.
async fn send_chunk(ctx: &ChunkContext, range: ChunkRange) -> Result<ChunkAck, EngineError> {
    let data = read_chunk(ctx, range).await?;
    let chunk = range.index;
    let mut attempt: u64 = 0;

    loop {
        if attempt > 0 {
            if ctx.stop.is_cancelled() {
                debug!(chunk, attempt, "abandoning chunk retry");
                return Err(EngineError::Cancelled);
            }
            tokio::task::yield_now().await;
        }
        attempt += 1;

        let form = ctx.form(chunk, data.clone())?;
        let reply = match ctx.http.post_multipart(&ctx.url, form, ctx.budget).await {
            Ok(reply) => reply,
            Err(reason) => {
                ctx.log_retry(chunk, attempt, &reason);
                continue;
            }
        };

        if is_retryable_status(reply.status) {
            ctx.log_retry(chunk, attempt, &format!("HTTP {}", reply.status));
            continue;
        }
        if !reply.status.is_success() {
            return Err(EngineError::UploadRejected {
                chunk,
                reason: format!("HTTP {}", reply.status),
            });
        }

        let response =
            ChunkResponse::from_slice(&reply.body).map_err(|e| EngineError::UploadRejected {
                chunk,
                reason: format!("unreadable acknowledgement: {e}"),
            })?;
        if !response.is_accepted() {
            let reason = match &response.status {
                Some(status) => format!("server status {status}"),
                None => "acknowledgement without status".to_string(),
            };
            return Err(EngineError::UploadRejected { chunk, reason });
        }

        return Ok(ChunkAck {
            range,
            response,
            cookies: reply.cookies,
        });
    }
}
