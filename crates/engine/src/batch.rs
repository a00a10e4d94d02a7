//! Batch orchestrator for several independent transfers.
//!
//! Runs uploads or page downloads side by side, streams their progress as
//! events, and supports cancellation of the whole batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gfm_protocol::PageLocator;
use gfm_transfer::{ProgressCallback, ProgressEvent, TransferSpec, progress_fn};

use crate::config::EngineConfig;
use crate::download::{DownloadResult, Downloader};
use crate::error::EngineError;
use crate::http::HttpSession;
use crate::registry::{TransferKind, TransferRegistry};
use crate::upload::{UploadOutcome, Uploader};

/// Progress of a batch. `unit` is the index of the transfer in the input.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Started {
        unit: usize,
        kind: TransferKind,
        label: String,
    },
    Progress {
        unit: usize,
        event: ProgressEvent,
    },
    Completed {
        unit: usize,
        label: String,
        detail: String,
    },
    Failed {
        unit: usize,
        label: String,
        error: String,
    },
}

/// Result of one page download in a batch.
#[derive(Debug)]
pub struct DownloadReport {
    pub source: String,
    /// `Err` if the page itself could not be used.
    pub outcome: Result<Vec<DownloadResult>, EngineError>,
}

impl DownloadReport {
    /// `true` if the page was read and every file arrived.
    pub fn is_success(&self) -> bool {
        self.outcome
            .as_ref()
            .is_ok_and(|files| files.iter().all(DownloadResult::is_success))
    }
}

/// Result of one upload in a batch.
#[derive(Debug)]
pub struct UploadReport {
    pub source: PathBuf,
    pub outcome: Result<UploadOutcome, EngineError>,
}

impl UploadReport {
    pub fn download_url(&self) -> Option<&str> {
        self.outcome.as_ref().ok()?.download_url.as_deref()
    }
}

/// Shared by every unit task of one batch.
#[derive(Clone)]
struct UnitContext {
    config: Arc<EngineConfig>,
    registry: TransferRegistry,
    events: mpsc::Sender<TransferEvent>,
    cancel: CancellationToken,
}

impl UnitContext {
    /// Never blocks: a consumer that stopped reading only loses events.
    fn emit(&self, event: TransferEvent) {
        let _ = self.events.try_send(event);
    }

    fn forward_progress(&self, unit: usize) -> ProgressCallback {
        let events = self.events.clone();
        progress_fn(move |event: &ProgressEvent| {
            let _ = events.try_send(TransferEvent::Progress {
                unit,
                event: event.clone(),
            });
        })
    }
}

/// Orchestrates batches of uploads and downloads.
pub struct TransferOrchestrator {
    config: Arc<EngineConfig>,
    registry: TransferRegistry,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
    cancel: CancellationToken,
}

impl TransferOrchestrator {
    pub fn new(config: EngineConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            config: Arc::new(config),
            registry: TransferRegistry::new(),
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Registers units in `registry` instead of a private one.
    pub fn with_registry(mut self, registry: TransferRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    /// Cancelling this token stops every unit of every batch.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    fn context(&self) -> UnitContext {
        UnitContext {
            config: Arc::clone(&self.config),
            registry: self.registry.clone(),
            events: self.events_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Downloads every page into `dest`. Reports come back in input order.
    ///
    /// Pages run independently; one failing page never affects another.
    pub async fn download_all(&self, specs: Vec<TransferSpec>, dest: &Path) -> Vec<DownloadReport> {
        let ctx = self.context();
        let dest = dest.to_path_buf();
        run_bounded(
            self.config.batch.max_parallel,
            specs,
            move |unit, spec| download_unit(unit, spec, dest.clone(), ctx.clone()),
            |spec, error| DownloadReport {
                source: spec.source.to_string(),
                outcome: Err(error),
            },
        )
        .await
    }

    /// Uploads every file. Reports come back in input order.
    pub async fn upload_all(&self, specs: Vec<TransferSpec>) -> Vec<UploadReport> {
        let ctx = self.context();
        run_bounded(
            self.config.batch.max_parallel,
            specs,
            move |unit, spec| upload_unit(unit, spec, ctx.clone()),
            |spec, error| UploadReport {
                source: spec.local_path().map(Path::to_path_buf).unwrap_or_default(),
                outcome: Err(error),
            },
        )
        .await
    }
}

/// Runs `unit` for every spec with at most `limit` running at once.
///
/// Returns one report per spec in input order. A unit whose task dies is
/// reported through `lost`.
async fn run_bounded<R, F, Fut, L>(
    limit: usize,
    specs: Vec<TransferSpec>,
    unit: F,
    lost: L,
) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(usize, TransferSpec) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
    L: Fn(&TransferSpec, EngineError) -> R,
{
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();
    let mut slots: Vec<Result<R, TransferSpec>> = Vec::with_capacity(specs.len());

    for (idx, spec) in specs.into_iter().enumerate() {
        let permits = Arc::clone(&permits);
        slots.push(Err(spec.clone()));
        let fut = unit(idx, spec);
        tasks.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await;
            (idx, fut.await)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, report)) => slots[idx] = Ok(report),
            Err(e) => error!(error = %e, "batch unit panicked"),
        }
    }
    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|spec| {
                lost(&spec, EngineError::Internal("transfer task panicked".into()))
            })
        })
        .collect()
}

async fn download_unit(
    unit: usize,
    spec: TransferSpec,
    dest: PathBuf,
    ctx: UnitContext,
) -> DownloadReport {
    let source = spec.source.to_string();
    let handle = ctx
        .registry
        .register_child(TransferKind::Download, &source, &ctx.cancel);
    ctx.emit(TransferEvent::Started {
        unit,
        kind: TransferKind::Download,
        label: source.clone(),
    });

    let outcome = async {
        let token = handle.token();
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let service = &ctx.config.service;
        let url = spec
            .remote_url()
            .ok_or_else(|| EngineError::Config("download needs a landing page URL".into()))?;
        let locator = PageLocator::parse(url, &service.domain)?;
        let dir = if ctx.config.download.per_page_subdir {
            dest.join(locator.page_id())
        } else {
            dest
        };

        let http = HttpSession::new(&spec, service)?;
        Downloader::new(http, service.domain.clone())
            .with_extractor(ctx.config.archive.extractor())
            .download_page(
                &locator,
                &spec,
                &dir,
                token,
                Some(handle.progress_callback(Some(ctx.forward_progress(unit)))),
            )
            .await
    }
    .await;

    match &outcome {
        Ok(files) => {
            let ok = files.iter().filter(|f| f.is_success()).count();
            info!(unit, source = %source, ok, files = files.len(), "page finished");
            ctx.emit(TransferEvent::Completed {
                unit,
                label: source.clone(),
                detail: format!("{ok}/{} files", files.len()),
            });
        }
        Err(e) => {
            error!(unit, source = %source, error = %e, "page failed");
            ctx.emit(TransferEvent::Failed {
                unit,
                label: source.clone(),
                error: e.to_string(),
            });
        }
    }

    DownloadReport { source, outcome }
}

async fn upload_unit(unit: usize, spec: TransferSpec, ctx: UnitContext) -> UploadReport {
    let source = spec.local_path().map(Path::to_path_buf).unwrap_or_default();
    let label = spec.source.to_string();
    let handle = ctx
        .registry
        .register_child(TransferKind::Upload, &label, &ctx.cancel);
    ctx.emit(TransferEvent::Started {
        unit,
        kind: TransferKind::Upload,
        label: label.clone(),
    });

    let outcome = async {
        let token = handle.token();
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let http = HttpSession::new(&spec, &ctx.config.service)?;
        Uploader::new(http, ctx.config.service.clone())
            .upload(
                &spec,
                token,
                Some(handle.progress_callback(Some(ctx.forward_progress(unit)))),
            )
            .await
    }
    .await;

    match &outcome {
        Ok(result) if result.success => {
            let url = result.download_url.clone().unwrap_or_default();
            info!(unit, file = %label, %url, "upload finished");
            ctx.emit(TransferEvent::Completed {
                unit,
                label,
                detail: url,
            });
        }
        Ok(_) => {
            info!(unit, file = %label, "upload cancelled");
            ctx.emit(TransferEvent::Failed {
                unit,
                label,
                error: EngineError::Cancelled.to_string(),
            });
        }
        Err(e) => {
            error!(unit, file = %label, error = %e, "upload failed");
            ctx.emit(TransferEvent::Failed {
                unit,
                label,
                error: e.to_string(),
            });
        }
    }

    UploadReport { source, outcome }
}
