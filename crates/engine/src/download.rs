//! Download engine.
//!
//! Every file of a landing page is streamed into `{name}.dl` next to its
//! final path and renamed only when the byte count matches the declared
//! Content-Length. A failing file never stops its siblings.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gfm_protocol::PageLocator;
use gfm_transfer::{
    ProgressCallback, ProgressControl, ProgressReporter, TransferSpec, resolve_output_names,
};

use crate::archive::{ArchiveExtractor, ExtractionOutcome};
use crate::error::EngineError;
use crate::http::HttpSession;
use crate::page::{RemoteFileDescriptor, scrape};

/// Suffix of the in-progress sibling file.
pub const TEMP_SUFFIX: &str = ".dl";

/// Result for one file of a page.
#[derive(Debug)]
pub struct DownloadResult {
    pub descriptor: RemoteFileDescriptor,
    /// Final path on success.
    pub outcome: Result<PathBuf, EngineError>,
    /// Set when the file was an archive and extraction was enabled.
    pub extraction: Option<ExtractionOutcome>,
}

impl DownloadResult {
    pub fn local_path(&self) -> Option<&Path> {
        self.outcome.as_ref().ok().map(PathBuf::as_path)
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Non-fatal problem worth showing to the user.
    pub fn warning(&self) -> Option<&str> {
        self.extraction.as_ref().and_then(ExtractionOutcome::warning)
    }
}

/// Downloads every file behind a landing page.
pub struct Downloader {
    http: HttpSession,
    domain: String,
    extractor: Option<ArchiveExtractor>,
}

impl Downloader {
    /// `domain` is the registrable domain landing pages must live under.
    pub fn new(http: HttpSession, domain: impl Into<String>) -> Self {
        Self {
            http,
            domain: domain.into(),
            extractor: None,
        }
    }

    pub fn with_extractor(mut self, extractor: Option<ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Validates the page URL of `spec` and downloads its files into `dest_dir`.
    ///
    /// `Err` means the page itself could not be used (bad URL, unreachable,
    /// unrecognised markup). Per-file failures are reported in the results.
    pub async fn download(
        &self,
        spec: &TransferSpec,
        dest_dir: &Path,
        cancel: CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<DownloadResult>, EngineError> {
        spec.validate()?;
        let url = spec
            .remote_url()
            .ok_or_else(|| EngineError::Config("download needs a landing page URL".into()))?;
        let locator = PageLocator::parse(url, &self.domain)?;
        self.download_page(&locator, spec, dest_dir, cancel, progress)
            .await
    }

    /// Downloads the files of an already validated page.
    pub async fn download_page(
        &self,
        locator: &PageLocator,
        spec: &TransferSpec,
        dest_dir: &Path,
        cancel: CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<DownloadResult>, EngineError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let listing = scrape(&self.http, locator).await?;
        if listing.files.len() > 1 {
            info!(url = locator.page_url(), files = listing.files.len(), "bundle page");
        }

        let display: Vec<&str> = listing.files.iter().map(|f| f.name.as_str()).collect();
        let local_names = resolve_output_names(&display, spec.output_name.as_deref());

        let mut results = Vec::with_capacity(listing.files.len());
        for (descriptor, local) in listing.files.into_iter().zip(local_names) {
            if cancel.is_cancelled() {
                results.push(DownloadResult {
                    descriptor,
                    outcome: Err(EngineError::Cancelled),
                    extraction: None,
                });
                continue;
            }

            let target = dest_dir.join(&local);
            let outcome = self
                .download_file(locator, &descriptor, &target, spec, &cancel, progress.clone())
                .await;

            let extraction = match (&outcome, &self.extractor) {
                (Ok(path), Some(extractor)) if ArchiveExtractor::is_archive(path) => {
                    Some(extractor.extract(path, dest_dir).await)
                }
                _ => None,
            };
            if let Err(e) = &outcome {
                warn!(file = %descriptor.name, error = %e, "file download failed");
            }

            results.push(DownloadResult {
                descriptor,
                outcome,
                extraction,
            });
        }
        Ok(results)
    }

    async fn download_file(
        &self,
        locator: &PageLocator,
        descriptor: &RemoteFileDescriptor,
        target: &Path,
        spec: &TransferSpec,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<PathBuf, EngineError> {
        let url = locator.download_url(&descriptor.file_id, spec.key.as_deref());
        let mut resp = self.http.get_stream(&url, "download").await?;
        let expected = resp.content_length().ok_or_else(|| EngineError::Transport {
            stage: "download",
            url: url.clone(),
            attempts: 1,
            reason: "response has no Content-Length".into(),
        })?;

        let reporter = ProgressReporter::new(
            expected,
            Some(descriptor.name.clone()),
            progress,
            cancel.clone(),
        );
        if reporter.update(0) == ProgressControl::Stop {
            return Err(EngineError::Cancelled);
        }
        info!(
            file = %descriptor.name,
            size = %descriptor.size,
            bytes = expected,
            path = %target.display(),
            "download started"
        );

        let temp = temp_path(target);
        let file = tokio::fs::File::create(&temp).await?;
        let mut writer = BufWriter::with_capacity(spec.chunk_copy_size, file);
        let mut written: u64 = 0;

        loop {
            let chunk = match self.http.next_chunk(&mut resp).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(reason) => {
                    writer.flush().await?;
                    return Err(EngineError::Transport {
                        stage: "download body",
                        url,
                        attempts: 1,
                        reason,
                    });
                }
            };
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if reporter.update(written) == ProgressControl::Stop {
                writer.flush().await?;
                info!(file = %descriptor.name, written, "download stopped");
                return Err(EngineError::Cancelled);
            }
        }
        writer.flush().await?;
        drop(writer);

        verify_and_finalize(&temp, target, expected, written).await?;
        debug!(path = %target.display(), bytes = written, "download verified");
        Ok(target.to_path_buf())
    }
}

/// `{target}.dl`.
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Renames `temp` to `target` if `written` matches `expected`.
///
/// On mismatch the temp file is left in place.
pub async fn verify_and_finalize(
    temp: &Path,
    target: &Path,
    expected: u64,
    written: u64,
) -> Result<(), EngineError> {
    if written != expected {
        return Err(EngineError::SizeMismatch {
            path: temp.to_path_buf(),
            expected,
            actual: written,
        });
    }
    tokio::fs::rename(temp, target).await?;
    Ok(())
}
