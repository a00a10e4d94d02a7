//! Optional post-download archive extraction.
//!
//! Extraction shells out to an external unpacker. Failures never fail the
//! download; they come back as a warning and the archive stays on disk.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Unpacker invoked as `{command} -o {dest} {archive}`.
pub const DEFAULT_EXTRACT_COMMAND: &str = "unar";

const ARCHIVE_EXTENSIONS: [&str; 4] = ["zip", "7z", "gz", "tar"];

/// What happened to one downloaded archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// Unpacked and the archive was removed.
    Extracted,
    /// Left in place; the string says why.
    Failed(String),
}

impl ExtractionOutcome {
    pub fn warning(&self) -> Option<&str> {
        match self {
            ExtractionOutcome::Extracted => None,
            ExtractionOutcome::Failed(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    command: String,
    timeout: Duration,
}

impl ArchiveExtractor {
    pub fn new(command: &str, timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            timeout,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns `true` for file names with a known archive extension.
    pub fn is_archive(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                ARCHIVE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
    }

    /// Unpacks `archive` into `dest`, deleting the archive on success.
    pub async fn extract(&self, archive: &Path, dest: &Path) -> ExtractionOutcome {
        debug!(command = %self.command, archive = %archive.display(), "extracting");

        let child = Command::new(&self.command)
            .arg("-o")
            .arg(dest)
            .arg(archive)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => return self.failed(archive, format!("cannot run {}: {e}", self.command)),
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return self.failed(archive, format!("{} failed: {e}", self.command)),
            Err(_) => {
                return self.failed(
                    archive,
                    format!("{} timed out after {:?}", self.command, self.timeout),
                );
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return self.failed(
                archive,
                format!("{} exited with {}: {}", self.command, output.status, stderr.trim()),
            );
        }

        if let Err(e) = tokio::fs::remove_file(archive).await {
            return self.failed(archive, format!("extracted but could not remove archive: {e}"));
        }
        info!(archive = %archive.display(), dest = %dest.display(), "archive extracted");
        ExtractionOutcome::Extracted
    }

    fn failed(&self, archive: &Path, reason: String) -> ExtractionOutcome {
        warn!(archive = %archive.display(), %reason, "extraction failed");
        ExtractionOutcome::Failed(reason)
    }
}
