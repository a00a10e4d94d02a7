//! Engine configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/gfm/engine.toml`
//! - Windows: `%APPDATA%/gfm/engine.toml`
//!
//! Every field has a default, so a partial file (or none at all) is valid.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gfm_protocol::constants::{
    DEFAULT_DOMAIN, DEFAULT_HOME_URL, DEFAULT_LIFETIME_DAYS, DEFAULT_UPLOAD_SCHEME,
};
use gfm_transfer::{
    DEFAULT_CHUNK_COPY_SIZE, DEFAULT_CHUNK_SIZE, DEFAULT_RETRIES, DEFAULT_WORKERS,
    TransferSource, TransferSpec, deserialize_size,
};

use crate::archive::{ArchiveExtractor, DEFAULT_EXTRACT_COMMAND};
use crate::error::EngineError;

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub transfer: TransferConfig,
    pub service: ServiceConfig,
    pub download: DownloadConfig,
    pub batch: BatchConfig,
    pub archive: ArchiveConfig,
}

/// Defaults applied to every [`TransferSpec`] built from this config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Upload chunk size; an integer or a size string such as `"10M"`.
    #[serde(deserialize_with = "deserialize_size")]
    pub chunk_size: u64,

    /// Copy step for reads and writes; an integer or a size string.
    #[serde(deserialize_with = "deserialize_size")]
    pub chunk_copy_size: u64,

    /// Concurrent chunk uploads after chunk 0.
    pub workers: usize,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Retries after the first attempt for idempotent requests.
    pub retries: u32,

    /// Base backoff delay in seconds.
    pub backoff_factor: f64,

    /// Demote retry warnings to debug level.
    pub mute: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_copy_size: DEFAULT_CHUNK_COPY_SIZE as u64,
            workers: DEFAULT_WORKERS,
            timeout_secs: 10,
            retries: DEFAULT_RETRIES,
            backoff_factor: 0.2,
            mute: false,
        }
    }
}

/// Where the hosting service lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Home page advertising the current upload server.
    pub home_url: String,

    /// Domain download pages live under (may include a port).
    pub domain: String,

    /// Scheme used to reach the upload server.
    pub upload_scheme: String,

    /// Retention hint sent with every chunk, in days.
    pub lifetime_days: u32,

    /// Static host to address overrides applied to the HTTP client.
    pub resolve: BTreeMap<String, SocketAddr>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            home_url: DEFAULT_HOME_URL.into(),
            domain: DEFAULT_DOMAIN.into(),
            upload_scheme: DEFAULT_UPLOAD_SCHEME.into(),
            lifetime_days: DEFAULT_LIFETIME_DAYS,
            resolve: BTreeMap::new(),
        }
    }
}

/// Download layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Store each page's files under `{dest}/{page id}/`.
    pub per_page_subdir: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            per_page_subdir: true,
        }
    }
}

/// Batch runs of several uploads or downloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Units (pages or files) processed at once.
    pub max_parallel: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_parallel: 1 }
    }
}

/// Post-download archive extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub extract: bool,
    pub command: String,
    pub timeout_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            extract: false,
            command: DEFAULT_EXTRACT_COMMAND.into(),
            timeout_secs: 30,
        }
    }
}

impl ArchiveConfig {
    /// The configured extractor, if extraction is enabled.
    pub fn extractor(&self) -> Option<ArchiveExtractor> {
        self.extract.then(|| {
            ArchiveExtractor::new(&self.command, Duration::from_secs(self.timeout_secs))
        })
    }
}

impl EngineConfig {
    /// Loads configuration from the default path, creating it if not found.
    pub fn load() -> Result<Self, EngineError> {
        let path = default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Self::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Loads configuration from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.transfer_spec(TransferSource::RemotePage(String::new()))
            .map(|_| ())?;
        if self.batch.max_parallel == 0 {
            return Err(EngineError::Config("batch.max_parallel must be >= 1".into()));
        }
        if !matches!(self.service.upload_scheme.as_str(), "http" | "https") {
            return Err(EngineError::Config(format!(
                "unsupported upload scheme: {}",
                self.service.upload_scheme
            )));
        }
        Ok(())
    }

    /// Builds a validated [`TransferSpec`] for `source` from the defaults.
    pub fn transfer_spec(&self, source: TransferSource) -> Result<TransferSpec, EngineError> {
        let t = &self.transfer;
        let copy_size = usize::try_from(t.chunk_copy_size)
            .map_err(|_| EngineError::Config("chunk_copy_size too large".into()))?;
        let backoff = Duration::try_from_secs_f64(t.backoff_factor)
            .map_err(|e| EngineError::Config(format!("backoff_factor: {e}")))?;

        let spec = match source {
            TransferSource::LocalFile(path) => TransferSpec::upload(path),
            TransferSource::RemotePage(url) => TransferSpec::download(url),
        }
        .with_chunk_size(t.chunk_size)
        .with_chunk_copy_size(copy_size)
        .with_workers(t.workers)
        .with_timeout(Duration::from_secs(t.timeout_secs))
        .with_retries(t.retries, backoff)
        .muted(t.mute);

        spec.validate()?;
        Ok(spec)
    }

    /// Spec for uploading the file at `path`.
    pub fn upload_spec(&self, path: impl Into<PathBuf>) -> Result<TransferSpec, EngineError> {
        self.transfer_spec(TransferSource::LocalFile(path.into()))
    }

    /// Spec for downloading the page at `url`, optionally unlocked by `key`.
    pub fn download_spec(
        &self,
        url: impl Into<String>,
        key: Option<&str>,
    ) -> Result<TransferSpec, EngineError> {
        let spec = self.transfer_spec(TransferSource::RemotePage(url.into()))?;
        Ok(match key {
            Some(key) => spec.with_key(key),
            None => spec,
        })
    }
}

/// Returns the platform-specific configuration file path.
pub fn default_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
                PathBuf::from(home).join(".config")
            });
        base.join("gfm").join("engine.toml")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("gfm").join("engine.toml")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config").join("gfm").join("engine.toml")
    }
}
