//! Upload and download engines for the file-hosting service.
//!
//! This crate implements the **transfer logic** only. It never prints and
//! never installs a tracing subscriber; GUI and CLI shells drive it through
//! the engines, the batch orchestrator and the progress callbacks.
//!
//! # Upload
//!
//! 1. **Discover**: read the upload server from the home page
//! 2. **Chunk 0**: send the first chunk alone to pin host and cookies
//! 3. **Stream**: send the remaining chunks, sequentially or in a pool
//! 4. **Finish**: report the download page URL from the last acknowledgement
//!
//! # Download
//!
//! 1. **Scrape**: read the landing page, single file or bundle
//! 2. **Stream**: write each file to `{name}.dl`
//! 3. **Verify**: rename only if the size matches Content-Length
//! 4. **Extract**: optionally unpack archives

pub mod archive;
pub mod batch;
pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod page;
pub mod registry;
pub mod upload;
pub mod url_list;

#[cfg(test)]
mod test_support;

// Re-export primary types for convenience.
pub use archive::{ArchiveExtractor, DEFAULT_EXTRACT_COMMAND, ExtractionOutcome};
pub use batch::{DownloadReport, TransferEvent, TransferOrchestrator, UploadReport};
pub use config::{
    ArchiveConfig, BatchConfig, DownloadConfig, EngineConfig, ServiceConfig, TransferConfig,
    default_path,
};
pub use download::{DownloadResult, Downloader};
pub use error::EngineError;
pub use http::{HttpSession, RetryPolicy};
pub use page::{PageLayout, PageListing, RemoteFileDescriptor, parse_listing, scrape};
pub use registry::{TransferHandle, TransferInfo, TransferKind, TransferRegistry};
pub use upload::{Streaming, UploadInit, UploadOutcome, UploadStrategy, Uploader};
pub use url_list::{UrlListEntry, parse_url_list, split_url_and_key};
