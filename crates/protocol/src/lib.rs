//! Wire-level knowledge of the file-hosting service.
//!
//! Endpoint names, multipart field names, the chunk acknowledgement format,
//! landing page URL rules and upload server discovery. Nothing in this crate
//! performs I/O.

pub mod constants;
pub mod discovery;
pub mod locator;
pub mod types;

pub use discovery::extract_upload_server;
pub use locator::{PageLocator, is_valid_page_url};
pub use types::ChunkResponse;

/// Errors produced by the protocol crate.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}
