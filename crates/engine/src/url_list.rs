//! URL list files.
//!
//! One landing page per line, optionally followed by its password:
//!
//! ```text
//! # weekly dumps
//! https://46.gigafile.nu/0101-abcdef
//! https://12.gigafile.nu/0202-ghijkl  s3cret
//! ```

use gfm_protocol::PageLocator;

use crate::error::EngineError;

/// One non-comment line of a URL list.
#[derive(Debug)]
pub struct UrlListEntry {
    /// 1-based line number.
    pub line: usize,
    pub url: String,
    pub key: Option<String>,
    pub locator: Result<PageLocator, EngineError>,
}

/// Parses a URL list, validating every URL against `domain`.
///
/// Blank lines and lines starting with `#` are skipped. Invalid URLs are
/// kept with their error so the caller can report them by line.
pub fn parse_url_list(text: &str, domain: &str) -> Vec<UrlListEntry> {
    text.lines()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (url, key) = split_url_and_key(line);
            Some(UrlListEntry {
                line: idx + 1,
                locator: PageLocator::parse(&url, domain).map_err(EngineError::from),
                url,
                key,
            })
        })
        .collect()
}

/// Splits `"URL [PASSWORD]"` on the first run of whitespace.
pub fn split_url_and_key(input: &str) -> (String, Option<String>) {
    let input = input.trim();
    match input.split_once(char::is_whitespace) {
        Some((url, rest)) => {
            let key = rest.trim();
            (url.to_string(), (!key.is_empty()).then(|| key.to_string()))
        }
        None => (input.to_string(), None),
    }
}
