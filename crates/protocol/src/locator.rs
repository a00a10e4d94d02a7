//! Download page locators.
//!
//! A landing page URL has the shape `http(s)://<digits>.<domain>/<id>`
//! where `<id>` is lowercase alphanumerics and hyphens. Anything else is
//! rejected before any network call is made.

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use crate::ProtocolError;
use crate::constants::{DOWNLOAD_FILE_PARAM, DOWNLOAD_KEY_PARAM, DOWNLOAD_PATH};

/// A validated landing page URL split into its useful parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageLocator {
    page_url: String,
    base_url: String,
    page_id: String,
}

impl PageLocator {
    /// Validates `url` against the service `domain` and splits it.
    pub fn parse(url: &str, domain: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidUrl(url.to_string());

        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .ok_or_else(invalid)?;
        let (host, page_id) = rest.split_once('/').ok_or_else(invalid)?;

        let subdomain = host
            .strip_suffix(domain)
            .and_then(|h| h.strip_suffix('.'))
            .ok_or_else(invalid)?;
        if subdomain.is_empty() || !subdomain.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        if !is_page_id(page_id) {
            return Err(invalid());
        }

        let base_len = url.len() - page_id.len() - 1;
        Ok(Self {
            page_url: url.to_string(),
            base_url: url[..base_len].to_string(),
            page_id: page_id.to_string(),
        })
    }

    /// Full landing page URL.
    pub fn page_url(&self) -> &str {
        &self.page_url
    }

    /// Scheme and host, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Path segment identifying the page (and the file, for single-file pages).
    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    /// Builds the direct download URL for `file_id`, unlocking it with `key` if given.
    pub fn download_url(&self, file_id: &str, key: Option<&str>) -> String {
        let mut url = format!(
            "{}/{DOWNLOAD_PATH}?{DOWNLOAD_FILE_PARAM}={file_id}",
            self.base_url
        );
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            url.push('&');
            url.push_str(DOWNLOAD_KEY_PARAM);
            url.push('=');
            url.extend(utf8_percent_encode(key, NON_ALPHANUMERIC));
        }
        url
    }
}

/// Returns `true` if `url` is a landing page URL of the service at `domain`.
pub fn is_valid_page_url(url: &str, domain: &str) -> bool {
    PageLocator::parse(url, domain).is_ok()
}

fn is_page_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "gigafile.nu";

    #[test]
    fn parses_valid_page() {
        let loc = PageLocator::parse("https://46.gigafile.nu/0123-abcdef", DOMAIN).unwrap();
        assert_eq!(loc.base_url(), "https://46.gigafile.nu");
        assert_eq!(loc.page_id(), "0123-abcdef");
        assert_eq!(loc.page_url(), "https://46.gigafile.nu/0123-abcdef");
    }

    #[test]
    fn accepts_plain_http() {
        assert!(is_valid_page_url("http://5.gigafile.nu/abc", DOMAIN));
    }

    #[test]
    fn rejects_malformed_urls() {
        for url in [
            "",
            "ftp://46.gigafile.nu/abc",
            "https://gigafile.nu/abc",
            "https://www.gigafile.nu/abc",
            "https://46.gigafile.nu/",
            "https://46.gigafile.nu",
            "https://46.gigafile.nu/ABC",
            "https://46.gigafile.nu/abc/def",
            "https://46.gigafile.nu/abc?x=1",
            "https://46.evil.example/abc",
            "https://46.xgigafile.nu/abc",
        ] {
            assert!(!is_valid_page_url(url, DOMAIN), "should reject {url:?}");
        }
    }

    #[test]
    fn invalid_url_error_names_the_locator() {
        let err = PageLocator::parse("https://example.com/x", DOMAIN).unwrap_err();
        assert!(err.to_string().contains("https://example.com/x"));
    }

    #[test]
    fn download_url_without_key() {
        let loc = PageLocator::parse("https://46.gigafile.nu/page-1", DOMAIN).unwrap();
        assert_eq!(
            loc.download_url("file-9", None),
            "https://46.gigafile.nu/download.php?file=file-9"
        );
        assert_eq!(
            loc.download_url("file-9", Some("")),
            "https://46.gigafile.nu/download.php?file=file-9"
        );
    }

    #[test]
    fn download_url_with_encoded_key() {
        let loc = PageLocator::parse("https://46.gigafile.nu/page-1", DOMAIN).unwrap();
        assert_eq!(
            loc.download_url("f", Some("pass")),
            "https://46.gigafile.nu/download.php?file=f&dlkey=pass"
        );
        assert_eq!(
            loc.download_url("f", Some("a&b c")),
            "https://46.gigafile.nu/download.php?file=f&dlkey=a%26b%20c"
        );
    }

    #[test]
    fn custom_domain_with_port() {
        let loc = PageLocator::parse("http://7.gigafile.test:8080/abc", "gigafile.test:8080").unwrap();
        assert_eq!(loc.base_url(), "http://7.gigafile.test:8080");
        assert!(!is_valid_page_url("http://7.gigafile.test:8080/abc", DOMAIN));
    }
}
