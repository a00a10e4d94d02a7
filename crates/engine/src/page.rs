//! Landing page scraper.
//!
//! A landing page either describes one file or, for bundles, lists several
//! file panels. Markup that matches neither shape is a parse error: the
//! service changed its pages and guessing would download the wrong thing.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use gfm_protocol::PageLocator;

use crate::error::EngineError;
use crate::http::HttpSession;

/// One file listed on a landing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileDescriptor {
    /// Name as shown on the page, not yet sanitized.
    pub name: String,
    /// Human-readable size as shown on the page.
    pub size: String,
    /// Opaque identifier for the download endpoint.
    pub file_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLayout {
    Single,
    Bundle,
}

/// Everything the scraper learned about one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageListing {
    pub locator: PageLocator,
    pub layout: PageLayout,
    /// Files in page order; never empty.
    pub files: Vec<RemoteFileDescriptor>,
}

const BUNDLE_CONTAINER: &str = "#contents_matomete";
const BUNDLE_ENTRY: &str = ".matomete_file";
const BUNDLE_NAME: &str = ".matomete_file_info > span:nth-child(2)";
const BUNDLE_SIZE: &str = ".matomete_file_info > span:nth-child(3)";
const BUNDLE_BUTTON: &str = ".download_panel_btn_dl";
const SINGLE_SIZE: &str = ".dl_size";
const SINGLE_NAME: &str = "#dl";

/// `download(<n>, '<file id>')` in the panel's click handler.
const FILE_ID_PATTERN: &str = r"download\(\d+, *'(.+?)'";
/// Size in full-width or ASCII parentheses.
const SIZE_PATTERN: &str = r"[（(](.+?)[）)]";

/// Fetches the landing page (which also sets the session cookies) and lists its files.
pub async fn scrape(
    http: &HttpSession,
    locator: &PageLocator,
) -> Result<PageListing, EngineError> {
    let html = http.get_text(locator.page_url(), "landing page").await?;
    let listing = parse_listing(&html, locator)?;
    debug!(
        url = locator.page_url(),
        layout = ?listing.layout,
        files = listing.files.len(),
        "landing page scraped"
    );
    Ok(listing)
}

/// Parses landing page markup.
pub fn parse_listing(html: &str, locator: &PageLocator) -> Result<PageListing, EngineError> {
    let parser = PageParser::new(locator.page_url())?;
    let doc = Html::parse_document(html);

    let (layout, files) = if doc.select(&parser.selectors.container).next().is_some() {
        (PageLayout::Bundle, parser.bundle_files(&doc)?)
    } else {
        (
            PageLayout::Single,
            vec![parser.single_file(&doc, locator.page_id())?],
        )
    };

    Ok(PageListing {
        locator: locator.clone(),
        layout,
        files,
    })
}

struct Selectors {
    container: Selector,
    entry: Selector,
    bundle_name: Selector,
    bundle_size: Selector,
    bundle_button: Selector,
    single_size: Selector,
    single_name: Selector,
}

struct PageParser<'a> {
    url: &'a str,
    selectors: Selectors,
    file_id: Regex,
    size: Regex,
}

impl<'a> PageParser<'a> {
    fn new(url: &'a str) -> Result<Self, EngineError> {
        let sel = |css: &str| {
            Selector::parse(css)
                .map_err(|e| EngineError::Internal(format!("selector {css}: {e}")))
        };
        let re = |pattern: &str| {
            Regex::new(pattern).map_err(|e| EngineError::Internal(format!("pattern {pattern}: {e}")))
        };
        Ok(Self {
            url,
            selectors: Selectors {
                container: sel(BUNDLE_CONTAINER)?,
                entry: sel(BUNDLE_ENTRY)?,
                bundle_name: sel(BUNDLE_NAME)?,
                bundle_size: sel(BUNDLE_SIZE)?,
                bundle_button: sel(BUNDLE_BUTTON)?,
                single_size: sel(SINGLE_SIZE)?,
                single_name: sel(SINGLE_NAME)?,
            },
            file_id: re(FILE_ID_PATTERN)?,
            size: re(SIZE_PATTERN)?,
        })
    }

    fn parse_error(&self, reason: impl Into<String>) -> EngineError {
        EngineError::Parse {
            url: self.url.to_string(),
            reason: reason.into(),
        }
    }

    fn text_of(&self, scope: ElementRef<'_>, selector: &Selector, what: &str) -> Result<String, EngineError> {
        scope
            .select(selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .ok_or_else(|| self.parse_error(format!("missing {what}")))
    }

    fn bundle_files(&self, doc: &Html) -> Result<Vec<RemoteFileDescriptor>, EngineError> {
        let mut files = Vec::new();
        for (idx, entry) in doc.select(&self.selectors.entry).enumerate() {
            let position = idx + 1;
            let name = self.text_of(entry, &self.selectors.bundle_name, &format!("name of entry {position}"))?;

            let size_text = self.text_of(entry, &self.selectors.bundle_size, &format!("size of entry {position}"))?;
            let size = self
                .size
                .captures(&size_text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .ok_or_else(|| self.parse_error(format!("unreadable size {size_text:?} of entry {position}")))?;

            let onclick = entry
                .select(&self.selectors.bundle_button)
                .next()
                .and_then(|b| b.value().attr("onclick"))
                .ok_or_else(|| self.parse_error(format!("missing download button of entry {position}")))?;
            let file_id = self
                .file_id
                .captures(onclick)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| self.parse_error(format!("no file id in handler of entry {position}")))?;

            files.push(RemoteFileDescriptor { name, size, file_id });
        }

        if files.is_empty() {
            return Err(self.parse_error("bundle page lists no files"));
        }
        Ok(files)
    }

    fn single_file(&self, doc: &Html, page_id: &str) -> Result<RemoteFileDescriptor, EngineError> {
        let root = doc.root_element();
        Ok(RemoteFileDescriptor {
            name: self.text_of(root, &self.selectors.single_name, "file name")?,
            size: self.text_of(root, &self.selectors.single_size, "file size")?,
            file_id: page_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockResponse, MockServer, bundle_page, single_page};

    const DOMAIN: &str = "gigafile.nu";

    fn locator() -> PageLocator {
        PageLocator::parse("https://46.gigafile.nu/0101-abcdef", DOMAIN).unwrap()
    }

    #[test]
    fn single_file_page() {
        let listing = parse_listing(&single_page("report 2024.pdf", "1.25 MB"), &locator()).unwrap();
        assert_eq!(listing.layout, PageLayout::Single);
        assert_eq!(
            listing.files,
            vec![RemoteFileDescriptor {
                name: "report 2024.pdf".into(),
                size: "1.25 MB".into(),
                file_id: "0101-abcdef".into(),
            }]
        );
    }

    #[test]
    fn bundle_page_in_order() {
        let html = bundle_page(&[
            ("a/b.txt", "10 KB", "0101-aaa"),
            ("photo.jpg", "2.5 MB", "0101-bbb"),
        ]);
        let listing = parse_listing(&html, &locator()).unwrap();
        assert_eq!(listing.layout, PageLayout::Bundle);
        assert_eq!(listing.files.len(), 2);
        assert_eq!(listing.files[0].name, "a/b.txt");
        assert_eq!(listing.files[0].size, "10 KB");
        assert_eq!(listing.files[0].file_id, "0101-aaa");
        assert_eq!(listing.files[1].file_id, "0101-bbb");
    }

    #[test]
    fn ascii_parentheses_size() {
        let html = bundle_page(&[("a.bin", "1 MB", "x")]).replace("（1 MB）", "(1 MB)");
        let listing = parse_listing(&html, &locator()).unwrap();
        assert_eq!(listing.files[0].size, "1 MB");
    }

    #[test]
    fn empty_bundle_is_parse_error() {
        let err = parse_listing(&bundle_page(&[]), &locator()).unwrap_err();
        assert!(matches!(err, EngineError::Parse { .. }));
        assert!(err.to_string().contains("0101-abcdef"));
    }

    #[test]
    fn bundle_entry_without_handler_is_parse_error() {
        let html = bundle_page(&[("a.bin", "1 MB", "x")]).replace("onclick=", "data-x=");
        let err = parse_listing(&html, &locator()).unwrap_err();
        assert!(err.to_string().contains("download button"));
    }

    #[test]
    fn unrecognised_page_is_parse_error() {
        let err = parse_listing("<html><body>maintenance</body></html>", &locator()).unwrap_err();
        match err {
            EngineError::Parse { url, reason } => {
                assert_eq!(url, "https://46.gigafile.nu/0101-abcdef");
                assert!(reason.contains("file name"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scrape_fetches_page() {
        let server = MockServer::start(|_| MockResponse::html(single_page("a.bin", "3 KB"))).await;
        let service = crate::config::ServiceConfig {
            domain: format!("gigafile.test:{}", server.port()),
            resolve: [("7.gigafile.test".to_string(), server.addr())].into(),
            ..Default::default()
        };
        let http = HttpSession::new(&gfm_transfer::TransferSpec::download("x"), &service).unwrap();
        let loc = PageLocator::parse(
            &format!("http://7.gigafile.test:{}/page-1", server.port()),
            &service.domain,
        )
        .unwrap();

        let listing = scrape(&http, &loc).await.unwrap();
        assert_eq!(listing.files[0].file_id, "page-1");
        assert_eq!(server.requests()[0].route(), "/page-1");
    }
}
