//! Upload server discovery.
//!
//! The home page assigns uploads to one of several storage hosts through an
//! inline script variable (`var server = "46.gigafile.nu";`).

use crate::constants::SERVER_VAR_MARKER;

/// Extracts the advertised upload server host from the home page markup.
pub fn extract_upload_server(html: &str) -> Option<&str> {
    let start = html.find(SERVER_VAR_MARKER)? + SERVER_VAR_MARKER.len();
    let rest = &html[start..];
    let end = rest.find('"')?;
    let host = rest[..end].trim();
    (!host.is_empty()).then_some(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_server_in_script() {
        let html = r#"<html><script>
            var lang = "ja";
            var server = "46.gigafile.nu";
        </script></html>"#;
        assert_eq!(extract_upload_server(html), Some("46.gigafile.nu"));
    }

    #[test]
    fn first_assignment_wins() {
        let html = r#"var server = "a.example"; var server = "b.example";"#;
        assert_eq!(extract_upload_server(html), Some("a.example"));
    }

    #[test]
    fn missing_or_empty_server() {
        assert_eq!(extract_upload_server("<html></html>"), None);
        assert_eq!(extract_upload_server(r#"var server = "";"#), None);
        assert_eq!(extract_upload_server(r#"var server = "unterminated"#), None);
    }
}
