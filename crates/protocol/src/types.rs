use serde::{Deserialize, Deserializer, Serialize};

/// Acknowledgement returned by the upload server for one chunk.
///
/// The server answers every chunk with a small JSON object. A falsy
/// `status` means the chunk was stored; anything else is a rejection.
/// The final chunk's acknowledgement also carries the public `url`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkResponse {
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Remaining session metadata, kept verbatim for the caller.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Distinguishes `"status": null` (present) from a missing field.
fn present_value<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl ChunkResponse {
    /// Parses an acknowledgement body.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Returns `true` if the server stored the chunk.
    ///
    /// Requires `status` to be present and falsy.
    pub fn is_accepted(&self) -> bool {
        self.status.as_ref().is_some_and(|s| !is_truthy(s))
    }

    /// Public download page, present on the acknowledgement that closes the upload.
    pub fn download_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Full acknowledgement as a JSON value (for reporting).
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_status_is_accepted() {
        let resp = ChunkResponse::from_slice(br#"{"status":0}"#).unwrap();
        assert!(resp.is_accepted());
        assert!(resp.download_url().is_none());
    }

    #[test]
    fn final_ack_carries_url_and_metadata() {
        let body = br#"{"status":0,"url":"https://46.gigafile.nu/abc-123","filename":"a.bin"}"#;
        let resp = ChunkResponse::from_slice(body).unwrap();
        assert!(resp.is_accepted());
        assert_eq!(resp.download_url(), Some("https://46.gigafile.nu/abc-123"));
        assert_eq!(resp.extra["filename"], "a.bin");
    }

    #[test]
    fn non_zero_status_is_rejected() {
        assert!(!ChunkResponse::from_slice(br#"{"status":1}"#).unwrap().is_accepted());
        assert!(!ChunkResponse::from_slice(br#"{"status":"error"}"#).unwrap().is_accepted());
        assert!(!ChunkResponse::from_slice(br#"{"status":true}"#).unwrap().is_accepted());
    }

    #[test]
    fn missing_status_is_rejected() {
        let resp = ChunkResponse::from_slice(br#"{"url":"x"}"#).unwrap();
        assert!(resp.status.is_none());
        assert!(!resp.is_accepted());
    }

    #[test]
    fn null_and_empty_status_are_accepted() {
        let null = ChunkResponse::from_slice(br#"{"status":null}"#).unwrap();
        assert_eq!(null.status, Some(serde_json::Value::Null));
        assert!(null.is_accepted());
        assert!(ChunkResponse::from_slice(br#"{"status":""}"#).unwrap().is_accepted());
        assert!(ChunkResponse::from_slice(br#"{"status":false}"#).unwrap().is_accepted());
    }

    #[test]
    fn garbage_body_fails_to_parse() {
        assert!(ChunkResponse::from_slice(b"<html>busy</html>").is_err());
    }

    #[test]
    fn to_value_keeps_extra_fields() {
        let resp = ChunkResponse::from_slice(br#"{"status":0,"url":"u","size":10}"#).unwrap();
        let v = resp.to_value();
        assert_eq!(v["url"], "u");
        assert_eq!(v["size"], 10);
    }
}
