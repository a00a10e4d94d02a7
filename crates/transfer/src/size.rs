//! Human-readable byte sizes with base-1024 units.
//!
//! `parse_size("10M") == 10 * 1024 * 1024` and
//! `format_size(10 * 1024 * 1024) == "10.00 MB"`.

use serde::{Deserialize, Deserializer};

/// Unit prefixes in ascending powers of 1024.
const PREFIXES: [char; 8] = ['K', 'M', 'G', 'T', 'P', 'E', 'Z', 'Y'];

/// Display units for [`format_size`].
const UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Error returned for a size string that does not match `<digits>[ ][unit][iB|B]`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed size string: {input:?}")]
pub struct SizeFormatError {
    pub input: String,
}

impl SizeFormatError {
    fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
        }
    }
}

/// Parses a size such as `"512"`, `"10M"`, `"1 GiB"` or `"4kb"` into bytes.
///
/// Units are case-insensitive and may carry an `iB`/`B` suffix. Values that
/// do not fit in a `u64` are rejected.
pub fn parse_size(input: &str) -> Result<u64, SizeFormatError> {
    let s = input.trim();
    let digits_end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    if digits_end == 0 {
        return Err(SizeFormatError::new(input));
    }
    let number: u64 = s[..digits_end]
        .parse()
        .map_err(|_| SizeFormatError::new(input))?;

    let mut rest = &s[digits_end..];
    rest = rest.strip_prefix(' ').unwrap_or(rest);

    let mut exponent = 0u32;
    if let Some(first) = rest.chars().next()
        && let Some(idx) = PREFIXES
            .iter()
            .position(|p| p.eq_ignore_ascii_case(&first))
    {
        exponent = idx as u32 + 1;
        rest = &rest[first.len_utf8()..];
    }

    if !(rest.is_empty() || rest.eq_ignore_ascii_case("b") || rest.eq_ignore_ascii_case("ib")) {
        return Err(SizeFormatError::new(input));
    }

    1024u64
        .checked_pow(exponent)
        .and_then(|scale| number.checked_mul(scale))
        .ok_or_else(|| SizeFormatError::new(input))
}

/// Formats `bytes` with the largest unit whose scaled value is at least 1.
///
/// Always two decimals (`"1.50 KB"`), except zero which is `"0B"`.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0B".to_string();
    }
    // floor(log1024(bytes)) from the position of the highest set bit.
    let idx = ((63 - bytes.leading_zeros()) / 10) as usize;
    let scaled = bytes as f64 / 1024f64.powi(idx as i32);
    format!("{scaled:.2} {}", UNITS[idx])
}

/// A size given either as a plain integer or as a size string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SizeValue {
    Bytes(u64),
    Text(String),
}

impl SizeValue {
    /// Resolves to a byte count.
    pub fn to_bytes(&self) -> Result<u64, SizeFormatError> {
        match self {
            SizeValue::Bytes(n) => Ok(*n),
            SizeValue::Text(s) => parse_size(s),
        }
    }
}

/// Serde helper: accepts `10485760` as well as `"10M"`.
pub fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    SizeValue::deserialize(deserializer)?
        .to_bytes()
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_bytes() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("512B").unwrap(), 512);
    }

    #[test]
    fn parses_units() {
        assert_eq!(parse_size("10M").unwrap(), 10_485_760);
        assert_eq!(parse_size("1 GiB").unwrap(), 1_073_741_824);
        assert_eq!(parse_size("4kb").unwrap(), 4096);
        assert_eq!(parse_size("2 t").unwrap(), 2 * 1024u64.pow(4));
        assert_eq!(parse_size("3MiB").unwrap(), 3 * 1024 * 1024);
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "M", "1.5GB", "10 MX", "10  M", "-1", "ten", "10Q", "10MBB"] {
            assert!(parse_size(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse_size("1Z").is_err());
        assert!(parse_size("16E").is_err());
        assert_eq!(parse_size("15E").unwrap(), 15 * 1024u64.pow(6));
    }

    #[test]
    fn formats_unit_boundaries() {
        assert_eq!(format_size(0), "0B");
        assert_eq!(format_size(1), "1.00 B");
        assert_eq!(format_size(1023), "1023.00 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(10_485_760), "10.00 MB");
        assert_eq!(format_size(1024u64.pow(3)), "1.00 GB");
        assert_eq!(format_size(u64::MAX), "16.00 EB");
    }

    #[test]
    fn format_of_parse_is_canonical() {
        let cases = [
            ("1023", "1023.00 B"),
            ("1K", "1.00 KB"),
            ("10M", "10.00 MB"),
            ("10 MiB", "10.00 MB"),
            ("1 GiB", "1.00 GB"),
            ("3t", "3.00 TB"),
            ("1P", "1.00 PB"),
            ("2E", "2.00 EB"),
        ];
        for (input, canonical) in cases {
            assert_eq!(format_size(parse_size(input).unwrap()), canonical, "{input}");
        }
    }

    #[test]
    fn size_value_deserializes_both_forms() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(deserialize_with = "deserialize_size")]
            size: u64,
        }
        let a: Holder = serde_json::from_str(r#"{"size":2048}"#).unwrap();
        let b: Holder = serde_json::from_str(r#"{"size":"2K"}"#).unwrap();
        assert_eq!(a.size, 2048);
        assert_eq!(b.size, 2048);
        assert!(serde_json::from_str::<Holder>(r#"{"size":"2Q"}"#).is_err());
    }
}
