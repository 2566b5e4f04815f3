//! Captured responses.

use std::collections::BTreeMap;
use std::io::Read;

use flate2::read::GzDecoder;
use reqwest::header::HeaderMap;

/// Leading bytes of a gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// What a task learned from one request.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// Final absolute address after redirects.
    pub address: String,
    pub status: u16,
    /// One value per header name; the first one wins on duplicates.
    pub headers: BTreeMap<String, String>,
    /// Every cookie the task holds after the request.
    pub cookies: BTreeMap<String, String>,
    /// Cookies that were added or changed by this request.
    pub new_cookies: BTreeMap<String, String>,
    /// Body bytes, decompressed when they were gzip.
    pub raw: Vec<u8>,
    /// Body decoded as UTF-8 (lossy).
    pub source: String,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Flatten a header map, keeping the first value of repeated names and
/// defaulting Content-Length to the body size.
pub(crate) fn first_value_headers(map: &HeaderMap, body_len: usize) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for name in map.keys() {
        if let Some(value) = map.get(name) {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers.entry(name.as_str().to_string()).or_insert(value);
        }
    }
    if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-length")) {
        headers.insert("content-length".to_string(), body_len.to_string());
    }
    headers
}

/// Parse a `Cookie` header value (`a=1; b=2`).
pub(crate) fn parse_cookie_header(value: &str) -> BTreeMap<String, String> {
    value
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Entries of `after` that are new or differ from `before`.
pub(crate) fn cookie_diff(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    after
        .iter()
        .filter(|(name, value)| before.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

pub(crate) fn is_gzip(raw: &[u8]) -> bool {
    raw.len() > 1 && raw[..2] == GZIP_MAGIC
}

/// Decompress a gzip body.
pub(crate) fn gunzip(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(raw);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use reqwest::header::{HeaderValue, SET_COOKIE};

    use super::*;

    #[test]
    fn first_header_value_wins() {
        let mut map = HeaderMap::new();
        map.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        map.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        map.insert("x-trace", HeaderValue::from_static("abc"));

        let headers = first_value_headers(&map, 42);
        assert_eq!(headers.get("set-cookie").map(String::as_str), Some("a=1"));
        assert_eq!(headers.get("content-length").map(String::as_str), Some("42"));
    }

    #[test]
    fn explicit_content_length_is_kept() {
        let mut map = HeaderMap::new();
        map.insert("content-length", HeaderValue::from_static("7"));
        let headers = first_value_headers(&map, 99);
        assert_eq!(headers.get("content-length").map(String::as_str), Some("7"));
    }

    #[test]
    fn cookie_header_parsing_and_diff() {
        let before = parse_cookie_header("sid=old; lang=en");
        let after = parse_cookie_header("sid=new; lang=en; token=t");
        let diff = cookie_diff(&before, &after);
        assert_eq!(diff.len(), 2);
        assert_eq!(diff.get("sid").map(String::as_str), Some("new"));
        assert_eq!(diff.get("token").map(String::as_str), Some("t"));
    }

    #[test]
    fn gunzip_round_trip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello gzip").unwrap();
        let compressed = encoder.finish().unwrap();

        assert!(is_gzip(&compressed));
        assert_eq!(gunzip(&compressed).unwrap(), b"hello gzip");
    }

    #[test]
    fn corrupted_gzip_errors() {
        let corrupted = [0x1F, 0x8B, 0x00, 0x01, 0x02];
        assert!(is_gzip(&corrupted));
        assert!(gunzip(&corrupted).is_err());
        assert!(!is_gzip(&[0x1F]));
    }

    #[test]
    fn header_lookup_ignores_case() {
        let response = HttpResponse {
            headers: BTreeMap::from([("content-type".to_string(), "text/html".to_string())]),
            ..HttpResponse::default()
        };
        assert_eq!(response.header("Content-Type"), Some("text/html"));
    }
}
