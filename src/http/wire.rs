//! Wire-level rendering of requests for the bot log.

use std::fmt::Write as _;

use super::multipart::{self, MultipartContent};
use super::options::HttpVersion;

/// Headers whose repeated values are joined with a comma.
const COMMA_HEADERS: &[&str] = &["Accept", "Accept-Encoding"];

/// Body of a request as it should appear in the log.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BodyView<'a> {
    None,
    Text {
        content_type: &'a str,
        text: &'a str,
    },
    Raw {
        content_type: &'a str,
        bytes: &'a [u8],
    },
    Multipart {
        boundary: &'a str,
        contents: &'a [MultipartContent],
    },
}

/// Everything needed to render one request.
pub(crate) struct WireRequest<'a> {
    pub method: &'a str,
    pub url: &'a url::Url,
    pub version: HttpVersion,
    pub headers: &'a [(String, String)],
    pub cookie_header: Option<&'a str>,
    pub body: BodyView<'a>,
}

impl WireRequest<'_> {
    /// Request line, headers (with a synthesized Host when absent), cookies
    /// and body.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let path = match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        };
        let _ = writeln!(out, "{} {path} HTTP/{}", self.method, self.version.as_str());

        let has_host = self
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("host"));
        if !has_host {
            let _ = writeln!(out, "Host: {}", self.url.host_str().unwrap_or_default());
        }

        for (name, values) in group_headers(self.headers) {
            let separator = if COMMA_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(&name)) {
                ", "
            } else {
                " "
            };
            let _ = writeln!(out, "{name}: {}", values.join(separator));
        }

        if let Some(cookies) = self.cookie_header.filter(|c| !c.is_empty()) {
            let _ = writeln!(out, "Cookie: {cookies}");
        }

        match self.body {
            BodyView::None => {}
            BodyView::Text { content_type, text } => {
                let _ = writeln!(out, "Content-Type: {content_type}");
                let _ = writeln!(out, "Content-Length: {}", text.len());
                out.push('\n');
                let _ = writeln!(out, "{text}");
            }
            BodyView::Raw {
                content_type,
                bytes,
            } => {
                let _ = writeln!(out, "Content-Type: {content_type}");
                let _ = writeln!(out, "Content-Length: {}", bytes.len());
                out.push('\n');
                let _ = writeln!(out, "{}", hex::encode_upper(bytes));
            }
            BodyView::Multipart { boundary, contents } => {
                let _ = writeln!(out, "Content-Type: {}", multipart::content_type(boundary));
                let _ = writeln!(out, "Content-Length: (not calculated)");
                out.push('\n');
                out.push_str(&multipart::render(boundary, contents));
            }
        }
        out
    }
}

/// Collapse repeated header names, keeping first-seen order.
fn group_headers(headers: &[(String, String)]) -> Vec<(String, Vec<&str>)> {
    let mut grouped: Vec<(String, Vec<&str>)> = Vec::new();
    for (name, value) in headers {
        match grouped
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, values)) => values.push(value),
            None => grouped.push((name.clone(), vec![value])),
        }
    }
    grouped
}

/// Resolve the escape sequences configuration producers write into string
/// bodies.
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> url::Url {
        url::Url::parse(s).unwrap()
    }

    #[test]
    fn synthesizes_host_and_renders_text_body() {
        let url = url("https://example.com/login?next=home");
        let headers = vec![("User-Agent".to_string(), "checker".to_string())];
        let rendered = WireRequest {
            method: "POST",
            url: &url,
            version: HttpVersion::Http11,
            headers: &headers,
            cookie_header: Some("sid=1; theme=dark"),
            body: BodyView::Text {
                content_type: "application/x-www-form-urlencoded",
                text: "user=a&pass=b",
            },
        }
        .render();

        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "POST /login?next=home HTTP/1.1");
        assert_eq!(lines[1], "Host: example.com");
        assert_eq!(lines[2], "User-Agent: checker");
        assert_eq!(lines[3], "Cookie: sid=1; theme=dark");
        assert!(rendered.contains("Content-Length: 13"));
        assert!(rendered.ends_with("\nuser=a&pass=b\n"));
    }

    #[test]
    fn keeps_explicit_host_and_joins_accept_values() {
        let url = url("http://10.0.0.1/");
        let headers = vec![
            ("Host".to_string(), "virtual.local".to_string()),
            ("Accept".to_string(), "text/html".to_string()),
            ("accept".to_string(), "application/json".to_string()),
        ];
        let rendered = WireRequest {
            method: "GET",
            url: &url,
            version: HttpVersion::Http10,
            headers: &headers,
            cookie_header: None,
            body: BodyView::None,
        }
        .render();

        assert!(rendered.starts_with("GET / HTTP/1.0\nHost: virtual.local\n"));
        assert!(rendered.contains("Accept: text/html, application/json\n"));
        assert!(!rendered.contains("Cookie:"));
    }

    #[test]
    fn raw_body_is_hex() {
        let url = url("http://h/");
        let rendered = WireRequest {
            method: "PUT",
            url: &url,
            version: HttpVersion::Http11,
            headers: &[],
            cookie_header: None,
            body: BodyView::Raw {
                content_type: "application/octet-stream",
                bytes: &[0xde, 0xad, 0x01],
            },
        }
        .render();
        assert!(rendered.contains("Content-Length: 3"));
        assert!(rendered.ends_with("DEAD01\n"));
    }

    #[test]
    fn multipart_body_uses_diagnostic_view() {
        let url = url("http://h/upload");
        let contents = vec![MultipartContent::text("field", "value")];
        let rendered = WireRequest {
            method: "POST",
            url: &url,
            version: HttpVersion::Http11,
            headers: &[],
            cookie_header: None,
            body: BodyView::Multipart {
                boundary: "BOUND",
                contents: &contents,
            },
        }
        .render();
        assert!(rendered.contains("Content-Type: multipart/form-data; boundary=\"BOUND\""));
        assert!(rendered.contains("Content-Length: (not calculated)"));
        assert!(rendered.contains("--BOUND\nContent-Disposition: form-data; name=\"field\""));
    }

    #[test]
    fn unescape_sequences() {
        assert_eq!(unescape(r#"a\nb\tc\\d\"e"#), "a\nb\tc\\d\"e");
        assert_eq!(unescape(r"keep\x"), r"keep\x");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }
}
