//! Multipart bodies: the encoded wire form and the diagnostic view.
//!
//! The body is encoded here rather than by the client so a caller-supplied
//! boundary is honored byte for byte.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::error::HttpError;

/// Literal tag in front of generated boundaries.
pub const BOUNDARY_PREFIX: &str = "------WebKitFormBoundary";

/// Shown in place of file bytes in request logs.
pub const FILE_PLACEHOLDER: &str = "[FILE CONTENTS NOT LOGGED]";

/// One part of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartContent {
    Text {
        name: String,
        data: String,
        content_type: String,
    },
    Raw {
        name: String,
        data: Vec<u8>,
        content_type: String,
    },
    File {
        name: String,
        path: PathBuf,
        content_type: String,
    },
}

impl MultipartContent {
    pub fn text(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Text {
            name: name.into(),
            data: data.into(),
            content_type: "text/plain".to_string(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::Raw { name, .. } | Self::File { name, .. } => name,
        }
    }

    fn content_type(&self) -> &str {
        match self {
            Self::Text { content_type, .. }
            | Self::Raw { content_type, .. }
            | Self::File { content_type, .. } => content_type,
        }
    }

    fn disposition(&self) -> String {
        match self {
            Self::Text { name, .. } | Self::Raw { name, .. } => {
                format!("Content-Disposition: form-data; name=\"{name}\"")
            }
            Self::File { name, path, .. } => format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{}\"",
                file_name(path)
            ),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Sixteen random lowercase letters behind [`BOUNDARY_PREFIX`].
pub fn generate_boundary() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..16).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
    format!("{BOUNDARY_PREFIX}{suffix}")
}

/// `Content-Type` header value for a form with this boundary.
pub fn content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary=\"{boundary}\"")
}

/// Encode the parts as they go on the wire. File parts are read here.
pub async fn encode(boundary: &str, contents: &[MultipartContent]) -> Result<Vec<u8>, HttpError> {
    let mut body = Vec::new();
    for content in contents {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(content.disposition().as_bytes());
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content.content_type()).as_bytes());
        match content {
            MultipartContent::Text { data, .. } => body.extend_from_slice(data.as_bytes()),
            MultipartContent::Raw { data, .. } => body.extend_from_slice(data),
            MultipartContent::File { path, .. } => {
                let bytes = tokio::fs::read(path).await?;
                body.extend_from_slice(&bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    Ok(body)
}

/// Human-readable view of the form for request logs. File contents are
/// replaced with [`FILE_PLACEHOLDER`].
pub fn render(boundary: &str, contents: &[MultipartContent]) -> String {
    let mut out = String::new();
    for content in contents {
        let _ = writeln!(out, "--{boundary}");
        let _ = writeln!(out, "{}", content.disposition());
        let _ = writeln!(out, "Content-Type: {}", content.content_type());
        out.push('\n');
        match content {
            MultipartContent::Text { data, .. } => {
                let _ = writeln!(out, "{data}");
            }
            MultipartContent::Raw { data, .. } => {
                let _ = writeln!(out, "{}", String::from_utf8_lossy(data));
            }
            MultipartContent::File { .. } => {
                let _ = writeln!(out, "{FILE_PLACEHOLDER}");
            }
        }
    }
    let _ = writeln!(out, "--{boundary}--");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts() -> Vec<MultipartContent> {
        vec![
            MultipartContent::text("user", "alice"),
            MultipartContent::Raw {
                name: "blob".into(),
                data: b"\x00raw".to_vec(),
                content_type: "application/octet-stream".into(),
            },
        ]
    }

    #[test]
    fn generated_boundary_shape() {
        for _ in 0..50 {
            let boundary = generate_boundary();
            let suffix = boundary.strip_prefix(BOUNDARY_PREFIX).unwrap();
            assert_eq!(suffix.len(), 16);
            assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn generated_boundary_avoids_part_content() {
        let content = format!("{BOUNDARY_PREFIX} appears literally in this part");
        let boundary = generate_boundary();
        assert!(!content.contains(&boundary));
    }

    #[tokio::test]
    async fn encodes_with_supplied_boundary() {
        let body = encode("XYZ", &parts()).await.unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--XYZ\r\nContent-Disposition: form-data; name=\"user\"\r\n"));
        assert!(text.contains("\r\n\r\nalice\r\n--XYZ\r\n"));
        assert!(text.ends_with("--XYZ--\r\n"));
    }

    #[tokio::test]
    async fn file_part_is_read_for_the_wire_but_not_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.bin");
        std::fs::write(&path, b"TOP-SECRET-BYTES").unwrap();
        let contents = vec![MultipartContent::File {
            name: "upload".into(),
            path,
            content_type: "application/octet-stream".into(),
        }];

        let body = encode("B", &contents).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("TOP-SECRET-BYTES"));

        let view = render("B", &contents);
        assert!(view.contains("filename=\"secret.bin\""));
        assert!(view.contains(FILE_PLACEHOLDER));
        assert!(!view.contains("TOP-SECRET-BYTES"));
    }

    #[test]
    fn render_lists_every_part() {
        let view = render("B", &parts());
        assert_eq!(view.matches("--B\n").count(), 2);
        assert!(view.contains("alice"));
        assert!(view.trim_end().ends_with("--B--"));
    }
}
