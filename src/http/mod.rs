//! HTTP execution layer.
//!
//! One pipeline serves the four request shapes (standard, raw, basic-auth,
//! multipart). Clients are built per request so the proxy, TLS versions and
//! cipher suites of each request are honored.

pub mod cipher;
mod client;
pub mod multipart;
pub mod options;
pub mod proxy;
pub mod response;
pub mod wire;

pub use cipher::{CIPHER_CATALOG_VERSION, CipherSuiteName};
pub use multipart::MultipartContent;
pub use options::{
    HttpRequest, HttpSettings, HttpVersion, RequestOptions, RequestShape, RevocationMode,
    SecurityProtocol,
};
pub use proxy::{Proxy, ProxyCredentials, ProxyKind};
pub use response::HttpResponse;

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;

use crate::bot::{LogKind, TaskContext};
use crate::error::HttpError;
use wire::{BodyView, WireRequest};

/// Body prepared for sending. Multipart bodies are encoded inside the
/// exchange because reading file parts can fail.
enum PreparedBody<'a> {
    Empty,
    Text {
        content_type: &'a str,
        text: String,
    },
    Raw {
        content_type: &'a str,
        bytes: &'a [u8],
    },
    Multipart {
        boundary: String,
        contents: &'a [MultipartContent],
    },
}

impl PreparedBody<'_> {
    fn view(&self) -> BodyView<'_> {
        match self {
            Self::Empty => BodyView::None,
            Self::Text { content_type, text } => BodyView::Text { content_type, text },
            Self::Raw {
                content_type,
                bytes,
            } => BodyView::Raw {
                content_type,
                bytes,
            },
            Self::Multipart { boundary, contents } => BodyView::Multipart { boundary, contents },
        }
    }
}

/// Send `request` on behalf of the task in `ctx`.
///
/// The wire-level request is written to the bot log whether or not the send
/// succeeds. On success the captured response replaces `ctx.response` and
/// the task's cookies are updated.
pub async fn send(ctx: &mut TaskContext, request: &HttpRequest) -> Result<(), HttpError> {
    let options = &request.options;
    let url = match options.parsed_url() {
        Ok(url) => url,
        Err(e) => {
            ctx.log.log(LogKind::Error, format!("Invalid URL {}: {e}", options.url));
            return Err(e.into());
        }
    };
    let method = request.shape.method();

    let jar = Arc::new(Jar::default());
    let seeded = seed_cookies(&jar, &url, &ctx.cookies, &options.custom_cookies);

    let mut headers = options.headers.clone();
    let body = match &request.shape {
        RequestShape::Standard {
            content,
            content_type,
            always_send_content,
            ..
        } => {
            let text = wire::unescape(content);
            if !text.is_empty() || *always_send_content {
                PreparedBody::Text { content_type, text }
            } else {
                PreparedBody::Empty
            }
        }
        RequestShape::Raw {
            content,
            content_type,
            ..
        } => PreparedBody::Raw {
            content_type,
            bytes: content,
        },
        RequestShape::BasicAuth { username, password } => {
            let token = BASE64.encode(format!("{username}:{}", password.expose_secret()));
            headers.push(("Authorization".to_string(), format!("Basic {token}")));
            PreparedBody::Empty
        }
        RequestShape::Multipart {
            boundary, contents, ..
        } => PreparedBody::Multipart {
            boundary: boundary
                .clone()
                .filter(|b| !b.trim().is_empty())
                .unwrap_or_else(multipart::generate_boundary),
            contents,
        },
    };

    let cookie_header = jar
        .cookies(&url)
        .and_then(|v| v.to_str().ok().map(str::to_string));
    let rendered = WireRequest {
        method: method.as_str(),
        url: &url,
        version: options.http_version,
        headers: &headers,
        cookie_header: cookie_header.as_deref(),
        body: body.view(),
    }
    .render();

    let exchange = Exchange {
        request,
        url: &url,
        headers: &headers,
        settings: Arc::clone(ctx.http_settings()),
        proxy: ctx.proxy.clone(),
        cancel: ctx.cancellation().clone(),
        jar: Arc::clone(&jar),
    };
    let outcome = exchange.run(body).await;
    ctx.log.log(LogKind::Request, rendered);

    let (address, status, headers, raw) = match outcome {
        Ok(parts) => parts,
        Err(e) => {
            tracing::debug!(item = %ctx.item, url = %url, error = %e, "Request failed");
            ctx.log.log(LogKind::Error, format!("Request failed: {e}"));
            return Err(e);
        }
    };

    let final_url = url::Url::parse(&address).unwrap_or_else(|_| url.clone());
    let mut cookies = seeded.clone();
    if let Some(value) = jar.cookies(&final_url) {
        cookies.extend(response::parse_cookie_header(&String::from_utf8_lossy(
            value.as_bytes(),
        )));
    }
    let new_cookies = response::cookie_diff(&seeded, &cookies);

    let raw = if response::is_gzip(&raw) {
        match response::gunzip(&raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                ctx.log.warn(format!("Tried to unzip but failed: {e}"));
                raw
            }
        }
    } else {
        raw
    };
    let source = String::from_utf8_lossy(&raw).into_owned();

    log_response(ctx, &address, status, &headers, &cookies, &source);
    tracing::debug!(item = %ctx.item, address = %address, status, "Response received");

    ctx.cookies = cookies.clone();
    ctx.response = Some(HttpResponse {
        address,
        status,
        headers,
        cookies,
        new_cookies,
        raw,
        source,
    });
    Ok(())
}

/// Seed the jar with the task's cookies plus the request's custom cookies,
/// returning the combined map.
fn seed_cookies(
    jar: &Jar,
    url: &url::Url,
    task_cookies: &BTreeMap<String, String>,
    custom: &[(String, String)],
) -> BTreeMap<String, String> {
    let mut seeded = task_cookies.clone();
    seeded.extend(custom.iter().cloned());
    for (name, value) in &seeded {
        jar.add_cookie_str(&format!("{name}={value}"), url);
    }
    seeded
}

fn log_response(
    ctx: &mut TaskContext,
    address: &str,
    status: u16,
    headers: &BTreeMap<String, String>,
    cookies: &BTreeMap<String, String>,
    source: &str,
) {
    let log = &mut ctx.log;
    log.log(LogKind::Response, format!("Address: {address}"));
    log.log(LogKind::Response, format!("Response code: {status}"));
    log.log(LogKind::Response, "Received Headers:");
    for (name, value) in headers {
        log.log(LogKind::Response, format!("{name}: {value}"));
    }
    log.log(LogKind::Response, "Received Cookies:");
    for (name, value) in cookies {
        log.log(LogKind::Response, format!("{name}: {value}"));
    }
    log.log(LogKind::Response, "Received Payload:");
    log.log(LogKind::Response, source);
}

/// The network part of a send, run under the request deadline and the task's
/// cancellation signal.
struct Exchange<'a> {
    request: &'a HttpRequest,
    url: &'a url::Url,
    headers: &'a [(String, String)],
    settings: Arc<HttpSettings>,
    proxy: Option<Proxy>,
    cancel: CancellationToken,
    jar: Arc<Jar>,
}

type Captured = (String, u16, BTreeMap<String, String>, Vec<u8>);

impl Exchange<'_> {
    async fn run(self, body: PreparedBody<'_>) -> Result<Captured, HttpError> {
        let options = &self.request.options;
        let client = client::build_client(options, &self.settings, self.proxy.as_ref(), self.jar)?;

        let mut builder = client
            .request(self.request.shape.method(), self.url.clone())
            .version(options.http_version.to_reqwest());
        for (name, value) in self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match body {
            PreparedBody::Empty => builder,
            PreparedBody::Text { content_type, text } => {
                builder.header(CONTENT_TYPE, content_type).body(text)
            }
            PreparedBody::Raw {
                content_type,
                bytes,
            } => builder.header(CONTENT_TYPE, content_type).body(bytes.to_vec()),
            PreparedBody::Multipart { boundary, contents } => {
                let encoded = multipart::encode(&boundary, contents).await?;
                builder
                    .header(CONTENT_TYPE, multipart::content_type(&boundary))
                    .body(encoded)
            }
        };

        let timeout = options.timeout;
        let send = async move {
            let response = builder.send().await?;
            let address = response.url().to_string();
            let status = response.status().as_u16();
            let header_map = response.headers().clone();
            let raw = response.bytes().await?.to_vec();
            let headers = response::first_value_headers(&header_map, raw.len());
            Ok::<_, HttpError>((address, status, headers, raw))
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(HttpError::Cancelled),
            result = tokio::time::timeout(timeout, send) => {
                result.map_err(|_| HttpError::Timeout(timeout))?
            }
        }
    }
}
