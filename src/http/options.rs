//! Request options for the four request shapes, plus engine-wide HTTP
//! settings.

use std::str::FromStr;
use std::time::Duration;

use reqwest::Method;
use rustls::SupportedProtocolVersion;
use rustls_pki_types::CertificateRevocationListDer;
use secrecy::SecretString;

use super::cipher::CipherSuiteName;
use super::multipart::MultipartContent;
use crate::error::ConfigError;

static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// HTTP protocol version written in the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    Http10,
    #[default]
    Http11,
    Http2,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http10 => "1.0",
            Self::Http11 => "1.1",
            Self::Http2 => "2.0",
        }
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Version {
        match self {
            Self::Http10 => reqwest::Version::HTTP_10,
            Self::Http11 => reqwest::Version::HTTP_11,
            Self::Http2 => reqwest::Version::HTTP_2,
        }
    }
}

impl FromStr for HttpVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches("HTTP/") {
            "1.0" => Ok(Self::Http10),
            "1.1" => Ok(Self::Http11),
            "2" | "2.0" => Ok(Self::Http2),
            other => Err(ConfigError::InvalidValue {
                key: "http_version".into(),
                message: format!("unsupported version '{other}'"),
            }),
        }
    }
}

/// TLS protocol versions offered during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityProtocol {
    /// TLS 1.2 and 1.3.
    #[default]
    SystemDefault,
    Tls12,
    Tls13,
}

impl SecurityProtocol {
    pub(crate) fn versions(&self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            Self::SystemDefault => rustls::ALL_VERSIONS,
            Self::Tls12 => TLS12_ONLY,
            Self::Tls13 => TLS13_ONLY,
        }
    }
}

/// How certificate revocation is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevocationMode {
    #[default]
    NoCheck,
    /// Check the leaf certificate only and accept unknown status.
    EndEntity,
    /// Check the whole chain; unknown status fails the handshake.
    FullChain,
}

/// Engine-wide settings shared by every request a task makes.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub read_write_timeout: Duration,
    pub revocation_mode: RevocationMode,
    /// Revocation lists consulted when `revocation_mode` checks.
    pub crls: Vec<CertificateRevocationListDer<'static>>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_write_timeout: Duration::from_secs(10),
            revocation_mode: RevocationMode::NoCheck,
            crls: Vec::new(),
        }
    }
}

/// Options shared by every request shape.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub url: String,
    pub http_version: HttpVersion,
    /// Custom headers in the order they should be sent.
    pub headers: Vec<(String, String)>,
    /// Cookies added on top of the ones the task already holds.
    pub custom_cookies: Vec<(String, String)>,
    pub timeout: Duration,
    pub auto_redirect: bool,
    pub max_redirects: usize,
    pub security_protocol: SecurityProtocol,
    /// Restrict the handshake to these suites. Empty means the defaults.
    pub cipher_suites: Vec<String>,
}

impl RequestOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http_version: HttpVersion::Http11,
            headers: Vec::new(),
            custom_cookies: Vec::new(),
            timeout: Duration::from_secs(10),
            auto_redirect: true,
            max_redirects: 8,
            security_protocol: SecurityProtocol::SystemDefault,
            cipher_suites: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_cookies.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_version(mut self, version: HttpVersion) -> Self {
        self.http_version = version;
        self
    }

    pub fn with_redirects(mut self, auto_redirect: bool, max_redirects: usize) -> Self {
        self.auto_redirect = auto_redirect;
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_security_protocol(mut self, protocol: SecurityProtocol) -> Self {
        self.security_protocol = protocol;
        self
    }

    pub fn with_cipher_suites<I, S>(mut self, suites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cipher_suites = suites.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve the cipher-suite allow-list against the catalog.
    pub fn parsed_cipher_suites(&self) -> Result<Vec<CipherSuiteName>, ConfigError> {
        CipherSuiteName::parse_all(&self.cipher_suites)
    }

    pub(crate) fn parsed_url(&self) -> Result<url::Url, ConfigError> {
        url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidValue {
            key: "url".into(),
            message: format!("'{}': {e}", self.url),
        })
    }
}

/// The four request shapes served by one pipeline.
#[derive(Debug, Clone)]
pub enum RequestShape {
    Standard {
        method: Method,
        content: String,
        content_type: String,
        /// Send the body even when it's empty.
        always_send_content: bool,
    },
    Raw {
        method: Method,
        content: Vec<u8>,
        content_type: String,
    },
    BasicAuth {
        username: String,
        password: SecretString,
    },
    Multipart {
        method: Method,
        /// Generated when absent.
        boundary: Option<String>,
        contents: Vec<MultipartContent>,
    },
}

impl RequestShape {
    pub fn method(&self) -> Method {
        match self {
            Self::Standard { method, .. }
            | Self::Raw { method, .. }
            | Self::Multipart { method, .. } => method.clone(),
            Self::BasicAuth { .. } => Method::GET,
        }
    }
}

/// A fully described request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub options: RequestOptions,
    pub shape: RequestShape,
}

impl HttpRequest {
    pub fn standard(
        options: RequestOptions,
        method: Method,
        content: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            options,
            shape: RequestShape::Standard {
                method,
                content: content.into(),
                content_type: content_type.into(),
                always_send_content: false,
            },
        }
    }

    /// GET with no body.
    pub fn get(options: RequestOptions) -> Self {
        Self::standard(options, Method::GET, "", "application/x-www-form-urlencoded")
    }

    pub fn raw(
        options: RequestOptions,
        method: Method,
        content: Vec<u8>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            options,
            shape: RequestShape::Raw {
                method,
                content,
                content_type: content_type.into(),
            },
        }
    }

    pub fn basic_auth(
        options: RequestOptions,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            options,
            shape: RequestShape::BasicAuth {
                username: username.into(),
                password: SecretString::from(password.into()),
            },
        }
    }

    pub fn multipart(
        options: RequestOptions,
        method: Method,
        boundary: Option<String>,
        contents: Vec<MultipartContent>,
    ) -> Self {
        Self {
            options,
            shape: RequestShape::Multipart {
                method,
                boundary,
                contents,
            },
        }
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.options.parsed_url()?;
        self.options.parsed_cipher_suites()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_http_versions() {
        assert_eq!("1.0".parse::<HttpVersion>().unwrap(), HttpVersion::Http10);
        assert_eq!("HTTP/1.1".parse::<HttpVersion>().unwrap(), HttpVersion::Http11);
        assert_eq!("2".parse::<HttpVersion>().unwrap(), HttpVersion::Http2);
        assert!("3.0".parse::<HttpVersion>().is_err());
    }

    #[test]
    fn basic_auth_is_always_get() {
        let req = HttpRequest::basic_auth(RequestOptions::new("https://example.com"), "u", "p");
        assert_eq!(req.shape.method(), Method::GET);
    }

    #[test]
    fn validate_rejects_unknown_cipher_before_io() {
        let options = RequestOptions::new("https://example.com")
            .with_cipher_suites(["TLS_AES_128_GCM_SHA256", "TLS_NULL_WITH_NULL_NULL"]);
        let err = HttpRequest::get(options).validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedCipherSuite(_)));
    }

    #[test]
    fn validate_rejects_relative_url() {
        let err = HttpRequest::get(RequestOptions::new("/login")).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "url"));
    }
}
