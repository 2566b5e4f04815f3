//! Proxy descriptions and their mapping onto the HTTP client.

use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Protocol spoken to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks5,
    /// SOCKS5 with hostname resolution on the proxy side.
    Socks5h,
}

impl ProxyKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Socks5 => "socks5",
            Self::Socks5h => "socks5h",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => Some(Self::Http),
            "socks5" => Some(Self::Socks5),
            "socks5h" => Some(Self::Socks5h),
            _ => None,
        }
    }
}

/// Proxy login.
#[derive(Debug, Clone)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: SecretString,
}

/// A single proxy endpoint.
#[derive(Debug, Clone)]
pub struct Proxy {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
}

impl Proxy {
    pub fn new(kind: ProxyKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            credentials: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(ProxyCredentials {
            username: username.into(),
            password: SecretString::from(password.into()),
        });
        self
    }

    /// Parse `host:port`, `host:port:user:pass` or
    /// `scheme://[user:pass@]host:port`. Bare forms use `default_kind`.
    pub fn parse(input: &str, default_kind: ProxyKind) -> Result<Self, ConfigError> {
        let input = input.trim();
        let malformed = |reason: &str| ConfigError::MalformedProxy {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if input.contains("://") {
            let url = url::Url::parse(input).map_err(|e| malformed(&e.to_string()))?;
            let kind = ProxyKind::from_scheme(url.scheme())
                .ok_or_else(|| malformed("unsupported scheme"))?;
            let host = url.host_str().ok_or_else(|| malformed("missing host"))?;
            let port = url.port().ok_or_else(|| malformed("missing port"))?;
            let mut proxy = Self::new(kind, host, port);
            if !url.username().is_empty() {
                proxy = proxy.with_credentials(url.username(), url.password().unwrap_or_default());
            }
            return Ok(proxy);
        }

        let fields: Vec<&str> = input.split(':').collect();
        let (host, port, creds) = match fields.as_slice() {
            [host, port] => (*host, *port, None),
            [host, port, user, pass] => (*host, *port, Some((*user, *pass))),
            _ => return Err(malformed("expected host:port or host:port:user:pass")),
        };
        if host.is_empty() {
            return Err(malformed("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| malformed("invalid port"))?;

        let proxy = Self::new(default_kind, host, port);
        Ok(match creds {
            Some((user, pass)) => proxy.with_credentials(user, pass),
            None => proxy,
        })
    }

    /// Build the client-side proxy. Credentials go into the URL for SOCKS and
    /// into a Proxy-Authorization header for HTTP.
    pub(crate) fn to_reqwest(&self) -> Result<reqwest::Proxy, ConfigError> {
        let mut url = url::Url::parse(&format!(
            "{}://{}:{}",
            self.kind.scheme(),
            self.host,
            self.port
        ))
        .map_err(|e| ConfigError::MalformedProxy {
            input: self.to_string(),
            reason: e.to_string(),
        })?;

        if let (Some(creds), ProxyKind::Socks5 | ProxyKind::Socks5h) =
            (&self.credentials, self.kind)
        {
            // set_username only fails for cannot-be-a-base URLs, which a
            // scheme://host:port URL never is
            let _ = url.set_username(&creds.username);
            let _ = url.set_password(Some(creds.password.expose_secret()));
        }

        let mut proxy =
            reqwest::Proxy::all(url.as_str()).map_err(|e| ConfigError::MalformedProxy {
                input: self.to_string(),
                reason: e.to_string(),
            })?;

        if let (Some(creds), ProxyKind::Http) = (&self.credentials, self.kind) {
            proxy = proxy.basic_auth(&creds.username, creds.password.expose_secret());
        }
        Ok(proxy)
    }
}

impl FromStr for Proxy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, ProxyKind::Http)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_host_port() {
        let proxy: Proxy = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(proxy.kind, ProxyKind::Http);
        assert_eq!(proxy.host, "127.0.0.1");
        assert_eq!(proxy.port, 8080);
        assert!(proxy.credentials.is_none());
    }

    #[test]
    fn parses_credentials_suffix() {
        let proxy = Proxy::parse("proxy.local:1080:bob:hunter2", ProxyKind::Socks5).unwrap();
        assert_eq!(proxy.kind, ProxyKind::Socks5);
        let creds = proxy.credentials.unwrap();
        assert_eq!(creds.username, "bob");
        assert_eq!(creds.password.expose_secret(), "hunter2");
    }

    #[test]
    fn parses_url_form() {
        let proxy = Proxy::parse("socks5h://alice:pw@10.0.0.1:9050", ProxyKind::Http).unwrap();
        assert_eq!(proxy.kind, ProxyKind::Socks5h);
        assert_eq!(proxy.to_string(), "10.0.0.1:9050");
        assert_eq!(proxy.credentials.unwrap().username, "alice");
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "host", "host:port", "host:1:2", ":80", "ftp://h:21"] {
            assert!(
                matches!(
                    Proxy::parse(bad, ProxyKind::Http),
                    Err(ConfigError::MalformedProxy { .. })
                ),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn converts_to_client_proxy() {
        let http = Proxy::new(ProxyKind::Http, "127.0.0.1", 3128).with_credentials("u", "p");
        assert!(http.to_reqwest().is_ok());
        let socks = Proxy::new(ProxyKind::Socks5, "127.0.0.1", 1080).with_credentials("u", "p w");
        assert!(socks.to_reqwest().is_ok());
    }
}
