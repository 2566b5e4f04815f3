//! Proxy- and TLS-aware client construction.

use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use rustls::ClientConfig;
use rustls::client::WebPkiServerVerifier;

use super::cipher::CipherSuiteName;
use super::options::{HttpSettings, HttpVersion, RequestOptions, RevocationMode, SecurityProtocol};
use super::proxy::Proxy;
use crate::error::{ConfigError, HttpError};

/// Build a client for one request.
///
/// Cipher suites are resolved first so an unknown name fails before any
/// connection is made.
pub(crate) fn build_client(
    options: &RequestOptions,
    settings: &HttpSettings,
    proxy: Option<&Proxy>,
    jar: Arc<Jar>,
) -> Result<reqwest::Client, HttpError> {
    let suites = options.parsed_cipher_suites()?;
    let tls = tls_config(
        options.security_protocol,
        &suites,
        settings,
        options.http_version,
    )?;

    let redirect = if options.auto_redirect {
        Policy::limited(options.max_redirects)
    } else {
        Policy::none()
    };

    let mut builder = reqwest::Client::builder()
        .use_preconfigured_tls(tls)
        .cookie_provider(jar)
        .connect_timeout(settings.connect_timeout)
        .read_timeout(settings.read_write_timeout)
        .redirect(redirect);

    if options.http_version != HttpVersion::Http2 {
        builder = builder.http1_only();
    }

    builder = match proxy {
        Some(proxy) => builder.proxy(proxy.to_reqwest()?),
        // never pick up proxies from the environment
        None => builder.no_proxy(),
    };

    builder
        .build()
        .map_err(|e| HttpError::Client(e.to_string()))
}

/// rustls configuration honoring protocol versions, the cipher-suite
/// allow-list and the revocation mode.
pub(crate) fn tls_config(
    protocol: SecurityProtocol,
    suites: &[CipherSuiteName],
    settings: &HttpSettings,
    version: HttpVersion,
) -> Result<ClientConfig, ConfigError> {
    let mut provider = rustls::crypto::ring::default_provider();
    if !suites.is_empty() {
        provider.cipher_suites = suites.iter().map(|s| s.to_rustls()).collect();
    }
    let provider = Arc::new(provider);

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(protocol.versions())
        .map_err(|e| ConfigError::Tls(e.to_string()))?;

    let builder = match settings.revocation_mode {
        RevocationMode::NoCheck => builder.with_root_certificates(roots),
        mode => {
            let mut verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
                .with_crls(settings.crls.iter().cloned());
            if mode == RevocationMode::EndEntity {
                verifier = verifier
                    .only_check_end_entity_revocation()
                    .allow_unknown_revocation_status();
            }
            let verifier = verifier
                .build()
                .map_err(|e| ConfigError::Tls(e.to_string()))?;
            builder.with_webpki_verifier(verifier)
        }
    };

    let mut config = builder.with_no_client_auth();
    config.alpn_protocols = match version {
        HttpVersion::Http2 => vec![b"h2".to_vec(), b"http/1.1".to_vec()],
        HttpVersion::Http10 | HttpVersion::Http11 => vec![b"http/1.1".to_vec()],
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tls_config_builds() {
        let config = tls_config(
            SecurityProtocol::SystemDefault,
            &[],
            &HttpSettings::default(),
            HttpVersion::Http11,
        )
        .unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn restricts_cipher_suites() {
        let suites = [CipherSuiteName::TLS_AES_128_GCM_SHA256];
        let config = tls_config(
            SecurityProtocol::Tls13,
            &suites,
            &HttpSettings::default(),
            HttpVersion::Http2,
        )
        .unwrap();
        assert_eq!(config.crypto_provider().cipher_suites.len(), 1);
        assert_eq!(config.alpn_protocols[0], b"h2".to_vec());
    }

    #[test]
    fn tls13_suites_cannot_serve_tls12_only() {
        let suites = [CipherSuiteName::TLS_AES_256_GCM_SHA384];
        let err = tls_config(
            SecurityProtocol::Tls12,
            &suites,
            &HttpSettings::default(),
            HttpVersion::Http11,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Tls(_)));
    }

    #[test]
    fn revocation_checking_builds_verifier() {
        let settings = HttpSettings {
            revocation_mode: RevocationMode::EndEntity,
            ..HttpSettings::default()
        };
        assert!(
            tls_config(SecurityProtocol::SystemDefault, &[], &settings, HttpVersion::Http11).is_ok()
        );
    }

    #[test]
    fn unknown_cipher_fails_client_build() {
        let options =
            RequestOptions::new("https://example.com").with_cipher_suites(["NOT_A_SUITE"]);
        let err = build_client(
            &options,
            &HttpSettings::default(),
            None,
            Arc::new(Jar::default()),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            HttpError::Config(ConfigError::UnsupportedCipherSuite(_))
        ));
    }
}
