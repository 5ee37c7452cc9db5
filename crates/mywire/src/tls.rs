//! TLS support for MySQL connections, built on rustls.
//!
//! # Upgrade flow
//!
//! 1. The server greeting advertises `CLIENT_SSL`
//! 2. The client sends the 32-byte SSL request in clear text
//! 3. The TLS handshake runs over the same socket
//! 4. The full handshake response and everything after it is encrypted
//!
//! # Verification policy
//!
//! | mode | chain | hostname |
//! |------|-------|----------|
//! | `Preferred`, `Required` without a CA | no | no |
//! | `Preferred`, `Required` with a CA | yes | no |
//! | `VerifyCa` | yes | no |
//! | `VerifyIdentity` | yes | yes |
//!
//! The chain is checked against `ca_cert_path` when set, webpki roots
//! otherwise. `danger_skip_verify` disables every check.

use crate::config::{SslMode, TlsConfig};
use crate::protocol::capabilities::CLIENT_SSL;
use mywire_core::error::{ConnectionError, ConnectionErrorKind};
use mywire_core::{Error, Result};

#[cfg(feature = "tls")]
use std::io::{Read, Write};
#[cfg(feature = "tls")]
use std::sync::Arc;

/// Decide whether to upgrade, given the mode and the server's capabilities.
///
/// A required mode against a server without `CLIENT_SSL` is an error.
#[allow(clippy::result_large_err)]
pub fn negotiate_ssl(ssl_mode: SslMode, server_caps: u32) -> Result<bool> {
    let server_supports = server_caps & CLIENT_SSL != 0;

    match ssl_mode {
        SslMode::Disable => Ok(false),
        SslMode::Preferred => Ok(server_supports),
        SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if server_supports {
                Ok(true)
            } else {
                Err(tls_error("SSL required but server does not support it"))
            }
        }
    }
}

/// Reject incomplete certificate settings before any I/O.
#[allow(clippy::result_large_err)]
pub fn validate_tls_config(tls_config: &TlsConfig) -> Result<()> {
    match (&tls_config.client_cert_path, &tls_config.client_key_path) {
        (Some(_), None) => Err(tls_error(
            "Client certificate provided without client key",
        )),
        (None, Some(_)) => Err(tls_error(
            "Client key provided without client certificate",
        )),
        _ => Ok(()),
    }
}

pub(crate) fn tls_error(message: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Ssl,
        message: message.into(),
        source: None,
    })
}

#[cfg(feature = "tls")]
fn tls_error_with(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Ssl,
        message: message.into(),
        source: Some(Box::new(source)),
    })
}

// ============================================================================
// TLS stream (feature-gated)
// ============================================================================

/// An established TLS session over an inner byte stream.
#[cfg(feature = "tls")]
pub struct TlsStream<S: Read + Write> {
    conn: rustls::ClientConnection,
    stream: S,
}

#[cfg(feature = "tls")]
impl<S: Read + Write> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol_version", &self.conn.protocol_version())
            .field("is_handshaking", &self.conn.is_handshaking())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> TlsStream<S> {
    /// Run the TLS handshake over `stream`.
    ///
    /// `host` is used for SNI and hostname checks unless the config
    /// overrides it.
    #[allow(clippy::result_large_err)]
    pub fn connect(mut stream: S, tls_config: &TlsConfig, host: &str, ssl_mode: SslMode) -> Result<Self> {
        let config = build_client_config(tls_config, ssl_mode)?;

        let name = tls_config.server_name.as_deref().unwrap_or(host);
        let server_name = rustls::pki_types::ServerName::try_from(name.to_string())
            .map_err(|e| tls_error_with(format!("Invalid server name '{}'", name), e))?;

        let mut conn = rustls::ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| tls_error_with("Failed to create TLS session", e))?;

        while conn.is_handshaking() {
            conn.complete_io(&mut stream)
                .map_err(|e| tls_error_with(format!("TLS handshake failed: {}", e), e))?;
        }

        tracing::debug!(
            version = ?conn.protocol_version(),
            cipher = ?conn.negotiated_cipher_suite().map(|s| s.suite()),
            "TLS established"
        );
        Ok(Self { conn, stream })
    }

    /// Get the negotiated protocol version.
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// Get the negotiated cipher suite.
    pub fn negotiated_cipher_suite(&self) -> Option<rustls::SupportedCipherSuite> {
        self.conn.negotiated_cipher_suite()
    }

    /// Send close_notify, best effort.
    pub fn shutdown(&mut self) {
        self.conn.send_close_notify();
        let _ = self.conn.complete_io(&mut self.stream);
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        rustls::Stream::new(&mut self.conn, &mut self.stream).read(buf)
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        rustls::Stream::new(&mut self.conn, &mut self.stream).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        rustls::Stream::new(&mut self.conn, &mut self.stream).flush()?;
        self.stream.flush()
    }
}

#[cfg(feature = "tls")]
type Provider = Arc<rustls::crypto::CryptoProvider>;

/// Build the rustls client config for an SSL mode.
#[cfg(feature = "tls")]
#[allow(clippy::result_large_err)]
fn build_client_config(tls_config: &TlsConfig, ssl_mode: SslMode) -> Result<rustls::ClientConfig> {
    use verifiers::{ChainOnlyVerifier, NoVerifier};

    if ssl_mode == SslMode::Disable {
        return Err(tls_error("TLS requested with SslMode::Disable"));
    }
    validate_tls_config(tls_config)?;

    let provider = provider_with_ciphers(&tls_config.ciphers)?;
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error_with("Failed to set TLS versions", e))?;

    let skip_all = tls_config.danger_skip_verify
        || (!ssl_mode_verifies(ssl_mode) && tls_config.ca_cert_path.is_none());

    let builder = if skip_all {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)))
    } else {
        let roots = Arc::new(load_roots(tls_config)?);
        if ssl_mode == SslMode::VerifyIdentity {
            builder.with_root_certificates(roots)
        } else {
            let inner = rustls::client::WebPkiServerVerifier::builder_with_provider(roots, provider)
                .build()
                .map_err(|e| tls_error_with("Failed to build certificate verifier", e))?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(ChainOnlyVerifier(inner)))
        }
    };

    add_client_auth(builder, tls_config)
}

#[cfg(feature = "tls")]
fn ssl_mode_verifies(ssl_mode: SslMode) -> bool {
    matches!(ssl_mode, SslMode::VerifyCa | SslMode::VerifyIdentity)
}

/// The ring provider, restricted to the named cipher suites when any are given.
#[cfg(feature = "tls")]
#[allow(clippy::result_large_err)]
fn provider_with_ciphers(ciphers: &[String]) -> Result<Provider> {
    let mut provider = rustls::crypto::ring::default_provider();
    if !ciphers.is_empty() {
        provider.cipher_suites.retain(|suite| {
            let name = format!("{:?}", suite.suite());
            ciphers.iter().any(|c| c.eq_ignore_ascii_case(&name))
        });
        if provider.cipher_suites.is_empty() {
            return Err(tls_error(format!(
                "None of the configured ciphers are supported: {}",
                ciphers.join(", ")
            )));
        }
    }
    Ok(Arc::new(provider))
}

#[cfg(feature = "tls")]
#[allow(clippy::result_large_err)]
fn load_roots(tls_config: &TlsConfig) -> Result<rustls::RootCertStore> {
    let mut roots = rustls::RootCertStore::empty();
    match &tls_config.ca_cert_path {
        Some(path) => {
            let certs = read_certs(path, "CA certificate")?;
            let (added, _ignored) = roots.add_parsable_certificates(certs);
            if added == 0 {
                return Err(tls_error(format!(
                    "No usable certificates in CA file '{}'",
                    path.display()
                )));
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(roots)
}

#[cfg(feature = "tls")]
#[allow(clippy::result_large_err)]
fn read_certs(
    path: &std::path::Path,
    what: &str,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| tls_error_with(format!("Failed to open {} '{}'", what, path.display()), e))?;
    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error_with(format!("Failed to parse {}", what), e))?;
    if certs.is_empty() {
        return Err(tls_error(format!(
            "No certificates found in {} file '{}'",
            what,
            path.display()
        )));
    }
    Ok(certs)
}

#[cfg(feature = "tls")]
#[allow(clippy::result_large_err)]
fn add_client_auth(
    builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig> {
    let (Some(cert_path), Some(key_path)) =
        (&tls_config.client_cert_path, &tls_config.client_key_path)
    else {
        return Ok(builder.with_no_client_auth());
    };

    let certs = read_certs(cert_path, "client certificate")?;
    let key_file = std::fs::File::open(key_path).map_err(|e| {
        tls_error_with(format!("Failed to open client key '{}'", key_path.display()), e)
    })?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
        .map_err(|e| tls_error_with("Failed to parse client key", e))?
        .ok_or_else(|| tls_error(format!("No private key found in '{}'", key_path.display())))?;

    builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| tls_error_with("Failed to configure client certificate", e))
}

#[cfg(feature = "tls")]
mod verifiers {
    use std::sync::Arc;

    use rustls::client::WebPkiServerVerifier;
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{CertificateError, DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    use super::Provider;

    /// Accepts any certificate; signatures are still checked.
    #[derive(Debug)]
    pub(super) struct NoVerifier(pub(super) Provider);

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &self.0.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

    /// Verifies the chain but not the hostname.
    #[derive(Debug)]
    pub(super) struct ChainOnlyVerifier(pub(super) Arc<WebPkiServerVerifier>);

    impl ServerCertVerifier for ChainOnlyVerifier {
        fn verify_server_cert(
            &self,
            end_entity: &CertificateDer<'_>,
            intermediates: &[CertificateDer<'_>],
            server_name: &ServerName<'_>,
            ocsp_response: &[u8],
            now: UnixTime,
        ) -> Result<ServerCertVerified, RustlsError> {
            match self
                .0
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            {
                Err(RustlsError::InvalidCertificate(
                    CertificateError::NotValidForName
                    | CertificateError::NotValidForNameContext { .. },
                )) => Ok(ServerCertVerified::assertion()),
                other => other,
            }
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            self.0.verify_tls12_signature(message, cert, dss)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            self.0.verify_tls13_signature(message, cert, dss)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.supported_verify_schemes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities::CLIENT_PROTOCOL_41;

    fn is_ssl_error(err: &Error) -> bool {
        matches!(
            err,
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Ssl,
                ..
            })
        )
    }

    #[test]
    fn test_negotiate_ssl() {
        assert!(!negotiate_ssl(SslMode::Disable, CLIENT_SSL).unwrap());
        assert!(!negotiate_ssl(SslMode::Preferred, CLIENT_PROTOCOL_41).unwrap());
        assert!(negotiate_ssl(SslMode::Preferred, CLIENT_SSL).unwrap());
        assert!(negotiate_ssl(SslMode::VerifyIdentity, CLIENT_SSL).unwrap());

        let err = negotiate_ssl(SslMode::Required, CLIENT_PROTOCOL_41).unwrap_err();
        assert!(is_ssl_error(&err));
        assert!(negotiate_ssl(SslMode::VerifyCa, 0).is_err());
    }

    #[test]
    fn test_validate_tls_config_client_cert_pairing() {
        assert!(validate_tls_config(&TlsConfig::new()).is_ok());

        let mut half = TlsConfig::new();
        half.client_cert_path = Some("/path/to/client.pem".into());
        assert!(validate_tls_config(&half).is_err());

        let full = TlsConfig::new().client_cert("/path/to/client.pem", "/path/to/key.pem");
        assert!(validate_tls_config(&full).is_ok());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_client_config_modes() {
        assert!(build_client_config(&TlsConfig::new(), SslMode::Required).is_ok());
        assert!(build_client_config(&TlsConfig::new(), SslMode::VerifyCa).is_ok());
        assert!(build_client_config(&TlsConfig::new(), SslMode::VerifyIdentity).is_ok());
        assert!(build_client_config(&TlsConfig::new(), SslMode::Disable).is_err());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_missing_ca_file_is_ssl_error() {
        let tls = TlsConfig::new().ca_cert("/nonexistent/ca.pem");
        let err = build_client_config(&tls, SslMode::VerifyCa).unwrap_err();
        assert!(is_ssl_error(&err));
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_cipher_allow_list() {
        let tls = TlsConfig::new().cipher("TLS13_AES_128_GCM_SHA256");
        let provider = provider_with_ciphers(&tls.ciphers).unwrap();
        assert_eq!(provider.cipher_suites.len(), 1);

        let err = provider_with_ciphers(&["RC4-MD5".to_string()]).unwrap_err();
        assert!(is_ssl_error(&err));
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_handshake_against_closed_peer_fails() {
        let stream = std::io::Cursor::new(Vec::new());
        let err = TlsStream::connect(stream, &TlsConfig::new(), "localhost", SslMode::Required)
            .unwrap_err();
        assert!(is_ssl_error(&err));
    }
}
