// Transport configuration and socket setup.
//
// Sessions run over plain TCP (`api`, 8728) or TLS (`api-ssl`, 8729).
// Routers usually present self-signed certificates, so verification is
// selectable per profile, mirroring the HTTP clients' TLS modes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::Error;

/// TLS verification mode for `api-ssl` sessions.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Verify against the bundled Mozilla root set.
    System,
    /// Verify against a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (self-signed router certificates).
    DangerAcceptInvalid,
}

/// Shared transport configuration for every pooled session.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Bound on connect and on each command round-trip.
    pub timeout: Duration,
    /// Sessions unused for longer than this are closed by `evict_idle`.
    pub idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::DangerAcceptInvalid,
            timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Byte stream a session runs over.
pub(crate) trait DeviceIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DeviceIo for T {}

pub(crate) type BoxedIo = Box<dyn DeviceIo>;

impl TransportConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tls_mode(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub(crate) fn timeout_error(&self) -> Error {
        Error::Timeout {
            timeout_secs: self.timeout.as_secs(),
        }
    }

    /// Open the socket (and TLS layer when requested), bounded by `timeout`.
    pub(crate) async fn connect(&self, host: &str, port: u16, tls: bool) -> Result<BoxedIo, Error> {
        debug!(host, port, tls, "connecting");
        tokio::time::timeout(self.timeout, self.open_stream(host, port, tls))
            .await
            .map_err(|_| self.timeout_error())?
    }

    async fn open_stream(&self, host: &str, port: u16, tls: bool) -> Result<BoxedIo, Error> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        if !tls {
            return Ok(Box::new(stream));
        }
        let connector = TlsConnector::from(Arc::new(self.client_config()?));
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| Error::Tls(format!("invalid server name '{host}': {e}")))?;
        let stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(format!("handshake with {host}:{port} failed: {e}")))?;
        Ok(Box::new(stream))
    }

    /// Build the rustls client config for the selected mode.
    pub(crate) fn client_config(&self) -> Result<ClientConfig, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("failed to build TLS config: {e}")))?;

        let config = match &self.tls {
            TlsMode::System => {
                let roots: RootCertStore =
                    webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
                builder.with_root_certificates(roots).with_no_client_auth()
            }
            TlsMode::CustomCa(path) => {
                let mut roots = RootCertStore::empty();
                let certs = CertificateDer::pem_file_iter(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                for cert in certs {
                    let cert = cert.map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                    roots
                        .add(cert)
                        .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                }
                builder.with_root_certificates(roots).with_no_client_auth()
            }
            TlsMode::DangerAcceptInvalid => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert::new(&provider)))
                .with_no_client_auth(),
        };
        Ok(config)
    }
}

/// Skips chain validation but still checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyCert {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
