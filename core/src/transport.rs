//! TCP and TLS connections.
//!
//! # Design
//! `connect` returns a `Connection` that is either a plain `TcpStream` or a
//! rustls client session over one. The TLS handshake is driven to completion
//! before `connect` returns so certificate problems surface as
//! `ApiError::Connection` here rather than on the first write.
//!
//! With a CA bundle the server chain and name are verified against it.
//! Without one, `NoServerVerification` accepts any server certificate while
//! still checking handshake signatures. The client certificate is presented
//! in both modes.

use std::fs;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};
use tracing::{debug, warn};

use crate::config::{ConnectionConfig, TlsFiles};
use crate::error::ApiError;

/// An open connection to the image service.
pub enum Connection {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Connection {
    fn tcp(&self) -> &TcpStream {
        match self {
            Connection::Plain(sock) => sock,
            Connection::Tls(stream) => &stream.sock,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Connection::Tls(_))
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(sock) => sock.read(buf),
            Connection::Tls(stream) => match stream.read(buf) {
                // Peers that close without close_notify still ended the body.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
                other => other,
            },
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(sock) => sock.write(buf),
            Connection::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Plain(sock) => sock.flush(),
            Connection::Tls(stream) => stream.flush(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Connection::Tls(stream) = self {
            stream.conn.send_close_notify();
            let _ = stream.conn.complete_io(&mut stream.sock);
        }
        let _ = self.tcp().shutdown(Shutdown::Both);
    }
}

/// Open a connection as described by `config`.
pub fn connect(config: &ConnectionConfig) -> Result<Connection, ApiError> {
    let tls_config = match &config.tls {
        Some(files) => Some(client_config(files)?),
        None => None,
    };

    let sock = open_tcp(config)?;
    sock.set_nodelay(true)?;

    match tls_config {
        None => Ok(Connection::Plain(sock)),
        Some(tls_config) => {
            let stream = handshake(tls_config, &config.host, sock)?;
            Ok(Connection::Tls(Box::new(stream)))
        }
    }
}

fn open_tcp(config: &ConnectionConfig) -> Result<TcpStream, ApiError> {
    let target = (config.host.as_str(), config.port);
    debug!(host = %config.host, port = config.port, tls = config.use_tls(), "connecting");

    let Some(timeout) = config.connect_timeout else {
        return TcpStream::connect(target).map_err(|e| connect_error(config, e));
    };

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
    for addr in target.to_socket_addrs().map_err(|e| connect_error(config, e))? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(sock) => return Ok(sock),
            Err(e) => last_err = e,
        }
    }
    Err(connect_error(config, last_err))
}

fn connect_error(config: &ConnectionConfig, e: io::Error) -> ApiError {
    ApiError::Connection(format!("{}:{}: {e}", config.host, config.port))
}

fn handshake(
    tls_config: Arc<ClientConfig>,
    host: &str,
    mut sock: TcpStream,
) -> Result<StreamOwned<ClientConnection, TcpStream>, ApiError> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| ApiError::Connection(format!("invalid TLS server name: {host}")))?;
    let mut conn = ClientConnection::new(tls_config, server_name)?;
    while conn.is_handshaking() {
        conn.complete_io(&mut sock)
            .map_err(|e| ApiError::Connection(format!("TLS handshake with {host} failed: {e}")))?;
    }
    debug!(
        host,
        version = ?conn.protocol_version(),
        cipher = ?conn.negotiated_cipher_suite().map(|s| s.suite()),
        "TLS established"
    );
    Ok(StreamOwned::new(conn, sock))
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

/// Build the rustls client configuration for mutual TLS.
pub fn client_config(files: &TlsFiles) -> Result<Arc<ClientConfig>, ApiError> {
    files.validate()?;
    let certs = load_certs(&files.cert_file)?;
    let key = load_key(&files.key_file)?;

    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;

    let config = match &files.ca_file {
        Some(ca_file) => {
            let mut roots = RootCertStore::empty();
            for ca in load_certs(ca_file)? {
                roots.add(ca)?;
            }
            builder.with_root_certificates(roots).with_client_auth_cert(certs, key)?
        }
        None => {
            warn!("no CA file configured; server certificate will not be verified");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoServerVerification(provider)))
                .with_client_auth_cert(certs, key)?
        }
    };
    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ApiError> {
    let pem = read_pem(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::Connection(format!("failed to parse certificates from {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ApiError::Connection(format!("no certificates found in {}", path.display())));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ApiError> {
    let pem = read_pem(path)?;
    PrivateKeyDer::from_pem_slice(&pem)
        .map_err(|e| ApiError::Connection(format!("failed to parse private key from {}: {e}", path.display())))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ApiError> {
    fs::read(path).map_err(|e| ApiError::Connection(format!("failed to read {}: {e}", path.display())))
}

/// Accepts any server certificate. Used only when no CA bundle is configured.
#[derive(Debug)]
struct NoServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoServerVerification {
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
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
