//! Mutual TLS against a rustls server on a std thread.
//!
//! Certificates are generated with rcgen and written to a temp dir so the
//! client loads them the same way it loads real PEM files.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use glance_core::{ApiError, Body, Client, ConnectionConfig, HttpMethod, NoAuth, TlsFiles};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};

struct Identity {
    cert: CertificateDer<'static>,
    cert_pem: String,
    key_der: Vec<u8>,
    key_pem: String,
}

fn identity(name: &str) -> Identity {
    let generated = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
    Identity {
        cert_pem: generated.cert.pem(),
        key_pem: generated.key_pair.serialize_pem(),
        key_der: generated.key_pair.serialize_der(),
        cert: CertificateDer::from(generated.cert),
    }
}

fn write_pem(dir: &Path, name: &str, pem: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, pem).unwrap();
    path
}

fn server_config(server: &Identity, trusted_client: &Identity) -> Arc<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut roots = RootCertStore::empty();
    roots.add(trusted_client.cert.clone()).unwrap();
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .unwrap();
    let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(server.key_der.clone()));
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_client_cert_verifier(verifier)
        .with_single_cert(vec![server.cert.clone()], key)
        .unwrap();
    Arc::new(config)
}

/// Serve one TLS connection: read a request head, answer `200 secure`.
fn serve_once(config: Arc<ServerConfig>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let Ok((sock, _)) = listener.accept() else { return };
        let Ok(conn) = ServerConnection::new(config) else { return };
        let mut stream = StreamOwned::new(conn, sock);
        let mut reader = BufReader::new(&mut stream);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return,
                Ok(_) if line == "\r\n" => break,
                Ok(_) => {}
            }
        }
        drop(reader);
        let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nsecure");
        stream.conn.send_close_notify();
        let _ = stream.flush();
    });
    port
}

struct Fixture {
    _dir: tempfile::TempDir,
    server: Identity,
    client: Identity,
    key_file: PathBuf,
    cert_file: PathBuf,
    server_ca: PathBuf,
    other_ca: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let server = identity("localhost");
    let client = identity("client");
    let other = identity("localhost");
    Fixture {
        key_file: write_pem(dir.path(), "client.key", &client.key_pem),
        cert_file: write_pem(dir.path(), "client.crt", &client.cert_pem),
        server_ca: write_pem(dir.path(), "server-ca.crt", &server.cert_pem),
        other_ca: write_pem(dir.path(), "other-ca.crt", &other.cert_pem),
        _dir: dir,
        server,
        client,
    }
}

fn tls_client(port: u16, files: TlsFiles) -> Result<Client<NoAuth>, ApiError> {
    let config = ConnectionConfig::new("localhost", port).with_tls(files)?;
    Client::with_auth(config, NoAuth)
}

#[test]
fn verified_mutual_tls_round_trip() {
    let fx = fixture();
    let port = serve_once(server_config(&fx.server, &fx.client));
    let mut client = tls_client(
        port,
        TlsFiles {
            key_file: fx.key_file.clone(),
            cert_file: fx.cert_file.clone(),
            ca_file: Some(fx.server_ca.clone()),
        },
    )
    .unwrap();

    let resp = client
        .request(HttpMethod::Get, "/images", Body::Empty, &[], &[])
        .unwrap();
    assert_eq!(resp.text().unwrap(), "secure");
}

#[test]
fn unverified_mode_accepts_any_server_certificate() {
    let fx = fixture();
    let port = serve_once(server_config(&fx.server, &fx.client));
    let mut client = tls_client(
        port,
        TlsFiles {
            key_file: fx.key_file.clone(),
            cert_file: fx.cert_file.clone(),
            ca_file: None,
        },
    )
    .unwrap();

    let resp = client
        .request(HttpMethod::Get, "/images", Body::Empty, &[], &[])
        .unwrap();
    assert_eq!(resp.text().unwrap(), "secure");
}

#[test]
fn wrong_ca_fails_the_handshake() {
    let fx = fixture();
    let port = serve_once(server_config(&fx.server, &fx.client));
    let mut client = tls_client(
        port,
        TlsFiles {
            key_file: fx.key_file.clone(),
            cert_file: fx.cert_file.clone(),
            ca_file: Some(fx.other_ca.clone()),
        },
    )
    .unwrap();

    let err = client
        .request(HttpMethod::Get, "/images", Body::Empty, &[], &[])
        .unwrap_err();
    assert!(matches!(err, ApiError::Connection(_)), "got {err:?}");
}

#[test]
fn untrusted_client_certificate_is_refused() {
    let fx = fixture();
    let stranger = identity("stranger");
    let port = serve_once(server_config(&fx.server, &stranger));
    let mut client = tls_client(
        port,
        TlsFiles {
            key_file: fx.key_file.clone(),
            cert_file: fx.cert_file.clone(),
            ca_file: Some(fx.server_ca.clone()),
        },
    )
    .unwrap();

    let result = client.request(HttpMethod::Get, "/images", Body::Empty, &[], &[]);
    assert!(result.is_err());
}

#[test]
fn missing_certificate_file_fails_at_construction() {
    let fx = fixture();
    let files = TlsFiles {
        key_file: fx.key_file.clone(),
        cert_file: fx.key_file.with_file_name("absent.crt"),
        ca_file: None,
    };
    let err = tls_client(443, files).err().unwrap();
    assert!(
        matches!(err, ApiError::Connection(ref msg) if msg.contains("absent.crt") && msg.contains("does not exist")),
        "got {err:?}"
    );
}
