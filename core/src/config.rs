//! Connection configuration.
//!
//! # Design
//! `ConnectionConfig` is plain data so hosts can deserialize it from whatever
//! configuration format they use. TLS material is validated eagerly:
//! `TlsFiles::resolve` fails before any socket exists when a key or
//! certificate path does not point at a file.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ApiError;

pub const DEFAULT_PORT: u16 = 80;

pub const KEY_FILE_ENV: &str = "GLANCE_CLIENT_KEY_FILE";
pub const CERT_FILE_ENV: &str = "GLANCE_CLIENT_CERT_FILE";
pub const CA_FILE_ENV: &str = "GLANCE_CLIENT_CA_FILE";

/// Client key, client certificate and optional CA bundle, all PEM.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsFiles {
    pub key_file: PathBuf,
    pub cert_file: PathBuf,
    /// Without a CA bundle the server certificate is not verified.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

impl TlsFiles {
    /// Resolve TLS material from explicit paths, falling back to the
    /// `GLANCE_CLIENT_*_FILE` environment variables.
    pub fn resolve(
        key_file: Option<PathBuf>,
        cert_file: Option<PathBuf>,
        ca_file: Option<PathBuf>,
    ) -> Result<Self, ApiError> {
        let key_file = required(key_file, KEY_FILE_ENV, "key_file")?;
        let cert_file = required(cert_file, CERT_FILE_ENV, "cert_file")?;
        let ca_file = ca_file.or_else(|| env_path(CA_FILE_ENV));
        let files = TlsFiles {
            key_file,
            cert_file,
            ca_file,
        };
        files.validate()?;
        Ok(files)
    }

    /// Check that the key and certificate exist on disk.
    pub fn validate(&self) -> Result<(), ApiError> {
        ensure_exists(&self.key_file, "key")?;
        ensure_exists(&self.cert_file, "certificate")
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn required(path: Option<PathBuf>, env_name: &str, param: &str) -> Result<PathBuf, ApiError> {
    path.or_else(|| env_path(env_name)).ok_or_else(|| {
        ApiError::Connection(format!(
            "TLS was requested but neither the {param} parameter nor the {env_name} environment variable was supplied"
        ))
    })
}

fn ensure_exists(path: &Path, what: &str) -> Result<(), ApiError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ApiError::Connection(format!(
            "the {what} file you specified {} does not exist",
            path.display()
        )))
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix joined in front of every request path.
    #[serde(default)]
    pub doc_root: Option<String>,
    /// `Some` means TLS.
    #[serde(default)]
    pub tls: Option<TlsFiles>,
    #[serde(default, with = "timeout_secs")]
    pub connect_timeout: Option<Duration>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ConnectionConfig {
    /// Plain-TCP configuration for `host:port`.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            doc_root: None,
            tls: None,
            connect_timeout: None,
        }
    }

    pub fn with_doc_root(mut self, doc_root: &str) -> Self {
        self.doc_root = Some(doc_root.to_string());
        self
    }

    /// Enable TLS with validated material.
    pub fn with_tls(mut self, files: TlsFiles) -> Result<Self, ApiError> {
        files.validate()?;
        self.tls = Some(files);
        Ok(self)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn use_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Build a configuration from `<http|https>://host[:port][/doc_root]`.
    ///
    /// `https` needs TLS material, taken from the environment.
    pub fn from_url(url: &str) -> Result<Self, ApiError> {
        let mut config = Self::new("", DEFAULT_PORT);
        config.configure_from_url(url)?;
        Ok(config)
    }

    /// Re-derive host, port, TLS and doc root from a URL.
    ///
    /// The port defaults to 80 whatever the scheme. Switching to `https`
    /// keeps already configured TLS material, otherwise it is resolved from
    /// the environment.
    pub fn configure_from_url(&mut self, url: &str) -> Result<(), ApiError> {
        let parsed = Url::parse(url)?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ApiError::InvalidUrl(format!("no host in {url}")))?;
        let use_tls = parsed.scheme() == "https";

        let tls = match (use_tls, self.tls.take()) {
            (false, _) => None,
            (true, Some(existing)) => Some(existing),
            (true, None) => Some(TlsFiles::resolve(None, None, None)?),
        };

        self.host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        self.port = written_port(&parsed, url);
        self.doc_root = Some(parsed.path().to_string());
        self.tls = tls;
        Ok(())
    }

    /// Value for the `Host` request header.
    pub(crate) fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == DEFAULT_PORT && !self.use_tls() || self.port == 443 && self.use_tls() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// The port written in `raw`, or 80 when none is.
///
/// `Url` reports a port equal to the scheme default as absent, so an
/// explicit `https://host:443` is recovered from the authority text.
fn written_port(parsed: &Url, raw: &str) -> u16 {
    if let Some(port) = parsed.port() {
        return port;
    }
    match parsed.port_or_known_default() {
        Some(default) if authority_has_port(raw) => default,
        _ => DEFAULT_PORT,
    }
}

fn authority_has_port(raw: &str) -> bool {
    let Some((_, rest)) = raw.split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let after_host = match host_port.strip_prefix('[') {
        Some(v6) => v6.split_once(']').map(|(_, tail)| tail).unwrap_or_default(),
        None => host_port.find(':').map(|i| &host_port[i..]).unwrap_or_default(),
    };
    after_host
        .strip_prefix(':')
        .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

mod timeout_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<f64>::deserialize(d)?
            .filter(|s| *s > 0.0)
            .map(Duration::from_secs_f64))
    }
}
