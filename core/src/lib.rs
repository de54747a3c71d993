//! Synchronous client core for the image service.
//!
//! # Overview
//! Opens a fresh (optionally mutually authenticated TLS) connection per
//! request, attaches the auth token, streams large uploads with chunked
//! transfer encoding, maps response statuses onto `ApiError` kinds and hands
//! successful responses back unread so downloads can be consumed in chunks.
//!
//! # Design
//! - `Client` owns the connection config, token and auth plugin; it retries
//!   once after re-authenticating when the service answers 401/403.
//! - `transport`, `sender`, `response` and `status` are the layers below it
//!   and can be used on their own.
//! - Blocking I/O throughout; no pooling, no background threads.

pub mod auth;
pub mod chunks;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod params;
pub mod response;
pub mod sender;
pub mod status;
pub mod transport;

pub use auth::{Auth, AuthError, AuthPlugin, Credentials, KeystoneAuth, NoAuth};
pub use chunks::ChunkIterator;
pub use client::{Client, AUTH_TOKEN_HEADER};
pub use config::{ConnectionConfig, TlsFiles};
pub use error::ApiError;
pub use http::{Body, HttpMethod, UploadSource};
pub use params::{build_action, extract_params, QueryParams};
pub use response::Response;
pub use sender::CHUNK_SIZE;
pub use status::{classify, Outcome};
pub use transport::Connection;
