//! Authenticated request engine for the image service.
//!
//! # Design
//! `Client` owns its connection config, the current auth token and the auth
//! plugin; `request` takes `&mut self` because authentication may replace
//! the token and re-point the config at a management URL. Share a client
//! across threads by wrapping it in a `Mutex`.
//!
//! Every request opens its own connection. On success the connection moves
//! into the returned `Response`; on any error it is dropped before `request`
//! returns. A `NotAuthorized` answer triggers one forced re-authentication
//! and one resend; nothing else is retried.

use std::io::Read;

use tracing::{debug, info, warn};

use crate::auth::{Auth, AuthPlugin, Credentials};
use crate::config::ConnectionConfig;
use crate::error::ApiError;
use crate::http::{has_header, has_header_ignore_case, Body, HttpMethod};
use crate::params::build_action;
use crate::response::{read_response, Response};
use crate::sender::{send_chunked, send_simple};
use crate::status::classify;
use crate::transport;

/// Header carrying the auth token.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Client for the image service, generic over its auth plugin.
#[derive(Debug)]
pub struct Client<A = Auth> {
    config: ConnectionConfig,
    auth_token: Option<String>,
    auth: A,
}

impl Client<Auth> {
    /// Build a client whose auth strategy is chosen from `creds`.
    pub fn new(config: ConnectionConfig, creds: Credentials) -> Result<Self, ApiError> {
        let auth = Auth::from_credentials(creds)?;
        Self::with_auth(config, auth)
    }
}

impl<A: AuthPlugin> Client<A> {
    /// Build a client around an existing auth plugin.
    ///
    /// TLS material in `config` is checked here, before any network I/O.
    pub fn with_auth(config: ConnectionConfig, auth: A) -> Result<Self, ApiError> {
        if let Some(files) = &config.tls {
            files.validate()?;
        }
        Ok(Self {
            config,
            auth_token: None,
            auth,
        })
    }

    /// Start from a known token; authentication is skipped until it is
    /// rejected.
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn set_auth_token(&mut self, token: &str) {
        self.auth_token = Some(token.to_string());
    }

    pub fn auth_plugin(&self) -> &A {
        &self.auth
    }

    /// Re-derive host, port, TLS and doc root from `url`.
    pub fn configure_from_url(&mut self, url: &str) -> Result<(), ApiError> {
        self.config.configure_from_url(url)
    }

    /// Obtain a token from the plugin and adopt its management URL.
    ///
    /// The plugin is asked to authenticate only when it is not already
    /// authenticated or when `force` is set.
    pub fn authenticate(&mut self, force: bool) -> Result<(), ApiError> {
        if force || !self.auth.is_authenticated() {
            info!(force, "authenticating");
            self.auth.authenticate()?;
        }
        self.auth_token = self.auth.auth_token().map(str::to_string);

        if let Some(url) = self.auth.management_url().map(str::to_string) {
            debug!(%url, "using management url");
            self.config.configure_from_url(&url)?;
        }
        Ok(())
    }

    /// Issue a request and return the unread response on 200/201/202/204.
    ///
    /// `params` entries without a value are dropped. A stream `body` is sent
    /// chunked for POST and PUT and buffered for other verbs.
    pub fn request(
        &mut self,
        method: HttpMethod,
        action: &str,
        mut body: Body,
        headers: &[(String, String)],
        params: &[(String, Option<String>)],
    ) -> Result<Response, ApiError> {
        if self.auth_token.is_none() {
            self.authenticate(false)?;
        }

        match self.send(method, action, &mut body, headers, params) {
            Err(ApiError::NotAuthorized(reason)) => {
                warn!(%method, action, "request not authorized, re-authenticating");
                self.authenticate(true)?;
                if !body.rewind()? {
                    warn!("request body cannot be replayed; not retrying");
                    return Err(ApiError::NotAuthorized(reason));
                }
                self.send(method, action, &mut body, headers, params)
            }
            other => other,
        }
    }

    /// One connect/send/receive/classify round.
    fn send(
        &self,
        method: HttpMethod,
        action: &str,
        body: &mut Body,
        headers: &[(String, String)],
        params: &[(String, Option<String>)],
    ) -> Result<Response, ApiError> {
        let target = build_action(self.config.doc_root.as_deref(), action, params);
        let headers = self.outgoing_headers(headers);

        let mut conn = transport::connect(&self.config)?;
        debug!(%method, %target, "sending request");

        match body {
            Body::Stream(source) if method.streams_body() => {
                let sent = send_chunked(&mut conn, method, &target, &headers, source)?;
                debug!(bytes = sent, "streamed request body");
            }
            Body::Stream(source) => {
                let mut buf = Vec::new();
                source.read_to_end(&mut buf)?;
                send_simple(&mut conn, method, &target, &headers, Some(buf.as_slice()))?;
            }
            Body::Bytes(bytes) => send_simple(&mut conn, method, &target, &headers, Some(bytes.as_slice()))?,
            Body::Empty => send_simple(&mut conn, method, &target, &headers, None)?,
        }

        let mut response = read_response(conn, method)?;
        let status = response.status();
        debug!(status, "received response");

        let outcome = classify(status);
        if !outcome.is_success() {
            let mut raw = Vec::new();
            response.read_to_end(&mut raw)?;
            outcome.into_result(String::from_utf8_lossy(&raw).into_owned())?;
        }
        Ok(response)
    }

    /// Caller headers plus `Host` and the auth token where missing.
    fn outgoing_headers(&self, headers: &[(String, String)]) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(headers.len() + 2);
        if !has_header_ignore_case(headers, "host") {
            out.push(("Host".to_string(), self.config.host_header()));
        }
        out.extend_from_slice(headers);
        if let Some(token) = &self.auth_token {
            if !has_header(headers, AUTH_TOKEN_HEADER) {
                out.push((AUTH_TOKEN_HEADER.to_string(), token.clone()));
            }
        }
        out
    }
}
