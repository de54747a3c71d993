//! Authentication plugins.
//!
//! # Design
//! The client only needs the `AuthPlugin` capability. The strategies that
//! ship with the crate form a closed set, chosen once from the `strategy`
//! credential and wrapped in the `Auth` enum, so dispatch is static. Tests
//! and embedders can still hand the client their own `AuthPlugin`.

use std::collections::HashMap;

use tracing::{debug, info};
use url::Url;

use crate::config::ConnectionConfig;
use crate::error::ApiError;
use crate::http::HttpMethod;
use crate::response::read_response;
use crate::sender::send_simple;
use crate::transport;

/// Opaque credential map handed to the plugin. `strategy` selects it.
pub type Credentials = HashMap<String, String>;

/// Errors raised while obtaining a token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unknown auth strategy '{0}'")]
    UnknownStrategy(String),

    #[error("missing required credential '{0}'")]
    MissingCredential(&'static str),

    /// The auth service refused the credentials.
    #[error("credentials rejected: {0}")]
    Rejected(String),

    #[error("unexpected auth response (HTTP {status}): {body}")]
    Unexpected { status: u16, body: String },

    #[error(transparent)]
    Transport(#[from] ApiError),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Rejected(body) => ApiError::NotAuthorized(body),
            AuthError::Transport(inner) => inner,
            other => ApiError::Authentication(other.to_string()),
        }
    }
}

/// What the client needs from an authentication strategy.
pub trait AuthPlugin {
    fn is_authenticated(&self) -> bool;

    /// Obtain a fresh token, replacing any previous one.
    fn authenticate(&mut self) -> Result<(), AuthError>;

    fn auth_token(&self) -> Option<&str>;

    /// Endpoint the service should be reached at, when the auth service
    /// reports one.
    fn management_url(&self) -> Option<&str>;
}

/// The built-in strategies.
#[derive(Debug, Clone)]
pub enum Auth {
    NoAuth(NoAuth),
    Keystone(KeystoneAuth),
}

impl Auth {
    /// Pick a strategy from `creds["strategy"]`, defaulting to `noauth`.
    pub fn from_credentials(creds: Credentials) -> Result<Self, AuthError> {
        let strategy = creds.get("strategy").map(String::as_str).unwrap_or("noauth");
        match strategy {
            "noauth" => Ok(Auth::NoAuth(NoAuth)),
            "keystone" => Ok(Auth::Keystone(KeystoneAuth::new(creds))),
            other => Err(AuthError::UnknownStrategy(other.to_string())),
        }
    }
}

impl AuthPlugin for Auth {
    fn is_authenticated(&self) -> bool {
        match self {
            Auth::NoAuth(p) => p.is_authenticated(),
            Auth::Keystone(p) => p.is_authenticated(),
        }
    }

    fn authenticate(&mut self) -> Result<(), AuthError> {
        match self {
            Auth::NoAuth(p) => p.authenticate(),
            Auth::Keystone(p) => p.authenticate(),
        }
    }

    fn auth_token(&self) -> Option<&str> {
        match self {
            Auth::NoAuth(p) => p.auth_token(),
            Auth::Keystone(p) => p.auth_token(),
        }
    }

    fn management_url(&self) -> Option<&str> {
        match self {
            Auth::NoAuth(p) => p.management_url(),
            Auth::Keystone(p) => p.management_url(),
        }
    }
}

/// No authentication: always authenticated, never a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl AuthPlugin for NoAuth {
    fn is_authenticated(&self) -> bool {
        true
    }

    fn authenticate(&mut self) -> Result<(), AuthError> {
        Ok(())
    }

    fn auth_token(&self) -> Option<&str> {
        None
    }

    fn management_url(&self) -> Option<&str> {
        None
    }
}

/// Keystone v1 token authentication.
///
/// Sends `GET <auth_url>` with `X-Auth-User`/`X-Auth-Key` and reads the token
/// from `X-Auth-Token` and the service endpoint from
/// `X-Server-Management-Url`. A `305 Use Proxy` is followed once.
#[derive(Debug, Clone)]
pub struct KeystoneAuth {
    creds: Credentials,
    token: Option<String>,
    management_url: Option<String>,
}

impl KeystoneAuth {
    pub fn new(creds: Credentials) -> Self {
        Self {
            creds,
            token: None,
            management_url: None,
        }
    }

    fn credential(&self, name: &'static str) -> Result<&str, AuthError> {
        self.creds
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingCredential(name))
    }

    fn request_token(&self, auth_url: &str) -> Result<TokenReply, AuthError> {
        let url = Url::parse(auth_url).map_err(ApiError::from)?;
        let config = ConnectionConfig::from_url(auth_url)?;

        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut headers = vec![
            ("Host".to_string(), config.host_header()),
            ("X-Auth-User".to_string(), self.credential("username")?.to_string()),
            ("X-Auth-Key".to_string(), self.credential("password")?.to_string()),
        ];
        if let Ok(tenant) = self.credential("tenant") {
            headers.push(("X-Auth-Tenant".to_string(), tenant.to_string()));
        }

        debug!(url = auth_url, "requesting keystone token");
        let mut conn = transport::connect(&config)?;
        send_simple(&mut conn, HttpMethod::Get, &target, &headers, None).map_err(ApiError::from)?;
        let resp = read_response(conn, HttpMethod::Get)?;

        match resp.status() {
            200 | 204 => {
                let token = resp
                    .header("x-auth-token")
                    .map(str::to_string)
                    .ok_or_else(|| AuthError::Unexpected {
                        status: resp.status(),
                        body: "response carried no X-Auth-Token".to_string(),
                    })?;
                let management_url = resp.header("x-server-management-url").map(str::to_string);
                Ok(TokenReply::Token { token, management_url })
            }
            305 => {
                let location = resp.header("location").map(str::to_string);
                location.map(TokenReply::Redirect).ok_or_else(|| AuthError::Unexpected {
                    status: 305,
                    body: "redirect without Location".to_string(),
                })
            }
            401 => Err(AuthError::Rejected(resp.text()?)),
            status => Err(AuthError::Unexpected {
                status,
                body: resp.text()?,
            }),
        }
    }
}

enum TokenReply {
    Token { token: String, management_url: Option<String> },
    Redirect(String),
}

impl AuthPlugin for KeystoneAuth {
    fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn authenticate(&mut self) -> Result<(), AuthError> {
        let mut auth_url = self.credential("auth_url")?.to_string();
        self.credential("username")?;
        self.credential("password")?;

        for _ in 0..2 {
            match self.request_token(&auth_url)? {
                TokenReply::Token { token, management_url } => {
                    info!(management_url = management_url.as_deref(), "keystone authentication succeeded");
                    self.token = Some(token);
                    self.management_url = management_url;
                    return Ok(());
                }
                TokenReply::Redirect(location) => {
                    debug!(%location, "keystone redirected");
                    auth_url = location;
                }
            }
        }
        Err(AuthError::Unexpected {
            status: 305,
            body: "too many redirects".to_string(),
        })
    }

    fn auth_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn management_url(&self) -> Option<&str> {
        self.management_url.as_deref()
    }
}
