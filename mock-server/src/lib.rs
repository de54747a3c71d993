//! In-memory image service used to exercise the client end to end.
//!
//! Routes:
//! - `GET /v1.0` keystone v1 style token endpoint (`demo` / `secret`).
//! - `/v1/images...` image CRUD, guarded by the `x-auth-token` header.
//! - `GET /v1/status/{code}` answers with an arbitrary status.
//!
//! `Registry` is the shared state; tests keep a clone to expire tokens and
//! inspect how uploads arrived.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info};
use uuid::Uuid;

pub const USERNAME: &str = "demo";
pub const PASSWORD: &str = "secret";

const MAX_UPLOAD: usize = 256 * 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageMeta {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
}

/// How an upload arrived on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRecord {
    pub chunked: bool,
    pub content_length: Option<String>,
    pub size: usize,
}

#[derive(Default)]
struct Inner {
    images: HashMap<Uuid, (ImageMeta, Bytes)>,
    token: Option<String>,
    issued: u64,
    auth_calls: u64,
    uploads: Vec<UploadRecord>,
}

#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Invalidate the current token; the next request gets a 401.
    pub fn expire_tokens(&self) {
        self.lock().token = None;
    }

    /// Install a token as if it had been issued by the auth endpoint.
    pub fn issue_token(&self, token: &str) {
        self.lock().token = Some(token.to_string());
    }

    pub fn current_token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    /// Number of requests the auth endpoint has answered.
    pub fn auth_calls(&self) -> u64 {
        self.lock().auth_calls
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.lock().uploads.clone()
    }

    pub fn image_data(&self, id: Uuid) -> Option<Bytes> {
        self.lock().images.get(&id).map(|(_, data)| data.clone())
    }
}

pub fn app(registry: Registry) -> Router {
    let images = Router::new()
        .route("/images", get(list_images).post(create_image))
        .route("/images/{id}", get(get_image).put(update_image).delete(delete_image))
        .route("/status/{code}", get(forced_status))
        .route_layer(middleware::from_fn_with_state(registry.clone(), require_token));

    Router::new()
        .route("/v1.0", get(keystone_auth))
        .nest("/v1", images)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD))
        .with_state(registry)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, Registry::new()).await
}

pub async fn run_with(listener: TcpListener, registry: Registry) -> Result<(), std::io::Error> {
    axum::serve(listener, app(registry)).await
}

async fn keystone_auth(State(registry): State<Registry>, headers: HeaderMap) -> Response {
    let user = headers.get("x-auth-user").and_then(|v| v.to_str().ok());
    let key = headers.get("x-auth-key").and_then(|v| v.to_str().ok());

    let mut inner = registry.lock();
    inner.auth_calls += 1;
    if user != Some(USERNAME) || key != Some(PASSWORD) {
        return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    }

    inner.issued += 1;
    let token = format!("tok-{}", inner.issued);
    inner.token = Some(token.clone());
    info!(%token, "issued token");

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let management_url = format!("http://{host}/v1");

    let mut response = StatusCode::NO_CONTENT.into_response();
    let out = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&token) {
        out.insert("x-auth-token", v);
    }
    if let Ok(v) = HeaderValue::from_str(&management_url) {
        out.insert("x-server-management-url", v);
    }
    response
}

async fn require_token(State(registry): State<Registry>, req: Request, next: Next) -> Response {
    let authorized = {
        let presented = req.headers().get("x-auth-token").and_then(|v| v.to_str().ok());
        let valid = registry.lock().token.clone();
        presented.is_some() && presented == valid.as_deref()
    };
    if authorized {
        next.run(req).await
    } else {
        debug!(path = %req.uri().path(), "rejecting token");
        (StatusCode::UNAUTHORIZED, "token expired or invalid").into_response()
    }
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<String>,
    name: Option<String>,
}

async fn list_images(
    State(registry): State<Registry>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ImageMeta>>, (StatusCode, String)> {
    let limit = match query.limit {
        Some(raw) => Some(
            raw.parse::<usize>()
                .map_err(|_| (StatusCode::BAD_REQUEST, format!("limit must be an integer, got {raw}")))?,
        ),
        None => None,
    };

    let inner = registry.lock();
    let mut images: Vec<ImageMeta> = inner
        .images
        .values()
        .map(|(meta, _)| meta.clone())
        .filter(|meta| query.name.as_ref().is_none_or(|n| &meta.name == n))
        .collect();
    images.sort_by(|a, b| a.name.cmp(&b.name));
    if let Some(limit) = limit {
        images.truncate(limit);
    }
    Ok(Json(images))
}

fn record_upload(inner: &mut Inner, headers: &HeaderMap, size: usize) {
    let chunked = headers
        .get(header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    inner.uploads.push(UploadRecord {
        chunked,
        content_length,
        size,
    });
}

async fn create_image(
    State(registry): State<Registry>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ImageMeta>), (StatusCode, String)> {
    let name = headers
        .get("x-image-meta-name")
        .and_then(|v| v.to_str().ok())
        .ok_or((StatusCode::BAD_REQUEST, "x-image-meta-name is required".to_string()))?
        .to_string();

    let mut inner = registry.lock();
    record_upload(&mut inner, &headers, body.len());
    if inner.images.values().any(|(meta, _)| meta.name == name) {
        return Err((StatusCode::CONFLICT, format!("an image named {name} already exists")));
    }

    let meta = ImageMeta {
        id: Uuid::new_v4(),
        name,
        size: body.len() as u64,
    };
    info!(id = %meta.id, size = meta.size, "stored image");
    inner.images.insert(meta.id, (meta.clone(), body));
    Ok((StatusCode::CREATED, Json(meta)))
}

async fn get_image(State(registry): State<Registry>, Path(id): Path<Uuid>) -> Response {
    let inner = registry.lock();
    match inner.images.get(&id) {
        Some((meta, data)) => {
            let mut response = data.clone().into_response();
            if let Ok(v) = HeaderValue::from_str(&meta.name) {
                response.headers_mut().insert("x-image-meta-name", v);
            }
            response
        }
        None => (StatusCode::NOT_FOUND, format!("no image with id {id}")).into_response(),
    }
}

async fn update_image(
    State(registry): State<Registry>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ImageMeta>, (StatusCode, String)> {
    let mut inner = registry.lock();
    record_upload(&mut inner, &headers, body.len());
    let (meta, data) = inner
        .images
        .get_mut(&id)
        .ok_or((StatusCode::NOT_FOUND, format!("no image with id {id}")))?;
    meta.size = body.len() as u64;
    *data = body;
    Ok(Json(meta.clone()))
}

async fn delete_image(State(registry): State<Registry>, Path(id): Path<Uuid>) -> Result<StatusCode, (StatusCode, String)> {
    let mut inner = registry.lock();
    inner
        .images
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or((StatusCode::NOT_FOUND, format!("no image with id {id}")))
}

async fn forced_status(Path(code): Path<u16>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, format!("forced {code}")).into_response()
}
