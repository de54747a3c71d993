use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, ImageMeta, Registry, PASSWORD, USERNAME};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn authed(method: &str, uri: &str, token: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-auth-token", token)
        .body(body.to_string())
        .unwrap()
}

fn upload(name: &str, token: &str, body: &str) -> Request<String> {
    Request::builder()
        .method("POST")
        .uri("/v1/images")
        .header("x-auth-token", token)
        .header("x-image-meta-name", name)
        .body(body.to_string())
        .unwrap()
}

fn registry_with_token() -> Registry {
    let registry = Registry::new();
    registry.issue_token("tok-test");
    registry
}

// --- auth ---

#[tokio::test]
async fn keystone_issues_token_and_management_url() {
    let registry = Registry::new();
    let resp = app(registry.clone())
        .oneshot(
            Request::builder()
                .uri("/v1.0")
                .header("host", "images.local:9292")
                .header("x-auth-user", USERNAME)
                .header("x-auth-key", PASSWORD)
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(resp.headers()["x-auth-token"], "tok-1");
    assert_eq!(resp.headers()["x-server-management-url"], "http://images.local:9292/v1");
    assert_eq!(registry.current_token().as_deref(), Some("tok-1"));
    assert_eq!(registry.auth_calls(), 1);
}

#[tokio::test]
async fn keystone_rejects_bad_key() {
    let registry = Registry::new();
    let resp = app(registry.clone())
        .oneshot(
            Request::builder()
                .uri("/v1.0")
                .header("x-auth-user", USERNAME)
                .header("x-auth-key", "wrong")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(registry.current_token().is_none());
}

#[tokio::test]
async fn images_require_current_token() {
    let registry = registry_with_token();

    let resp = app(registry.clone())
        .oneshot(authed("GET", "/v1/images", "tok-stale", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    registry.expire_tokens();
    let resp = app(registry)
        .oneshot(authed("GET", "/v1/images", "tok-test", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// --- images ---

#[tokio::test]
async fn list_images_empty() {
    let resp = app(registry_with_token())
        .oneshot(authed("GET", "/v1/images", "tok-test", ""))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let images: Vec<ImageMeta> = body_json(resp).await;
    assert!(images.is_empty());
}

#[tokio::test]
async fn upload_then_download() {
    let registry = registry_with_token();

    let resp = app(registry.clone())
        .oneshot(upload("cirros", "tok-test", "disk bytes"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let meta: ImageMeta = body_json(resp).await;
    assert_eq!(meta.name, "cirros");
    assert_eq!(meta.size, 10);

    let resp = app(registry.clone())
        .oneshot(authed("GET", &format!("/v1/images/{}", meta.id), "tok-test", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-image-meta-name"], "cirros");
    assert_eq!(body_bytes(resp).await, "disk bytes");

    let uploads = registry.uploads();
    assert_eq!(uploads.len(), 1);
    assert!(!uploads[0].chunked);
}

#[tokio::test]
async fn duplicate_name_returns_409() {
    let registry = registry_with_token();
    app(registry.clone())
        .oneshot(upload("cirros", "tok-test", "a"))
        .await
        .unwrap();

    let resp = app(registry)
        .oneshot(upload("cirros", "tok-test", "b"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn upload_without_name_returns_400() {
    let resp = app(registry_with_token())
        .oneshot(authed("POST", "/v1/images", "tok-test", "data"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bad_limit_returns_400() {
    let resp = app(registry_with_token())
        .oneshot(authed("GET", "/v1/images?limit=many", "tok-test", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_unknown_image_returns_404() {
    let resp = app(registry_with_token())
        .oneshot(authed(
            "GET",
            "/v1/images/00000000-0000-0000-0000-000000000000",
            "tok-test",
            "",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_and_delete_image() {
    let registry = registry_with_token();
    let resp = app(registry.clone())
        .oneshot(upload("fedora", "tok-test", "v1"))
        .await
        .unwrap();
    let meta: ImageMeta = body_json(resp).await;

    let resp = app(registry.clone())
        .oneshot(authed("PUT", &format!("/v1/images/{}", meta.id), "tok-test", "version two"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: ImageMeta = body_json(resp).await;
    assert_eq!(updated.size, 11);
    assert_eq!(registry.image_data(meta.id).unwrap(), "version two");

    let resp = app(registry.clone())
        .oneshot(authed("DELETE", &format!("/v1/images/{}", meta.id), "tok-test", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app(registry)
        .oneshot(authed("DELETE", &format!("/v1/images/{}", meta.id), "tok-test", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn forced_status_echoes_code() {
    let resp = app(registry_with_token())
        .oneshot(authed("GET", "/v1/status/418", "tok-test", ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(body_bytes(resp).await, "forced 418");
}
