//! End-to-end tests for the REST API.
//!
//! These tests drive the full router with multipart uploads:
//! - Post creation, pagination and lookup
//! - Ownership checks on update and delete
//! - Realtime events published for each change
//! - Standalone image uploads through `PUT /post-image`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_test::assert_ok;
use tower::ServiceExt;

use postboard_server::broadcast::{EventPost, FeedAction};
use postboard_server::config::Config;
use postboard_server::routes::{create_router, AppState};
use postboard_server::store::MemoryStore;

const PUBLIC_URL: &str = "http://feed.test";

// ============================================================================
// Test Helpers
// ============================================================================

struct TestApp {
    state: AppState,
    dir: TempDir,
}

impl TestApp {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new("feed-api-test-secret");
        config.image_dir = dir.path().join("images");
        config.public_url = PUBLIC_URL.to_string();
        config.bcrypt_cost = 4;

        let state = AppState::new(config, Arc::new(MemoryStore::new()));
        Self { state, dir }
    }

    fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    fn image_path(&self, reference: &str) -> std::path::PathBuf {
        self.dir
            .path()
            .join("images")
            .join(reference.trim_start_matches("images/"))
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .uri(uri)
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn form(&self, method: Method, uri: &str, token: &str, form: MultipartForm) -> (StatusCode, Value) {
        let (content_type, body) = form.finish();
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .header(CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// Signs up and logs in, returning `(token, user_id)`.
    async fn register(&self, email: &str, name: &str) -> (String, String) {
        let (status, _) = self
            .json(
                Method::POST,
                "/auth/signup",
                None,
                json!({"email": email, "password": "secret", "name": name}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = self
            .json(
                Method::POST,
                "/auth/login",
                None,
                json!({"email": email, "password": "secret"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        (
            body["token"].as_str().unwrap().to_string(),
            body["userId"].as_str().unwrap().to_string(),
        )
    }

    async fn create_post(&self, token: &str, title: &str) -> Value {
        let form = MultipartForm::new()
            .text("title", title)
            .text("content", "Some content for the feed")
            .file("image", "photo.png", "image/png", b"fake-png");
        let (status, body) = self.form(Method::POST, "/feed/post", token, form).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }
}

/// Minimal `multipart/form-data` encoder.
struct MultipartForm {
    body: Vec<u8>,
}

const BOUNDARY: &str = "postboard-test-boundary";

impl MultipartForm {
    fn new() -> Self {
        Self { body: Vec::new() }
    }

    fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    fn file(mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={BOUNDARY}"), self.body)
    }
}

/// Waits for a background image deletion to land.
async fn wait_until_removed(path: &Path) -> bool {
    for _ in 0..50 {
        if !path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ============================================================================
// Posts
// ============================================================================

#[tokio::test]
async fn create_post_stores_image_and_returns_creator() {
    let app = TestApp::new();
    let (token, user_id) = app.register("max@test.com", "Max").await;

    let body = app.create_post(&token, "First post").await;

    assert_eq!(body["message"], "Post created successfully");
    assert_eq!(body["creator"]["_id"], user_id);
    assert_eq!(body["creator"]["name"], "Max");
    assert_eq!(body["post"]["title"], "First post");

    let image = body["post"]["imageUrl"].as_str().unwrap();
    assert!(image.starts_with("images/"), "{image}");
    assert!(image.ends_with("-photo.png"), "{image}");
    assert_eq!(std::fs::read(app.image_path(image)).unwrap(), b"fake-png");
}

#[tokio::test]
async fn create_post_without_image_is_rejected() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;

    let form = MultipartForm::new()
        .text("title", "No picture")
        .text("content", "Some content for the feed");
    let (status, body) = app.form(Method::POST, "/feed/post", &token, form).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "No image provided.");
}

#[tokio::test]
async fn unsupported_upload_types_are_ignored() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;

    let form = MultipartForm::new()
        .text("title", "Text file")
        .text("content", "Some content for the feed")
        .file("image", "notes.txt", "text/plain", b"hello");
    let (status, body) = app.form(Method::POST, "/feed/post", &token, form).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "No image provided.");
}

#[tokio::test]
async fn create_post_with_short_title_reports_field_errors() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;

    let form = MultipartForm::new()
        .text("title", "abc")
        .text("content", "Some content for the feed")
        .file("image", "photo.png", "image/png", b"fake-png");
    let (status, body) = app.form(Method::POST, "/feed/post", &token, form).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "Validation failed, entered data is incorrect.");
    assert_eq!(body["data"][0]["field"], "title");
}

#[tokio::test]
async fn feed_is_paginated_newest_first() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;
    for n in 1..=5 {
        app.create_post(&token, &format!("Post number {n}")).await;
    }

    let (status, body) = app.get("/feed/posts?page=1", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalItems"], 5);
    let titles: Vec<&str> = body["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Post number 5", "Post number 4"]);
    assert_eq!(body["posts"][0]["creator"]["name"], "Max");

    let (_, body) = app.get("/feed/posts?page=3", &token).await;
    assert_eq!(body["posts"].as_array().unwrap().len(), 1);
    assert_eq!(body["posts"][0]["title"], "Post number 1");

    let (_, body) = app.get("/feed/posts?page=4", &token).await;
    assert_eq!(body["posts"], json!([]));
    assert_eq!(body["totalItems"], 5);

    let (_, body) = app.get("/feed/posts", &token).await;
    assert_eq!(body["posts"][0]["title"], "Post number 5");
}

#[tokio::test]
async fn single_post_has_public_image_url() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;
    let created = app.create_post(&token, "Look at this").await;
    let id = created["post"]["_id"].as_str().unwrap();
    let reference = created["post"]["imageUrl"].as_str().unwrap();

    let (status, body) = app.get(&format!("/feed/post/{id}"), &token).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Detailed post fetched");
    assert_eq!(body["post"]["imageUrl"], format!("{PUBLIC_URL}/{reference}"));
    assert_eq!(body["post"]["creator"]["name"], "Max");
}

#[tokio::test]
async fn malformed_post_id_is_not_found() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;

    let (status, body) = app.get("/feed/post/not-an-id", &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Could not find post.");
}

// ============================================================================
// Ownership
// ============================================================================

#[tokio::test]
async fn only_the_creator_may_update_or_delete() {
    let app = TestApp::new();
    let (owner, _) = app.register("owner@test.com", "Owner").await;
    let (other, _) = app.register("other@test.com", "Other").await;
    let created = app.create_post(&owner, "Owned post").await;
    let id = created["post"]["_id"].as_str().unwrap();
    let uri = format!("/feed/post/{id}");

    let form = MultipartForm::new()
        .text("title", "Hijacked title")
        .text("content", "Hijacked content")
        .text("image", created["post"]["imageUrl"].as_str().unwrap());
    let (status, body) = app.form(Method::PUT, &uri, &other, form).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Not authorized!");

    let (status, _) = app
        .send(
            Request::builder()
                .method(Method::DELETE)
                .uri(&uri)
                .header(AUTHORIZATION, format!("Bearer {other}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = app.get(&uri, &owner).await;
    assert_eq!(body["post"]["title"], "Owned post");
}

#[tokio::test]
async fn update_keeps_image_given_as_text_field() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;
    let created = app.create_post(&token, "Original title").await;
    let id = created["post"]["_id"].as_str().unwrap();
    let reference = created["post"]["imageUrl"].as_str().unwrap();

    // Clients echo back the public URL they were given.
    let form = MultipartForm::new()
        .text("title", "Edited title")
        .text("content", "Edited content")
        .text("image", &format!("{PUBLIC_URL}/{reference}"));
    let (status, body) = app
        .form(Method::PUT, &format!("/feed/post/{id}"), &token, form)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Post updated");
    assert_eq!(body["post"]["title"], "Edited title");
    assert_eq!(body["post"]["imageUrl"], reference);
    assert!(app.image_path(reference).exists());
}

#[tokio::test]
async fn update_with_new_upload_replaces_old_image() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;
    let created = app.create_post(&token, "Original title").await;
    let id = created["post"]["_id"].as_str().unwrap();
    let old_reference = created["post"]["imageUrl"].as_str().unwrap();

    let form = MultipartForm::new()
        .text("title", "Edited title")
        .text("content", "Edited content")
        .file("image", "new.jpg", "image/jpeg", b"fake-jpeg");
    let (status, body) = app
        .form(Method::PUT, &format!("/feed/post/{id}"), &token, form)
        .await;

    assert_eq!(status, StatusCode::OK);
    let new_reference = body["post"]["imageUrl"].as_str().unwrap();
    assert_ne!(new_reference, old_reference);
    assert!(new_reference.ends_with("-new.jpg"));
    assert!(wait_until_removed(&app.image_path(old_reference)).await);
}

#[tokio::test]
async fn update_without_any_image_is_rejected() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;
    let created = app.create_post(&token, "Original title").await;
    let id = created["post"]["_id"].as_str().unwrap();

    let form = MultipartForm::new()
        .text("title", "Edited title")
        .text("content", "Edited content");
    let (status, body) = app
        .form(Method::PUT, &format!("/feed/post/{id}"), &token, form)
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "No file picked.");
}

#[tokio::test]
async fn delete_removes_post_and_image() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;
    let created = app.create_post(&token, "Short lived").await;
    let id = created["post"]["_id"].as_str().unwrap();
    let reference = created["post"]["imageUrl"].as_str().unwrap();
    let uri = format!("/feed/post/{id}");

    let (status, body) = app
        .send(
            Request::builder()
                .method(Method::DELETE)
                .uri(&uri)
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Deleted post.");

    let (status, _) = app.get(&uri, &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(wait_until_removed(&app.image_path(reference)).await);

    let (_, body) = app.get("/feed/posts", &token).await;
    assert_eq!(body["totalItems"], 0);
}

// ============================================================================
// Realtime events
// ============================================================================

#[tokio::test]
async fn every_change_is_broadcast() {
    let app = TestApp::new();
    let mut events = app.state.broadcaster.subscribe();
    let (token, _) = app.register("max@test.com", "Max").await;

    let created = app.create_post(&token, "Broadcast me").await;
    let id = created["post"]["_id"].as_str().unwrap().to_string();

    let form = MultipartForm::new()
        .text("title", "Broadcast again")
        .text("content", "Some content for the feed")
        .text("image", created["post"]["imageUrl"].as_str().unwrap());
    let (status, _) = app
        .form(Method::PUT, &format!("/feed/post/{id}"), &token, form)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/feed/post/{id}"))
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let create = assert_ok!(events.try_recv());
    assert_eq!(create.action, FeedAction::Create);
    assert_eq!(create.post_id().to_string(), id);
    assert_eq!(create.creator.as_ref().unwrap().name, "Max");

    let update = assert_ok!(events.try_recv());
    assert_eq!(update.action, FeedAction::Update);
    match &update.post {
        EventPost::Post(view) => assert_eq!(view.title, "Broadcast again"),
        EventPost::Deleted(_) => panic!("update event should carry the post"),
    }

    let delete = assert_ok!(events.try_recv());
    assert_eq!(delete.action, FeedAction::Delete);
    assert!(matches!(delete.post, EventPost::Deleted(_)));

    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn rejected_changes_are_not_broadcast() {
    let app = TestApp::new();
    let (owner, _) = app.register("owner@test.com", "Owner").await;
    let (other, _) = app.register("other@test.com", "Other").await;
    let created = app.create_post(&owner, "Owned post").await;
    let id = created["post"]["_id"].as_str().unwrap();

    let mut events = app.state.broadcaster.subscribe();
    let (status, _) = app
        .send(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/feed/post/{id}"))
                .header(AUTHORIZATION, format!("Bearer {other}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(events.try_recv().is_err());
}

// ============================================================================
// Status and image uploads
// ============================================================================

#[tokio::test]
async fn new_users_have_default_status() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;

    let (status, body) = app.get("/feed/status", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Status fetched");
    assert_eq!(body["status"], "I am new!");
}

#[tokio::test]
async fn status_is_stored_verbatim() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;

    for value in ["  spaced out  ", ""] {
        let (status, body) = app
            .json(Method::PATCH, "/feed/status", Some(&token), json!({"status": value}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], value);

        let (_, body) = app.get("/feed/status", &token).await;
        assert_eq!(body["status"], value);
    }
}

#[tokio::test]
async fn post_image_without_file_reports_nothing_stored() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;

    let form = MultipartForm::new().text("oldPath", "images/missing.png");
    let (status, body) = app.form(Method::PUT, "/post-image", &token, form).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No file provided!");
}

#[tokio::test]
async fn post_image_stores_file_and_clears_old_path() {
    let app = TestApp::new();
    let (token, _) = app.register("max@test.com", "Max").await;

    let form = MultipartForm::new().file("image", "first.png", "image/png", b"one");
    let (status, body) = app.form(Method::PUT, "/post-image", &token, form).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "File stored.");
    let first = body["filePath"].as_str().unwrap().to_string();
    assert!(app.image_path(&first).exists());

    let form = MultipartForm::new()
        .file("image", "second.png", "image/png", b"two")
        .text("oldPath", &first);
    let (status, body) = app.form(Method::PUT, "/post-image", &token, form).await;
    assert_eq!(status, StatusCode::CREATED);
    let second = body["filePath"].as_str().unwrap();
    assert!(app.image_path(second).exists());
    assert!(wait_until_removed(&app.image_path(&first)).await);
}

#[tokio::test]
async fn post_image_requires_a_token() {
    let app = TestApp::new();
    let (content_type, body) = MultipartForm::new()
        .file("image", "photo.png", "image/png", b"png")
        .finish();

    let (status, _) = app
        .send(
            Request::builder()
                .method(Method::PUT)
                .uri("/post-image")
                .header(CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
