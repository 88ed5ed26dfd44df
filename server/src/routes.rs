//! HTTP routes for the Postboard server.
//!
//! - `POST /auth/signup`, `POST /auth/login` - account endpoints, no auth
//! - `/feed/...` and `PUT /post-image` - REST API, strict auth
//! - `POST /graphql` - GraphQL API, soft auth; `GET /graphql` serves GraphiQL
//! - `GET /ws` - realtime feed events
//! - `GET /images/*` - uploaded images
//! - `GET /health` - health check
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use postboard_server::config::Config;
//! use postboard_server::routes::{create_router, AppState};
//! use postboard_server::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config, Arc::new(MemoryStore::new()));
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State, WebSocketUpgrade,
    },
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, StatusCode,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};

use crate::auth::AuthService;
use crate::broadcast::FeedBroadcaster;
use crate::config::Config;
use crate::error::ServerError;
use crate::feed::{FeedService, PostInput};
use crate::graphql::{create_schema, graphiql, graphql_handler, Schema};
use crate::images::{ImageStore, IMAGE_PREFIX};
use crate::middleware::{soft_auth, strict_auth, AppJson, CurrentUser};
use crate::store::Store;
use crate::types::{CreatorView, PostView, UserId};

/// Maximum request body size, uploads included (10 MB).
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

const NO_FILE_PICKED_MESSAGE: &str = "No file picked.";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    pub auth: AuthService,

    pub feed: FeedService,

    /// The one broadcaster feed events go through. Also shared by `feed`.
    pub broadcaster: FeedBroadcaster,

    pub schema: Arc<Schema>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wires the services together over `store`.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let broadcaster = FeedBroadcaster::new();
        let images = ImageStore::new(config.image_dir.clone(), config.public_url.clone());
        let auth = AuthService::new(store.clone(), &config.jwt_secret, config.bcrypt_cost);
        let feed = FeedService::new(store, images, broadcaster.clone());

        Self {
            config: Arc::new(config),
            auth,
            feed,
            broadcaster,
            schema: Arc::new(create_schema()),
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("broadcaster", &self.broadcaster)
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with every route and layer configured.
pub fn create_router(state: AppState) -> Router {
    let rest = Router::new()
        .route("/feed/posts", get(get_posts))
        .route("/feed/post", post(create_post))
        .route(
            "/feed/post/{id}",
            get(get_post).put(update_post).delete(delete_post),
        )
        .route("/feed/status", get(get_status).patch(update_status))
        .route("/post-image", put(put_post_image))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            strict_auth,
        ));

    let graphql = Router::new()
        .route("/graphql", post(graphql_handler).get(graphiql))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), soft_auth));

    let images = ServeDir::new(state.config.image_dir.clone());

    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .merge(rest)
        .merge(graphql)
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .nest_service(&format!("/{IMAGE_PREFIX}"), images)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Any origin may call the API with a bearer token.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
}

// ============================================================================
// Response bodies
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub message: String,
    pub user_id: UserId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user_id: UserId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostsResponse {
    pub message: String,
    pub posts: Vec<PostView>,
    pub total_items: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePostResponse {
    pub message: String,
    pub post: PostView,
    pub creator: CreatorView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub message: String,
    pub post: PostView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub message: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub message: String,
    pub file_path: String,
}

fn message(text: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.to_string(),
    })
}

// ============================================================================
// POST /auth/signup, POST /auth/login
// ============================================================================

/// Missing fields deserialize as empty strings so they fail validation
/// with field details instead of a bare JSON rejection.
#[derive(Debug, Deserialize)]
struct SignupRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

async fn signup(
    State(state): State<AppState>,
    AppJson(body): AppJson<SignupRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let user = state
        .auth
        .signup(&body.email, &body.password, &body.name)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "User created!".to_string(),
            user_id: user.id,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    AppJson(body): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ServerError> {
    let token = state.auth.login(&body.email, &body.password).await?;
    Ok(Json(LoginResponse {
        token: token.token,
        user_id: token.user_id,
    }))
}

// ============================================================================
// /feed
// ============================================================================

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<String>,
}

impl PageQuery {
    /// Missing or unparsable pages mean page 1.
    fn page(&self) -> i64 {
        self.page
            .as_deref()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(1)
    }
}

async fn get_posts(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PostsResponse>, ServerError> {
    let page = state.feed.list_posts(query.page()).await?;
    Ok(Json(PostsResponse {
        message: "Posts fetched successfully!".to_string(),
        posts: page.posts.iter().map(PostView::from).collect(),
        total_items: page.total_items,
    }))
}

/// A file part of a multipart body.
struct Upload {
    file_name: String,
    bytes: Vec<u8>,
}

/// The fields the feed endpoints read from multipart bodies.
#[derive(Default)]
struct PostForm {
    title: String,
    content: String,
    /// `image` sent as a text field: an existing image reference.
    image: Option<String>,
    old_path: Option<String>,
    /// `image` sent as an accepted image file.
    upload: Option<Upload>,
}

fn form_error(err: impl std::fmt::Display) -> ServerError {
    ServerError::validation(format!("Invalid form data: {err}"))
}

impl<S: Send + Sync> FromRequest<S> for PostForm {
    type Rejection = ServerError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let multipart = Multipart::from_request(request, state).await?;
        read_post_form(multipart).await
    }
}

async fn read_post_form(mut multipart: Multipart) -> Result<PostForm, ServerError> {
    let mut form = PostForm::default();

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "image" {
            if let Some(file_name) = field.file_name().map(str::to_string) {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(form_error)?;
                if ImageStore::accepts(content_type.as_deref()) {
                    form.upload = Some(Upload {
                        file_name,
                        bytes: bytes.to_vec(),
                    });
                } else {
                    debug!(content_type = ?content_type, "Ignoring upload with unsupported type");
                }
                continue;
            }
        }

        let value = field.text().await.map_err(form_error)?;
        match name.as_str() {
            "title" => form.title = value,
            "content" => form.content = value,
            "image" => form.image = Some(value).filter(|v| !v.trim().is_empty()),
            "oldPath" => form.old_path = Some(value).filter(|v| !v.trim().is_empty()),
            other => trace!(field = %other, "Ignoring form field"),
        }
    }

    Ok(form)
}

async fn store_upload(images: &ImageStore, upload: Option<Upload>) -> Result<Option<String>, ServerError> {
    match upload {
        Some(upload) => images.save(&upload.file_name, &upload.bytes).await.map(Some),
        None => Ok(None),
    }
}

async fn create_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    form: PostForm,
) -> Result<impl IntoResponse, ServerError> {
    let images = state.feed.images();
    let stored = store_upload(images, form.upload).await?;

    let input = PostInput {
        title: form.title,
        content: form.content,
        image_url: stored.clone(),
    };
    let created = match state.feed.create_post(user.user_id, input).await {
        Ok(created) => created,
        Err(err) => {
            if let Some(stored) = stored {
                images.clear(&stored);
            }
            return Err(err);
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(CreatePostResponse {
            message: "Post created successfully".to_string(),
            post: PostView::from(&created),
            creator: CreatorView::from(&created.creator),
        }),
    ))
}

async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PostResponse>, ServerError> {
    let post = state.feed.get_post(&id).await?;
    Ok(Json(PostResponse {
        message: "Detailed post fetched".to_string(),
        post: PostView::from(&post),
    }))
}

async fn update_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    form: PostForm,
) -> Result<Json<PostResponse>, ServerError> {
    let images = state.feed.images();
    let stored = store_upload(images, form.upload).await?;

    let Some(image_url) = stored.clone().or(form.image) else {
        return Err(ServerError::validation(NO_FILE_PICKED_MESSAGE));
    };

    let input = PostInput {
        title: form.title,
        content: form.content,
        image_url: Some(image_url),
    };
    let updated = match state.feed.update_post(&id, user.user_id, input).await {
        Ok(updated) => updated,
        Err(err) => {
            if let Some(stored) = stored {
                images.clear(&stored);
            }
            return Err(err);
        }
    };

    Ok(Json(PostResponse {
        message: "Post updated".to_string(),
        post: PostView::from(&updated),
    }))
}

async fn delete_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ServerError> {
    state.feed.delete_post(&id, user.user_id).await?;
    Ok(message("Deleted post."))
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    #[serde(default)]
    status: String,
}

async fn get_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<StatusResponse>, ServerError> {
    let status = state.feed.get_status(user.user_id).await?;
    Ok(Json(StatusResponse {
        message: "Status fetched".to_string(),
        status,
    }))
}

async fn update_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(body): AppJson<StatusRequest>,
) -> Result<Json<StatusResponse>, ServerError> {
    let status = state.feed.set_status(user.user_id, &body.status).await?;
    Ok(Json(StatusResponse {
        message: "Status Updated!".to_string(),
        status,
    }))
}

// ============================================================================
// PUT /post-image - uploads for GraphQL clients
// ============================================================================

async fn put_post_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    form: PostForm,
) -> Result<Response, ServerError> {
    let images = state.feed.images();

    let Some(file_path) = store_upload(images, form.upload).await? else {
        return Ok((StatusCode::OK, message("No file provided!")).into_response());
    };
    if let Some(old_path) = form.old_path {
        images.clear(&old_path);
    }

    info!(user_id = %user.user_id, file = %file_path, "Image uploaded");
    Ok((
        StatusCode::CREATED,
        Json(ImageResponse {
            message: "File stored.".to_string(),
            file_path,
        }),
    )
        .into_response())
}

// ============================================================================
// GET /ws - realtime feed events
// ============================================================================

async fn get_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    info!("WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_websocket(socket, state.broadcaster))
}

/// Forwards every feed event to the client until either side goes away.
async fn handle_websocket(socket: WebSocket, broadcaster: FeedBroadcaster) {
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = broadcaster.subscribe();

    info!("WebSocket client connected");

    let forward_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => match event.to_frame() {
                    Ok(frame) => {
                        trace!(post_id = %event.post_id(), "Sending feed event to WebSocket client");
                        if let Err(err) = sender.send(Message::Text(frame.into())).await {
                            debug!(error = %err, "Failed to send feed event to WebSocket client");
                            break;
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "Failed to serialize feed event");
                    }
                },
                Err(RecvError::Lagged(count)) => {
                    warn!(skipped = count, "WebSocket client lagged, skipped events");
                }
                Err(RecvError::Closed) => {
                    debug!("Feed broadcaster closed");
                    break;
                }
            }
        }
    });

    // Clients never send anything meaningful; just wait for them to leave.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client sent close frame");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "WebSocket error");
                break;
            }
        }
    }

    forward_task.abort();
    info!("WebSocket client disconnected");
}

// ============================================================================
// GET /health
// ============================================================================

/// Response body for the health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok" if responding.
    pub status: String,

    /// Number of connected realtime clients.
    pub connections: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: state.broadcaster.subscriber_count(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
