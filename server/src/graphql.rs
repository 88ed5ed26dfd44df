//! GraphQL transport.
//!
//! One endpoint, `POST /graphql`, serves the schema below. Requests pass
//! through the soft auth middleware, so every resolver that needs a user
//! checks [`Viewer::require`] itself and fails with status 401 otherwise.
//!
//! Resolver errors are [`ServerError`]s. They travel through juniper as field
//! errors whose extensions carry `status` and `data`, and
//! [`normalize_errors`] lifts those into the `{message, status, data}` shape
//! clients receive.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, SecondsFormat, Utc};
use juniper::http::graphiql::graphiql_source;
use juniper::http::GraphQLRequest;
use juniper::{
    EmptySubscription, FieldError, GraphQLInputObject, GraphQLObject, IntoFieldError, Object,
    RootNode, ScalarValue, Value,
};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, error};

use crate::auth::{AuthService, Viewer};
use crate::middleware::AppJson;
use crate::error::ServerError;
use crate::feed::{FeedService, PostInput};
use crate::routes::AppState;
use crate::types::{PopulatedPost, User};

/// Per-request resolver context.
pub struct GraphQLContext {
    pub auth: AuthService,
    pub feed: FeedService,
    pub viewer: Viewer,
}

impl juniper::Context for GraphQLContext {}

pub type Schema = RootNode<'static, Query, Mutation, EmptySubscription<GraphQLContext>>;

#[must_use]
pub fn create_schema() -> Schema {
    Schema::new(Query, Mutation, EmptySubscription::new())
}

impl<S: ScalarValue> IntoFieldError<S> for ServerError {
    fn into_field_error(self) -> FieldError<S> {
        if self.is_server_error() {
            error!(error = %self, "GraphQL resolver failed");
        }

        let mut extensions = Object::with_capacity(2);
        extensions.add_field(
            "status",
            Value::scalar(i32::from(self.status().as_u16())),
        );

        let data = self.field_errors();
        if !data.is_empty() {
            let items = data
                .iter()
                .map(|failure| {
                    let mut item = Object::with_capacity(2);
                    item.add_field("field", Value::scalar(failure.field.clone()));
                    item.add_field("message", Value::scalar(failure.message.clone()));
                    Value::object(item)
                })
                .collect();
            extensions.add_field("data", Value::list(items));
        }

        FieldError::new(self.public_message(), Value::object(extensions))
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// GraphQL `User`.
pub struct UserObject(User);

#[juniper::graphql_object(context = GraphQLContext, name = "User")]
impl UserObject {
    #[graphql(name = "_id")]
    fn id(&self) -> String {
        self.0.id.to_string()
    }

    fn email(&self) -> &str {
        &self.0.email
    }

    fn name(&self) -> &str {
        &self.0.name
    }

    fn status(&self) -> &str {
        &self.0.status
    }

    /// Ids of the posts this user created.
    fn posts(&self) -> Vec<String> {
        self.0.posts.iter().map(ToString::to_string).collect()
    }
}

/// GraphQL `Post`.
pub struct PostObject(PopulatedPost);

#[juniper::graphql_object(context = GraphQLContext, name = "Post")]
impl PostObject {
    #[graphql(name = "_id")]
    fn id(&self) -> String {
        self.0.post.id.to_string()
    }

    fn title(&self) -> &str {
        &self.0.post.title
    }

    fn content(&self) -> &str {
        &self.0.post.content
    }

    fn image_url(&self) -> &str {
        &self.0.post.image_url
    }

    fn creator(&self) -> UserObject {
        UserObject(self.0.creator.clone())
    }

    fn created_at(&self) -> String {
        timestamp(self.0.post.created_at)
    }

    fn updated_at(&self) -> String {
        timestamp(self.0.post.updated_at)
    }
}

#[derive(Debug, Clone, GraphQLObject)]
pub struct AuthData {
    pub token: String,
    pub user_id: String,
}

#[derive(GraphQLObject)]
#[graphql(context = GraphQLContext)]
pub struct PostData {
    pub posts: Vec<PostObject>,
    pub total_posts: i32,
}

#[derive(Debug, Clone, GraphQLInputObject)]
pub struct UserInputData {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, GraphQLInputObject)]
pub struct PostInputData {
    pub title: String,
    pub content: String,
    pub image_url: String,
}

impl From<PostInputData> for PostInput {
    fn from(input: PostInputData) -> Self {
        Self {
            title: input.title,
            content: input.content,
            image_url: Some(input.image_url),
        }
    }
}

pub struct Query;

#[juniper::graphql_object(context = GraphQLContext)]
impl Query {
    /// Exchanges credentials for a bearer token.
    async fn login(
        ctx: &GraphQLContext,
        email: String,
        password: String,
    ) -> Result<AuthData, ServerError> {
        let token = ctx.auth.login(&email, &password).await?;
        Ok(AuthData {
            token: token.token,
            user_id: token.user_id.to_string(),
        })
    }

    /// One page of the feed, newest first. `page` defaults to 1.
    async fn posts(ctx: &GraphQLContext, page: Option<i32>) -> Result<PostData, ServerError> {
        ctx.viewer.require()?;
        let page = ctx.feed.list_posts(i64::from(page.unwrap_or(1))).await?;
        Ok(PostData {
            total_posts: i32::try_from(page.total_items).unwrap_or(i32::MAX),
            posts: page.posts.into_iter().map(PostObject).collect(),
        })
    }

    async fn post(ctx: &GraphQLContext, id: String) -> Result<PostObject, ServerError> {
        ctx.viewer.require()?;
        Ok(PostObject(ctx.feed.get_post(&id).await?))
    }

    async fn user_status(ctx: &GraphQLContext) -> Result<String, ServerError> {
        let identity = ctx.viewer.require()?;
        ctx.feed.get_status(identity.user_id).await
    }
}

pub struct Mutation;

#[juniper::graphql_object(context = GraphQLContext)]
impl Mutation {
    async fn create_user(
        ctx: &GraphQLContext,
        user_input: UserInputData,
    ) -> Result<UserObject, ServerError> {
        let user = ctx
            .auth
            .signup(&user_input.email, &user_input.password, &user_input.name)
            .await?;
        Ok(UserObject(user))
    }

    async fn create_post(
        ctx: &GraphQLContext,
        post_input: PostInputData,
    ) -> Result<PostObject, ServerError> {
        let identity = ctx.viewer.require()?;
        let created = ctx
            .feed
            .create_post(identity.user_id, post_input.into())
            .await?;
        Ok(PostObject(created))
    }

    async fn update_post(
        ctx: &GraphQLContext,
        id: String,
        post_input: PostInputData,
    ) -> Result<PostObject, ServerError> {
        let identity = ctx.viewer.require()?;
        let updated = ctx
            .feed
            .update_post(&id, identity.user_id, post_input.into())
            .await?;
        Ok(PostObject(updated))
    }

    async fn delete_post(ctx: &GraphQLContext, id: String) -> Result<bool, ServerError> {
        let identity = ctx.viewer.require()?;
        ctx.feed.delete_post(&id, identity.user_id).await?;
        Ok(true)
    }

    async fn update_user_status(
        ctx: &GraphQLContext,
        status_input: String,
    ) -> Result<String, ServerError> {
        let identity = ctx.viewer.require()?;
        ctx.feed.set_status(identity.user_id, &status_input).await
    }
}

/// Rewrites resolver errors into `{message, status, data}`.
///
/// Errors raised by juniper itself (parse or validation failures) carry no
/// `status` extension and are left untouched.
pub fn normalize_errors(body: &mut JsonValue) {
    let Some(errors) = body.get_mut("errors").and_then(JsonValue::as_array_mut) else {
        return;
    };

    for entry in errors.iter_mut() {
        let Some(extensions) = entry.get("extensions") else {
            continue;
        };
        let Some(status) = extensions.get("status").cloned() else {
            continue;
        };

        let data = extensions.get("data").cloned();
        let message = entry
            .get("message")
            .cloned()
            .unwrap_or_else(|| json!("An error occurred!"));

        let mut normalized = json!({ "message": message, "status": status });
        if let Some(data) = data {
            normalized["data"] = data;
        }
        *entry = normalized;
    }
}

/// POST /graphql
pub async fn graphql_handler(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    AppJson(request): AppJson<GraphQLRequest>,
) -> Response {
    let context = GraphQLContext {
        auth: state.auth.clone(),
        feed: state.feed.clone(),
        viewer,
    };

    let response = request.execute(&state.schema, &context).await;
    let status = if response.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };

    match serde_json::to_value(&response) {
        Ok(mut body) => {
            normalize_errors(&mut body);
            debug!(status = %status, "GraphQL request executed");
            (status, Json(body)).into_response()
        }
        Err(err) => {
            ServerError::internal(format!("failed to encode GraphQL response: {err}"))
                .into_response()
        }
    }
}

/// GET /graphql
pub async fn graphiql() -> Html<String> {
    Html(graphiql_source("/graphql", None))
}
