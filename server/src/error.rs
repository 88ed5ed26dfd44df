//! Error types for the Postboard server.
//!
//! Every failure raised by the services carries a classification, and the
//! transports render that classification in exactly one place each:
//! [`ServerError`]'s `IntoResponse` impl for REST and
//! [`crate::graphql`]'s error formatter for GraphQL.
//!
//! # Status mapping
//!
//! | Variant | HTTP status |
//! |---------|-------------|
//! | [`ServerError::Validation`] | 422 |
//! | [`ServerError::Conflict`] | 422 |
//! | [`ServerError::Auth`] | 401 |
//! | [`ServerError::Forbidden`] | 403 |
//! | [`ServerError::NotFound`] | 404 |
//! | [`ServerError::Internal`] | 500 |
//!
//! # Example
//!
//! ```rust
//! use postboard_server::error::{FieldError, ServerError};
//!
//! let err = ServerError::validation_with(
//!     "Validation failed, entered data is incorrect.",
//!     vec![FieldError::new("title", "Title must be at least 5 characters.")],
//! );
//! assert_eq!(err.status().as_u16(), 422);
//! ```

use std::error::Error;
use std::fmt;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Message returned to clients for unclassified failures.
const INTERNAL_MESSAGE: &str = "An error occurred!";

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Name of the offending request field.
    pub field: String,

    /// Human readable description of the failure.
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Top-level error type for the Postboard server.
#[derive(Debug)]
pub enum ServerError {
    /// Request data failed validation.
    Validation {
        /// Summary message.
        message: String,
        /// Per-field details, possibly empty.
        data: Vec<FieldError>,
    },

    /// The request conflicts with existing data (duplicate email).
    Conflict(String),

    /// Missing, invalid or expired credentials.
    Auth(String),

    /// Authenticated, but not the owner of the resource.
    Forbidden(String),

    /// The requested document does not exist.
    NotFound(String),

    /// Anything unclassified, including store failures.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { message, .. } => write!(f, "validation error: {message}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Self::Forbidden(msg) => write!(f, "not authorized: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Internal(msg) => write!(f, "internal server error: {msg}"),
        }
    }
}

impl Error for ServerError {}

impl ServerError {
    /// Creates a validation error without field details.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            data: Vec::new(),
        }
    }

    /// Creates a validation error carrying field details.
    pub fn validation_with(message: impl Into<String>, data: Vec<FieldError>) -> Self {
        Self::Validation {
            message: message.into(),
            data,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the HTTP status this error is reported with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::Conflict(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message safe to show to clients.
    ///
    /// Internal details never leave the process.
    #[must_use]
    pub fn public_message(&self) -> &str {
        match self {
            Self::Validation { message, .. } => message,
            Self::Conflict(msg) | Self::Auth(msg) | Self::Forbidden(msg) | Self::NotFound(msg) => {
                msg
            }
            Self::Internal(_) => INTERNAL_MESSAGE,
        }
    }

    /// Returns the field-level details, empty for non-validation errors.
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { data, .. } => data,
            _ => &[],
        }
    }

    /// Returns `true` if this error indicates a client-side problem.
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if this error indicates a server-side problem.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// Unreadable request bodies are reported like any other invalid input.
impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<MultipartRejection> for ServerError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

/// JSON error envelope shared by every REST route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<FieldError>>,
}

impl From<&ServerError> for ErrorBody {
    fn from(err: &ServerError) -> Self {
        let data = err.field_errors();
        Self {
            message: err.public_message().to_string(),
            data: (!data.is_empty()).then(|| data.to_vec()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (self.status(), Json(ErrorBody::from(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(ServerError::validation("x").status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ServerError::conflict("x").status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ServerError::auth("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServerError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ServerError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServerError::internal("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn auth_displays_correctly() {
        let err = ServerError::auth("invalid token");
        assert_eq!(err.to_string(), "authentication failed: invalid token");
    }

    #[test]
    fn internal_message_is_hidden_from_clients() {
        let err = ServerError::internal("store snapshot write failed: disk full");
        assert_eq!(err.public_message(), INTERNAL_MESSAGE);
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn error_body_omits_empty_data() {
        let body = ErrorBody::from(&ServerError::not_found("Post not found!"));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["message"], "Post not found!");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn error_body_carries_field_errors() {
        let err = ServerError::validation_with(
            "Validation failed",
            vec![FieldError::new("content", "too short")],
        );
        let json = serde_json::to_value(ErrorBody::from(&err)).unwrap();
        assert_eq!(json["data"][0]["field"], "content");
        assert_eq!(json["data"][0]["message"], "too short");
    }

    #[test]
    fn client_and_server_errors_are_disjoint() {
        assert!(ServerError::auth("bad token").is_client_error());
        assert!(ServerError::forbidden("not yours").is_client_error());
        assert!(!ServerError::internal("oops").is_client_error());
        assert!(ServerError::internal("oops").is_server_error());
    }

    #[tokio::test]
    async fn into_response_uses_status_and_envelope() {
        let response = ServerError::forbidden("Not authorized!").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Not authorized!");
    }
}
