//! Bearer-token middleware.
//!
//! [`strict_auth`] guards the REST routes: requests without a valid token are
//! answered with a 401 before the handler runs. [`soft_auth`] guards the
//! GraphQL endpoint: requests always reach the handler, anonymous or not.
//! Either way the handler receives the resolved [`Viewer`] as a request
//! extension. Handlers that need a signed-in user take [`CurrentUser`].
//!
//! [`AppJson`] replaces `axum::Json` as a body extractor so malformed bodies
//! are answered with the usual error envelope.

use axum::extract::{FromRequest, FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;

use crate::auth::{AuthPolicy, AuthService, Identity, Viewer, NOT_AUTHENTICATED_MESSAGE};
use crate::error::ServerError;

/// Extracts the authenticated caller, rejecting with 401 otherwise.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Viewer>()
            .and_then(Viewer::identity)
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| ServerError::auth(NOT_AUTHENTICATED_MESSAGE))
    }
}

/// JSON body extractor rejecting with [`ServerError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state).await?;
        Ok(Self(value))
    }
}

/// Rejects requests without a valid bearer token.
pub async fn strict_auth(
    State(auth): State<AuthService>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    authenticate(&auth, AuthPolicy::Strict, request, next).await
}

/// Resolves the bearer token if there is one and always continues.
pub async fn soft_auth(
    State(auth): State<AuthService>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    authenticate(&auth, AuthPolicy::Soft, request, next).await
}

async fn authenticate(
    auth: &AuthService,
    policy: AuthPolicy,
    mut request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .map(|value| value.to_str().unwrap_or_default());

    let viewer: Viewer = auth.authenticate(policy, header)?;
    request.extensions_mut().insert(viewer);
    Ok(next.run(request).await)
}
