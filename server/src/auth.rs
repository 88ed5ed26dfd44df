//! Authentication: signup, login and bearer tokens.
//!
//! Passwords are hashed with bcrypt and tokens are HS256 JWTs that expire one
//! hour after issue. How a missing or bad token is treated depends on the
//! [`AuthPolicy`] the caller selects:
//!
//! - [`AuthPolicy::Strict`] rejects the request with a 401.
//! - [`AuthPolicy::Soft`] lets it continue as an anonymous [`Viewer`]; each
//!   operation that needs a user then calls [`Viewer::require`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use postboard_server::auth::{AuthPolicy, AuthService};
//! use postboard_server::store::MemoryStore;
//!
//! let auth = AuthService::new(Arc::new(MemoryStore::new()), "secret", 4);
//!
//! // Soft mode never fails; strict mode rejects a missing header.
//! assert!(!auth.authenticate(AuthPolicy::Soft, None).unwrap().is_authenticated());
//! assert!(auth.authenticate(AuthPolicy::Strict, None).is_err());
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::ServerError;
use crate::store::Store;
use crate::types::{User, UserId};
use crate::validation::{normalize_email, validate, SIGNUP_RULES};

/// How long an issued token stays valid.
pub const TOKEN_TTL_HOURS: i64 = 1;

/// Returned for both unknown emails and wrong passwords.
pub const LOGIN_FAILED_MESSAGE: &str = "Invalid email or password.";

/// Returned when a request needs an authenticated user and has none.
pub const NOT_AUTHENTICATED_MESSAGE: &str = "Not authenticated.";

const BEARER_PREFIX: &str = "Bearer ";

/// Hashed once per service and checked when a login names an unknown email,
/// so both failure paths cost one bcrypt verification.
const DUMMY_PASSWORD: &str = "postboard-unknown-user";

/// Why a token failed verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Claims embedded in every bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: String,
    pub user_id: UserId,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
}

/// How a request without a valid token is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Missing or invalid tokens abort the request with a 401.
    Strict,
    /// Missing or invalid tokens leave the request anonymous.
    Soft,
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.email,
        }
    }
}

/// Who is making a request, possibly nobody.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer(Option<Identity>);

impl Viewer {
    #[must_use]
    pub fn anonymous() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn authenticated(identity: Identity) -> Self {
        Self(Some(identity))
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.0.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.0.is_some()
    }

    /// Returns the identity, or a 401 error for anonymous viewers.
    pub fn require(&self) -> Result<&Identity, ServerError> {
        self.identity()
            .ok_or_else(|| ServerError::auth(NOT_AUTHENTICATED_MESSAGE))
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    pub token: String,
    pub user_id: UserId,
}

/// Signs users up, logs them in and verifies their tokens.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    bcrypt_cost: u32,
    dummy_hash: Arc<OnceCell<String>>,
}

impl AuthService {
    /// Creates the service. `secret` signs and verifies every token.
    pub fn new(store: Arc<dyn Store>, secret: &str, bcrypt_cost: u32) -> Self {
        Self {
            store,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            bcrypt_cost,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Registers a new user.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Validation`] for a malformed email, a password shorter
    ///   than 4 characters or an empty name
    /// - [`ServerError::Conflict`] if the email is already registered
    pub async fn signup(&self, email: &str, password: &str, name: &str) -> Result<User, ServerError> {
        validate(&SIGNUP_RULES, "Validation failed.", |field| match field {
            "email" => Some(email),
            "password" => Some(password),
            "name" => Some(name),
            _ => None,
        })?;

        let email = normalize_email(email);
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ServerError::conflict("E-Mail address already exists!"));
        }

        let password_hash = hash_password(password, self.bcrypt_cost).await?;
        let user = self
            .store
            .insert_user(User::new(email, password_hash, name.trim().to_string()))
            .await?;

        info!(user_id = %user.id, "User signed up");
        Ok(user)
    }

    /// Checks credentials and issues a token.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Auth`] with the same message whether the email
    /// is unknown or the password is wrong.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthToken, ServerError> {
        let email = normalize_email(email);
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            debug!("Login for unknown email");
            let dummy = self
                .dummy_hash
                .get_or_try_init(|| hash_password(DUMMY_PASSWORD, self.bcrypt_cost))
                .await?;
            verify_password(password, dummy).await?;
            return Err(ServerError::auth(LOGIN_FAILED_MESSAGE));
        };

        if !verify_password(password, &user.password_hash).await? {
            debug!(user_id = %user.id, "Login with wrong password");
            return Err(ServerError::auth(LOGIN_FAILED_MESSAGE));
        }

        let token = self.issue_token(&user)?;
        info!(user_id = %user.id, "User logged in");
        Ok(AuthToken {
            token,
            user_id: user.id,
        })
    }

    /// Issues a token for `user` valid for [`TOKEN_TTL_HOURS`].
    pub fn issue_token(&self, user: &User) -> Result<String, ServerError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            user_id: user.id,
            email: user.email.clone(),
            exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
            iat: now.timestamp(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String, ServerError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| ServerError::internal(format!("failed to sign token: {e}")))
    }

    /// Verifies a token's signature and expiry and returns its claims.
    pub fn verify_token(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }

    /// Resolves the viewer from an `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Under [`AuthPolicy::Strict`], returns [`ServerError::Auth`] when the
    /// header is missing, is not a bearer token, or the token does not verify.
    /// [`AuthPolicy::Soft`] never fails.
    pub fn authenticate(
        &self,
        policy: AuthPolicy,
        authorization: Option<&str>,
    ) -> Result<Viewer, ServerError> {
        let verified = match authorization {
            None => Err(NOT_AUTHENTICATED_MESSAGE.to_string()),
            Some(value) => match bearer_token(value) {
                None => Err("Malformed authorization header.".to_string()),
                Some(token) => self.verify_token(token).map_err(|e| e.to_string()),
            },
        };

        match (verified, policy) {
            (Ok(claims), _) => Ok(Viewer::authenticated(claims.into())),
            (Err(reason), AuthPolicy::Soft) => {
                if authorization.is_some() {
                    debug!(reason = %reason, "Continuing unauthenticated");
                }
                Ok(Viewer::anonymous())
            }
            (Err(reason), AuthPolicy::Strict) => {
                debug!(reason = %reason, "Rejecting unauthenticated request");
                Err(ServerError::auth(NOT_AUTHENTICATED_MESSAGE))
            }
        }
    }
}

/// Extracts the token from a `Bearer <token>` header value.
fn bearer_token(value: &str) -> Option<&str> {
    value
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn hash_password(password: &str, cost: u32) -> Result<String, ServerError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ServerError::internal(format!("hashing task failed: {e}")))?
        .map_err(|e| ServerError::internal(format!("failed to hash password: {e}")))
}

async fn verify_password(password: &str, hash: &str) -> Result<bool, ServerError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| ServerError::internal(format!("hashing task failed: {e}")))?
        .map_err(|e| ServerError::internal(format!("failed to verify password: {e}")))
}
