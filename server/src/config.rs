//! Server configuration module.
//!
//! Parses configuration from environment variables for the Postboard server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `POSTBOARD_JWT_SECRET` | Yes | - | Secret used to sign bearer tokens |
//! | `PORT` | No | 8080 | HTTP server port |
//! | `POSTBOARD_PUBLIC_URL` | No | `http://localhost:{PORT}` | Prefix for image URLs |
//! | `POSTBOARD_IMAGE_DIR` | No | `images` | Directory for uploaded images |
//! | `POSTBOARD_DATA_FILE` | No | - | JSON snapshot file for the document store |
//! | `POSTBOARD_BCRYPT_COST` | No | 12 | bcrypt cost factor (4-31) |

use std::env;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default directory for uploaded images.
const DEFAULT_IMAGE_DIR: &str = "images";

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Secrets shorter than this are accepted with a warning.
const MIN_RECOMMENDED_SECRET_LEN: usize = 16;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC secret for signing and verifying bearer tokens.
    pub jwt_secret: String,

    /// HTTP server port.
    pub port: u16,

    /// Base URL prepended to stored image references.
    pub public_url: String,

    /// Directory uploaded images are written to and served from.
    pub image_dir: PathBuf,

    /// Optional JSON snapshot file backing the document store.
    pub data_file: Option<PathBuf>,

    /// bcrypt cost factor used when hashing passwords.
    pub bcrypt_cost: u32,
}

impl Config {
    /// Builds a configuration with default values for everything but the secret.
    ///
    /// # Example
    ///
    /// ```rust
    /// use postboard_server::config::Config;
    ///
    /// let config = Config::new("a-long-enough-signing-secret");
    /// assert_eq!(config.port, 8080);
    /// assert_eq!(config.public_url, "http://localhost:8080");
    /// ```
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            port: DEFAULT_PORT,
            public_url: default_public_url(DEFAULT_PORT),
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            data_file: None,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }

    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `POSTBOARD_JWT_SECRET` is missing or empty
    /// - `PORT` is not a valid u16
    /// - `POSTBOARD_BCRYPT_COST` is not a number between 4 and 31
    ///
    /// # Example
    ///
    /// ```no_run
    /// use postboard_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = match env::var("POSTBOARD_JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ => {
                return Err(ConfigError::MissingEnvVar(
                    "POSTBOARD_JWT_SECRET".to_string(),
                ))
            }
        };
        let port = parse_port()?;
        let public_url = non_empty_env("POSTBOARD_PUBLIC_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| default_public_url(port));
        let image_dir = non_empty_env("POSTBOARD_IMAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR));
        let data_file = non_empty_env("POSTBOARD_DATA_FILE").map(PathBuf::from);
        let bcrypt_cost = parse_bcrypt_cost()?;

        if jwt_secret.len() < MIN_RECOMMENDED_SECRET_LEN {
            warn!(
                min_len = MIN_RECOMMENDED_SECRET_LEN,
                "POSTBOARD_JWT_SECRET is short - use a longer secret in production"
            );
        }

        Ok(Self {
            jwt_secret,
            port,
            public_url,
            image_dir,
            data_file,
            bcrypt_cost,
        })
    }
}

fn default_public_url(port: u16) -> String {
    format!("http://localhost:{port}")
}

/// Reads an environment variable, treating empty values as unset.
fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

fn parse_bcrypt_cost() -> Result<u32, ConfigError> {
    let Some(raw) = non_empty_env("POSTBOARD_BCRYPT_COST") else {
        return Ok(DEFAULT_BCRYPT_COST);
    };

    match raw.trim().parse::<u32>() {
        Ok(cost) if (4..=31).contains(&cost) => Ok(cost),
        _ => Err(ConfigError::InvalidFormat {
            var: "POSTBOARD_BCRYPT_COST".to_string(),
            message: format!("expected a number between 4 and 31, got '{raw}'"),
        }),
    }
}
