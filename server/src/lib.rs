//! Postboard Server - Social feed backend.
//!
//! This crate provides:
//! - Account signup and login with bcrypt-hashed passwords and bearer tokens
//! - A paginated feed of image posts, editable only by their creators
//! - A per-user status line
//!
//! # Architecture
//!
//! Two transports sit on the same services. The REST API under `/feed`
//! requires a token on every call; the GraphQL endpoint accepts anonymous
//! requests and leaves authorization to individual resolvers. Every post
//! change is pushed to WebSocket subscribers through the
//! [`broadcast::FeedBroadcaster`].
//!
//! Documents live in a [`store::Store`]; the bundled [`store::MemoryStore`]
//! can snapshot itself to a JSON file.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod feed;
pub mod graphql;
pub mod images;
pub mod middleware;
pub mod routes;
pub mod store;
pub mod types;
pub mod validation;
