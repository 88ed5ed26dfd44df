//! Documents stored by the server and the views returned to clients.
//!
//! [`User`] and [`Post`] are the persisted documents. A post references its
//! creator by [`UserId`]; [`PopulatedPost`] is the joined form the feed
//! service hands to the transports, and [`PostView`] is its REST rendering.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status every new user starts with.
pub const DEFAULT_STATUS: &str = "I am new!";

macro_rules! document_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parses an id received from a client, returning `None` when malformed.
            pub fn parse(raw: &str) -> Option<Self> {
                raw.trim().parse().ok()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

document_id!(
    /// Opaque identity of a [`User`].
    UserId
);

document_id!(
    /// Opaque identity of a [`Post`].
    PostId
);

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    /// Unique, stored normalised.
    pub email: String,
    /// bcrypt hash; plaintext passwords are never stored.
    pub password_hash: String,
    pub name: String,
    pub status: String,
    /// Posts owned by this user, oldest first.
    pub posts: Vec<PostId>,
}

impl User {
    pub fn new(email: String, password_hash: String, name: String) -> Self {
        Self {
            id: UserId::new(),
            email,
            password_hash,
            name,
            status: DEFAULT_STATUS.to_string(),
            posts: Vec::new(),
        }
    }
}

/// A feed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub content: String,
    /// Stored image reference, e.g. `images/1700000000000-cat.png`.
    pub image_url: String,
    /// Set once at creation.
    pub creator: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn new(title: String, content: String, image_url: String, creator: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: PostId::new(),
            title,
            content,
            image_url,
            creator,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A post joined with its creator document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulatedPost {
    pub post: Post,
    pub creator: User,
}

/// Public summary of a post's creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorView {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
}

impl From<&User> for CreatorView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
        }
    }
}

/// REST and realtime rendering of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[serde(rename = "_id")]
    pub id: PostId,
    pub title: String,
    pub content: String,
    pub image_url: String,
    pub creator: CreatorView,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PopulatedPost> for PostView {
    fn from(populated: &PopulatedPost) -> Self {
        let post = &populated.post;
        Self {
            id: post.id,
            title: post.title.clone(),
            content: post.content.clone(),
            image_url: post.image_url.clone(),
            creator: CreatorView::from(&populated.creator),
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}
