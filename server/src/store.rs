//! Document storage for users and posts.
//!
//! The services only talk to the [`Store`] trait. [`MemoryStore`] keeps every
//! document in memory and, when given a data file, mirrors the whole document
//! set to a JSON snapshot after each mutation so the feed survives restarts.
//!
//! Each trait method is a single-document operation. Callers that touch two
//! documents (a post and its creator's post list) issue two independent calls;
//! nothing here makes that pair atomic.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::types::{PopulatedPost, Post, PostId, User, UserId};

/// Errors raised by a [`Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another user already owns this email.
    #[error("email already registered: {0}")]
    DuplicateEmail(String),

    /// Reading or writing the snapshot file failed.
    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file could not be encoded or decoded.
    #[error("snapshot is not valid JSON: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail(_) => {
                ServerError::conflict("E-Mail address already exists!")
            }
            other => ServerError::internal(other.to_string()),
        }
    }
}

/// Persistence operations needed by the auth and feed services.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts a new user, enforcing email uniqueness.
    async fn insert_user(&self, user: User) -> Result<User, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Looks a user up by normalised email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Overwrites a user's status, returning the updated document.
    async fn set_user_status(
        &self,
        id: UserId,
        status: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Appends a post to a user's owned-post list. Unknown users are ignored.
    async fn push_user_post(&self, user: UserId, post: PostId) -> Result<(), StoreError>;

    /// Removes a post from a user's owned-post list. Unknown users are ignored.
    async fn pull_user_post(&self, user: UserId, post: PostId) -> Result<(), StoreError>;

    async fn count_posts(&self) -> Result<u64, StoreError>;

    /// Returns up to `limit` posts after skipping `skip`, newest first, each
    /// joined with its creator.
    async fn list_posts(&self, skip: u64, limit: u64) -> Result<Vec<PopulatedPost>, StoreError>;

    async fn insert_post(&self, post: Post) -> Result<Post, StoreError>;

    /// Fetches a post without resolving its creator.
    async fn find_post(&self, id: PostId) -> Result<Option<Post>, StoreError>;

    /// Fetches a post joined with its creator document.
    async fn find_post_with_creator(&self, id: PostId)
        -> Result<Option<PopulatedPost>, StoreError>;

    /// Replaces an existing post. Returns `None` if it no longer exists.
    async fn update_post(&self, post: Post) -> Result<Option<Post>, StoreError>;

    /// Removes a post, returning `true` if it existed.
    async fn delete_post(&self, id: PostId) -> Result<bool, StoreError>;
}

/// A post plus its insertion order, used to break `created_at` ties.
#[derive(Debug, Clone)]
struct StoredPost {
    seq: u64,
    post: Post,
}

#[derive(Debug, Clone, Default)]
struct Collections {
    users: HashMap<UserId, User>,
    emails: HashMap<String, UserId>,
    posts: HashMap<PostId, StoredPost>,
    next_seq: u64,
}

/// On-disk form of the document set. Posts are kept in insertion order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    users: Vec<User>,
    posts: Vec<Post>,
}

impl Collections {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut collections = Self::default();
        for user in snapshot.users {
            collections.emails.insert(user.email.clone(), user.id);
            collections.users.insert(user.id, user);
        }
        for post in snapshot.posts {
            collections.push_post(post);
        }
        collections
    }

    fn to_snapshot(&self) -> Snapshot {
        let mut users: Vec<User> = self.users.values().cloned().collect();
        users.sort_by_key(|user| user.id);

        let mut posts: Vec<&StoredPost> = self.posts.values().collect();
        posts.sort_by_key(|stored| stored.seq);

        Snapshot {
            users,
            posts: posts.into_iter().map(|stored| stored.post.clone()).collect(),
        }
    }

    fn push_post(&mut self, post: Post) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.posts.insert(post.id, StoredPost { seq, post });
    }

    fn populate(&self, post: &Post) -> Option<PopulatedPost> {
        let creator = self.users.get(&post.creator)?;
        Some(PopulatedPost {
            post: post.clone(),
            creator: creator.clone(),
        })
    }
}

/// In-memory [`Store`] with an optional JSON snapshot file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
    data_file: Option<PathBuf>,
}

impl MemoryStore {
    /// Creates an empty, purely in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store, loading `data_file` if it is given and already exists.
    ///
    /// A missing file is not an error: the store starts empty and creates it
    /// on the first mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file exists but cannot be read or parsed.
    pub async fn open(data_file: Option<PathBuf>) -> Result<Self, StoreError> {
        let Some(path) = data_file else {
            return Ok(Self::new());
        };

        let collections = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                info!(
                    path = %path.display(),
                    users = snapshot.users.len(),
                    posts = snapshot.posts.len(),
                    "Loaded store snapshot"
                );
                Collections::from_snapshot(snapshot)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "No store snapshot yet, starting empty");
                Collections::default()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Self {
            inner: RwLock::new(collections),
            data_file: Some(path),
        })
    }

    /// Applies `change` and returns its output.
    ///
    /// With a data file, the change is made to a copy that replaces
    /// `current` only once its snapshot is written, so a failed write leaves
    /// the store untouched.
    async fn apply<T>(
        &self,
        current: &mut Collections,
        change: impl FnOnce(&mut Collections) -> T,
    ) -> Result<T, StoreError> {
        let Some(path) = self.data_file.as_deref() else {
            return Ok(change(current));
        };

        let mut next = current.clone();
        let output = change(&mut next);
        Self::persist(path, &next).await?;
        *current = next;
        Ok(output)
    }

    /// Writes the snapshot file.
    async fn persist(path: &Path, collections: &Collections) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&collections.to_snapshot())?;
        ensure_parent(path).await?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), "Store snapshot written");
        Ok(())
    }
}

async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            }),
        _ => Ok(()),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: User) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.emails.contains_key(&user.email) {
            return Err(StoreError::DuplicateEmail(user.email));
        }

        let stored = user.clone();
        self.apply(&mut inner, move |docs| {
            docs.emails.insert(stored.email.clone(), stored.id);
            docs.users.insert(stored.id, stored);
        })
        .await?;
        Ok(user)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .emails
            .get(email)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn set_user_status(
        &self,
        id: UserId,
        status: &str,
    ) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&id) {
            return Ok(None);
        }

        self.apply(&mut inner, |docs| {
            docs.users.get_mut(&id).map(|user| {
                user.status = status.to_string();
                user.clone()
            })
        })
        .await
    }

    async fn push_user_post(&self, user: UserId, post: PostId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user) {
            warn!(user_id = %user, post_id = %post, "Cannot link post to unknown user");
            return Ok(());
        }

        self.apply(&mut inner, |docs| {
            if let Some(doc) = docs.users.get_mut(&user) {
                doc.posts.push(post);
            }
        })
        .await
    }

    async fn pull_user_post(&self, user: UserId, post: PostId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user) {
            return Ok(());
        }

        self.apply(&mut inner, |docs| {
            if let Some(doc) = docs.users.get_mut(&user) {
                doc.posts.retain(|owned| *owned != post);
            }
        })
        .await
    }

    async fn count_posts(&self) -> Result<u64, StoreError> {
        Ok(self.inner.read().await.posts.len() as u64)
    }

    async fn list_posts(&self, skip: u64, limit: u64) -> Result<Vec<PopulatedPost>, StoreError> {
        let inner = self.inner.read().await;

        let mut ordered: Vec<&StoredPost> = inner.posts.values().collect();
        ordered.sort_by(|a, b| {
            b.post
                .created_at
                .cmp(&a.post.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);

        Ok(ordered
            .into_iter()
            .skip(skip)
            .take(limit)
            .filter_map(|stored| inner.populate(&stored.post))
            .collect())
    }

    async fn insert_post(&self, post: Post) -> Result<Post, StoreError> {
        let mut inner = self.inner.write().await;
        let stored = post.clone();
        self.apply(&mut inner, move |docs| docs.push_post(stored))
            .await?;
        Ok(post)
    }

    async fn find_post(&self, id: PostId) -> Result<Option<Post>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .posts
            .get(&id)
            .map(|stored| stored.post.clone()))
    }

    async fn find_post_with_creator(
        &self,
        id: PostId,
    ) -> Result<Option<PopulatedPost>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .posts
            .get(&id)
            .and_then(|stored| inner.populate(&stored.post)))
    }

    async fn update_post(&self, post: Post) -> Result<Option<Post>, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.posts.contains_key(&post.id) {
            return Ok(None);
        }

        let replacement = post.clone();
        self.apply(&mut inner, move |docs| {
            if let Some(stored) = docs.posts.get_mut(&replacement.id) {
                stored.post = replacement;
            }
        })
        .await?;
        Ok(Some(post))
    }

    async fn delete_post(&self, id: PostId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.posts.contains_key(&id) {
            return Ok(false);
        }

        self.apply(&mut inner, |docs| docs.posts.remove(&id).is_some())
            .await
    }
}
