//! The feed service: post CRUD, pagination, ownership and user status.
//!
//! Both transports call into [`FeedService`]; it is the only place that
//! mutates posts and therefore the only place that publishes [`FeedEvent`]s.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::broadcast::{FeedBroadcaster, FeedEvent};
use crate::error::ServerError;
use crate::images::ImageStore;
use crate::store::Store;
use crate::types::{PopulatedPost, Post, PostId, UserId};
use crate::validation::{page_offset, validate_post, POSTS_PER_PAGE};

pub const POST_NOT_FOUND_MESSAGE: &str = "Could not find post.";
pub const USER_NOT_FOUND_MESSAGE: &str = "User not found.";
pub const NOT_AUTHORIZED_MESSAGE: &str = "Not authorized!";
pub const NO_IMAGE_MESSAGE: &str = "No image provided.";

/// One page of the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostPage {
    /// At most [`POSTS_PER_PAGE`] posts, newest first.
    pub posts: Vec<PopulatedPost>,
    /// Number of posts across all pages.
    pub total_items: u64,
}

/// Title, content and image for a create or update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostInput {
    pub title: String,
    pub content: String,
    /// Stored reference or public URL. `None` on update keeps the current image.
    pub image_url: Option<String>,
}

/// Post and status operations shared by the REST and GraphQL transports.
#[derive(Clone)]
pub struct FeedService {
    store: Arc<dyn Store>,
    images: ImageStore,
    broadcaster: FeedBroadcaster,
}

impl FeedService {
    pub fn new(store: Arc<dyn Store>, images: ImageStore, broadcaster: FeedBroadcaster) -> Self {
        Self {
            store,
            images,
            broadcaster,
        }
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    /// Returns page `page` (1-indexed) of the feed and the total post count.
    ///
    /// Pages below 1 are treated as page 1.
    pub async fn list_posts(&self, page: i64) -> Result<PostPage, ServerError> {
        let total_items = self.store.count_posts().await?;
        let posts = self
            .store
            .list_posts(page_offset(page), POSTS_PER_PAGE)
            .await?;

        debug!(page, returned = posts.len(), total_items, "Listed posts");
        Ok(PostPage { posts, total_items })
    }

    /// Creates a post owned by `creator` and broadcasts a `create` event.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Validation`] if title or content are too short, or no
    ///   image was supplied
    /// - [`ServerError::Auth`] if `creator` no longer exists
    pub async fn create_post(
        &self,
        creator: UserId,
        input: PostInput,
    ) -> Result<PopulatedPost, ServerError> {
        validate_post(&input.title, &input.content)?;
        let image_url = input
            .image_url
            .map(|url| self.images.normalize_reference(url.trim()))
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ServerError::validation(NO_IMAGE_MESSAGE))?;

        let Some(user) = self.store.find_user(creator).await? else {
            return Err(ServerError::auth("Invalid user."));
        };

        let post = Post::new(
            input.title.trim().to_string(),
            input.content.trim().to_string(),
            image_url,
            user.id,
        );
        let post = self.store.insert_post(post).await?;
        // Second, independent write: the post exists even if this one fails.
        self.store.push_user_post(user.id, post.id).await?;

        let mut creator = user;
        creator.posts.push(post.id);
        let populated = PopulatedPost { post, creator };

        info!(post_id = %populated.post.id, user_id = %populated.creator.id, "Post created");
        self.broadcaster.broadcast(FeedEvent::created(&populated));
        Ok(populated)
    }

    /// Fetches a single post, with its image rewritten to a public URL.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotFound`] for unknown or malformed ids.
    pub async fn get_post(&self, id: &str) -> Result<PopulatedPost, ServerError> {
        let id = parse_post_id(id)?;
        let mut populated = self
            .store
            .find_post_with_creator(id)
            .await?
            .ok_or_else(|| ServerError::not_found(POST_NOT_FOUND_MESSAGE))?;

        populated.post.image_url = self.images.public_url(&populated.post.image_url);
        Ok(populated)
    }

    /// Updates a post owned by `actor` and broadcasts an `update` event.
    ///
    /// When the image changes, the previous file is deleted in the background.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Validation`] if title or content are too short
    /// - [`ServerError::NotFound`] if the post does not exist
    /// - [`ServerError::Forbidden`] if `actor` is not the creator
    pub async fn update_post(
        &self,
        id: &str,
        actor: UserId,
        input: PostInput,
    ) -> Result<PopulatedPost, ServerError> {
        validate_post(&input.title, &input.content)?;
        let id = parse_post_id(id)?;

        let PopulatedPost { mut post, creator } = self
            .store
            .find_post_with_creator(id)
            .await?
            .ok_or_else(|| ServerError::not_found(POST_NOT_FOUND_MESSAGE))?;
        ensure_owner(creator.id, actor)?;

        let image_url = input
            .image_url
            .map(|url| self.images.normalize_reference(url.trim()))
            .filter(|url| !url.is_empty());
        if let Some(image_url) = image_url {
            if image_url != post.image_url {
                self.images.clear(&post.image_url);
                post.image_url = image_url;
            }
        }

        post.title = input.title.trim().to_string();
        post.content = input.content.trim().to_string();
        post.updated_at = Utc::now();

        let post = self
            .store
            .update_post(post)
            .await?
            .ok_or_else(|| ServerError::not_found(POST_NOT_FOUND_MESSAGE))?;
        let populated = PopulatedPost { post, creator };

        info!(post_id = %populated.post.id, "Post updated");
        self.broadcaster.broadcast(FeedEvent::updated(&populated));
        Ok(populated)
    }

    /// Deletes a post owned by `actor` and broadcasts a `delete` event.
    ///
    /// # Errors
    ///
    /// - [`ServerError::NotFound`] if the post does not exist
    /// - [`ServerError::Forbidden`] if `actor` is not the creator
    pub async fn delete_post(&self, id: &str, actor: UserId) -> Result<(), ServerError> {
        let id = parse_post_id(id)?;
        let post = self
            .store
            .find_post(id)
            .await?
            .ok_or_else(|| ServerError::not_found(POST_NOT_FOUND_MESSAGE))?;
        ensure_owner(post.creator, actor)?;

        self.images.clear(&post.image_url);
        if !self.store.delete_post(post.id).await? {
            return Err(ServerError::not_found(POST_NOT_FOUND_MESSAGE));
        }
        self.store.pull_user_post(post.creator, post.id).await?;

        info!(post_id = %post.id, "Post deleted");
        self.broadcaster.broadcast(FeedEvent::deleted(post.id));
        Ok(())
    }

    /// Returns the status of `user`.
    pub async fn get_status(&self, user: UserId) -> Result<String, ServerError> {
        self.store
            .find_user(user)
            .await?
            .map(|user| user.status)
            .ok_or_else(|| ServerError::not_found(USER_NOT_FOUND_MESSAGE))
    }

    /// Replaces the status of `user` verbatim and returns the stored value.
    pub async fn set_status(&self, user: UserId, status: &str) -> Result<String, ServerError> {
        let updated = self
            .store
            .set_user_status(user, status)
            .await?
            .ok_or_else(|| ServerError::not_found(USER_NOT_FOUND_MESSAGE))?;

        debug!(user_id = %user, "Status updated");
        Ok(updated.status)
    }
}

/// Both mutation paths compare plain [`UserId`]s, however they loaded the
/// creator.
fn ensure_owner(creator: UserId, actor: UserId) -> Result<(), ServerError> {
    if creator == actor {
        Ok(())
    } else {
        warn!(creator = %creator, actor = %actor, "Rejected change to another user's post");
        Err(ServerError::forbidden(NOT_AUTHORIZED_MESSAGE))
    }
}

fn parse_post_id(raw: &str) -> Result<PostId, ServerError> {
    PostId::parse(raw).ok_or_else(|| ServerError::not_found(POST_NOT_FOUND_MESSAGE))
}
