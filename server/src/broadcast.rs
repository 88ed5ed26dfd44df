//! Realtime fan-out of feed changes.
//!
//! Every successful create, update or delete of a post publishes one
//! [`FeedEvent`] on the [`FeedBroadcaster`]. Each WebSocket connection holds
//! its own receiver and forwards events as text frames shaped
//! `{"event":"posts","data":{...}}`.
//!
//! Delivery is fire-and-forget: there is no acknowledgement, and clients that
//! connect after an event never see it.
//!
//! # Example
//!
//! ```rust
//! use postboard_server::broadcast::{FeedAction, FeedBroadcaster, FeedEvent};
//! use postboard_server::types::PostId;
//!
//! let broadcaster = FeedBroadcaster::new();
//! let mut rx = broadcaster.subscribe();
//!
//! let receivers = broadcaster.broadcast(FeedEvent::deleted(PostId::new()));
//! assert_eq!(receivers, 1);
//! assert_eq!(rx.try_recv().unwrap().action, FeedAction::Delete);
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::types::{CreatorView, PopulatedPost, PostId, PostView};

/// Default channel capacity.
///
/// Subscribers more than this many events behind start receiving
/// `RecvError::Lagged` and skip the missed events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Name of the realtime channel every event is sent on.
pub const FEED_CHANNEL: &str = "posts";

/// What happened to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedAction {
    Create,
    Update,
    Delete,
}

/// Payload of an event: the full post, or only its id once deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPost {
    Post(Box<PostView>),
    Deleted(PostId),
}

/// A single feed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub action: FeedAction,
    pub post: EventPost,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<CreatorView>,
}

impl FeedEvent {
    pub fn created(post: &PopulatedPost) -> Self {
        Self::with_post(FeedAction::Create, post)
    }

    pub fn updated(post: &PopulatedPost) -> Self {
        Self::with_post(FeedAction::Update, post)
    }

    pub fn deleted(id: PostId) -> Self {
        Self {
            action: FeedAction::Delete,
            post: EventPost::Deleted(id),
            creator: None,
        }
    }

    fn with_post(action: FeedAction, post: &PopulatedPost) -> Self {
        Self {
            action,
            post: EventPost::Post(Box::new(PostView::from(post))),
            creator: Some(CreatorView::from(&post.creator)),
        }
    }

    /// Id of the post this event is about.
    pub fn post_id(&self) -> PostId {
        match &self.post {
            EventPost::Post(view) => view.id,
            EventPost::Deleted(id) => *id,
        }
    }

    /// Encodes the event as a realtime text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(&Frame {
            event: FEED_CHANNEL,
            data: self,
        })
    }
}

#[derive(Serialize)]
struct Frame<'a> {
    event: &'a str,
    data: &'a FeedEvent,
}

/// Publishes [`FeedEvent`]s to every connected subscriber.
///
/// One instance is created at startup and shared by cloning: the feed
/// service publishes through it and the WebSocket handler subscribes to it.
/// Clones share the same underlying channel.
#[derive(Debug, Clone)]
pub struct FeedBroadcaster {
    sender: Sender<FeedEvent>,
}

impl FeedBroadcaster {
    /// Creates a broadcaster with [`DEFAULT_CHANNEL_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a broadcaster with the given channel capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        debug!(capacity, "Created feed broadcaster");
        Self { sender }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<FeedEvent> {
        let rx = self.sender.subscribe();
        debug!(
            subscriber_count = self.subscriber_count(),
            "New subscriber added"
        );
        rx
    }

    /// Publishes an event and returns how many subscribers it reached.
    ///
    /// Never blocks. With no subscribers the event is dropped and 0 is
    /// returned.
    pub fn broadcast(&self, event: FeedEvent) -> usize {
        trace!(
            action = ?event.action,
            post_id = %event.post_id(),
            "Broadcasting feed event"
        );

        match self.sender.send(event) {
            Ok(receivers) => {
                trace!(receivers, "Feed event broadcast");
                receivers
            }
            Err(_) => {
                // No active receivers.
                trace!("No realtime subscribers for feed event");
                0
            }
        }
    }

    /// Number of live receivers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FeedBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Post, User};

    fn populated() -> PopulatedPost {
        let creator = User::new("a@b.com".into(), "hash".into(), "Max".into());
        let post = Post::new(
            "A title".into(),
            "Some content".into(),
            "images/a.png".into(),
            creator.id,
        );
        PopulatedPost { post, creator }
    }

    #[test]
    fn broadcaster_new_has_no_subscribers() {
        assert_eq!(FeedBroadcaster::new().subscriber_count(), 0);
        assert_eq!(FeedBroadcaster::default().subscriber_count(), 0);
    }

    #[test]
    fn broadcaster_subscriber_count_follows_receivers() {
        let broadcaster = FeedBroadcaster::with_capacity(8);
        let rx1 = broadcaster.subscribe();
        let rx2 = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(rx2);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn broadcaster_clone_shares_channel() {
        let broadcaster1 = FeedBroadcaster::new();
        let broadcaster2 = broadcaster1.clone();

        let _rx = broadcaster1.subscribe();
        assert_eq!(broadcaster2.subscriber_count(), 1);
    }

    #[test]
    fn broadcast_without_subscribers_returns_zero() {
        let broadcaster = FeedBroadcaster::new();
        assert_eq!(broadcaster.broadcast(FeedEvent::deleted(PostId::new())), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_events_in_order() {
        let broadcaster = FeedBroadcaster::new();
        let mut rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();

        let post = populated();
        assert_eq!(broadcaster.broadcast(FeedEvent::created(&post)), 2);
        assert_eq!(broadcaster.broadcast(FeedEvent::updated(&post)), 2);
        assert_eq!(broadcaster.broadcast(FeedEvent::deleted(post.post.id)), 2);

        for rx in [&mut rx1, &mut rx2] {
            let actions: Vec<FeedAction> = vec![
                rx.recv().await.unwrap().action,
                rx.recv().await.unwrap().action,
                rx.recv().await.unwrap().action,
            ];
            assert_eq!(
                actions,
                vec![FeedAction::Create, FeedAction::Update, FeedAction::Delete]
            );
        }
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_events() {
        let broadcaster = FeedBroadcaster::new();
        let _early = broadcaster.subscribe();
        broadcaster.broadcast(FeedEvent::deleted(PostId::new()));

        let mut late = broadcaster.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn create_frame_carries_post_and_creator() {
        let post = populated();
        let frame: serde_json::Value =
            serde_json::from_str(&FeedEvent::created(&post).to_frame().unwrap()).unwrap();

        assert_eq!(frame["event"], "posts");
        assert_eq!(frame["data"]["action"], "create");
        assert_eq!(frame["data"]["post"]["_id"], post.post.id.to_string());
        assert_eq!(frame["data"]["post"]["title"], "A title");
        assert_eq!(frame["data"]["creator"]["name"], "Max");
    }

    #[test]
    fn delete_frame_carries_only_the_id() {
        let id = PostId::new();
        let frame: serde_json::Value =
            serde_json::from_str(&FeedEvent::deleted(id).to_frame().unwrap()).unwrap();

        assert_eq!(frame["data"]["action"], "delete");
        assert_eq!(frame["data"]["post"], id.to_string());
        assert!(frame["data"].get("creator").is_none());
    }

    #[test]
    fn events_deserialize_back() {
        let post = populated();
        let event = FeedEvent::updated(&post);
        let json = serde_json::to_string(&event).unwrap();
        let back: FeedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.post_id(), post.post.id);
        assert_eq!(back.action, FeedAction::Update);
    }
}
