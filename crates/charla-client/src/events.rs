//! Local notification fan-out.
//!
//! The [`EventBus`] is the boundary between the core and the presentation
//! layer: the ingestion pipeline publishes "something changed" signals here
//! and UI-level components subscribe. It is an explicitly constructed
//! instance owned by the [`Session`](crate::Session) -- one per active
//! connection, never a process-wide global.
//!
//! Fan-out is best-effort: a dropped or stuck subscriber never prevents
//! delivery to the rest, and each subscriber observes events for a given id
//! in the order they were published.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

/// What subscribers are told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A channel's history changed.
    ChannelUpdated { channel_id: i64 },
    /// A private conversation's history changed; keyed by the peer.
    PrivateUpdated { user_id: i64 },
    /// A user's presence changed.
    UserStatusChanged { user_id: i64, online: bool },
    /// This session was kicked; the session should end.
    Kicked { reason: Option<String> },
    /// The server announced shutdown; the session should end.
    ServerShutdown,
    /// The connection closed.
    ConnectionClosed,
    /// The connection failed.
    ConnectionError { message: String },
}

/// Handle for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Process-local notification registry.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    subscribers: Mutex<Vec<(SubscriberId, mpsc::UnboundedSender<Notification>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Events published after this call are
    /// delivered in order on the returned receiver.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<Notification>) {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .expect("subscriber lock")
            .push((id, tx));
        (id, rx)
    }

    /// Deregister a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner
            .subscribers
            .lock()
            .expect("subscriber lock")
            .retain(|(sid, _)| *sid != id);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().expect("subscriber lock").len()
    }

    /// Publish to every subscriber, pruning the ones that went away.
    pub fn notify(&self, notification: Notification) {
        debug!(event = ?notification, "publishing notification");
        self.inner
            .subscribers
            .lock()
            .expect("subscriber lock")
            .retain(|(_, tx)| tx.send(notification.clone()).is_ok());
    }

    pub fn notify_channel_updated(&self, channel_id: i64) {
        self.notify(Notification::ChannelUpdated { channel_id });
    }

    pub fn notify_private_updated(&self, user_id: i64) {
        self.notify(Notification::PrivateUpdated { user_id });
    }

    pub fn notify_user_status(&self, user_id: i64, online: bool) {
        self.notify(Notification::UserStatusChanged { user_id, online });
    }
}
