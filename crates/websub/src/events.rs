//! Typed events emitted by the subscriber.
//!
//! Events are fanned out over a `tokio::sync::broadcast` channel; every
//! receiver obtained from [`crate::Subscriber::events`] sees every event sent
//! after it subscribed.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::http::HeaderMap;
use bytes::Bytes;
use tokio::sync::broadcast;

/// Capacity of the event channel before slow receivers start lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something observable happened on the subscriber.
#[derive(Debug, Clone)]
pub enum SubscriberEvent {
    /// The callback listener is accepting connections.
    Listening {
        /// Bound local address.
        addr: SocketAddr,
    },
    /// The callback listener failed.
    Error {
        /// Contextualized error message.
        message: String,
    },
    /// A subscription request was refused, or the hub revoked one.
    Denied(DeniedEvent),
    /// The hub verified a subscribe request.
    Subscribed(VerificationEvent),
    /// The hub verified an unsubscribe request.
    Unsubscribed(VerificationEvent),
    /// A notification with a valid signature arrived.
    Feed(FeedEvent),
}

impl SubscriberEvent {
    /// Short name of the event kind, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SubscriberEvent::Listening { .. } => "listen",
            SubscriberEvent::Error { .. } => "error",
            SubscriberEvent::Denied(_) => "denied",
            SubscriberEvent::Subscribed(_) => "subscribe",
            SubscriberEvent::Unsubscribed(_) => "unsubscribe",
            SubscriberEvent::Feed(_) => "feed",
        }
    }

    /// Topic the event concerns, if any.
    pub fn topic(&self) -> Option<&str> {
        match self {
            SubscriberEvent::Denied(event) => Some(&event.topic),
            SubscriberEvent::Subscribed(event) | SubscriberEvent::Unsubscribed(event) => {
                Some(&event.topic)
            }
            SubscriberEvent::Feed(event) => Some(&event.topic),
            SubscriberEvent::Listening { .. } | SubscriberEvent::Error { .. } => None,
        }
    }
}

/// A hub confirmed a subscribe or unsubscribe handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationEvent {
    /// Topic the handshake was for.
    pub topic: String,
    /// Hub URL carried on the callback, if present.
    pub hub: Option<String>,
    /// Absolute lease expiry in unix seconds.
    pub lease: u64,
}

/// Why a subscription did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The hub called back with `hub.mode=denied`.
    Hub {
        /// Optional `hub.reason` supplied by the hub.
        reason: Option<String>,
    },
    /// The subscription request never got a response.
    Transport {
        /// Error message from the HTTP client.
        message: String,
    },
    /// The hub answered the subscription request with an unexpected status.
    UnexpectedStatus {
        /// Response status code.
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },
}

/// A subscription was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeniedEvent {
    /// Topic that was denied.
    pub topic: String,
    /// Hub URL, when known.
    pub hub: Option<String>,
    /// Cause of the denial.
    pub reason: DenialReason,
}

/// A verified content notification.
#[derive(Debug, Clone)]
pub struct FeedEvent {
    /// Topic from the callback query.
    pub topic: String,
    /// Hub from the callback query, if present.
    pub hub: Option<String>,
    /// Callback URL as observed by the server.
    pub callback: String,
    /// Raw notification body.
    pub feed: Bytes,
    /// Request headers.
    pub headers: HeaderMap,
}

impl FeedEvent {
    /// The payload as text, replacing invalid UTF-8.
    pub fn feed_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.feed)
    }
}

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<SubscriberEvent>,
}

impl EventSender {
    /// Create a new event channel.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Events sent while nobody listens are dropped.
    pub fn emit(&self, event: SubscriberEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            tracing::trace!(event = name, "no event receivers");
        }
    }

    /// Register a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<SubscriberEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new()
    }
}
