//! WebSub (PubSubHubbub) subscriber.
//!
//! This crate subscribes to topics on a WebSub hub, answers the hub's
//! verification handshake, and authenticates content notifications with
//! per-topic HMAC-SHA256 signatures:
//! - [`Subscriber::subscribe`] / [`Subscriber::unsubscribe`] send requests
//!   to the hub, each carrying a secret derived from the master secret and
//!   the topic
//! - [`Subscriber::router`] / [`Subscriber::listen`] expose the callback
//!   endpoint the hub calls back on
//! - [`Subscriber::events`] delivers handshake, denial and feed events
//!
//! No subscription state is persisted. [`lease::LeaseTable`] can track
//! verified leases from the event channel for callers that want renewal.

pub mod callback;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod lease;
pub mod server;
pub mod signature;
mod subscriber;

pub use config::{Args, SubscriberConfig};
pub use error::{CallbackError, Error, Result};
pub use events::{DenialReason, DeniedEvent, FeedEvent, SubscriberEvent, VerificationEvent};
pub use hub::Mode;
pub use subscriber::Subscriber;
