//! The subscriber: configuration, secrets and events shared by the
//! subscription manager and the callback endpoint.

use std::sync::Arc;

use axum::Router;
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::callback;
use crate::config::SubscriberConfig;
use crate::error::{Error, Result};
use crate::events::{DenialReason, DeniedEvent, EventSender, SubscriberEvent};
use crate::hub::{callback_url, HubClient, Mode, SubscriptionRequest};
use crate::server::{self, ServerStats};
use crate::signature::{derive_topic_secret, TopicSecrets};

/// A WebSub subscriber.
///
/// Cheap to clone; clones share secrets and the event channel.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<Inner>,
}

struct Inner {
    config: SubscriberConfig,
    hub: HubClient,
    secrets: TopicSecrets,
    /// Last request sent per topic and not yet verified by the hub.
    pending: DashMap<String, Mode>,
    events: EventSender,
}

impl Subscriber {
    /// Create a subscriber, failing fast on incomplete configuration.
    pub fn new(config: SubscriberConfig) -> Result<Self> {
        config.validate()?;
        let hub = HubClient::new(&config.hub_url, &config.client_id, config.request_timeout)?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                hub,
                secrets: TopicSecrets::new(),
                pending: DashMap::new(),
                events: EventSender::new(),
            }),
        })
    }

    /// Subscriber configuration.
    pub fn config(&self) -> &SubscriberConfig {
        &self.inner.config
    }

    /// Secrets issued to the hub so far.
    pub fn secrets(&self) -> &TopicSecrets {
        &self.inner.secrets
    }

    /// Mode of the request sent for `topic` that the hub has yet to verify.
    pub fn pending(&self, topic: &str) -> Option<Mode> {
        self.inner.pending.get(topic).map(|entry| *entry.value())
    }

    /// Register a receiver for subscriber events.
    pub fn events(&self) -> broadcast::Receiver<SubscriberEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SubscriberEvent) {
        self.inner.events.emit(event);
    }

    /// Ask the hub to subscribe to `topic`.
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.set_subscription(Mode::Subscribe, topic).await
    }

    /// Ask the hub to unsubscribe from `topic`.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.set_subscription(Mode::Unsubscribe, topic).await
    }

    /// Send a single subscribe or unsubscribe request for `topic`.
    ///
    /// `Ok` means the hub accepted the request for verification; the
    /// outcome arrives later as a handshake event. Failures are returned
    /// and also published as a [`SubscriberEvent::Denied`].
    pub async fn set_subscription(&self, mode: Mode, topic: &str) -> Result<()> {
        let config = &self.inner.config;
        let hub_url = self.inner.hub.hub_url();

        let secret = derive_topic_secret(&config.secret, topic)?;
        self.inner.secrets.insert(topic, secret.clone());
        self.inner.pending.insert(topic.to_string(), mode);

        let request = SubscriptionRequest {
            mode,
            topic: topic.to_string(),
            callback: callback_url(&config.callback, topic, hub_url),
            lease_seconds: config.lease_seconds,
            secret,
        };

        tracing::debug!(topic, %mode, hub = hub_url, "sending subscription request");
        match self.inner.hub.send(&request).await {
            Ok(status) => {
                tracing::info!(
                    topic,
                    %mode,
                    status = status.as_u16(),
                    "hub accepted subscription request"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(topic, %mode, error = %e, "subscription request failed");
                self.inner
                    .pending
                    .remove_if(topic, |_, pending| *pending == mode);
                let reason = match &e {
                    Error::HubRejected { status, body } => DenialReason::UnexpectedStatus {
                        status: *status,
                        body: body.clone(),
                    },
                    other => DenialReason::Transport {
                        message: other.to_string(),
                    },
                };
                self.emit(SubscriberEvent::Denied(DeniedEvent {
                    topic: topic.to_string(),
                    hub: Some(hub_url.to_string()),
                    reason,
                }));
                Err(e)
            }
        }
    }

    /// A subscribe handshake succeeded; keep the topic's secret on record.
    ///
    /// The secret is re-derived from the master secret, so a handshake can
    /// never install a key other than the one we issue.
    pub(crate) fn confirm_subscribed(&self, topic: &str) {
        self.inner
            .pending
            .remove_if(topic, |_, pending| *pending == Mode::Subscribe);
        match derive_topic_secret(&self.inner.config.secret, topic) {
            Ok(secret) => self.inner.secrets.insert(topic, secret),
            Err(e) => tracing::warn!(topic, error = %e, "failed to derive topic secret"),
        }
    }

    /// An unsubscribe handshake arrived.
    ///
    /// Only honoured when it answers an unsubscribe request we sent; then
    /// the topic's secret is dropped. Returns whether it was honoured.
    pub(crate) fn confirm_unsubscribed(&self, topic: &str) -> bool {
        let requested = self
            .inner
            .pending
            .remove_if(topic, |_, pending| *pending == Mode::Unsubscribe)
            .is_some();
        if requested {
            self.inner.secrets.remove(topic);
        }
        requested
    }

    /// Router for the callback endpoint.
    pub fn router(&self) -> Router {
        callback::create_router(self.clone())
    }

    /// Bind the callback listener.
    ///
    /// Publishes [`SubscriberEvent::Listening`] on success and
    /// [`SubscriberEvent::Error`] on failure.
    pub async fn bind(&self, addr: &str) -> Result<TcpListener> {
        let bound = TcpListener::bind(addr)
            .await
            .and_then(|listener| listener.local_addr().map(|local| (listener, local)));

        match bound {
            Ok((listener, local)) => {
                tracing::info!(addr = %local, "callback listener bound");
                self.emit(SubscriberEvent::Listening { addr: local });
                Ok(listener)
            }
            Err(source) => {
                let err = Error::Bind {
                    addr: addr.to_string(),
                    kind: source.kind(),
                    source,
                };
                tracing::error!(error = %err, "failed to bind callback listener");
                self.emit(SubscriberEvent::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Serve the callback endpoint on `listener` until `shutdown` fires.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Arc<ServerStats> {
        server::serve(listener, self.router(), shutdown).await
    }

    /// Bind `addr` and serve the callback endpoint until `shutdown` fires.
    pub async fn listen(&self, addr: &str, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = self.bind(addr).await?;
        self.serve(listener, shutdown).await;
        Ok(())
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("callback", &self.inner.config.callback)
            .field("hub_url", &self.inner.config.hub_url)
            .field("topics", &self.inner.secrets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SubscriberConfig {
        SubscriberConfig::new("https://example.com/", "client", "master")
    }

    #[test]
    fn test_new_rejects_missing_secret() {
        let result = Subscriber::new(SubscriberConfig::new("https://example.com/", "client", ""));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_subscribe_confirmation_registers_secret() {
        let subscriber = Subscriber::new(config()).unwrap();
        subscriber
            .inner
            .pending
            .insert("topic".to_string(), Mode::Subscribe);

        subscriber.confirm_subscribed("topic");
        assert_eq!(
            subscriber.secrets().get("topic"),
            Some(derive_topic_secret("master", "topic").unwrap())
        );
        assert!(subscriber.pending("topic").is_none());
    }

    #[test]
    fn test_unrequested_unsubscribe_keeps_secret() {
        let subscriber = Subscriber::new(config()).unwrap();
        subscriber.confirm_subscribed("topic");

        assert!(!subscriber.confirm_unsubscribed("topic"));
        assert!(subscriber.secrets().get("topic").is_some());

        subscriber
            .inner
            .pending
            .insert("topic".to_string(), Mode::Subscribe);
        assert!(!subscriber.confirm_unsubscribed("topic"));
        assert_eq!(subscriber.pending("topic"), Some(Mode::Subscribe));
    }

    #[test]
    fn test_requested_unsubscribe_drops_secret() {
        let subscriber = Subscriber::new(config()).unwrap();
        subscriber.confirm_subscribed("topic");
        subscriber
            .inner
            .pending
            .insert("topic".to_string(), Mode::Unsubscribe);

        assert!(subscriber.confirm_unsubscribed("topic"));
        assert!(subscriber.secrets().get("topic").is_none());
        assert!(subscriber.pending("topic").is_none());
    }

    #[tokio::test]
    async fn test_failed_request_clears_pending() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        drop(taken);

        let subscriber =
            Subscriber::new(config().with_hub_url(format!("http://{}/hub", addr))).unwrap();
        assert!(subscriber.unsubscribe("topic").await.is_err());
        assert!(subscriber.pending("topic").is_none());
    }

    #[tokio::test]
    async fn test_bind_publishes_listening() {
        let subscriber = Subscriber::new(config()).unwrap();
        let mut events = subscriber.events();

        let listener = subscriber.bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();

        match events.try_recv().unwrap() {
            SubscriberEvent::Listening { addr } => assert_eq!(addr, local),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bind_failure_publishes_error() {
        let subscriber = Subscriber::new(config()).unwrap();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let mut events = subscriber.events();

        let result = subscriber.bind(&addr).await;
        assert!(matches!(result, Err(Error::Bind { .. })));

        match events.try_recv().unwrap() {
            SubscriberEvent::Error { message } => {
                assert!(message.contains("Failed to start on"));
                assert!(message.contains(&addr));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
