//! Optional lease bookkeeping.
//!
//! The subscriber itself keeps no table of active subscriptions. Callers that
//! want one can feed a [`LeaseTable`] from the event channel and let
//! [`renewal_task`] resubscribe topics before their lease runs out.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::events::{SubscriberEvent, VerificationEvent};
use crate::Subscriber;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A verified subscription lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Hub the subscription lives on, when known.
    pub hub: Option<String>,
    /// Absolute expiry in unix seconds.
    pub expires_at: u64,
    /// A renewal request has been sent and not yet verified.
    pub renewing: bool,
}

impl Lease {
    /// Seconds left before expiry, zero once expired.
    pub fn remaining(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

/// Leases of verified subscriptions, keyed by topic.
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: DashMap<String, Lease>,
}

impl LeaseTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a verified subscription, replacing any previous lease.
    pub fn record(&self, event: &VerificationEvent) {
        self.leases.insert(
            event.topic.clone(),
            Lease {
                hub: event.hub.clone(),
                expires_at: event.lease,
                renewing: false,
            },
        );
    }

    /// Forget the lease for `topic`.
    pub fn release(&self, topic: &str) -> Option<Lease> {
        self.leases.remove(topic).map(|(_, lease)| lease)
    }

    /// Get the lease for `topic`.
    pub fn get(&self, topic: &str) -> Option<Lease> {
        self.leases.get(topic).map(|entry| entry.value().clone())
    }

    /// Update the table from a subscriber event.
    pub fn apply(&self, event: &SubscriberEvent) {
        match event {
            SubscriberEvent::Subscribed(verification) => self.record(verification),
            SubscriberEvent::Unsubscribed(verification) => {
                self.release(&verification.topic);
            }
            SubscriberEvent::Denied(denied) => {
                self.release(&denied.topic);
            }
            _ => {}
        }
    }

    /// Topics whose lease ends within `margin` seconds of `now`.
    ///
    /// Returned topics are marked as renewing and are not returned again
    /// until a fresh lease is recorded for them.
    pub fn take_expiring(&self, now: u64, margin: u64) -> Vec<String> {
        let deadline = now.saturating_add(margin);
        let mut expiring = Vec::new();

        for mut entry in self.leases.iter_mut() {
            let lease = entry.value_mut();
            if !lease.renewing && lease.expires_at <= deadline {
                lease.renewing = true;
                expiring.push(entry.key().clone());
            }
        }

        expiring
    }

    /// Number of tracked leases.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    /// Whether no leases are tracked.
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

/// Keep `table` in sync with `events` until the channel closes.
pub async fn track_leases(table: Arc<LeaseTable>, mut events: broadcast::Receiver<SubscriberEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => table.apply(&event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "lease tracker fell behind the event channel");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Periodically resubscribe topics whose lease ends within `margin`.
pub async fn renewal_task(
    subscriber: Subscriber,
    table: Arc<LeaseTable>,
    interval: Duration,
    margin: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        for topic in table.take_expiring(unix_now(), margin.as_secs()) {
            tracing::info!(topic = %topic, "renewing lease");
            if let Err(e) = subscriber.subscribe(&topic).await {
                tracing::warn!(topic = %topic, error = %e, "lease renewal failed");
            }
        }
    }
}
