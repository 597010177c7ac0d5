//! WebSub subscriber binary.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use websub::lease::{renewal_task, track_leases, LeaseTable};
use websub::{Args, DenialReason, Subscriber, SubscriberConfig, SubscriberEvent};

/// How often the renewal task looks for expiring leases.
const RENEWAL_INTERVAL: Duration = Duration::from_secs(60);

/// How long to wait for the hub to confirm unsubscriptions on shutdown.
const UNSUBSCRIBE_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("websub={},tower_http=info", args.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SubscriberConfig::from(&args);
    tracing::info!(
        listen = %args.listen,
        callback = %config.callback,
        hub = %config.hub_url,
        topics = args.topics.len(),
        "starting WebSub subscriber"
    );

    let subscriber = Subscriber::new(config)?;
    tokio::spawn(log_events(subscriber.events()));

    if args.renew_margin_secs > 0 {
        let table = Arc::new(LeaseTable::new());
        tokio::spawn(track_leases(table.clone(), subscriber.events()));
        tokio::spawn(renewal_task(
            subscriber.clone(),
            table,
            RENEWAL_INTERVAL,
            Duration::from_secs(args.renew_margin_secs),
        ));
    }

    // Bind before subscribing so the handshake has somewhere to land
    let listener = subscriber.bind(&args.listen).await?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = {
        let subscriber = subscriber.clone();
        tokio::spawn(async move { subscriber.serve(listener, shutdown_rx).await })
    };

    for topic in &args.topics {
        if let Err(e) = subscriber.subscribe(topic).await {
            tracing::error!(topic = %topic, error = %e, "failed to subscribe");
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("received shutdown signal");

    unsubscribe_all(&subscriber, &args.topics).await;

    let _ = shutdown_tx.send(());
    let stats = server.await?;
    tracing::info!(
        connections = stats.connections(),
        terminated = stats.terminated(),
        "subscriber shutdown complete"
    );

    Ok(())
}

/// Unsubscribe every topic and wait briefly for the hub to confirm.
async fn unsubscribe_all(subscriber: &Subscriber, topics: &[String]) {
    let mut events = subscriber.events();
    let mut pending: HashSet<String> = HashSet::new();

    for topic in topics {
        match subscriber.unsubscribe(topic).await {
            Ok(()) => {
                pending.insert(topic.clone());
            }
            Err(e) => tracing::warn!(topic = %topic, error = %e, "failed to unsubscribe"),
        }
    }

    let confirmed = tokio::time::timeout(UNSUBSCRIBE_GRACE, async {
        while !pending.is_empty() {
            match events.recv().await {
                Ok(SubscriberEvent::Unsubscribed(event)) => {
                    pending.remove(&event.topic);
                }
                Ok(SubscriberEvent::Denied(event)) => {
                    pending.remove(&event.topic);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
    .await;

    if confirmed.is_err() {
        tracing::warn!(
            unconfirmed = pending.len(),
            "hub did not confirm every unsubscription in time"
        );
    }
}

/// Log every subscriber event.
async fn log_events(mut events: broadcast::Receiver<SubscriberEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event logger fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            SubscriberEvent::Listening { addr } => {
                tracing::info!(%addr, "listening for hub callbacks");
            }
            SubscriberEvent::Error { message } => {
                tracing::error!(%message, "listener error");
            }
            SubscriberEvent::Subscribed(event) => {
                let until = DateTime::from_timestamp(event.lease as i64, 0)
                    .map(|at| at.to_rfc2822())
                    .unwrap_or_else(|| event.lease.to_string());
                tracing::info!(topic = %event.topic, %until, "subscribed");
            }
            SubscriberEvent::Unsubscribed(event) => {
                tracing::info!(topic = %event.topic, "unsubscribed");
            }
            SubscriberEvent::Denied(event) => match event.reason {
                DenialReason::Hub { reason } => {
                    tracing::warn!(topic = %event.topic, ?reason, "hub denied subscription");
                }
                DenialReason::Transport { message } => {
                    tracing::warn!(topic = %event.topic, %message, "hub unreachable");
                }
                DenialReason::UnexpectedStatus { status, body } => {
                    tracing::warn!(topic = %event.topic, status, %body, "hub rejected request");
                }
            },
            SubscriberEvent::Feed(event) => {
                tracing::info!(
                    topic = %event.topic,
                    bytes = event.feed.len(),
                    callback = %event.callback,
                    "new feed"
                );
                tracing::debug!(topic = %event.topic, feed = %event.feed_text(), "feed payload");
            }
        }
    }
}
