//! Verification handshake (GET).

use axum::{http::StatusCode, response::Response};

use super::{param, plain_text, Params};
use crate::error::CallbackError;
use crate::events::{DenialReason, DeniedEvent, SubscriberEvent, VerificationEvent};
use crate::lease::unix_now;
use crate::Subscriber;

/// Answer a hub verification or denial.
///
/// The challenge is echoed back verbatim; that echo is what proves to the
/// hub that we own the callback URL.
pub(super) fn handle(subscriber: &Subscriber, params: &Params) -> Result<Response, CallbackError> {
    let topic = param(params, "hub.topic").ok_or(CallbackError::BadRequest)?;
    let mode = param(params, "hub.mode").ok_or(CallbackError::BadRequest)?;
    let hub = param(params, "hub")
        .or_else(|| param(params, "hub.hub"))
        .map(str::to_string);
    let challenge = params.get("hub.challenge").cloned();

    match mode {
        "denied" => {
            let reason = param(params, "hub.reason").map(str::to_string);
            tracing::warn!(topic, ?reason, "hub denied subscription");

            subscriber.emit(SubscriberEvent::Denied(DeniedEvent {
                topic: topic.to_string(),
                hub,
                reason: DenialReason::Hub { reason },
            }));
            Ok(text(challenge.unwrap_or_else(|| "ok".to_string())))
        }
        "subscribe" | "unsubscribe" => {
            if mode == "unsubscribe" && !subscriber.confirm_unsubscribed(topic) {
                tracing::warn!(topic, "unsubscribe verification for a request we never sent");
                return Err(CallbackError::NotFound);
            }

            let lease_seconds = params
                .get("hub.lease_seconds")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(0);
            let event = VerificationEvent {
                topic: topic.to_string(),
                hub,
                lease: unix_now().saturating_add(lease_seconds),
            };

            if mode == "subscribe" {
                subscriber.confirm_subscribed(topic);
                tracing::info!(topic, lease = event.lease, "subscription verified");
                subscriber.emit(SubscriberEvent::Subscribed(event));
            } else {
                tracing::info!(topic, "unsubscription verified");
                subscriber.emit(SubscriberEvent::Unsubscribed(event));
            }
            Ok(text(challenge.unwrap_or_default()))
        }
        other => {
            tracing::debug!(topic, mode = other, "unknown handshake mode");
            Err(CallbackError::Forbidden)
        }
    }
}

fn text(body: String) -> Response {
    plain_text(StatusCode::OK, "text/plain", body)
}
