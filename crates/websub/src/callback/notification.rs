//! Content notifications (POST).

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use super::{param, plain_text, Params};
use crate::error::CallbackError;
use crate::events::{FeedEvent, SubscriberEvent};
use crate::server::ConnectionAbort;
use crate::signature::SignatureHeader;
use crate::Subscriber;

/// Header carrying the hub's body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

enum BodyError {
    TooLarge,
    Stream(axum::Error),
}

/// Accept a notification if its signature checks out.
///
/// A bad signature is answered with 202 and otherwise ignored: it can be
/// the result of a secret change racing an in-flight delivery just as well
/// as a forgery.
pub(super) async fn handle(
    subscriber: &Subscriber,
    params: &Params,
    request: Request,
) -> Result<Response, CallbackError> {
    let topic = param(params, "topic").ok_or(CallbackError::BadRequest)?;
    let hub = param(params, "hub").map(str::to_string);

    let (parts, body) = request.into_parts();
    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .ok_or(CallbackError::Forbidden)?
        .to_str()
        .unwrap_or_default()
        .to_string();

    let limit = subscriber.config().max_body_bytes;
    let abort = parts.extensions.get::<ConnectionAbort>().cloned();

    let feed = match read_body(&parts.headers, body, limit).await {
        Ok(feed) => feed,
        Err(BodyError::TooLarge) => {
            tracing::warn!(topic, limit, "notification body too large, dropping connection");
            return match abort {
                Some(abort) => match abort.terminate().await {},
                None => Err(CallbackError::PayloadTooLarge),
            };
        }
        Err(BodyError::Stream(e)) => {
            tracing::debug!(topic, error = %e, "notification body interrupted");
            return Err(CallbackError::BadRequest);
        }
    };

    let verified = SignatureHeader::parse(&signature)
        .map(|header| subscriber.secrets().verify(topic, &feed, &header))
        .unwrap_or(false);

    if !verified {
        tracing::debug!(topic, bytes = feed.len(), "notification signature mismatch");
        return Ok(plain_text(StatusCode::ACCEPTED, CONTENT_TYPE, String::new()));
    }

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| parts.uri.authority().map(|authority| authority.as_str()))
        .unwrap_or_default();
    let path = parts
        .uri
        .path_and_query()
        .map(|path| path.as_str())
        .unwrap_or("/");
    let callback = format!("http://{}{}", host, path);

    tracing::debug!(topic, bytes = feed.len(), "notification verified");
    subscriber.emit(SubscriberEvent::Feed(FeedEvent {
        topic: topic.to_string(),
        hub,
        callback,
        feed,
        headers: parts.headers,
    }));

    Ok(plain_text(StatusCode::NO_CONTENT, CONTENT_TYPE, String::new()))
}

/// Collect the body, giving up as soon as it grows past `limit` bytes.
async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, BodyError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if declared.is_some_and(|length| length > limit as u64) {
        return Err(BodyError::TooLarge);
    }

    let mut stream = body.into_data_stream();
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyError::Stream)?;
        if buffer.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buffer.extend_from_slice(&chunk);
        tracing::trace!(received = buffer.len(), "notification chunk");
    }

    Ok(buffer.freeze())
}
