//! HTTP callback endpoint the hub talks to.
//!
//! A single handler serves every path. GET requests carry the
//! verification handshake (or a denial), POST requests carry content
//! notifications, and anything else is refused.

mod handshake;
mod notification;

use std::collections::HashMap;

use axum::{
    extract::{Query, Request, State},
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::error::CallbackError;
use crate::Subscriber;

/// Create the callback router.
pub fn create_router(subscriber: Subscriber) -> Router {
    Router::new()
        .fallback(handle_callback)
        .layer(TraceLayer::new_for_http())
        .with_state(subscriber)
}

async fn handle_callback(State(subscriber): State<Subscriber>, request: Request) -> Response {
    let result = match *request.method() {
        Method::GET => query_params(request.uri())
            .and_then(|params| handshake::handle(&subscriber, &params)),
        Method::POST => match query_params(request.uri()) {
            Ok(params) => notification::handle(&subscriber, &params, request).await,
            Err(e) => Err(e),
        },
        _ => Err(CallbackError::MethodNotAllowed),
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(error = %e, "rejected callback request");
            e.into_response()
        }
    }
}

type Params = HashMap<String, String>;

fn query_params(uri: &Uri) -> Result<Params, CallbackError> {
    Query::<Params>::try_from_uri(uri)
        .map(|Query(params)| params)
        .map_err(|_| CallbackError::BadRequest)
}

/// Look up a query parameter, treating empty values as absent.
fn param<'a>(params: &'a Params, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn plain_text(status: StatusCode, content_type: &'static str, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
}
