//! Error types for the subscriber and its callback endpoint.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Subscriber errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The hub could not be reached.
    #[error("hub request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The hub answered with something other than 202 or 204.
    #[error("invalid response status {status}")]
    HubRejected {
        /// Status code returned by the hub.
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },

    /// HMAC rejected the signing key.
    #[error("invalid signing key")]
    SigningKey,

    /// The callback listener could not be started.
    #[error("[{kind:?}] Failed to start on {addr}")]
    Bind {
        /// Address the listener tried to bind.
        addr: String,
        /// Kind of the underlying IO error.
        kind: std::io::ErrorKind,
        #[source]
        source: std::io::Error,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for subscriber operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol-level rejection of an inbound callback request.
///
/// These never leave the endpoint: they become an HTML diagnostic page
/// with the matching status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// Required query parameters are missing.
    #[error("Bad Request")]
    BadRequest,
    /// Unknown handshake mode or missing signature.
    #[error("Forbidden")]
    Forbidden,
    /// Unsubscribe verification for a request that was never sent.
    #[error("Not Found")]
    NotFound,
    /// Neither GET nor POST.
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    /// Body exceeded the cap and the connection could not be dropped.
    #[error("Payload Too Large")]
    PayloadTooLarge,
}

impl CallbackError {
    /// HTTP status for this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            CallbackError::BadRequest => StatusCode::BAD_REQUEST,
            CallbackError::Forbidden => StatusCode::FORBIDDEN,
            CallbackError::NotFound => StatusCode::NOT_FOUND,
            CallbackError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            CallbackError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = error_page(status.as_u16(), &self.to_string());

        (status, [(header::CONTENT_TYPE, "text/html")], body).into_response()
    }
}

/// Render the HTML diagnostic page for a rejected request.
fn error_page(code: u16, message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         \t<head>\n\
         \t\t<meta charset=\"utf-8\"/>\n\
         \t\t<title>WebSub - {code} {message}</title>\n\
         \t</head>\n\
         \t<body>\n\
         \t\t<h1>WebSub - {code} {message}</h1>\n\
         \t</body>\n\
         </html>"
    )
}
