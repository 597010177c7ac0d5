//! Outbound subscription requests to the hub.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;

use crate::error::{Error, Result};

/// Subscription mode sent as `hub.mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Start (or renew) a subscription.
    Subscribe,
    /// End a subscription.
    Unsubscribe,
}

impl Mode {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Subscribe => "subscribe",
            Mode::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the callback URL registered with the hub for `topic`.
///
/// `topic` and `hub` are appended as query parameters so notifications can
/// be routed back to their topic. A `/` is inserted when the base has no
/// path, and `&` is used when the base already carries a query.
pub fn callback_url(base: &str, topic: &str, hub: &str) -> String {
    let without_scheme = strip_http_scheme(base);
    let slash = if without_scheme.contains('/') { "" } else { "/" };
    let separator = if base.contains('?') { '&' } else { '?' };

    format!(
        "{base}{slash}{separator}topic={}&hub={}",
        urlencoding::encode(topic),
        urlencoding::encode(hub)
    )
}

fn strip_http_scheme(url: &str) -> &str {
    ["https://", "http://"]
        .iter()
        .find_map(|scheme| {
            url.get(..scheme.len())
                .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
                .map(|_| &url[scheme.len()..])
        })
        .unwrap_or(url)
}

/// A single subscribe or unsubscribe request.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    /// Requested mode.
    pub mode: Mode,
    /// Topic to (un)subscribe.
    pub topic: String,
    /// Callback URL for this topic.
    pub callback: String,
    /// Requested lease in seconds.
    pub lease_seconds: u64,
    /// Per-topic secret the hub signs notifications with.
    pub secret: String,
}

impl SubscriptionRequest {
    /// Form fields posted to the hub.
    pub fn form(&self) -> [(&'static str, String); 5] {
        [
            ("hub.callback", self.callback.clone()),
            ("hub.mode", self.mode.to_string()),
            ("hub.topic", self.topic.clone()),
            ("hub.lease_seconds", self.lease_seconds.to_string()),
            ("hub.secret", self.secret.clone()),
        ]
    }
}

/// HTTP client for one hub endpoint.
#[derive(Debug, Clone)]
pub struct HubClient {
    http: reqwest::Client,
    hub_url: String,
    client_id: String,
}

impl HubClient {
    /// Create a client for `hub_url` identifying itself as `client_id`.
    pub fn new(
        hub_url: impl Into<String>,
        client_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            hub_url: hub_url.into(),
            client_id: client_id.into(),
        })
    }

    /// Hub endpoint URL.
    pub fn hub_url(&self) -> &str {
        &self.hub_url
    }

    /// Send `request` to the hub once.
    ///
    /// Only 202 and 204 count as acceptance. Acceptance means the hub will
    /// verify the request; the subscription is active only once the
    /// handshake arrives on the callback.
    pub async fn send(&self, request: &SubscriptionRequest) -> Result<StatusCode> {
        let response = self
            .http
            .post(&self.hub_url)
            .header("Client-ID", &self.client_id)
            .form(&request.form())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(status);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::HubRejected {
            status: status.as_u16(),
            body,
        })
    }
}
