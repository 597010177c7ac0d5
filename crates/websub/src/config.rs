//! Subscriber configuration.

use std::time::Duration;

use clap::Parser;

use crate::error::{Error, Result};

/// Default hub endpoint (Twitch Helix).
pub const DEFAULT_HUB_URL: &str = "https://api.twitch.tv/helix/webhooks/hub";

/// Default lease requested from the hub (10 days).
pub const DEFAULT_LEASE_SECONDS: u64 = 864_000;

/// Default cap on notification bodies (50 MB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 50_000_000;

/// Default timeout for requests to the hub in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default address for the callback listener.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Base callback URL the hub calls back on.
    pub callback: String,
    /// Client identifier sent as `Client-ID`.
    pub client_id: String,
    /// Master secret the per-topic secrets are derived from.
    pub secret: String,
    /// Hub endpoint subscription requests are sent to.
    pub hub_url: String,
    /// Lease requested with every subscription, in seconds.
    pub lease_seconds: u64,
    /// Largest notification body accepted before the connection is dropped.
    pub max_body_bytes: usize,
    /// Timeout for requests to the hub.
    pub request_timeout: Duration,
}

impl SubscriberConfig {
    /// Create a configuration from the three mandatory values.
    pub fn new(
        callback: impl Into<String>,
        client_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            callback: callback.into(),
            client_id: client_id.into(),
            secret: secret.into(),
            hub_url: DEFAULT_HUB_URL.to_string(),
            lease_seconds: DEFAULT_LEASE_SECONDS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }

    /// Set the hub endpoint.
    pub fn with_hub_url(mut self, hub_url: impl Into<String>) -> Self {
        self.hub_url = hub_url.into();
        self
    }

    /// Set the requested lease.
    pub fn with_lease_seconds(mut self, lease_seconds: u64) -> Self {
        self.lease_seconds = lease_seconds;
        self
    }

    /// Set the notification body cap.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Set the hub request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Check that every mandatory value is present.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config(
                "a client id is required to introduce yourself to the hub".to_string(),
            ));
        }
        if self.callback.trim().is_empty() {
            return Err(Error::Config(
                "a callback URL is required for the hub to call back".to_string(),
            ));
        }
        if self.secret.is_empty() {
            return Err(Error::Config(
                "a secret is required to sign topic subscriptions".to_string(),
            ));
        }
        if self.hub_url.trim().is_empty() {
            return Err(Error::Config("hub URL cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// WebSub subscriber command line arguments.
#[derive(Debug, Parser)]
#[command(name = "websub-subscriber")]
#[command(version, about = "WebSub subscriber with signed notifications")]
pub struct Args {
    /// Address to listen on for hub callbacks.
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: String,

    /// Public callback URL the hub should call.
    #[arg(short, long, env = "WEBSUB_CALLBACK")]
    pub callback: String,

    /// Client identifier sent to the hub.
    #[arg(long, env = "WEBSUB_CLIENT_ID")]
    pub client_id: String,

    /// Master secret used to derive per-topic secrets.
    #[arg(long, env = "WEBSUB_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Hub endpoint.
    #[arg(long, default_value = DEFAULT_HUB_URL)]
    pub hub: String,

    /// Topic to subscribe to at startup (repeatable).
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// Lease requested from the hub, in seconds.
    #[arg(long, default_value_t = DEFAULT_LEASE_SECONDS)]
    pub lease_seconds: u64,

    /// Maximum notification body size in megabytes.
    #[arg(long, default_value_t = 50)]
    pub max_body_mb: usize,

    /// Timeout (ms) for requests to the hub.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,

    /// Renew leases expiring within this many seconds. 0 disables renewal.
    #[arg(long, default_value_t = 3600)]
    pub renew_margin_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl From<&Args> for SubscriberConfig {
    fn from(args: &Args) -> Self {
        SubscriberConfig::new(&args.callback, &args.client_id, &args.secret)
            .with_hub_url(&args.hub)
            .with_lease_seconds(args.lease_seconds)
            .with_max_body_bytes(args.max_body_mb.saturating_mul(1_000_000))
            .with_request_timeout(Duration::from_millis(args.request_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SubscriberConfig::new("https://example.com/", "client", "secret");
        assert_eq!(config.hub_url, DEFAULT_HUB_URL);
        assert_eq!(config.lease_seconds, 864_000);
        assert_eq!(config.max_body_bytes, 50_000_000);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SubscriberConfig::new("https://example.com/", "client", "secret")
            .with_hub_url("http://127.0.0.1:9000/hub")
            .with_lease_seconds(100)
            .with_max_body_bytes(1024)
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.hub_url, "http://127.0.0.1:9000/hub");
        assert_eq!(config.lease_seconds, 100);
        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_client_id() {
        let config = SubscriberConfig::new("https://example.com/", "", "secret");
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("client id")));
    }

    #[test]
    fn test_missing_callback() {
        let config = SubscriberConfig::new("  ", "client", "secret");
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("callback")));
    }

    #[test]
    fn test_missing_secret() {
        let config = SubscriberConfig::new("https://example.com/", "client", "");
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("secret")));
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "websub-subscriber",
            "--callback",
            "https://example.com/hooks",
            "--client-id",
            "abc",
            "--secret",
            "pineapple",
            "--topic",
            "t1",
            "--topic",
            "t2",
            "--lease-seconds",
            "600",
            "--max-body-mb",
            "2",
        ]);
        assert_eq!(args.topics, vec!["t1".to_string(), "t2".to_string()]);

        let config = SubscriberConfig::from(&args);
        assert_eq!(config.callback, "https://example.com/hooks");
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.secret, "pineapple");
        assert_eq!(config.lease_seconds, 600);
        assert_eq!(config.max_body_bytes, 2_000_000);
        assert_eq!(config.hub_url, DEFAULT_HUB_URL);
    }

    #[test]
    fn test_huge_body_cap_saturates() {
        let max = usize::MAX.to_string();
        let args = Args::parse_from([
            "websub-subscriber",
            "--callback",
            "https://example.com/hooks",
            "--client-id",
            "abc",
            "--secret",
            "pineapple",
            "--max-body-mb",
            max.as_str(),
        ]);

        let config = SubscriberConfig::from(&args);
        assert_eq!(config.max_body_bytes, usize::MAX);
    }
}
