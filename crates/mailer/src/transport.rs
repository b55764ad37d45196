//! Port to the remote messaging API.

use std::time::Duration;

use {async_trait::async_trait, serde_json::Value, thiserror::Error};

use crate::content::OutboundCall;

/// Delivery failure as seen by the send loop.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The API asked us to back off before trying again.
    #[error("rate limited, retry after {}s", retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    /// Any other failure. The recipient is marked failed and not retried.
    #[error("api error: {detail}")]
    Api { detail: String },
}

impl TransportError {
    #[must_use]
    pub fn api(detail: impl Into<String>) -> Self {
        Self::Api {
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited { retry_after }
    }
}

/// Sends one call and returns the API response as JSON.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, call: &OutboundCall) -> Result<Value, TransportError>;
}
