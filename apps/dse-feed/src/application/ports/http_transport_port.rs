//! HTTP Transport Port (Driven Port)
//!
//! Single timed GET returning the response body as text.

use async_trait::async_trait;

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connect or whole-request timeout elapsed.
    #[error("request to {url} timed out")]
    Timeout {
        /// Requested URL.
        url: String,
    },

    /// Connection could not be established.
    #[error("failed to connect to {url}: {message}")]
    Connect {
        /// Requested URL.
        url: String,
        /// Error details.
        message: String,
    },

    /// Server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Server answered with an empty body.
    #[error("{url} returned an empty body")]
    EmptyBody {
        /// Requested URL.
        url: String,
    },

    /// Any other request or body-read failure.
    #[error("request to {url} failed: {message}")]
    Request {
        /// Requested URL.
        url: String,
        /// Error details.
        message: String,
    },
}

impl TransportError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Connect { .. } => "connect",
            Self::Status { .. } => "status",
            Self::EmptyBody { .. } => "empty_body",
            Self::Request { .. } => "request",
        }
    }
}

/// Port for fetching exchange pages.
///
/// Implementations apply the configured timeout, treat non-2xx statuses and
/// empty bodies as failures, and never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    /// Fetch `url` and return the body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on timeout, connection failure, non-2xx
    /// status, or an empty body.
    async fn get(&self, url: &str) -> Result<String, TransportError>;
}
