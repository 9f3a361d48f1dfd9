//! Exchange HTTP adapter.
//!
//! Implements [`HttpTransport`] over `reqwest` and builds the exchange page
//! URLs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA};

use crate::application::ports::{HttpTransport, TransportError};

/// `reqwest`-backed transport.
///
/// The timeout covers both connecting and the whole request.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the given timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] if the client cannot be built.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn get(&self, url: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| classify(url, &e))?;
        if body.is_empty() {
            return Err(TransportError::EmptyBody {
                url: url.to_string(),
            });
        }

        tracing::debug!(url, bytes = body.len(), "page fetched");
        Ok(body)
    }
}

fn classify(url: &str, error: &reqwest::Error) -> TransportError {
    let url = url.to_string();
    if error.is_timeout() {
        TransportError::Timeout { url }
    } else if error.is_connect() {
        TransportError::Connect {
            url,
            message: error.to_string(),
        }
    } else {
        TransportError::Request {
            url,
            message: error.to_string(),
        }
    }
}

/// Day-end archive URL for one symbol and inclusive date range.
///
/// The page only returns the table when `archive=data` is present.
#[must_use]
pub fn archive_url(base: &str, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "{base}?startDate={}&endDate={}&inst={}&archive=data",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d"),
        symbol
    )
}
