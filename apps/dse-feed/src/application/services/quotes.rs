//! Live Quotes
//!
//! The latest-price page fetch and the table of most recent quotes per
//! symbol.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::ports::{HttpTransport, TransportError};
use crate::domain::market_data::{Quote, Symbol, normalize_symbol};
use crate::domain::scrape::{Layout, ParseError, parse_latest_page};
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Failure to obtain a usable latest-price table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The page could not be fetched.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The page had no recognisable table.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The table parsed but held no valid quote.
    #[error("latest price page held no valid quotes")]
    Empty,
}

impl FetchError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.kind(),
            Self::Parse(_) => "parse",
            Self::Empty => "empty",
        }
    }
}

// =============================================================================
// Latest Price Source
// =============================================================================

/// Fetches and parses the latest share price table.
///
/// When the primary page fails and an alternate URL is configured, the
/// alternate is tried once before giving up.
#[derive(Debug)]
pub struct LatestPriceSource {
    transport: Arc<dyn HttpTransport>,
    primary_url: String,
    alternate_url: Option<String>,
}

impl LatestPriceSource {
    /// Create a source. A blank alternate URL is ignored.
    #[must_use]
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        primary_url: impl Into<String>,
        alternate_url: Option<String>,
    ) -> Self {
        Self {
            transport,
            primary_url: primary_url.into(),
            alternate_url: alternate_url.filter(|u| !u.trim().is_empty()),
        }
    }

    /// Fetch every valid quote on the page, in page order.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if neither page yields at least one quote.
    pub async fn fetch_all(&self) -> Result<Vec<Quote>, FetchError> {
        match self.fetch_from(&self.primary_url).await {
            Ok(quotes) => Ok(quotes),
            Err(primary) => {
                let Some(alternate) = self.alternate_url.as_deref() else {
                    return Err(primary);
                };
                tracing::warn!(error = %primary, url = alternate, "primary latest price page failed, trying alternate");
                self.fetch_from(alternate).await
            }
        }
    }

    /// Fetch the quote for one symbol, matched case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the page cannot be fetched or parsed.
    pub async fn fetch_one(&self, symbol: &str) -> Result<Option<Quote>, FetchError> {
        let wanted = normalize_symbol(symbol);
        let quotes = self.fetch_all().await?;
        Ok(quotes.into_iter().find(|q| q.symbol == wanted))
    }

    async fn fetch_from(&self, url: &str) -> Result<Vec<Quote>, FetchError> {
        let html = self.transport.get(url).await?;
        let page = parse_latest_page(&html)?;
        metrics::record_rows_rejected(Layout::Latest, page.rejected);

        if page.is_empty() {
            return Err(FetchError::Empty);
        }
        tracing::debug!(
            url,
            quotes = page.records.len(),
            rejected = page.rejected,
            "latest prices parsed"
        );
        Ok(page.records)
    }
}

// =============================================================================
// Latest Quote Table
// =============================================================================

/// Most recent quote per symbol.
///
/// The poll loop is the only writer. The lock is never held across an
/// `.await`.
#[derive(Debug, Default)]
pub struct LatestQuoteTable {
    quotes: Mutex<HashMap<Symbol, Quote>>,
}

impl LatestQuoteTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace quotes by symbol. Returns the number written.
    pub fn update(&self, quotes: &[Quote]) -> usize {
        let mut table = self.quotes.lock();
        for quote in quotes {
            table.insert(quote.symbol.clone(), quote.clone());
        }
        let len = table.len();
        drop(table);

        metrics::set_live_quotes(len);
        quotes.len()
    }

    /// Latest quote for `symbol`.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Quote> {
        self.quotes.lock().get(&normalize_symbol(symbol)).cloned()
    }

    /// All quotes, sorted by symbol.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self.quotes.lock().values().cloned().collect();
        quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        quotes
    }

    /// Number of symbols with a quote.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.lock().len()
    }

    /// True when no quote is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.lock().is_empty()
    }

    /// Drop every quote.
    pub fn clear(&self) {
        self.quotes.lock().clear();
        metrics::set_live_quotes(0);
    }
}
