//! Historical Series Service
//!
//! Loads the seed, scrapes the day-end archive, merges the two and keeps the
//! result as the cached series for the symbol. Cached lookups never touch the
//! network or the disk.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Months, NaiveDate};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::application::ports::{Clock, HttpTransport, SeedError, SeedSource};
use crate::domain::market_data::{Bar, Symbol, normalize_symbol};
use crate::domain::scrape::{Layout, parse_history_page};
use crate::domain::series::{SourcePrecedence, merge_onto, within};
use crate::infrastructure::http::archive_url;
use crate::infrastructure::metrics::{self, MergeOutcome};

/// Capacity of the backfill event channel.
const BACKFILL_EVENT_CAPACITY: usize = 64;

// =============================================================================
// Types
// =============================================================================

/// Neither source produced a valid bar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// Seed and web both failed or were empty.
    #[error("no historical data available for {symbol}")]
    NoData {
        /// Requested symbol.
        symbol: Symbol,
    },
}

/// Settings the history service reads on every fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySettings {
    /// Day-end archive page URL.
    pub archive_url: String,
    /// Years of history for a first backfill.
    pub history_years: u32,
    /// Which source wins on overlapping dates.
    pub precedence: SourcePrecedence,
}

/// Announced when a background backfill finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillEvent {
    /// The cache now holds `bars` bars for `symbol`.
    Completed {
        /// Backfilled symbol.
        symbol: Symbol,
        /// Cached bar count after the merge.
        bars: usize,
    },
    /// Nothing could be loaded.
    Failed {
        /// Backfilled symbol.
        symbol: Symbol,
        /// Failure description.
        error: String,
    },
}

// =============================================================================
// Service
// =============================================================================

/// Seed + web history with a per-symbol cache.
pub struct HistoryService {
    transport: Arc<dyn HttpTransport>,
    seed: Arc<dyn SeedSource>,
    clock: Arc<dyn Clock>,
    settings: RwLock<HistorySettings>,
    cache: Mutex<HashMap<Symbol, Vec<Bar>>>,
    in_flight: Mutex<HashSet<Symbol>>,
    events: broadcast::Sender<BackfillEvent>,
}

impl std::fmt::Debug for HistoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryService")
            .field("settings", &*self.settings.read())
            .field("cached_symbols", &self.cache.lock().len())
            .finish_non_exhaustive()
    }
}

impl HistoryService {
    /// Create a service with an empty cache.
    #[must_use]
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        seed: Arc<dyn SeedSource>,
        clock: Arc<dyn Clock>,
        settings: HistorySettings,
    ) -> Self {
        let (events, _) = broadcast::channel(BACKFILL_EVENT_CAPACITY);
        Self {
            transport,
            seed,
            clock,
            settings: RwLock::new(settings),
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            events,
        }
    }

    /// Replace the settings used by subsequent fetches.
    pub fn update_settings(&self, settings: HistorySettings) {
        *self.settings.write() = settings;
    }

    /// Subscribe to backfill completion events.
    #[must_use]
    pub fn backfill_events(&self) -> broadcast::Receiver<BackfillEvent> {
        self.events.subscribe()
    }

    /// Load seed and web history for `symbol`, merge, and replace the cache.
    ///
    /// Returns the whole merged series, which may extend outside
    /// `start..=end` when the seed does.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NoData`] if neither source yields a valid bar.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_and_merge(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, HistoryError> {
        self.load_and_merge(&normalize_symbol(symbol), start, end, &[])
            .await
    }

    /// Cached bars for `symbol`, oldest first. No I/O.
    #[must_use]
    pub fn cached_bars(&self, symbol: &str) -> Option<Vec<Bar>> {
        self.cache
            .lock()
            .get(&normalize_symbol(symbol))
            .filter(|bars| !bars.is_empty())
            .cloned()
    }

    /// Cached bars for `symbol` within `start..=end`. No I/O.
    #[must_use]
    pub fn cached_range(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
        self.cache
            .lock()
            .get(&normalize_symbol(symbol))
            .map(|bars| within(bars, start, end))
            .unwrap_or_default()
    }

    /// Symbols with a cached series, sorted.
    #[must_use]
    pub fn cached_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.cache.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Number of cached symbols.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Copy of the whole cache, sorted by symbol.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Symbol, Vec<Bar>)> {
        let mut entries: Vec<(Symbol, Vec<Bar>)> = self
            .cache
            .lock()
            .iter()
            .map(|(symbol, bars)| (symbol.clone(), bars.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Drop every cached series.
    pub fn clear(&self) {
        self.cache.lock().clear();
        metrics::set_cached_symbols(0);
    }

    /// Whether a backfill for `symbol` is running.
    #[must_use]
    pub fn is_backfilling(&self, symbol: &str) -> bool {
        self.in_flight.lock().contains(&normalize_symbol(symbol))
    }

    /// Start a background backfill for `symbol`.
    ///
    /// An uncached symbol gets the full history window ending today. A
    /// cached one is refreshed from its last bar to today on top of the
    /// existing series. Returns `false` if a backfill for the symbol is
    /// already running or there is no runtime to run it on.
    pub fn request_backfill(self: &Arc<Self>, symbol: &str) -> bool {
        let symbol = normalize_symbol(symbol);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(symbol, "backfill requested outside a tokio runtime");
            return false;
        };
        if symbol.is_empty() || !self.in_flight.lock().insert(symbol.clone()) {
            return false;
        }

        let service = Arc::clone(self);
        runtime.spawn(async move {
            let event = match service.backfill(&symbol).await {
                Ok(bars) => BackfillEvent::Completed {
                    symbol: symbol.clone(),
                    bars: bars.len(),
                },
                Err(e) => BackfillEvent::Failed {
                    symbol: symbol.clone(),
                    error: e.to_string(),
                },
            };
            service.in_flight.lock().remove(&symbol);
            let _ = service.events.send(event);
        });

        true
    }

    async fn backfill(&self, symbol: &str) -> Result<Vec<Bar>, HistoryError> {
        let today = self.clock.today();
        let base = self.cache.lock().get(symbol).cloned().unwrap_or_default();

        match base.last() {
            Some(last) => {
                let start = last.date.min(today);
                tracing::info!(symbol, %start, end = %today, "incremental backfill");
                self.load_and_merge(symbol, start, today, &base).await
            }
            None => {
                let years = self.settings.read().history_years;
                let start = today
                    .checked_sub_months(Months::new(years.saturating_mul(12)))
                    .unwrap_or(NaiveDate::MIN);
                tracing::info!(symbol, %start, end = %today, "full backfill");
                self.load_and_merge(symbol, start, today, &[]).await
            }
        }
    }

    async fn load_and_merge(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        base: &[Bar],
    ) -> Result<Vec<Bar>, HistoryError> {
        let settings = self.settings.read().clone();

        let seed_source = Arc::clone(&self.seed);
        let seed_symbol = symbol.to_string();
        let loaded = tokio::task::spawn_blocking(move || seed_source.load(&seed_symbol)).await;

        let seed = match loaded {
            Ok(Ok(bars)) => bars,
            Ok(Err(SeedError::NotConfigured)) => Vec::new(),
            Ok(Err(e @ SeedError::NotFound { .. })) => {
                tracing::debug!(symbol, error = %e, "no seed");
                Vec::new()
            }
            Ok(Err(e)) => {
                tracing::warn!(symbol, error = %e, "seed load failed");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(symbol, error = %e, "seed load task failed");
                Vec::new()
            }
        };

        let web = self.fetch_web(symbol, start, end, &settings.archive_url).await;

        let seed_valid = seed.iter().filter(|b| b.valid).count();
        let outcome = match (seed_valid > 0, !web.is_empty()) {
            (true, true) => MergeOutcome::Both,
            (true, false) => MergeOutcome::SeedOnly,
            (false, true) => MergeOutcome::WebOnly,
            (false, false) => MergeOutcome::NoData,
        };
        metrics::record_history_merge(outcome);

        // The cached series is left alone when both sources come back empty.
        if matches!(outcome, MergeOutcome::NoData) {
            tracing::warn!(symbol, "no historical data from seed or web");
            return Err(HistoryError::NoData {
                symbol: symbol.to_string(),
            });
        }

        let merged = merge_onto(base, &seed, &web, settings.precedence);
        tracing::info!(
            symbol,
            seed = seed_valid,
            web = web.len(),
            merged = merged.bars.len(),
            dropped_invalid = merged.dropped_invalid,
            "history merged"
        );

        let bars = merged.bars;
        let cached = {
            let mut cache = self.cache.lock();
            cache.insert(symbol.to_string(), bars.clone());
            cache.len()
        };
        metrics::set_cached_symbols(cached);

        Ok(bars)
    }

    async fn fetch_web(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        archive: &str,
    ) -> Vec<Bar> {
        let url = archive_url(archive, symbol, start, end);
        let html = match self.transport.get(&url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(symbol, error = %e, "archive fetch failed");
                return Vec::new();
            }
        };

        match parse_history_page(&html) {
            Ok(page) => {
                metrics::record_rows_rejected(Layout::History, page.rejected);
                page.records
            }
            Err(e) => {
                tracing::warn!(symbol, error = %e, "archive page not parsed");
                Vec::new()
            }
        }
    }
}
