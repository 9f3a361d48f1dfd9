//! Feed Engine
//!
//! The single object a host application talks to. It owns the history
//! cache, the live quote table, the subscription list and the connection
//! state, and supervises the poll loop and the periodic export task.
//!
//! # Lifecycle
//!
//! ```text
//! new ──► initialize ──► start_feed ◄──► stop_feed ──► shutdown
//!                            ▲               │
//!                            └─ restart_feed ┘
//! ```
//!
//! Config is injected at construction and can be swapped with
//! [`FeedEngine::reload_config`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::history::{BackfillEvent, HistoryError, HistoryService, HistorySettings};
use super::poller::{
    NotificationStatus, Poller, PollerHandles, PollerSettings, QuoteNotification,
};
use super::quotes::{FetchError, LatestPriceSource, LatestQuoteTable};
use crate::application::ports::{
    Clock, HttpTransport, SeedError, SeedSource, SeriesExporter, SystemClock, TransportError,
};
use crate::domain::connection::{ConnectionState, ConnectionStatus, FeedEvent};
use crate::domain::market_data::{Bar, Quote, Symbol, normalize_symbol, overlay_live_quote};
use crate::domain::subscription::SubscriptionManager;
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::http::ReqwestTransport;
use crate::infrastructure::metrics;
use crate::infrastructure::seed::{CsvExporter, CsvSeedSource};

/// How long `stop_feed` waits for the poll task before aborting it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the quote notification channel.
const NOTIFICATION_CAPACITY: usize = 4096;

// =============================================================================
// Errors
// =============================================================================

/// Engine operation failure.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// `initialize` has not been called, or `shutdown` already ran.
    #[error("feed engine is not initialized")]
    NotInitialized,

    /// `start_feed` was called while the poll loop is running.
    #[error("live feed is already running")]
    AlreadyRunning,

    /// The latest price page could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// No history could be loaded.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// The symbol is not on the latest price page.
    #[error("symbol {symbol} not found on the latest price page")]
    SymbolNotFound {
        /// Requested symbol.
        symbol: Symbol,
    },

    /// No export directory is configured.
    #[error("export directory not configured")]
    ExportNotConfigured,

    /// An export file could not be written.
    #[error(transparent)]
    Export(#[from] SeedError),

    /// The HTTP client could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Adapters
// =============================================================================

/// Driven adapters the engine is wired to.
#[derive(Debug, Clone)]
pub struct EngineAdapters {
    /// Page fetcher.
    pub transport: Arc<dyn HttpTransport>,
    /// Local history reader.
    pub seed: Arc<dyn SeedSource>,
    /// Series writer, if export is configured.
    pub exporter: Option<Arc<dyn SeriesExporter>>,
    /// Local wall clock.
    pub clock: Arc<dyn Clock>,
}

impl EngineAdapters {
    /// Production adapters: reqwest, CSV files and the host clock.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the HTTP client cannot be built.
    pub fn from_config(config: &EngineConfig) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(config.http_timeout(), &config.general.user_agent)?;
        Ok(Self {
            transport: Arc::new(transport),
            seed: Arc::new(CsvSeedSource::new(config.data_source.seed_dir.clone())),
            exporter: config
                .export
                .dir
                .clone()
                .map(|dir| Arc::new(CsvExporter::new(dir)) as Arc<dyn SeriesExporter>),
            clock: Arc::new(SystemClock),
        })
    }
}

// =============================================================================
// Status Snapshot
// =============================================================================

/// Point-in-time engine status for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Connection state.
    pub state: ConnectionState,
    /// 1 when connected, 2 otherwise.
    pub status_code: u8,
    /// Whether the poll loop task is alive.
    pub feed_running: bool,
    /// Symbols with a cached series.
    pub cached_symbols: usize,
    /// Symbols with a live quote.
    pub live_quotes: usize,
    /// Subscribed symbols, in subscription order.
    pub subscriptions: Vec<Symbol>,
    /// Consecutive failed polls.
    pub reconnect_attempts: u32,
    /// Last successful poll.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last poll failure.
    pub last_error: Option<String>,
}

// =============================================================================
// Engine
// =============================================================================

struct TaskHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// DSE data acquisition and live feed engine.
pub struct FeedEngine {
    config: RwLock<Arc<EngineConfig>>,
    adapters: EngineAdapters,
    history: Arc<HistoryService>,
    source: RwLock<Arc<LatestPriceSource>>,
    quotes: Arc<LatestQuoteTable>,
    subscriptions: Arc<SubscriptionManager>,
    status: Arc<ConnectionStatus>,
    notifications: broadcast::Sender<QuoteNotification>,
    symbols: RwLock<Vec<Symbol>>,
    feed: tokio::sync::Mutex<Option<TaskHandle>>,
    export: Mutex<Option<TaskHandle>>,
    initialized: AtomicBool,
}

impl std::fmt::Debug for FeedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedEngine")
            .field("state", &self.status.state())
            .field("initialized", &self.initialized.load(Ordering::Acquire))
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

fn history_settings(config: &EngineConfig) -> HistorySettings {
    HistorySettings {
        archive_url: config.endpoints.day_end_archive.clone(),
        history_years: config.general.history_years,
        precedence: config.precedence(),
    }
}

fn price_source(transport: &Arc<dyn HttpTransport>, config: &EngineConfig) -> LatestPriceSource {
    LatestPriceSource::new(
        Arc::clone(transport),
        config.endpoints.latest_price.clone(),
        Some(config.endpoints.alt_latest_price.clone()),
    )
}

impl FeedEngine {
    /// Create an engine with the given configuration and adapters.
    ///
    /// The configuration is clamped to its supported ranges.
    #[must_use]
    pub fn new(config: EngineConfig, adapters: EngineAdapters) -> Self {
        let config = config.clamped();
        let history = HistoryService::new(
            Arc::clone(&adapters.transport),
            Arc::clone(&adapters.seed),
            Arc::clone(&adapters.clock),
            history_settings(&config),
        );
        let source = price_source(&adapters.transport, &config);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Self {
            config: RwLock::new(Arc::new(config)),
            adapters,
            history: Arc::new(history),
            source: RwLock::new(Arc::new(source)),
            quotes: Arc::new(LatestQuoteTable::new()),
            subscriptions: Arc::new(SubscriptionManager::new()),
            status: Arc::new(ConnectionStatus::new()),
            notifications,
            symbols: RwLock::new(Vec::new()),
            feed: tokio::sync::Mutex::new(None),
            export: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Create an engine wired to the production adapters.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Transport`] if the HTTP client cannot be built.
    pub fn from_config(config: EngineConfig) -> Result<Self, FeedError> {
        let adapters = EngineAdapters::from_config(&config)?;
        Ok(Self::new(config, adapters))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Mark the engine ready and start the periodic export task if enabled.
    ///
    /// Calling it again is a no-op.
    pub fn initialize(&self) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return;
        }
        let config = self.config();
        tracing::info!(
            latest_price = %config.endpoints.latest_price,
            day_end_archive = %config.endpoints.day_end_archive,
            history_years = config.general.history_years,
            poll_interval_ms = config.general.poll_interval_ms,
            "feed engine initialized"
        );
        self.start_export_task();
    }

    /// Whether `initialize` has run and `shutdown` has not.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Stop every task and drop cached data.
    pub async fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        self.stop_feed().await;
        self.stop_export_task();
        self.history.clear();
        self.symbols.write().clear();
        tracing::info!("feed engine shut down");
    }

    /// Spawn the live poll loop.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::NotInitialized`] before `initialize`, or
    /// [`FeedError::AlreadyRunning`] if the loop is alive.
    pub async fn start_feed(&self) -> Result<(), FeedError> {
        if !self.is_initialized() {
            return Err(FeedError::NotInitialized);
        }

        let mut feed = self.feed.lock().await;
        if feed.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return Err(FeedError::AlreadyRunning);
        }

        let config = self.config();
        let poller = Poller::new(
            Arc::clone(&*self.source.read()),
            Arc::clone(&self.adapters.clock),
            PollerHandles {
                quotes: Arc::clone(&self.quotes),
                subscriptions: Arc::clone(&self.subscriptions),
                status: Arc::clone(&self.status),
                notifications: self.notifications.clone(),
            },
            PollerSettings::from_config(&config),
        );

        let state = self.status.apply(FeedEvent::Start);
        metrics::set_connection_state(state);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));
        *feed = Some(TaskHandle { cancel, handle });

        tracing::info!("live feed started");
        Ok(())
    }

    /// Stop the live poll loop and clear the quote table.
    ///
    /// Waits up to [`STOP_TIMEOUT`] for the loop to exit, then aborts it.
    pub async fn stop_feed(&self) {
        let task = self.feed.lock().await.take();

        if let Some(TaskHandle { cancel, mut handle }) = task {
            cancel.cancel();
            if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!(
                    timeout_secs = STOP_TIMEOUT.as_secs(),
                    "poll loop did not stop in time, aborting"
                );
                handle.abort();
            }
        }

        let state = self.status.apply(FeedEvent::Stop);
        metrics::set_connection_state(state);
        self.quotes.clear();
        tracing::info!("live feed stopped");
    }

    /// Stop then start the live feed. Leaves the `Error` state.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::NotInitialized`] before `initialize`.
    pub async fn restart_feed(&self) -> Result<(), FeedError> {
        self.stop_feed().await;
        self.start_feed().await
    }

    /// Whether the poll loop task is alive.
    pub async fn is_feed_running(&self) -> bool {
        self.feed
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<EngineConfig> {
        Arc::clone(&*self.config.read())
    }

    /// Swap in a new configuration.
    ///
    /// History and endpoint settings apply to the next fetch. A running feed
    /// is restarted so its timing follows the new values, and the export
    /// task is restarted. The HTTP client, seed and export directories keep
    /// their construction-time values.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError`] if the feed was running and fails to restart.
    pub async fn reload_config(&self, config: EngineConfig) -> Result<(), FeedError> {
        let config = config.clamped();
        self.history.update_settings(history_settings(&config));
        *self.source.write() = Arc::new(price_source(&self.adapters.transport, &config));
        *self.config.write() = Arc::new(config);
        tracing::info!("configuration reloaded");

        if self.is_initialized() {
            self.stop_export_task();
            self.start_export_task();
        }
        if self.is_feed_running().await {
            self.restart_feed().await?;
        }
        Ok(())
    }

    // =========================================================================
    // Live Quotes
    // =========================================================================

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.status.state()
    }

    /// Shared connection status cell.
    #[must_use]
    pub fn connection_status(&self) -> Arc<ConnectionStatus> {
        Arc::clone(&self.status)
    }

    /// Every live quote, sorted by symbol.
    #[must_use]
    pub fn latest_quotes(&self) -> Vec<Quote> {
        self.quotes.snapshot()
    }

    /// Live quote for `symbol`.
    #[must_use]
    pub fn latest_quote(&self, symbol: &str) -> Option<Quote> {
        self.quotes.get(symbol)
    }

    /// Live quote with its feed status, or a `Waiting` placeholder.
    #[must_use]
    pub fn recent_info(&self, symbol: &str) -> QuoteNotification {
        let updated_at = self.adapters.clock.now();
        match self.quotes.get(symbol) {
            Some(quote) => QuoteNotification {
                quote,
                status: NotificationStatus::for_state(self.status.state()),
                updated_at,
            },
            None => QuoteNotification {
                quote: Quote::pending(symbol),
                status: NotificationStatus::Waiting,
                updated_at,
            },
        }
    }

    /// Fetch the latest price page now and return one symbol's quote.
    ///
    /// Does not touch the quote table or the connection state.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Fetch`] if the page fails, or
    /// [`FeedError::SymbolNotFound`] if the symbol is not listed.
    pub async fn fetch_latest_quote(&self, symbol: &str) -> Result<Quote, FeedError> {
        let source = Arc::clone(&*self.source.read());
        source
            .fetch_one(symbol)
            .await?
            .ok_or_else(|| FeedError::SymbolNotFound {
                symbol: normalize_symbol(symbol),
            })
    }

    /// Reload the tradable symbol list from the latest price page.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Fetch`] if the page fails.
    pub async fn refresh_symbol_list(&self) -> Result<Vec<Symbol>, FeedError> {
        let source = Arc::clone(&*self.source.read());
        let mut symbols: Vec<Symbol> = source
            .fetch_all()
            .await?
            .into_iter()
            .map(|q| q.symbol)
            .collect();
        symbols.sort();
        symbols.dedup();

        tracing::info!(count = symbols.len(), "symbol list refreshed");
        self.symbols.write().clone_from(&symbols);
        Ok(symbols)
    }

    /// Symbol list from the last refresh.
    #[must_use]
    pub fn symbol_list(&self) -> Vec<Symbol> {
        self.symbols.read().clone()
    }

    /// Receive pushed quote updates.
    #[must_use]
    pub fn notifications(&self) -> broadcast::Receiver<QuoteNotification> {
        self.notifications.subscribe()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Push `symbol` before the rest on every poll. Returns `false` if it was
    /// already subscribed.
    pub fn subscribe(&self, symbol: &str) -> bool {
        let added = self.subscriptions.subscribe(symbol);
        if added {
            tracing::debug!(symbol, "subscribed");
        }
        added
    }

    /// Remove a subscription. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, symbol: &str) -> bool {
        let removed = self.subscriptions.unsubscribe(symbol);
        if removed {
            tracing::debug!(symbol, "unsubscribed");
        }
        removed
    }

    /// Subscribed symbols, in subscription order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Symbol> {
        self.subscriptions.symbols()
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Load, merge and cache history for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::History`] if neither source yields a valid bar.
    pub async fn fetch_history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, FeedError> {
        Ok(self.history.fetch_and_merge(symbol, start, end).await?)
    }

    /// Cached bars for `symbol`. No I/O.
    #[must_use]
    pub fn cached_bars(&self, symbol: &str) -> Option<Vec<Bar>> {
        self.history.cached_bars(symbol)
    }

    /// Start a background backfill. Returns `false` if one is running.
    pub fn request_backfill(&self, symbol: &str) -> bool {
        self.history.request_backfill(symbol)
    }

    /// Receive backfill completion events.
    #[must_use]
    pub fn backfill_events(&self) -> broadcast::Receiver<BackfillEvent> {
        self.history.backfill_events()
    }

    /// Cached bars with the live quote folded into today's bar.
    ///
    /// A cache miss starts a background backfill and returns `None`. Listen on
    /// [`backfill_events`](Self::backfill_events) and read again once it
    /// completes.
    pub fn bars_with_live(&self, symbol: &str) -> Option<Vec<Bar>> {
        let Some(mut bars) = self.history.cached_bars(symbol) else {
            if self.history.request_backfill(symbol) {
                tracing::debug!(symbol, "cache miss, backfill requested");
            }
            return None;
        };
        if let Some(quote) = self.quotes.get(symbol) {
            let now = self.adapters.clock.now();
            let market_open = self.config().market_hours().is_open(now);
            overlay_live_quote(&mut bars, &quote, now.date(), market_open);
        }
        Some(bars)
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Write every cached series now. Returns the number of files written.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::ExportNotConfigured`] without an export
    /// directory, or [`FeedError::Export`] on the first failed write.
    pub fn export_all(&self) -> Result<usize, FeedError> {
        let exporter = self
            .adapters
            .exporter
            .as_ref()
            .ok_or(FeedError::ExportNotConfigured)?;
        Ok(export_cache(&self.history, exporter.as_ref())?)
    }

    fn start_export_task(&self) {
        let (Some(interval), Some(exporter)) =
            (self.config().export_interval(), self.adapters.exporter.clone())
        else {
            return;
        };

        let cancel = CancellationToken::new();
        let history = Arc::clone(&self.history);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "periodic export started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = export_cache(&history, exporter.as_ref()) {
                    tracing::warn!(error = %e, "periodic export failed");
                }
            }
        });

        *self.export.lock() = Some(TaskHandle { cancel, handle });
    }

    fn stop_export_task(&self) {
        if let Some(task) = self.export.lock().take() {
            task.cancel.cancel();
            task.handle.abort();
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Snapshot for the health endpoint.
    pub async fn status(&self) -> EngineStatus {
        let state = self.status.state();
        EngineStatus {
            state,
            status_code: state.status_code(),
            feed_running: self.is_feed_running().await,
            cached_symbols: self.history.cached_count(),
            live_quotes: self.quotes.len(),
            subscriptions: self.subscriptions.symbols(),
            reconnect_attempts: self.status.reconnect_attempts(),
            last_connected_at: self.status.last_connected_at(),
            last_error: self.status.last_error(),
        }
    }
}

fn export_cache(history: &HistoryService, exporter: &dyn SeriesExporter) -> Result<usize, SeedError> {
    let snapshot = history.snapshot();
    if snapshot.is_empty() {
        tracing::debug!("nothing to export");
        return Ok(0);
    }

    for (symbol, bars) in &snapshot {
        exporter.export(symbol, bars)?;
    }
    tracing::info!(files = snapshot.len(), "cache exported");
    Ok(snapshot.len())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;
    use crate::application::ports::{FixedClock, MockHttpTransport};

    #[derive(Debug)]
    struct NoSeed;

    impl SeedSource for NoSeed {
        fn load(&self, _symbol: &str) -> Result<Vec<Bar>, SeedError> {
            Err(SeedError::NotConfigured)
        }
    }

    fn sunday_morning() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 7)
            .unwrap()
            .and_hms_opt(11, 0, 0)
            .unwrap()
    }

    fn engine(transport: MockHttpTransport) -> FeedEngine {
        FeedEngine::new(
            EngineConfig::default(),
            EngineAdapters {
                transport: Arc::new(transport),
                seed: Arc::new(NoSeed),
                exporter: None,
                clock: Arc::new(FixedClock::new(sunday_morning())),
            },
        )
    }

    #[tokio::test]
    async fn start_requires_initialize() {
        let engine = engine(MockHttpTransport::new());
        assert!(matches!(
            engine.start_feed().await,
            Err(FeedError::NotInitialized)
        ));
        assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn recent_info_waits_for_first_quote() {
        let engine = engine(MockHttpTransport::new());
        let info = engine.recent_info("gp");

        assert_eq!(info.status, NotificationStatus::Waiting);
        assert_eq!(info.quote.symbol, "GP");
        assert!(!info.quote.valid);
    }

    #[test]
    fn export_requires_directory() {
        let engine = engine(MockHttpTransport::new());
        assert!(matches!(
            engine.export_all(),
            Err(FeedError::ExportNotConfigured)
        ));
    }

    #[test]
    fn subscriptions_are_deduplicated() {
        let engine = engine(MockHttpTransport::new());
        assert!(engine.subscribe("gp"));
        assert!(!engine.subscribe("GP"));
        assert!(engine.subscribe("ACI"));
        assert_eq!(engine.subscriptions(), vec!["GP", "ACI"]);
        assert!(engine.unsubscribe("gp"));
        assert!(!engine.unsubscribe("gp"));
    }

    #[tokio::test]
    async fn shutdown_before_initialize_is_noop() {
        let engine = engine(MockHttpTransport::new());
        engine.shutdown().await;
        assert!(!engine.is_initialized());
    }
}
