//! Live Poll Loop
//!
//! Background task that refreshes the latest quote table during market
//! hours and drives the connection state machine.
//!
//! # Cycle
//!
//! ```text
//! market closed ──► wait idle interval ─────────────────────────────┐
//! market open ───► fetch ──ok──► reset backoff, update table,        │
//!                    │           notify subscribed then all,         │
//!                    │           wait poll interval ─────────────────┤
//!                    └─err──► next backoff delay ──► Reconnecting,   │
//!                                wait delay ─────────────────────────┤
//!                             budget spent ──► Error, exit           │
//!                                                                   ◄┘
//! ```
//!
//! Every wait races the cancellation token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::quotes::{FetchError, LatestPriceSource, LatestQuoteTable};
use crate::application::ports::Clock;
use crate::domain::connection::{ConnectionState, ConnectionStatus, FeedEvent};
use crate::domain::market_data::Quote;
use crate::domain::market_hours::MarketHours;
use crate::domain::subscription::SubscriptionManager;
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::metrics;
use crate::infrastructure::reconnect::{ReconnectConfig, ReconnectPolicy};

// =============================================================================
// Notifications
// =============================================================================

/// Feed status attached to a pushed quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NotificationStatus {
    /// Feed is connected.
    Ok = 1,
    /// Feed is not connected; the quote may be stale.
    Error = 2,
    /// No live quote is known yet.
    Waiting = 3,
}

impl NotificationStatus {
    /// Status for quotes pushed while the feed is in `state`.
    #[must_use]
    pub const fn for_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Ok,
            _ => Self::Error,
        }
    }
}

/// One pushed quote update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteNotification {
    /// Quote snapshot.
    pub quote: Quote,
    /// Feed status when the update was sent.
    pub status: NotificationStatus,
    /// Local time of the update.
    pub updated_at: NaiveDateTime,
}

// =============================================================================
// Settings
// =============================================================================

/// Timing for the poll loop.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Wait between successful polls.
    pub poll_interval: Duration,
    /// Wait between market-hours checks while closed.
    pub idle_interval: Duration,
    /// Trading session window.
    pub market_hours: MarketHours,
    /// Backoff after failed polls.
    pub reconnect: ReconnectConfig,
}

impl PollerSettings {
    /// Derive poll loop settings from the engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            idle_interval: config.idle_interval(),
            market_hours: config.market_hours(),
            reconnect: ReconnectConfig::from_engine_config(config),
        }
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Shared state the poll loop writes to.
#[derive(Debug, Clone)]
pub struct PollerHandles {
    /// Quote table, written once per successful poll.
    pub quotes: Arc<LatestQuoteTable>,
    /// Symbols notified before the rest.
    pub subscriptions: Arc<SubscriptionManager>,
    /// Connection state cell.
    pub status: Arc<ConnectionStatus>,
    /// Outbound quote notifications.
    pub notifications: broadcast::Sender<QuoteNotification>,
}

/// The live poll loop.
#[derive(Debug)]
pub struct Poller {
    source: Arc<LatestPriceSource>,
    clock: Arc<dyn Clock>,
    handles: PollerHandles,
    settings: PollerSettings,
}

impl Poller {
    /// Create a poll loop over the given source and shared state.
    #[must_use]
    pub fn new(
        source: Arc<LatestPriceSource>,
        clock: Arc<dyn Clock>,
        handles: PollerHandles,
        settings: PollerSettings,
    ) -> Self {
        Self {
            source,
            clock,
            handles,
            settings,
        }
    }

    /// Run until cancelled or until the failure budget is spent.
    ///
    /// The caller applies [`FeedEvent::Start`] before spawning and
    /// [`FeedEvent::Stop`] after joining.
    pub async fn run(self, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.settings.reconnect.clone());
        tracing::info!(
            poll_interval = ?self.settings.poll_interval,
            max_attempts = self.settings.reconnect.max_attempts,
            "poll loop started"
        );

        while !cancel.is_cancelled() {
            if !self.settings.market_hours.is_open(self.clock.now()) {
                tracing::debug!(
                    idle_secs = self.settings.idle_interval.as_secs(),
                    "market closed"
                );
                if !wait(&cancel, self.settings.idle_interval).await {
                    break;
                }
                continue;
            }

            let started = Instant::now();
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.source.fetch_all() => result,
            };

            let pause = match result {
                Ok(quotes) => {
                    metrics::record_poll(started.elapsed());
                    policy.reset();
                    self.transition(FeedEvent::FetchSucceeded);
                    self.publish(&quotes);
                    self.settings.poll_interval
                }
                Err(e) => match self.on_failure(&mut policy, &e) {
                    Some(delay) => delay,
                    None => break,
                },
            };

            if !wait(&cancel, pause).await {
                break;
            }
        }

        tracing::info!(state = %self.handles.status.state(), "poll loop exiting");
    }

    /// Record a failed poll. Returns the backoff delay, or `None` once the
    /// feed has entered `Error`.
    fn on_failure(&self, policy: &mut ReconnectPolicy, error: &FetchError) -> Option<Duration> {
        metrics::record_poll_failure(error.kind());
        self.handles.status.record_error(error.to_string());

        let delay = policy.next_delay().filter(|_| policy.should_retry());
        let state = self.transition(FeedEvent::FetchFailed {
            exhausted: delay.is_none(),
        });

        if state == ConnectionState::Error {
            tracing::error!(
                error = %error,
                attempts = policy.attempt_count(),
                "max reconnect attempts reached, live feed stopped"
            );
            return None;
        }

        tracing::warn!(
            error = %error,
            attempt = policy.attempt_count(),
            delay = ?delay,
            "poll failed, backing off"
        );
        delay
    }

    fn transition(&self, event: FeedEvent) -> ConnectionState {
        let previous = self.handles.status.state();
        let state = self.handles.status.apply(event);
        if state != previous {
            tracing::info!(from = %previous, to = %state, "connection state changed");
        }
        metrics::set_connection_state(state);
        state
    }

    /// Write quotes to the table and push them, subscribed symbols first.
    fn publish(&self, quotes: &[Quote]) {
        let updated = self.handles.quotes.update(quotes);
        metrics::record_quotes_updated(updated);

        let status = NotificationStatus::for_state(self.handles.status.state());
        let updated_at = self.clock.now();
        let notify = |quote: Quote| {
            let _ = self.handles.notifications.send(QuoteNotification {
                quote,
                status,
                updated_at,
            });
        };

        for symbol in self.handles.subscriptions.symbols() {
            if let Some(quote) = self.handles.quotes.get(&symbol) {
                notify(quote);
            }
        }
        for quote in quotes {
            notify(quote.clone());
        }

        tracing::debug!(quotes = updated, "live quotes updated");
    }
}

/// Sleep for `duration` unless cancelled first. Returns `false` on cancel.
async fn wait(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
