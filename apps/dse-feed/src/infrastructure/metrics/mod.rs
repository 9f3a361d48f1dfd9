//! Prometheus Metrics Module
//!
//! Exposes feed metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Polling**: live page polls, failures and latency
//! - **Quotes**: quotes written to the live table
//! - **Parsing**: rows rejected by the builders
//! - **History**: merges performed and bars cached
//! - **Connection**: current feed state
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;
use crate::domain::scrape::Layout;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!("dse_feed_polls_total", "Live price page polls attempted");
    describe_counter!(
        "dse_feed_poll_failures_total",
        "Live price page polls that failed, by reason"
    );
    describe_histogram!(
        "dse_feed_poll_duration_seconds",
        "Time to fetch and parse the live price page"
    );

    describe_counter!(
        "dse_feed_quotes_updated_total",
        "Quotes written to the live quote table"
    );
    describe_gauge!("dse_feed_live_quotes", "Instruments in the live quote table");

    describe_counter!(
        "dse_feed_rows_rejected_total",
        "Table rows rejected by the bar and quote builders"
    );

    describe_counter!(
        "dse_feed_history_merges_total",
        "Historical merges performed, by outcome"
    );
    describe_gauge!("dse_feed_cached_symbols", "Instruments with a cached series");

    describe_gauge!(
        "dse_feed_connection_state",
        "Feed state: 0 disconnected, 1 connecting, 2 connected, 3 reconnecting, 4 error"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for a historical merge.
#[derive(Debug, Clone, Copy)]
pub enum MergeOutcome {
    /// Both seed and web contributed.
    Both,
    /// Only the seed contributed.
    SeedOnly,
    /// Only the web contributed.
    WebOnly,
    /// Neither source yielded a valid bar.
    NoData,
}

impl MergeOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Both => "both",
            Self::SeedOnly => "seed_only",
            Self::WebOnly => "web_only",
            Self::NoData => "no_data",
        }
    }
}

/// Record a live page poll and its duration.
pub fn record_poll(duration: Duration) {
    counter!("dse_feed_polls_total").increment(1);
    histogram!("dse_feed_poll_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed poll.
pub fn record_poll_failure(reason: &'static str) {
    counter!("dse_feed_poll_failures_total", "reason" => reason).increment(1);
}

/// Record quotes written to the live table.
pub fn record_quotes_updated(count: usize) {
    counter!("dse_feed_quotes_updated_total").increment(count as u64);
}

/// Update the live quote table size.
#[allow(clippy::cast_precision_loss)]
pub fn set_live_quotes(count: usize) {
    gauge!("dse_feed_live_quotes").set(count as f64);
}

/// Record rows rejected while parsing a page.
pub fn record_rows_rejected(layout: Layout, count: usize) {
    if count == 0 {
        return;
    }
    let layout = match layout {
        Layout::History => "history",
        Layout::Latest => "latest",
    };
    counter!("dse_feed_rows_rejected_total", "layout" => layout).increment(count as u64);
}

/// Record a historical merge.
pub fn record_history_merge(outcome: MergeOutcome) {
    counter!("dse_feed_history_merges_total", "outcome" => outcome.as_str()).increment(1);
}

/// Update the cached symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_cached_symbols(count: usize) {
    gauge!("dse_feed_cached_symbols").set(count as f64);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("dse_feed_connection_state").set(f64::from(state as u8));
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_outcome_as_str() {
        assert_eq!(MergeOutcome::Both.as_str(), "both");
        assert_eq!(MergeOutcome::SeedOnly.as_str(), "seed_only");
        assert_eq!(MergeOutcome::WebOnly.as_str(), "web_only");
        assert_eq!(MergeOutcome::NoData.as_str(), "no_data");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_poll(Duration::from_millis(5));
        record_poll_failure("timeout");
        record_rows_rejected(Layout::History, 3);
        set_connection_state(ConnectionState::Connected);
    }
}
