#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! DSE Feed - Market Data Acquisition Engine
//!
//! Scrapes end-of-day and intraday trading data for Dhaka Stock Exchange
//! instruments from HTML pages, reconciles it with a local CSV seed, and
//! keeps a live quote table refreshed during market hours.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Market data types and pure algorithms
//!   - `market_data`: bars, quotes, validation, live overlay
//!   - `scrape`: table extraction, row/cell tokenizing, schema detection
//!   - `series`: seed/web merge
//!   - `connection`: feed state machine
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: HTTP transport, seed files, clock
//!   - `services`: history cache, live quotes, poll loop, engine facade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `http`: reqwest transport
//!   - `seed`: CSV seed reader and exporter
//!   - `config`: YAML configuration
//!   - `health`: status HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! day-end archive ──► extract ──► rows/cells ──► schema ──► bars ──┐
//!                                                                   ├──► merge ──► cache
//! seed CSV ─────────────────────────────────────────────────► bars ┘
//!
//! latest prices ──► extract ──► rows/cells ──► schema ──► quotes ──► quote table ──► notifications
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionState, ConnectionStatus};
pub use domain::market_data::{Bar, Quote, Symbol};
pub use domain::series::SourcePrecedence;
pub use domain::subscription::SubscriptionManager;

// Engine
pub use application::services::{
    BackfillEvent, EngineAdapters, EngineStatus, FeedEngine, FeedError, HistoryError,
    NotificationStatus, QuoteNotification,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, EngineConfig, load_config};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
