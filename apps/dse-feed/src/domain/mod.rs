//! Domain Layer - Core market data types and pure parsing logic.
//!
//! Nothing in this layer performs I/O. Types here are shared by the
//! application services and the infrastructure adapters.

/// Bars, quotes and their validation rules.
pub mod market_data;

/// Feed connection state machine.
pub mod connection;

/// Trading session window.
pub mod market_hours;

/// Historical series merge.
pub mod series;

/// Subscribed symbol tracking.
pub mod subscription;

/// HTML table scraping (extraction, tokenizing, schema detection, builders).
pub mod scrape;
