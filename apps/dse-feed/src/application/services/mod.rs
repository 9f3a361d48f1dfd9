//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `history`: seed + archive merge and the per-symbol cache
//! - `quotes`: latest price page fetch and the live quote table
//! - `poller`: the live poll loop and its notifications
//! - `engine`: the `FeedEngine` facade and task supervision

pub mod engine;
pub mod history;
pub mod poller;
pub mod quotes;

pub use engine::{EngineAdapters, EngineStatus, FeedEngine, FeedError, STOP_TIMEOUT};
pub use history::{BackfillEvent, HistoryError, HistoryService, HistorySettings};
pub use poller::{NotificationStatus, Poller, PollerHandles, PollerSettings, QuoteNotification};
pub use quotes::{FetchError, LatestPriceSource, LatestQuoteTable};
