//! Seed Ports (Driven Ports)
//!
//! Local per-symbol history: read as a seed beneath scraped data, and written
//! back out as an export of the merged cache.

use std::path::PathBuf;

use crate::domain::market_data::Bar;

/// Seed or export file failure.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// No seed directory is configured.
    #[error("no seed directory configured")]
    NotConfigured,

    /// The symbol has no seed file.
    #[error("seed file not found: {path}")]
    NotFound {
        /// Expected file location.
        path: PathBuf,
    },

    /// The file could not be read or written.
    #[error("seed file {path}: {source}")]
    Io {
        /// File location.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The file is not valid CSV.
    #[error("seed file {path}: {message}")]
    Csv {
        /// File location.
        path: PathBuf,
        /// Error details.
        message: String,
    },
}

/// Port for loading a symbol's local history.
pub trait SeedSource: Send + Sync + std::fmt::Debug {
    /// Load every parseable bar for `symbol`, sorted by date.
    ///
    /// Bars that fail validation are returned with `valid == false` so the
    /// merge can count them.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError`] if there is no seed for the symbol or it cannot
    /// be read.
    fn load(&self, symbol: &str) -> Result<Vec<Bar>, SeedError>;
}

/// Port for writing a symbol's merged series.
pub trait SeriesExporter: Send + Sync + std::fmt::Debug {
    /// Write `bars` for `symbol`, replacing any previous export.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError`] if the file cannot be written.
    fn export(&self, symbol: &str, bars: &[Bar]) -> Result<PathBuf, SeedError>;
}
