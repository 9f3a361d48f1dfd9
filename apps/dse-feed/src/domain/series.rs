//! Historical Series Merge
//!
//! Reconciles bars from the local seed with bars scraped from the day-end
//! archive. Bars are keyed by calendar date; the higher-precedence source
//! overwrites the lower one for any date both provide.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::market_data::Bar;

/// Which source wins when both provide a bar for the same date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePrecedence {
    /// Scraped bars overwrite seed bars.
    #[default]
    WebOverSeed,
    /// Seed bars overwrite scraped bars.
    SeedOverWeb,
}

impl SourcePrecedence {
    /// Map the legacy boolean "prefer web data" flag.
    #[must_use]
    pub const fn from_prefer_web(prefer_web: bool) -> Self {
        if prefer_web {
            Self::WebOverSeed
        } else {
            Self::SeedOverWeb
        }
    }
}

/// Outcome of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedSeries {
    /// Valid bars in ascending date order, one per date.
    pub bars: Vec<Bar>,
    /// Input bars skipped because they failed validation.
    pub dropped_invalid: usize,
}

impl MergedSeries {
    /// True when no valid bar survived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Date of the newest bar.
    #[must_use]
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }
}

/// Merge seed and web bars under the given precedence.
#[must_use]
pub fn merge(seed: &[Bar], web: &[Bar], precedence: SourcePrecedence) -> MergedSeries {
    merge_onto(&[], seed, web, precedence)
}

/// Merge seed and web bars on top of an existing series.
///
/// `base` is the lowest layer: any date it holds survives unless one of the
/// two sources provides the same date.
#[must_use]
pub fn merge_onto(
    base: &[Bar],
    seed: &[Bar],
    web: &[Bar],
    precedence: SourcePrecedence,
) -> MergedSeries {
    let (lower, higher) = match precedence {
        SourcePrecedence::WebOverSeed => (seed, web),
        SourcePrecedence::SeedOverWeb => (web, seed),
    };

    let mut by_date: BTreeMap<NaiveDate, Bar> = BTreeMap::new();
    let mut dropped_invalid = 0;

    for layer in [base, lower, higher] {
        for bar in layer {
            if bar.valid {
                by_date.insert(bar.date, bar.clone());
            } else {
                dropped_invalid += 1;
            }
        }
    }

    MergedSeries {
        bars: by_date.into_values().collect(),
        dropped_invalid,
    }
}

/// Bars whose date lies within `start..=end`.
#[must_use]
pub fn within(bars: &[Bar], start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
    bars.iter()
        .filter(|b| b.date >= start && b.date <= end)
        .cloned()
        .collect()
}
