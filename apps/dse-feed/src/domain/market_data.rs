//! Market Data Types
//!
//! Canonical in-memory representation of end-of-day bars and live quotes.
//! Both the web scraper and the CSV seed reader produce these types, and the
//! engine only ever caches records that passed validation.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

/// Lowest price accepted for any of open/high/low/close (0.01).
pub const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Earliest plausible bar year.
pub const MIN_YEAR: i32 = 1990;

/// Latest plausible bar year.
pub const MAX_YEAR: i32 = 2100;

// =============================================================================
// Symbol
// =============================================================================

/// An instrument trading code (e.g. `GP`, `SQURPHARMA`).
pub type Symbol = String;

/// Normalize a trading code for use as a map key.
///
/// Trading codes are matched case-insensitively everywhere in the engine.
#[must_use]
pub fn normalize_symbol(symbol: &str) -> Symbol {
    symbol.trim().to_ascii_uppercase()
}

// =============================================================================
// Bar
// =============================================================================

/// One trading session for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bar {
    /// Session date.
    pub date: NaiveDate,
    /// Opening price.
    pub open: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Shares traded.
    pub volume: u64,
    /// Number of trades.
    pub trade_count: u64,
    /// Turnover value as published (millions of BDT on the archive page).
    pub turnover_value: Decimal,
    /// Result of [`Bar::is_plausible`] at construction time.
    pub valid: bool,
}

impl Bar {
    /// Create a bar and compute its validity flag.
    #[must_use]
    pub fn new(
        date: NaiveDate,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: u64,
    ) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            trade_count: 0,
            turnover_value: Decimal::ZERO,
            valid: false,
        }
        .validated()
    }

    /// Attach trade count and turnover to the bar.
    #[must_use]
    pub fn with_activity(mut self, trade_count: u64, turnover_value: Decimal) -> Self {
        self.trade_count = trade_count;
        self.turnover_value = turnover_value;
        self
    }

    /// Recompute the validity flag from the current field values.
    #[must_use]
    pub fn validated(mut self) -> Self {
        self.valid = self.is_plausible();
        self
    }

    /// Bad tick filter.
    ///
    /// All four prices must reach [`MIN_PRICE`], the high may not be below the
    /// low, and the year must fall within [`MIN_YEAR`]..=[`MAX_YEAR`].
    #[must_use]
    pub fn is_plausible(&self) -> bool {
        let prices_ok = [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| *p >= MIN_PRICE);

        prices_ok && self.high >= self.low && (MIN_YEAR..=MAX_YEAR).contains(&self.date.year())
    }

    /// Calendar year.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    /// Calendar month (1-12).
    #[must_use]
    pub fn month(&self) -> u32 {
        self.date.month()
    }

    /// Day of month (1-31).
    #[must_use]
    pub fn day(&self) -> u32 {
        self.date.day()
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Latest live snapshot for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    /// Trading code.
    pub symbol: Symbol,
    /// Last traded price (LTP).
    pub last_price: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Session open. Falls back to the previous close when not published.
    pub open: Decimal,
    /// Closing price as published on the live page.
    pub close_price: Decimal,
    /// Yesterday's closing price (YCP).
    pub previous_close: Decimal,
    /// Absolute change as published.
    pub change: Decimal,
    /// Derived percentage change against the previous close.
    pub change_percent: Decimal,
    /// Shares traded.
    pub volume: u64,
    /// Number of trades.
    pub trade_count: u64,
    /// Turnover value.
    pub turnover_value: Decimal,
    /// Whether the quote passed the builder checks.
    pub valid: bool,
}

impl Quote {
    /// Percentage change of `last` against `previous_close`.
    ///
    /// Zero when the previous close is not positive or the result does not
    /// fit in a `Decimal`.
    #[must_use]
    pub fn change_percent_of(last: Decimal, previous_close: Decimal) -> Decimal {
        if previous_close <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        last.checked_sub(previous_close)
            .and_then(|diff| diff.checked_div(previous_close))
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::ZERO)
    }

    /// Empty, invalid quote for a symbol with no live data yet.
    #[must_use]
    pub fn pending(symbol: &str) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            last_price: Decimal::ZERO,
            high: Decimal::ZERO,
            low: Decimal::ZERO,
            open: Decimal::ZERO,
            close_price: Decimal::ZERO,
            previous_close: Decimal::ZERO,
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            volume: 0,
            trade_count: 0,
            turnover_value: Decimal::ZERO,
            valid: false,
        }
    }
}

// =============================================================================
// Live Overlay
// =============================================================================

/// Fold a live quote into a historical series for display.
///
/// If the newest bar is `today`, its close/high/low/volume are replaced with
/// the positive live values and its validity is recomputed. If the newest bar
/// is older and the market is open, a bar for `today` is appended from the
/// quote, unless that bar fails validation. An empty series is left untouched.
pub fn overlay_live_quote(bars: &mut Vec<Bar>, quote: &Quote, today: NaiveDate, market_open: bool) {
    let Some(last) = bars.last_mut() else {
        return;
    };

    if last.date == today {
        if quote.last_price > Decimal::ZERO {
            last.close = quote.last_price;
        }
        if quote.high > Decimal::ZERO {
            last.high = quote.high;
        }
        if quote.low > Decimal::ZERO {
            last.low = quote.low;
        }
        if quote.volume > 0 {
            last.volume = quote.volume;
        }
        last.valid = last.is_plausible();
    } else if last.date < today && market_open {
        let bar = Bar::new(
            today,
            quote.open,
            quote.high,
            quote.low,
            quote.last_price,
            quote.volume,
        )
        .with_activity(quote.trade_count, quote.turnover_value);
        if bar.valid {
            bars.push(bar);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn quote(last: Decimal) -> Quote {
        Quote {
            symbol: "GP".to_string(),
            last_price: last,
            high: dec!(300),
            low: dec!(280),
            open: dec!(285),
            close_price: Decimal::ZERO,
            previous_close: dec!(284),
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            volume: 5_000,
            trade_count: 40,
            turnover_value: dec!(1.5),
            valid: true,
        }
    }

    #[test]
    fn min_price_is_one_cent() {
        assert_eq!(MIN_PRICE, dec!(0.01));
    }

    #[test]
    fn valid_bar_passes() {
        let bar = Bar::new(date(2024, 1, 15), dec!(10.5), dec!(11.0), dec!(10.2), dec!(10.8), 125_000);
        assert!(bar.valid);
        assert_eq!((bar.year(), bar.month(), bar.day()), (2024, 1, 15));
    }

    #[test]
    fn zero_close_is_rejected() {
        let bar = Bar::new(date(2024, 1, 15), dec!(10.5), dec!(11.0), dec!(10.2), dec!(0.00), 125_000);
        assert!(!bar.valid);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let bar = Bar::new(date(2024, 1, 15), dec!(10.5), dec!(10.0), dec!(11.0), dec!(10.8), 1);
        assert!(!bar.valid);
    }

    #[test]
    fn implausible_year_is_rejected() {
        let early = Bar::new(date(1989, 12, 31), dec!(1), dec!(1), dec!(1), dec!(1), 1);
        let late = Bar::new(date(2101, 1, 1), dec!(1), dec!(1), dec!(1), dec!(1), 1);
        assert!(!early.valid);
        assert!(!late.valid);
    }

    #[test]
    fn change_percent_from_previous_close() {
        assert_eq!(Quote::change_percent_of(dec!(52.3), dec!(50.0)), dec!(4.6));
        assert_eq!(Quote::change_percent_of(dec!(52.3), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn change_percent_overflow_is_zero() {
        let extreme = Quote::change_percent_of(Decimal::MAX, dec!(0.0000000000000000000000000001));
        assert_eq!(extreme, Decimal::ZERO);
        assert_eq!(Quote::change_percent_of(Decimal::MIN, dec!(1)), Decimal::ZERO);
    }

    #[test]
    fn normalize_symbol_trims_and_uppercases() {
        assert_eq!(normalize_symbol("  squrpharma "), "SQURPHARMA");
    }

    #[test]
    fn overlay_updates_todays_bar() {
        let today = date(2024, 3, 10);
        let mut bars = vec![Bar::new(today, dec!(285), dec!(290), dec!(281), dec!(286), 100)];

        overlay_live_quote(&mut bars, &quote(dec!(295)), today, true);

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, dec!(295));
        assert_eq!(bars[0].high, dec!(300));
        assert_eq!(bars[0].low, dec!(280));
        assert_eq!(bars[0].volume, 5_000);
    }

    #[test]
    fn overlay_appends_new_session_only_while_open() {
        let yesterday = date(2024, 3, 9);
        let today = date(2024, 3, 10);
        let base = vec![Bar::new(yesterday, dec!(285), dec!(290), dec!(281), dec!(286), 100)];

        let mut closed = base.clone();
        overlay_live_quote(&mut closed, &quote(dec!(295)), today, false);
        assert_eq!(closed.len(), 1);

        let mut open = base;
        overlay_live_quote(&mut open, &quote(dec!(295)), today, true);
        assert_eq!(open.len(), 2);
        assert_eq!(open[1].date, today);
        assert_eq!(open[1].close, dec!(295));
        assert_eq!(open[1].trade_count, 40);
    }

    #[test]
    fn overlay_revalidates_todays_bar() {
        let today = date(2024, 3, 10);
        let mut bars = vec![Bar::new(today, dec!(285), dec!(290), dec!(281), dec!(286), 100)];
        let mut inverted = quote(dec!(295));
        inverted.high = dec!(270);

        overlay_live_quote(&mut bars, &inverted, today, true);

        assert_eq!(bars[0].high, dec!(270));
        assert!(!bars[0].valid);
    }

    #[test]
    fn overlay_skips_invalid_new_session_bar() {
        let yesterday = date(2024, 3, 9);
        let today = date(2024, 3, 10);
        let mut bars = vec![Bar::new(yesterday, dec!(285), dec!(290), dec!(281), dec!(286), 100)];
        let mut unopened = quote(dec!(295));
        unopened.open = Decimal::ZERO;

        overlay_live_quote(&mut bars, &unopened, today, true);

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date, yesterday);
    }

    proptest! {
        #[test]
        fn valid_bars_never_have_high_below_low(
            o in 0i64..100_000,
            h in 0i64..100_000,
            l in 0i64..100_000,
            c in 0i64..100_000,
        ) {
            let bar = Bar::new(
                date(2020, 6, 1),
                Decimal::new(o, 2),
                Decimal::new(h, 2),
                Decimal::new(l, 2),
                Decimal::new(c, 2),
                10,
            );
            if bar.valid {
                prop_assert!(bar.high >= bar.low);
                prop_assert!(bar.close >= MIN_PRICE);
            }
            if o < 1 || h < 1 || l < 1 || c < 1 {
                prop_assert!(!bar.valid);
            }
        }
    }
}
