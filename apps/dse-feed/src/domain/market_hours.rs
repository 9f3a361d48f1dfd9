//! Market Hours
//!
//! Trading window check used by the poll loop and the live overlay.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};

/// Local trading session window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketHours {
    /// Session open, local time.
    pub open: NaiveTime,
    /// Session close, local time.
    pub close: NaiveTime,
    /// Weekdays with no session.
    pub closed_days: Vec<Weekday>,
}

impl Default for MarketHours {
    /// DSE: 10:00 to 14:30, closed Friday and Saturday.
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(14, 30, 0).unwrap_or(NaiveTime::MIN),
            closed_days: vec![Weekday::Fri, Weekday::Sat],
        }
    }
}

impl MarketHours {
    /// Create a window with the given bounds and closed weekdays.
    #[must_use]
    pub const fn new(open: NaiveTime, close: NaiveTime, closed_days: Vec<Weekday>) -> Self {
        Self {
            open,
            close,
            closed_days,
        }
    }

    /// Whether `now` (local wall clock) falls inside the session.
    ///
    /// Both bounds are inclusive. Holidays are not modelled.
    #[must_use]
    pub fn is_open(&self, now: NaiveDateTime) -> bool {
        if self.closed_days.contains(&now.weekday()) {
            return false;
        }
        let time = now.time();
        time >= self.open && time <= self.close
    }
}
