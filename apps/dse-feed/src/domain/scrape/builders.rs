//! Bar and quote builders.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::columns::{ColumnMap, Field, Layout};
use crate::domain::market_data::{Bar, Quote, normalize_symbol};

/// Date formats seen on the archive page and in seed files.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%Y/%m/%d"];

/// Build a bar from one archive row.
///
/// Returns `None` if the row is shorter than the required columns, the date
/// does not parse, or the bar fails validation.
#[must_use]
pub fn build_bar(cells: &[String], columns: &ColumnMap) -> Option<Bar> {
    let last_required = columns.max_index(Layout::History.required())?;
    if cells.len() <= last_required {
        return None;
    }

    let date = parse_date(cell(cells, columns, Field::Date)?)?;

    let bar = Bar::new(
        date,
        decimal_at(cells, columns, Field::Open),
        decimal_at(cells, columns, Field::High),
        decimal_at(cells, columns, Field::Low),
        decimal_at(cells, columns, Field::Close),
        count_at(cells, columns, Field::Volume),
    )
    .with_activity(
        count_at(cells, columns, Field::TradeCount),
        decimal_at(cells, columns, Field::TurnoverValue),
    );

    bar.valid.then_some(bar)
}

/// Build a quote from one latest-price row.
///
/// Returns `None` for rows with a blank symbol or a non-positive last price.
#[must_use]
pub fn build_quote(cells: &[String], columns: &ColumnMap) -> Option<Quote> {
    let last_required = columns.max_index(Layout::Latest.required())?;
    if cells.len() <= last_required {
        return None;
    }

    let symbol = normalize_symbol(cell(cells, columns, Field::Symbol)?);
    let last_price = decimal_at(cells, columns, Field::LastPrice);
    if symbol.is_empty() || last_price <= Decimal::ZERO {
        return None;
    }

    let previous_close = decimal_at(cells, columns, Field::PreviousClose);
    let open = match columns.get(Field::Open) {
        Some(_) => decimal_at(cells, columns, Field::Open),
        None => previous_close,
    };

    Some(Quote {
        symbol,
        last_price,
        high: decimal_at(cells, columns, Field::High),
        low: decimal_at(cells, columns, Field::Low),
        open,
        close_price: decimal_at(cells, columns, Field::Close),
        previous_close,
        change: decimal_at(cells, columns, Field::Change),
        change_percent: Quote::change_percent_of(last_price, previous_close),
        volume: count_at(cells, columns, Field::Volume),
        trade_count: count_at(cells, columns, Field::TradeCount),
        turnover_value: decimal_at(cells, columns, Field::TurnoverValue),
        valid: true,
    })
}

// =============================================================================
// Cell Parsing
// =============================================================================

fn cell<'a>(cells: &'a [String], columns: &ColumnMap, field: Field) -> Option<&'a str> {
    columns
        .get(field)
        .and_then(|i| cells.get(i))
        .map(String::as_str)
}

fn decimal_at(cells: &[String], columns: &ColumnMap, field: Field) -> Decimal {
    cell(cells, columns, field).map_or(Decimal::ZERO, parse_decimal)
}

fn count_at(cells: &[String], columns: &ColumnMap, field: Field) -> u64 {
    cell(cells, columns, field).map_or(0, parse_count)
}

/// Parse a number, ignoring thousands separators. Unparseable text is zero.
#[must_use]
pub fn parse_decimal(text: &str) -> Decimal {
    let cleaned: String = text.chars().filter(|c| *c != ',').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Decimal::ZERO;
    }
    Decimal::from_str(cleaned)
        .or_else(|_| Decimal::from_scientific(cleaned))
        .unwrap_or(Decimal::ZERO)
}

/// Parse a non-negative count. Fractions are truncated, negatives are zero.
#[must_use]
pub fn parse_count(text: &str) -> u64 {
    parse_decimal(text).trunc().to_u64().unwrap_or(0)
}

/// Parse a session date in any of the accepted formats.
///
/// Trailing text after the first ten characters (e.g. a time) is ignored.
#[must_use]
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    let head = text.get(..10).unwrap_or(text);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
}
