//! HTML Table Scraping
//!
//! The exchange publishes prices only as HTML tables with no stable markup
//! contract. Pages are parsed by scanning for the small vocabulary of table
//! tags instead of building a DOM:
//!
//! 1. [`table::extract_table`] isolates the data table from the page.
//! 2. [`rows::rows`] and [`rows::cells`] split it into flattened cell text.
//! 3. [`columns::locate_schema`] maps header text to fields, falling back to
//!    fixed column positions when no header row is recognised.
//! 4. [`builders`] turn cells into validated [`Bar`]s and [`Quote`]s.
//!
//! All functions here are pure; I/O lives in the infrastructure layer.

pub mod builders;
pub mod columns;
pub mod rows;
pub mod table;

pub use builders::{build_bar, build_quote};
pub use columns::{ColumnMap, Field, Layout, Schema, detect_columns, locate_schema};
pub use rows::{cells, rows};
pub use table::extract_table;

use super::market_data::{Bar, Quote};

// =============================================================================
// Errors
// =============================================================================

/// Page-level parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The page contained no table rows at all.
    #[error("no table rows found in page")]
    NoRows,
    /// Neither a header row nor a positional layout could be located.
    #[error("no usable {layout} table structure found")]
    NoSchema {
        /// Layout that was being searched for.
        layout: Layout,
    },
}

// =============================================================================
// Parsed Page
// =============================================================================

/// Records parsed from a page, with the number of rows that were rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPage<T> {
    /// Records that passed the builder checks, in page order.
    pub records: Vec<T>,
    /// Data rows that were skipped.
    pub rejected: usize,
}

impl<T> Default for ParsedPage<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            rejected: 0,
        }
    }
}

impl<T> ParsedPage<T> {
    /// True when no record was accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parse a day-end archive page into bars, in page order.
///
/// # Errors
///
/// Returns [`ParseError`] when the page holds no rows or no recognisable
/// table layout. Individual bad rows are counted, not fatal.
pub fn parse_history_page(html: &str) -> Result<ParsedPage<Bar>, ParseError> {
    let table = extract_table(html);
    parse_rows(table, Layout::History, build_bar)
}

/// Parse the latest share price page into quotes, in page order.
///
/// # Errors
///
/// Returns [`ParseError`] when the page holds no rows or no recognisable
/// table layout.
pub fn parse_latest_page(html: &str) -> Result<ParsedPage<Quote>, ParseError> {
    parse_rows(html, Layout::Latest, build_quote)
}

fn parse_rows<T>(
    table: &str,
    layout: Layout,
    build: impl Fn(&[String], &ColumnMap) -> Option<T>,
) -> Result<ParsedPage<T>, ParseError> {
    let row_cells: Vec<Vec<String>> = rows(table).into_iter().map(cells).collect();
    if row_cells.is_empty() {
        return Err(ParseError::NoRows);
    }

    let schema = locate_schema(&row_cells, layout).ok_or(ParseError::NoSchema { layout })?;
    tracing::debug!(
        %layout,
        rows = row_cells.len(),
        data_start = schema.data_start,
        positional = schema.positional,
        "table schema located"
    );

    let mut page = ParsedPage::default();
    for cells in row_cells.iter().skip(schema.data_start) {
        if cells.is_empty() {
            continue;
        }
        match build(cells, &schema.columns) {
            Some(record) => page.records.push(record),
            None => page.rejected += 1,
        }
    }

    Ok(page)
}

// =============================================================================
// Case-Insensitive Scanning
// =============================================================================

/// Byte offset of the first ASCII-case-insensitive match of `needle` in
/// `haystack` at or after `from`.
///
/// `needle` must be ASCII, so every match starts and ends on a char boundary.
pub(crate) fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    if needle.is_empty() || from >= hay.len() || hay.len() - from < needle.len() {
        return None;
    }
    (from..=hay.len() - needle.len()).find(|&i| hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Byte offset of the last case-insensitive match of `needle` that starts
/// before `before`.
pub(crate) fn rfind_ci(haystack: &str, needle: &str, before: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let needle = needle.as_bytes();
    let end = before.min(hay.len());
    if needle.is_empty() || end == 0 {
        return None;
    }
    (0..end)
        .rev()
        .find(|&i| i + needle.len() <= hay.len() && hay[i..i + needle.len()].eq_ignore_ascii_case(needle))
}

/// Case-insensitive substring test.
pub(crate) fn contains_ci(haystack: &str, needle: &str) -> bool {
    find_ci(haystack, needle, 0).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    const ARCHIVE_PAGE: &str = r#"
        <html><body>
        <table class="menu"><tr><td>Home</td><td>Market</td></tr></table>
        <table class="table table-bordered background-white shares-table fixedHeader">
          <thead>
            <tr><th>#</th><th>DATE</th><th>TRADING CODE</th><th>LTP*</th><th>HIGH</th>
                <th>LOW</th><th>OPENP*</th><th>CLOSEP*</th><th>YCP</th><th>TRADE</th>
                <th>VALUE (mn)</th><th>VOLUME</th></tr>
          </thead>
          <tbody>
            <tr><td>1</td><td>2024-01-15</td><td>GP</td><td>10.8</td><td>11.0</td>
                <td>10.2</td><td>10.5</td><td>10.8</td><td>10.4</td><td>312</td>
                <td>1.35</td><td>125,000</td></tr>
            <tr><td>2</td><td>2024-01-14</td><td>GP</td><td>10.4</td><td>10.6</td>
                <td>10.1</td><td>10.3</td><td>0.00</td><td>10.2</td><td>98</td>
                <td>0.40</td><td>40,000</td></tr>
          </tbody>
        </table>
        </body></html>
    "#;

    #[test]
    fn archive_page_yields_valid_bar_and_rejects_zero_close() {
        let page = parse_history_page(ARCHIVE_PAGE).unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.rejected, 1);

        let bar = &page.records[0];
        assert_eq!(bar.date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(bar.open, dec!(10.5));
        assert_eq!(bar.high, dec!(11.0));
        assert_eq!(bar.low, dec!(10.2));
        assert_eq!(bar.close, dec!(10.8));
        assert_eq!(bar.volume, 125_000);
        assert_eq!(bar.trade_count, 312);
        assert_eq!(bar.turnover_value, dec!(1.35));
        assert!(bar.valid);
    }

    #[test]
    fn latest_page_yields_quotes() {
        let html = r"
            <table>
              <tr><th>#</th><th>TRADING CODE</th><th>LTP*</th><th>HIGH</th><th>LOW</th>
                  <th>CLOSEP*</th><th>YCP*</th><th>CHANGE</th><th>TRADE</th>
                  <th>VALUE (mn)</th><th>VOLUME</th></tr>
              <tr><td>1</td><td><a href='x'>ACI</a></td><td>52.3</td><td>53</td><td>51</td>
                  <td>0</td><td>50.0</td><td>2.3</td><td>1,024</td><td>12.5</td><td>240,000</td></tr>
              <tr><td>2</td><td>DEAD</td><td>0</td><td>0</td><td>0</td>
                  <td>0</td><td>9.0</td><td>0</td><td>0</td><td>0</td><td>0</td></tr>
            </table>
        ";

        let page = parse_latest_page(html).unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.rejected, 1);
        let quote = &page.records[0];
        assert_eq!(quote.symbol, "ACI");
        assert_eq!(quote.change_percent, dec!(4.6));
        assert_eq!(quote.open, dec!(50.0));
        assert_eq!(quote.volume, 240_000);
    }

    #[test]
    fn page_without_rows_is_an_error() {
        assert_eq!(
            parse_history_page("<html><p>maintenance</p></html>"),
            Err(ParseError::NoRows)
        );
    }

    #[test]
    fn page_without_schema_is_an_error() {
        let html = "<table><tr><td>a</td><td>b</td></tr></table>";
        assert_eq!(
            parse_history_page(html),
            Err(ParseError::NoSchema {
                layout: Layout::History
            })
        );
    }

    #[test]
    fn case_insensitive_scanning() {
        assert_eq!(find_ci("abc<TR>", "<tr", 0), Some(3));
        assert_eq!(find_ci("abc", "<tr", 0), None);
        assert_eq!(rfind_ci("<table><TABLE x>", "<table", 10), Some(7));
        assert!(contains_ci("Trading Code", "CODE"));
    }
}
