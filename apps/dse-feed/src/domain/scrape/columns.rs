//! Schema detection.
//!
//! Header cells are matched against per-layout keyword rules. When no header
//! row is recognised within [`HEADER_LOOKAHEAD`] rows, a fixed positional
//! layout is assumed instead.

use serde::Serialize;

use super::contains_ci;

/// Rows searched from the top of the table for a header.
pub const HEADER_LOOKAHEAD: usize = 300;

/// History header candidates need at least this many cells.
const MIN_HISTORY_HEADER_CELLS: usize = 5;

/// Positional history data rows have more cells than this.
const MIN_HISTORY_POSITIONAL_CELLS: usize = 11;

// =============================================================================
// Fields and Layouts
// =============================================================================

/// Semantic column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Session date.
    Date,
    /// Trading code.
    Symbol,
    /// Opening price.
    Open,
    /// Session high.
    High,
    /// Session low.
    Low,
    /// Closing price.
    Close,
    /// Shares traded.
    Volume,
    /// Last traded price.
    LastPrice,
    /// Yesterday's close.
    PreviousClose,
    /// Absolute change.
    Change,
    /// Number of trades.
    TradeCount,
    /// Turnover value.
    TurnoverValue,
}

/// Which exchange page a table comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Day-end archive (one row per session).
    History,
    /// Latest share price (one row per instrument).
    Latest,
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::History => f.write_str("history"),
            Self::Latest => f.write_str("latest price"),
        }
    }
}

/// A keyword rule: the cell must contain one of `any` and none of `none`.
struct Rule {
    field: Field,
    any: &'static [&'static str],
    none: &'static [&'static str],
}

const fn rule(field: Field, any: &'static [&'static str], none: &'static [&'static str]) -> Rule {
    Rule { field, any, none }
}

/// Archive headers: `DATE`, `LTP*`, `HIGH`, `LOW`, `OPENP*`, `CLOSEP*`, `YCP`,
/// `TRADE`, `VALUE (mn)`, `VOLUME`. `LTP*` and `CLOSEP*` both map to close,
/// and the later `CLOSEP*` column wins.
const HISTORY_RULES: &[Rule] = &[
    rule(Field::Date, &["DATE"], &[]),
    rule(Field::Open, &["OPEN"], &[]),
    rule(Field::High, &["HIGH"], &[]),
    rule(Field::Low, &["LOW"], &[]),
    rule(Field::Close, &["CLOSE", "LTP"], &["YCP", "PREV"]),
    rule(Field::Volume, &["VOL"], &[]),
    rule(Field::TradeCount, &["TRADE"], &["TRADING"]),
    rule(Field::TurnoverValue, &["VALUE"], &[]),
];

/// Live headers: `TRADING CODE`, `LTP*`, `HIGH`, `LOW`, `CLOSEP*`, `YCP*`,
/// `CHANGE`, `TRADE`, `VALUE (mn)`, `VOLUME`.
const LATEST_RULES: &[Rule] = &[
    rule(Field::Symbol, &["TRADING", "SYMBOL"], &[]),
    rule(Field::LastPrice, &["LTP", "LAST"], &[]),
    rule(Field::High, &["HIGH"], &[]),
    rule(Field::Low, &["LOW"], &[]),
    rule(Field::Open, &["OPEN"], &[]),
    rule(Field::Close, &["CLOSE"], &["YCP", "PREV"]),
    rule(Field::PreviousClose, &["YCP", "PREV"], &[]),
    rule(Field::Change, &["CHANGE"], &[]),
    rule(Field::TradeCount, &["TRADE"], &["TRADING"]),
    rule(Field::TurnoverValue, &["VALUE"], &[]),
    rule(Field::Volume, &["VOLUME"], &[]),
];

impl Layout {
    const fn rules(self) -> &'static [Rule] {
        match self {
            Self::History => HISTORY_RULES,
            Self::Latest => LATEST_RULES,
        }
    }

    /// Fields a header row must provide to be accepted.
    #[must_use]
    pub const fn required(self) -> &'static [Field] {
        match self {
            Self::History => &[Field::Date, Field::Close, Field::Volume],
            Self::Latest => &[Field::Symbol, Field::LastPrice],
        }
    }

    /// Fixed column positions used when no header row is recognised.
    #[must_use]
    pub fn positional(self) -> ColumnMap {
        let mut map = ColumnMap::default();
        let positions: &[(Field, usize)] = match self {
            Self::History => &[
                (Field::Date, 1),
                (Field::High, 4),
                (Field::Low, 5),
                (Field::Open, 6),
                (Field::Close, 7),
                (Field::TradeCount, 9),
                (Field::TurnoverValue, 10),
                (Field::Volume, 11),
            ],
            Self::Latest => &[
                (Field::Symbol, 1),
                (Field::LastPrice, 2),
                (Field::High, 3),
                (Field::Low, 4),
                (Field::Close, 5),
                (Field::PreviousClose, 6),
                (Field::Change, 7),
                (Field::TradeCount, 8),
                (Field::TurnoverValue, 9),
                (Field::Volume, 10),
            ],
        };
        for &(field, index) in positions {
            map.set(field, index);
        }
        map
    }
}

// =============================================================================
// Column Map
// =============================================================================

/// Column index per semantic field. Missing fields are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnMap {
    date: Option<usize>,
    symbol: Option<usize>,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    close: Option<usize>,
    volume: Option<usize>,
    last_price: Option<usize>,
    previous_close: Option<usize>,
    change: Option<usize>,
    trade_count: Option<usize>,
    turnover_value: Option<usize>,
}

impl ColumnMap {
    /// Column index of a field.
    #[must_use]
    pub const fn get(&self, field: Field) -> Option<usize> {
        match field {
            Field::Date => self.date,
            Field::Symbol => self.symbol,
            Field::Open => self.open,
            Field::High => self.high,
            Field::Low => self.low,
            Field::Close => self.close,
            Field::Volume => self.volume,
            Field::LastPrice => self.last_price,
            Field::PreviousClose => self.previous_close,
            Field::Change => self.change,
            Field::TradeCount => self.trade_count,
            Field::TurnoverValue => self.turnover_value,
        }
    }

    /// Assign a column index to a field.
    pub const fn set(&mut self, field: Field, index: usize) {
        let slot = match field {
            Field::Date => &mut self.date,
            Field::Symbol => &mut self.symbol,
            Field::Open => &mut self.open,
            Field::High => &mut self.high,
            Field::Low => &mut self.low,
            Field::Close => &mut self.close,
            Field::Volume => &mut self.volume,
            Field::LastPrice => &mut self.last_price,
            Field::PreviousClose => &mut self.previous_close,
            Field::Change => &mut self.change,
            Field::TradeCount => &mut self.trade_count,
            Field::TurnoverValue => &mut self.turnover_value,
        };
        *slot = Some(index);
    }

    /// True when every field in `fields` has a column.
    #[must_use]
    pub fn has_all(&self, fields: &[Field]) -> bool {
        fields.iter().all(|f| self.get(*f).is_some())
    }

    /// Highest column index among `fields`, if all are present.
    #[must_use]
    pub fn max_index(&self, fields: &[Field]) -> Option<usize> {
        fields.iter().map(|f| self.get(*f)).collect::<Option<Vec<_>>>()?.into_iter().max()
    }
}

/// Map header cells to fields using the layout's keyword rules.
///
/// Each cell takes the first rule it matches. When several cells match the
/// same field, the rightmost one wins.
#[must_use]
pub fn detect_columns(header: &[String], layout: Layout) -> ColumnMap {
    let mut map = ColumnMap::default();

    for (index, cell) in header.iter().enumerate() {
        let matched = layout.rules().iter().find(|r| {
            r.any.iter().any(|k| contains_ci(cell, k)) && !r.none.iter().any(|k| contains_ci(cell, k))
        });
        if let Some(rule) = matched {
            map.set(rule.field, index);
        }
    }

    map
}

// =============================================================================
// Schema Location
// =============================================================================

/// Column map plus the row index where data begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    /// Field positions.
    pub columns: ColumnMap,
    /// First data row.
    pub data_start: usize,
    /// True when the fixed positional layout was assumed.
    pub positional: bool,
}

/// Find the header row, or fall back to the positional layout.
///
/// History tables fall back to the first row with more than eleven cells;
/// live tables to the row after the first. Returns `None` if neither works.
#[must_use]
pub fn locate_schema(rows: &[Vec<String>], layout: Layout) -> Option<Schema> {
    let min_cells = match layout {
        Layout::History => MIN_HISTORY_HEADER_CELLS,
        Layout::Latest => 1,
    };

    let header = rows
        .iter()
        .enumerate()
        .take(HEADER_LOOKAHEAD)
        .filter(|(_, cells)| cells.len() >= min_cells)
        .map(|(i, cells)| (i, detect_columns(cells, layout)))
        .find(|(_, map)| map.has_all(layout.required()));

    if let Some((index, columns)) = header {
        return Some(Schema {
            columns,
            data_start: index + 1,
            positional: false,
        });
    }

    let data_start = match layout {
        Layout::History => rows
            .iter()
            .take(HEADER_LOOKAHEAD)
            .position(|cells| cells.len() > MIN_HISTORY_POSITIONAL_CELLS)?,
        Layout::Latest if rows.len() > 1 => 1,
        Layout::Latest => return None,
    };

    tracing::debug!(%layout, data_start, "no header row recognised, using fixed column positions");
    Some(Schema {
        columns: layout.positional(),
        data_start,
        positional: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| (*c).to_string()).collect()
    }

    #[test]
    fn history_header_example() {
        let header = row(&["DATE", "OPEN", "HIGH", "LOW", "CLOSE", "VOLUME"]);

        let map = detect_columns(&header, Layout::History);

        assert_eq!(map.get(Field::Date), Some(0));
        assert_eq!(map.get(Field::Open), Some(1));
        assert_eq!(map.get(Field::High), Some(2));
        assert_eq!(map.get(Field::Low), Some(3));
        assert_eq!(map.get(Field::Close), Some(4));
        assert_eq!(map.get(Field::Volume), Some(5));
    }

    #[test]
    fn closep_overrides_ltp_and_ycp_is_not_close() {
        let header = row(&["#", "DATE", "TRADING CODE", "LTP*", "HIGH", "LOW", "OPENP*", "CLOSEP*", "YCP", "TRADE", "VALUE (mn)", "VOLUME"]);

        let map = detect_columns(&header, Layout::History);

        assert_eq!(map.get(Field::Close), Some(7));
        assert_eq!(map.get(Field::TradeCount), Some(9));
        assert_eq!(map.get(Field::TurnoverValue), Some(10));
        assert_eq!(map.get(Field::Volume), Some(11));
        assert_eq!(map.get(Field::Symbol), None);
    }

    #[test]
    fn latest_header_distinguishes_close_and_previous_close() {
        let header = row(&["#", "TRADING CODE", "LTP*", "HIGH", "LOW", "CLOSEP*", "YCP*", "CHANGE", "TRADE", "VALUE (mn)", "VOLUME"]);

        let map = detect_columns(&header, Layout::Latest);

        assert_eq!(map, Layout::Latest.positional());
    }

    #[test]
    fn header_found_below_noise_rows() {
        let rows = vec![
            row(&["Archive"]),
            row(&["a", "b", "c"]),
            row(&["DATE", "OPEN", "HIGH", "LOW", "CLOSE", "VOLUME"]),
            row(&["2024-01-15", "1", "1", "1", "1", "1"]),
        ];

        let schema = locate_schema(&rows, Layout::History).unwrap();

        assert!(!schema.positional);
        assert_eq!(schema.data_start, 3);
    }

    #[test]
    fn history_positional_fallback_starts_at_wide_row() {
        let narrow = row(&["x", "y"]);
        let wide = row(&["1", "2024-01-15", "GP", "1", "2", "1", "1", "2", "1", "5", "0.1", "100"]);
        let rows = vec![narrow, wide];

        let schema = locate_schema(&rows, Layout::History).unwrap();

        assert!(schema.positional);
        assert_eq!(schema.data_start, 1);
        assert_eq!(schema.columns.get(Field::Volume), Some(11));
    }

    #[test]
    fn history_without_header_or_wide_rows_has_no_schema() {
        let rows = vec![row(&["a", "b"]), row(&["c", "d"])];
        assert!(locate_schema(&rows, Layout::History).is_none());
    }

    #[test]
    fn latest_positional_fallback_skips_first_row() {
        let rows = vec![row(&["?", "?"]), row(&["1", "GP", "300"])];

        let schema = locate_schema(&rows, Layout::Latest).unwrap();

        assert!(schema.positional);
        assert_eq!(schema.data_start, 1);
    }

    #[test]
    fn max_index_requires_all_fields() {
        let map = Layout::History.positional();
        assert_eq!(map.max_index(Layout::History.required()), Some(11));
        assert_eq!(ColumnMap::default().max_index(&[Field::Date]), None);
    }
}
