//! CSV Seed and Export Adapters
//!
//! Per-symbol files named `{dir}/{SYMBOL}.csv`.
//!
//! Seed rows come in two layouts, detected per row:
//!
//! - `Ticker,Date,Open,High,Low,Close,Volume`
//! - `Date,Open,High,Low,Close,Volume`
//!
//! Rows whose first field is `Date`, `Ticker` or `Trading_Code` are headers
//! and skipped, as are rows that are not UTF-8 or do not parse. Exports always
//! use the second layout with a header row.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::application::ports::{SeedError, SeedSource, SeriesExporter};
use crate::domain::market_data::{Bar, normalize_symbol};
use crate::domain::scrape::builders::{parse_count, parse_date, parse_decimal};

/// Header row written to every export.
pub const EXPORT_HEADER: [&str; 6] = ["Date", "Open", "High", "Low", "Close", "Volume"];

const HEADER_TOKENS: [&str; 3] = ["date", "ticker", "trading_code"];

fn symbol_file(dir: &Path, symbol: &str) -> PathBuf {
    dir.join(format!("{}.csv", normalize_symbol(symbol)))
}

// =============================================================================
// Seed Reader
// =============================================================================

/// Reads seed history from a directory of CSV files.
#[derive(Debug, Clone, Default)]
pub struct CsvSeedSource {
    dir: Option<PathBuf>,
}

impl CsvSeedSource {
    /// Create a reader over `dir`. `None` disables seeding.
    #[must_use]
    pub const fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }
}

impl SeedSource for CsvSeedSource {
    fn load(&self, symbol: &str) -> Result<Vec<Bar>, SeedError> {
        let dir = self.dir.as_deref().ok_or(SeedError::NotConfigured)?;
        let path = symbol_file(dir, symbol);
        if !path.is_file() {
            return Err(SeedError::NotFound { path });
        }

        let file = File::open(&path).map_err(|source| SeedError::Io {
            path: path.clone(),
            source,
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut bars = Vec::new();
        let mut skipped = 0usize;
        for record in reader.byte_records() {
            let record = match record {
                Ok(record) => record,
                Err(e) if e.is_io_error() => {
                    return Err(SeedError::Csv {
                        path: path.clone(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "unreadable seed row");
                    skipped += 1;
                    continue;
                }
            };
            let Ok(fields) = record
                .iter()
                .map(std::str::from_utf8)
                .collect::<Result<Vec<&str>, _>>()
            else {
                skipped += 1;
                continue;
            };
            match seed_row(&fields) {
                SeedRow::Bar(bar) => bars.push(bar),
                SeedRow::Header | SeedRow::Blank => {}
                SeedRow::Malformed => skipped += 1,
            }
        }

        bars.sort_by_key(|b| b.date);

        tracing::debug!(
            symbol,
            path = %path.display(),
            bars = bars.len(),
            skipped,
            "seed loaded"
        );
        Ok(bars)
    }
}

#[derive(Debug)]
enum SeedRow {
    Bar(Bar),
    Header,
    Blank,
    Malformed,
}

/// A leading `YYYY-MM-DD` token marks the date-first layout.
fn starts_with_date(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() >= 10 && bytes[4] == b'-' && bytes[7] == b'-'
}

fn seed_row(fields: &[&str]) -> SeedRow {
    let Some(first) = fields.first() else {
        return SeedRow::Blank;
    };
    if first.is_empty() && fields.len() == 1 {
        return SeedRow::Blank;
    }
    if HEADER_TOKENS.iter().any(|h| first.eq_ignore_ascii_case(h)) {
        return SeedRow::Header;
    }

    let values = if starts_with_date(first) {
        fields
    } else {
        &fields[1..]
    };
    if values.len() < 6 || values[0].len() < 10 {
        return SeedRow::Malformed;
    }

    let Some(date) = parse_date(values[0]) else {
        return SeedRow::Malformed;
    };

    SeedRow::Bar(Bar::new(
        date,
        parse_decimal(values[1]),
        parse_decimal(values[2]),
        parse_decimal(values[3]),
        parse_decimal(values[4]),
        parse_count(values[5]),
    ))
}

// =============================================================================
// Exporter
// =============================================================================

/// Writes merged series as CSV files into a directory.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    dir: PathBuf,
}

impl CsvExporter {
    /// Create an exporter writing into `dir`.
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Target directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SeriesExporter for CsvExporter {
    fn export(&self, symbol: &str, bars: &[Bar]) -> Result<PathBuf, SeedError> {
        fs::create_dir_all(&self.dir).map_err(|source| SeedError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = symbol_file(&self.dir, symbol);
        let csv_error = |e: csv::Error| SeedError::Csv {
            path: path.clone(),
            message: e.to_string(),
        };

        let mut writer = csv::Writer::from_path(&path).map_err(csv_error)?;
        writer.write_record(EXPORT_HEADER).map_err(csv_error)?;
        for bar in bars {
            writer
                .write_record([
                    bar.date.format("%Y-%m-%d").to_string(),
                    format!("{:.2}", bar.open.round_dp(2)),
                    format!("{:.2}", bar.high.round_dp(2)),
                    format!("{:.2}", bar.low.round_dp(2)),
                    format!("{:.2}", bar.close.round_dp(2)),
                    bar.volume.to_string(),
                ])
                .map_err(csv_error)?;
        }
        writer.flush().map_err(|source| SeedError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(symbol, path = %path.display(), rows = bars.len(), "series exported");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn unconfigured_seed_is_an_error() {
        let source = CsvSeedSource::new(None);
        assert!(matches!(source.load("GP"), Err(SeedError::NotConfigured)));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvSeedSource::new(Some(dir.path().to_path_buf()));
        let err = source.load("GP").unwrap_err();
        assert!(matches!(err, SeedError::NotFound { path } if path.ends_with("GP.csv")));
    }

    #[test]
    fn reads_both_layouts_and_skips_headers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("GP.csv"),
            "Trading_Code,Date,Open,High,Low,Close,Volume\n\
             GP,2024-01-03,300,305,298,302,1500\n\
             Date,Open,High,Low,Close,Volume\n\
             2024-01-02, 299.5 ,301,297,300,\"1,200\"\n\
             \n\
             GP,bad\n",
        )
        .unwrap();

        let source = CsvSeedSource::new(Some(dir.path().to_path_buf()));
        let bars = source.load("gp").unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, date(2024, 1, 2));
        assert_eq!(bars[0].open, dec!(299.5));
        assert_eq!(bars[0].volume, 1200);
        assert_eq!(bars[1].date, date(2024, 1, 3));
        assert_eq!(bars[1].close, dec!(302));
        assert!(bars.iter().all(|b| b.valid));
    }

    #[test]
    fn non_utf8_row_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut contents = b"Date,Open,High,Low,Close,Volume\n2024-01-02,10,11,9,10.5,100\n".to_vec();
        contents.extend_from_slice(b"2024-01-03,10,11,9,10.5,\xff\xfe\n");
        contents.extend_from_slice(b"2024-01-04,10.5,12,10,11,300\n");
        fs::write(dir.path().join("GP.csv"), contents).unwrap();

        let bars = CsvSeedSource::new(Some(dir.path().to_path_buf()))
            .load("GP")
            .unwrap();

        let dates: Vec<NaiveDate> = bars.iter().map(|b| b.date).collect();
        assert_eq!(dates, vec![date(2024, 1, 2), date(2024, 1, 4)]);
    }

    #[test]
    fn invalid_rows_are_kept_but_flagged() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("ACI.csv"),
            "2024-01-02,0,0,0,0,0\n2024-01-03,10,9,11,10,5\n",
        )
        .unwrap();

        let bars = CsvSeedSource::new(Some(dir.path().to_path_buf()))
            .load("ACI")
            .unwrap();

        assert_eq!(bars.len(), 2);
        assert!(bars.iter().all(|b| !b.valid));
    }

    #[test]
    fn export_writes_header_and_rounded_rows() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let exporter = CsvExporter::new(out.clone());

        let bars = vec![
            Bar::new(date(2024, 1, 2), dec!(10), dec!(10.555), dec!(9.1), dec!(10.2), 1500),
            Bar::new(date(2024, 1, 3), dec!(10.2), dec!(11), dec!(10), dec!(10.75), 0),
        ];

        let path = exporter.export("gp", &bars).unwrap();
        assert_eq!(path, out.join("GP.csv"));

        let written = fs::read_to_string(path).unwrap();
        assert_eq!(
            written,
            "Date,Open,High,Low,Close,Volume\n\
             2024-01-02,10.00,10.56,9.10,10.20,1500\n\
             2024-01-03,10.20,11.00,10.00,10.75,0\n"
        );
    }

    #[test]
    fn exported_file_reads_back_as_seed() {
        let dir = tempfile::tempdir().unwrap();
        let bars = vec![Bar::new(
            date(2023, 6, 1),
            dec!(50),
            dec!(52),
            dec!(49),
            dec!(51.5),
            9000,
        )];

        CsvExporter::new(dir.path().to_path_buf())
            .export("SQURPHARMA", &bars)
            .unwrap();
        let read = CsvSeedSource::new(Some(dir.path().to_path_buf()))
            .load("SQURPHARMA")
            .unwrap();

        assert_eq!(read, bars);
    }
}
