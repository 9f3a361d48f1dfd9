//! History and Export Integration Tests
//!
//! Seed files on disk, a canned archive page, the merged cache, and the CSV
//! export written back out.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use dse_feed::application::ports::{
    Clock, FixedClock, HttpTransport, SeriesExporter, TransportError,
};
use dse_feed::infrastructure::seed::{CsvExporter, CsvSeedSource};
use dse_feed::{BackfillEvent, EngineAdapters, EngineConfig, FeedEngine, FeedError};

const ARCHIVE_PAGE: &str = r#"
    <table class="table shares-table">
      <tr><th>#</th><th>DATE</th><th>TRADING CODE</th><th>LTP*</th><th>HIGH</th><th>LOW</th>
          <th>OPENP*</th><th>CLOSEP*</th><th>YCP</th><th>TRADE</th><th>VALUE (mn)</th><th>VOLUME</th></tr>
      <tr><td>1</td><td>2024-01-03</td><td>GP</td><td>305</td><td>306</td><td>301</td>
          <td>302</td><td>305</td><td>300</td><td>10</td><td>1.2</td><td>4,000</td></tr>
      <tr><td>2</td><td>2024-01-02</td><td>GP</td><td>300</td><td>301</td><td>299</td>
          <td>299</td><td>300</td><td>298</td><td>8</td><td>0.9</td><td>3,000</td></tr>
    </table>"#;

const GP_SEED: &str = "\
Ticker,Date,Open,High,Low,Close,Volume
GP,2024-01-01,295,297,294,296,2000
GP,2024-01-02,290,292,289,290,2500
";

#[derive(Debug)]
struct ArchiveTransport;

#[async_trait]
impl HttpTransport for ArchiveTransport {
    async fn get(&self, url: &str) -> Result<String, TransportError> {
        if url.contains("inst=GP") {
            Ok(ARCHIVE_PAGE.to_string())
        } else {
            Err(TransportError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn engine(seed_dir: &Path, export_dir: Option<&Path>, prefer_web: bool) -> FeedEngine {
    let mut config = EngineConfig::default();
    config.data_source.prefer_web_data = prefer_web;
    config.data_source.seed_dir = Some(seed_dir.to_path_buf());
    config.export.dir = export_dir.map(Path::to_path_buf);

    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(
        date(2024, 1, 4).and_hms_opt(16, 0, 0).unwrap(),
    ));
    let exporter = export_dir
        .map(|dir| Arc::new(CsvExporter::new(dir.to_path_buf())) as Arc<dyn SeriesExporter>);

    FeedEngine::new(
        config,
        EngineAdapters {
            transport: Arc::new(ArchiveTransport),
            seed: Arc::new(CsvSeedSource::new(Some(seed_dir.to_path_buf()))),
            exporter,
            clock,
        },
    )
}

fn write_seed(dir: &Path) {
    fs::write(dir.join("GP.csv"), GP_SEED).unwrap();
}

#[tokio::test]
async fn web_bars_override_seed_by_default() {
    let seed = tempfile::tempdir().unwrap();
    write_seed(seed.path());
    let engine = engine(seed.path(), None, true);

    let bars = engine
        .fetch_history("gp", date(2024, 1, 1), date(2024, 1, 3))
        .await
        .unwrap();

    let summary: Vec<(NaiveDate, Decimal)> = bars.iter().map(|b| (b.date, b.close)).collect();
    assert_eq!(
        summary,
        vec![
            (date(2024, 1, 1), Decimal::from(296)),
            (date(2024, 1, 2), Decimal::from(300)),
            (date(2024, 1, 3), Decimal::from(305)),
        ]
    );
    assert!(bars.iter().all(|b| b.valid));
}

#[tokio::test]
async fn seed_bars_win_when_web_not_preferred() {
    let seed = tempfile::tempdir().unwrap();
    write_seed(seed.path());
    let engine = engine(seed.path(), None, false);

    let bars = engine
        .fetch_history("GP", date(2024, 1, 1), date(2024, 1, 3))
        .await
        .unwrap();

    assert_eq!(bars.len(), 3);
    assert_eq!(bars[1].close, Decimal::from(290));
    assert_eq!(bars[2].close, Decimal::from(305));
}

#[tokio::test]
async fn seed_alone_is_enough() {
    let seed = tempfile::tempdir().unwrap();
    fs::write(
        seed.path().join("ACI.csv"),
        "Date,Open,High,Low,Close,Volume\n2023-12-28,50,51,49,50.5,900\n",
    )
    .unwrap();
    let engine = engine(seed.path(), None, true);

    let bars = engine
        .fetch_history("aci", date(2023, 12, 1), date(2024, 1, 4))
        .await
        .unwrap();

    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].volume, 900);
    assert_eq!(engine.cached_bars("ACI").unwrap(), bars);
}

#[tokio::test]
async fn export_writes_cached_series() {
    let seed = tempfile::tempdir().unwrap();
    write_seed(seed.path());
    let out = tempfile::tempdir().unwrap();
    let export_dir = out.path().join("export");
    let engine = engine(seed.path(), Some(&export_dir), true);

    assert_eq!(engine.export_all().unwrap(), 0);

    engine
        .fetch_history("GP", date(2024, 1, 1), date(2024, 1, 3))
        .await
        .unwrap();
    assert_eq!(engine.export_all().unwrap(), 1);

    let written = fs::read_to_string(export_dir.join("GP.csv")).unwrap();
    assert_eq!(
        written,
        "Date,Open,High,Low,Close,Volume\n\
         2024-01-01,295.00,297.00,294.00,296.00,2000\n\
         2024-01-02,299.00,301.00,299.00,300.00,3000\n\
         2024-01-03,302.00,306.00,301.00,305.00,4000\n"
    );
}

#[tokio::test]
async fn export_without_directory_is_rejected() {
    let seed = tempfile::tempdir().unwrap();
    let engine = engine(seed.path(), None, true);

    assert!(matches!(
        engine.export_all(),
        Err(FeedError::ExportNotConfigured)
    ));
}

#[tokio::test]
async fn backfill_completes_in_background() {
    let seed = tempfile::tempdir().unwrap();
    write_seed(seed.path());
    let engine = engine(seed.path(), None, true);

    let mut events = engine.backfill_events();
    assert!(engine.request_backfill("gp"));

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        BackfillEvent::Completed { symbol, bars } => {
            assert_eq!(symbol, "GP");
            assert_eq!(bars, 3);
        }
        BackfillEvent::Failed { error, .. } => panic!("backfill failed: {error}"),
    }
    assert_eq!(engine.cached_bars("GP").unwrap().len(), 3);
}

#[tokio::test]
async fn cache_miss_on_read_starts_backfill() {
    let seed = tempfile::tempdir().unwrap();
    write_seed(seed.path());
    let engine = engine(seed.path(), None, true);

    let mut events = engine.backfill_events();
    assert!(engine.bars_with_live("gp").is_none());

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event,
        BackfillEvent::Completed { ref symbol, bars: 3 } if symbol == "GP"
    ));

    let bars = engine.bars_with_live("GP").unwrap();
    assert_eq!(bars.len(), 3);
    assert_eq!(bars[2].date, date(2024, 1, 3));
}

#[tokio::test]
async fn unknown_symbol_backfill_fails() {
    let seed = tempfile::tempdir().unwrap();
    let engine = engine(seed.path(), None, true);

    let mut events = engine.backfill_events();
    assert!(engine.request_backfill("NOPE"));

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, BackfillEvent::Failed { symbol, .. } if symbol == "NOPE"));
    assert!(engine.cached_bars("NOPE").is_none());
}
