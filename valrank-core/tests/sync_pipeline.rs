//! Integration tests for the fetch → cache → load pipeline.
//!
//! A scripted in-memory provider stands in for the network so every path is
//! deterministic: cache hits, incremental fetches, alternative-exchange
//! retries, stale fallbacks and offline mode.

use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use valrank_core::data::{
    CancelToken, DataError, DataProvider, DataSource, FetchResult, Freshness, NoProgress, RawField,
    RawRow, SyncPipeline, SyncProgress, SyncRequest, SyncSource, SyncStage, SyntheticProvider,
};
use valrank_core::domain::{FieldSet, MetricSelector, SecurityCode};
use valrank_core::percentile::compute_trailing;

// ── Helpers ──────────────────────────────────────────────────────────

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn daily_rows(start: NaiveDate, days: i64) -> Vec<RawRow> {
    (0..days)
        .map(|i| RawRow {
            date: start + Duration::days(i),
            close: RawField::Number(10.0 + i as f64),
            pe_ttm: RawField::from(format!("{}", 8.0 + (i % 7) as f64).as_str()),
            pb_mrq: RawField::Number(1.0 + i as f64 / 100.0),
        })
        .collect()
}

type CallLog = Arc<Mutex<Vec<(String, NaiveDate, NaiveDate)>>>;

#[derive(Clone)]
struct ScriptedProvider {
    listings: Arc<HashMap<String, Vec<RawRow>>>,
    calls: CallLog,
    available: Arc<AtomicBool>,
    /// Fail every fetch with a network error.
    failing: Arc<AtomicBool>,
    /// Trip the caller's cancel token after the rows are produced.
    cancel_during_fetch: Arc<AtomicBool>,
}

impl ScriptedProvider {
    fn new(listings: &[(&str, Vec<RawRow>)]) -> Self {
        Self {
            listings: Arc::new(
                listings
                    .iter()
                    .map(|(code, rows)| (code.to_string(), rows.clone()))
                    .collect(),
            ),
            calls: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
            failing: Arc::default(),
            cancel_during_fetch: Arc::default(),
        }
    }

    fn calls(&self) -> Vec<(String, NaiveDate, NaiveDate)> {
        self.calls.lock().unwrap().clone()
    }
}

impl DataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(
        &self,
        code: &SecurityCode,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancelToken,
    ) -> Result<FetchResult, DataError> {
        cancel.check()?;
        self.calls
            .lock()
            .unwrap()
            .push((code.to_string(), start, end));
        if self.failing.load(Ordering::SeqCst) {
            return Err(DataError::NetworkUnreachable("connection reset".into()));
        }
        if self.cancel_during_fetch.load(Ordering::SeqCst) {
            cancel.cancel();
        }
        let rows = self
            .listings
            .get(code.as_str())
            .ok_or_else(|| DataError::SymbolNotFound {
                code: code.to_string(),
            })?;
        Ok(FetchResult {
            code: code.clone(),
            name: Some(format!("Listing {}", code.bare())),
            rows: rows
                .iter()
                .filter(|r| r.date >= start && r.date <= end)
                .cloned()
                .collect(),
            fields: FieldSet::ALL,
            source: DataSource::CsvImport,
        })
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RecordingProgress(Mutex<Vec<SyncStage>>);

impl SyncProgress for RecordingProgress {
    fn on_stage(&self, _code: &str, stage: &SyncStage) {
        self.0.lock().unwrap().push(stage.clone());
    }
}

fn request(start: NaiveDate, end: NaiveDate) -> SyncRequest {
    SyncRequest {
        start,
        end,
        force: false,
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[test]
fn first_sync_fetches_and_caches() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[("sh.600519", daily_rows(d(2024, 1, 1), 31))]);
    let pipeline = SyncPipeline::new(dir.path(), Box::new(provider.clone())).with_today(d(2024, 1, 31));
    let progress = RecordingProgress::default();

    let outcome = pipeline
        .sync("600519", request(d(2024, 1, 1), d(2024, 1, 31)), &progress, &CancelToken::new())
        .unwrap();

    assert_eq!(outcome.code.as_str(), "sh.600519");
    assert_eq!(outcome.series.len(), 31);
    assert_eq!(outcome.name.as_deref(), Some("Listing 600519"));
    assert_eq!(
        outcome.source,
        SyncSource::Fetched {
            source: DataSource::CsvImport,
            rows: 31
        }
    );
    assert_eq!(outcome.freshness, Freshness::Current);
    assert_eq!(outcome.series.records()[0].pe_ttm, Some(8.0));

    assert_eq!(pipeline.cache().last_date("sh.600519"), Some(d(2024, 1, 31)));
    assert_eq!(pipeline.registry().list().len(), 1);

    let stages = progress.0.lock().unwrap();
    assert_eq!(stages.first(), Some(&SyncStage::CheckingCache));
    assert!(stages.contains(&SyncStage::Saving));
    assert_eq!(stages.last(), Some(&SyncStage::Done { rows: 31 }));
}

#[test]
fn covered_range_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[("sh.600519", daily_rows(d(2024, 1, 1), 31))]);
    let pipeline = SyncPipeline::new(dir.path(), Box::new(provider.clone()));
    let cancel = CancelToken::new();

    pipeline
        .sync("sh.600519", request(d(2024, 1, 1), d(2024, 1, 31)), &NoProgress, &cancel)
        .unwrap();
    let again = pipeline
        .sync("sh.600519", request(d(2024, 1, 10), d(2024, 1, 20)), &NoProgress, &cancel)
        .unwrap();

    assert_eq!(again.source, SyncSource::Cache);
    assert_eq!(again.series.len(), 11);
    assert_eq!(provider.calls().len(), 1);
}

#[test]
fn later_end_fetches_only_the_missing_tail() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[("sh.600519", daily_rows(d(2024, 1, 1), 60))]);
    let pipeline = SyncPipeline::new(dir.path(), Box::new(provider.clone()));
    let cancel = CancelToken::new();

    pipeline
        .sync("sh.600519", request(d(2024, 1, 1), d(2024, 1, 31)), &NoProgress, &cancel)
        .unwrap();
    let outcome = pipeline
        .sync("sh.600519", request(d(2024, 1, 1), d(2024, 2, 29)), &NoProgress, &cancel)
        .unwrap();

    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1, d(2024, 2, 1));
    assert_eq!(outcome.series.len(), 60);
    assert_eq!(
        outcome.source,
        SyncSource::Fetched {
            source: DataSource::CsvImport,
            rows: 29
        }
    );
}

#[test]
fn force_refetches_whole_range() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[("sh.600519", daily_rows(d(2024, 1, 1), 31))]);
    let pipeline = SyncPipeline::new(dir.path(), Box::new(provider.clone()));
    let cancel = CancelToken::new();
    let mut req = request(d(2024, 1, 1), d(2024, 1, 31));

    pipeline.sync("sh.600519", req, &NoProgress, &cancel).unwrap();
    req.force = true;
    pipeline.sync("sh.600519", req, &NoProgress, &cancel).unwrap();

    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1, d(2024, 1, 1));
}

#[test]
fn bare_code_retries_other_exchange() {
    let dir = tempfile::tempdir().unwrap();
    // 600000 infers Shanghai, but only a Shenzhen listing exists
    let provider = ScriptedProvider::new(&[("sz.600000", daily_rows(d(2024, 1, 1), 5))]);
    let pipeline = SyncPipeline::new(dir.path(), Box::new(provider.clone()));

    let outcome = pipeline
        .sync("600000", request(d(2024, 1, 1), d(2024, 1, 5)), &NoProgress, &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.code.as_str(), "sz.600000");
    let tried: Vec<_> = provider.calls().into_iter().map(|c| c.0).collect();
    assert_eq!(tried, vec!["sh.600000", "sz.600000"]);

    // the next bare lookup goes straight to the cached listing
    let again = pipeline
        .sync("600000", request(d(2024, 1, 1), d(2024, 1, 5)), &NoProgress, &CancelToken::new())
        .unwrap();
    assert_eq!(again.code.as_str(), "sz.600000");
    assert_eq!(again.source, SyncSource::Cache);
}

#[test]
fn qualified_code_does_not_retry() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[("sz.600000", daily_rows(d(2024, 1, 1), 5))]);
    let pipeline = SyncPipeline::new(dir.path(), Box::new(provider.clone()));

    let err = pipeline
        .sync("sh.600000", request(d(2024, 1, 1), d(2024, 1, 5)), &NoProgress, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, DataError::SymbolNotFound { .. }));
    assert_eq!(provider.calls().len(), 1);
}

#[test]
fn unavailable_provider_serves_stale_cache() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[("sh.600519", daily_rows(d(2024, 1, 1), 40))]);
    let pipeline =
        SyncPipeline::new(dir.path(), Box::new(provider.clone())).with_today(d(2024, 2, 9));
    let cancel = CancelToken::new();

    pipeline
        .sync("sh.600519", request(d(2024, 1, 1), d(2024, 1, 31)), &NoProgress, &cancel)
        .unwrap();
    provider.available.store(false, Ordering::SeqCst);

    // 2024-02-09 is a Friday
    let outcome = pipeline
        .sync("sh.600519", request(d(2024, 1, 1), d(2024, 2, 9)), &NoProgress, &cancel)
        .unwrap();
    assert!(matches!(outcome.source, SyncSource::StaleCache { .. }));
    assert_eq!(
        outcome.freshness,
        Freshness::StaleTradingDay {
            latest: d(2024, 1, 31)
        }
    );
    assert_eq!(provider.calls().len(), 1);

    let err = pipeline
        .sync("sz.000001", request(d(2024, 1, 1), d(2024, 1, 31)), &NoProgress, &cancel)
        .unwrap_err();
    assert!(matches!(err, DataError::Other(_)));
}

#[test]
fn offline_reads_cache_only() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[("sh.600519", daily_rows(d(2024, 1, 1), 10))]);
    SyncPipeline::new(dir.path(), Box::new(provider))
        .sync("sh.600519", request(d(2024, 1, 1), d(2024, 1, 10)), &NoProgress, &CancelToken::new())
        .unwrap();

    let offline = SyncPipeline::offline(dir.path()).with_today(d(2024, 1, 13));
    assert!(offline.is_offline());
    let outcome = offline
        .sync("sh.600519", request(d(2024, 1, 1), d(2024, 1, 31)), &NoProgress, &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.series.len(), 10);
    assert_eq!(outcome.source, SyncSource::Cache);
    // 2024-01-13 is a Saturday
    assert_eq!(
        outcome.freshness,
        Freshness::StaleNonTradingDay {
            latest: d(2024, 1, 10)
        }
    );

    let err = offline
        .sync("sz.000001", request(d(2024, 1, 1), d(2024, 1, 31)), &NoProgress, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, DataError::NoCachedData { .. }));
}

#[test]
fn cancelled_sync_stops_before_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[("sh.600519", daily_rows(d(2024, 1, 1), 10))]);
    let pipeline = SyncPipeline::new(dir.path(), Box::new(provider.clone()));
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = pipeline
        .sync("sh.600519", request(d(2024, 1, 1), d(2024, 1, 10)), &NoProgress, &cancel)
        .unwrap_err();
    assert!(matches!(err, DataError::Cancelled));
    assert!(provider.calls().is_empty());
    assert!(pipeline.cache().meta("sh.600519").is_none());
}

#[test]
fn cancel_after_provider_returns_leaves_cache_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[("sh.600519", daily_rows(d(2024, 1, 1), 10))]);
    provider.cancel_during_fetch.store(true, Ordering::SeqCst);
    let pipeline = SyncPipeline::new(dir.path(), Box::new(provider.clone()));
    let cancel = CancelToken::new();

    let err = pipeline
        .sync("sh.600519", request(d(2024, 1, 1), d(2024, 1, 10)), &NoProgress, &cancel)
        .unwrap_err();
    assert!(matches!(err, DataError::Cancelled));
    assert!(cancel.is_cancelled());
    assert_eq!(provider.calls().len(), 1);
    assert!(pipeline.cache().meta("sh.600519").is_none());
    assert!(pipeline.registry().list().is_empty());
}

#[test]
fn cancel_during_incremental_fetch_keeps_existing_cache() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[("sh.600519", daily_rows(d(2024, 1, 1), 40))]);
    let pipeline = SyncPipeline::new(dir.path(), Box::new(provider.clone()));
    pipeline
        .sync("sh.600519", request(d(2024, 1, 1), d(2024, 1, 20)), &NoProgress, &CancelToken::new())
        .unwrap();

    provider.cancel_during_fetch.store(true, Ordering::SeqCst);
    let err = pipeline
        .sync("sh.600519", request(d(2024, 1, 1), d(2024, 2, 9)), &NoProgress, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, DataError::Cancelled));
    let meta = pipeline.cache().meta("sh.600519").unwrap();
    assert_eq!(meta.end_date, d(2024, 1, 20));
    assert_eq!(meta.row_count, 20);
}

#[test]
fn forced_refetch_failure_serves_stale_cache() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(&[("sh.600519", daily_rows(d(2024, 1, 1), 31))]);
    let pipeline =
        SyncPipeline::new(dir.path(), Box::new(provider.clone())).with_today(d(2024, 1, 31));
    let cancel = CancelToken::new();
    let mut req = request(d(2024, 1, 1), d(2024, 1, 31));
    pipeline.sync("sh.600519", req, &NoProgress, &cancel).unwrap();

    provider.failing.store(true, Ordering::SeqCst);
    req.force = true;
    let outcome = pipeline.sync("sh.600519", req, &NoProgress, &cancel).unwrap();
    assert!(matches!(outcome.source, SyncSource::StaleCache { .. }));
    assert_eq!(outcome.series.len(), 31);
    assert_eq!(provider.calls().len(), 2);

    // unavailable provider with a forced request falls back the same way
    provider.failing.store(false, Ordering::SeqCst);
    provider.available.store(false, Ordering::SeqCst);
    let outcome = pipeline.sync("sh.600519", req, &NoProgress, &cancel).unwrap();
    assert!(matches!(outcome.source, SyncSource::StaleCache { .. }));
}

#[test]
fn synthetic_data_flows_into_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = SyncPipeline::new(dir.path(), Box::new(SyntheticProvider));

    let outcome = pipeline
        .sync("000001", request(d(2022, 1, 1), d(2023, 12, 31)), &NoProgress, &CancelToken::new())
        .unwrap();
    assert_eq!(outcome.code.as_str(), "sz.000001");
    assert!(outcome.series.len() > 500);

    let ranked = compute_trailing(&outcome.series, MetricSelector::Pb, Some(365));
    assert!(!ranked.is_price_fallback());
    assert!(ranked.ranked_count() > 200);
    assert!(ranked
        .records()
        .iter()
        .filter_map(|r| r.percentile)
        .all(|p| (0.0..=100.0).contains(&p)));
}
