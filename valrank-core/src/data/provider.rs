//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over data sources (Yahoo Finance, CSV
//! exports, synthetic data) so the sync pipeline can swap implementations and
//! tests can mock them. Providers deliver rows as the source shaped them;
//! numeric coercion happens once, in [`super::coerce`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{CodeError, FieldSet, SecurityCode, SeriesError};

/// A field value before coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawField {
    Missing,
    Number(f64),
    Text(String),
}

impl From<Option<f64>> for RawField {
    fn from(v: Option<f64>) -> Self {
        v.map_or(RawField::Missing, RawField::Number)
    }
}

impl From<&str> for RawField {
    fn from(s: &str) -> Self {
        RawField::Text(s.to_string())
    }
}

/// One daily row from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub date: NaiveDate,
    pub close: RawField,
    pub pe_ttm: RawField,
    pub pb_mrq: RawField,
}

/// Structured error types for data operations.
///
/// These are designed to be displayable in CLI output.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("security not found: {code}")]
    SymbolNotFound { code: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("operation cancelled")]
    Cancelled,

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("no cached data for '{code}'; run `fetch {code}` first")]
    NoCachedData { code: String },

    #[error(transparent)]
    Code(#[from] CodeError),

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error("data error: {0}")]
    Other(String),
}

/// Result of a successful data fetch for a single security.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub code: SecurityCode,
    /// Display name, when the source reports one.
    pub name: Option<String>,
    pub rows: Vec<RawRow>,
    /// Valuation columns the source schema carries.
    pub fields: FieldSet,
    pub source: DataSource,
}

/// Where the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    YahooFinance,
    CsvImport,
    Cache,
    Synthetic,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::YahooFinance => "yahoo_finance",
            Self::CsvImport => "csv_import",
            Self::Cache => "cache",
            Self::Synthetic => "synthetic",
        };
        f.write_str(s)
    }
}

/// Cooperative cancellation flag shared between a caller and a running fetch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(DataError::Cancelled)` once cancelled.
    pub fn check(&self) -> Result<(), DataError> {
        if self.is_cancelled() {
            Err(DataError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trait for data providers (Yahoo Finance, CSV import, etc).
///
/// Implementations handle the specifics of fetching data from a particular
/// source. The cache layer sits above this trait; providers don't know about
/// the cache.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily rows for a security over an inclusive date range.
    ///
    /// Long-running implementations poll `cancel` between requests.
    fn fetch(
        &self,
        code: &SecurityCode,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancelToken,
    ) -> Result<FetchResult, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Pipeline stages reported to a [`SyncProgress`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStage {
    CheckingCache,
    UsingCache { rows: usize },
    Fetching { start: NaiveDate, end: NaiveDate },
    Received { rows: usize },
    Saving,
    Loading,
    Done { rows: usize },
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckingCache => write!(f, "checking local cache"),
            Self::UsingCache { rows } => write!(f, "using cached data ({rows} rows)"),
            Self::Fetching { start, end } => write!(f, "downloading {start} to {end}"),
            Self::Received { rows } => write!(f, "received {rows} rows"),
            Self::Saving => write!(f, "saving to cache"),
            Self::Loading => write!(f, "loading full history"),
            Self::Done { rows } => write!(f, "done ({rows} rows)"),
        }
    }
}

impl SyncStage {
    /// Rough completion percentage for progress bars.
    pub fn percent(&self) -> u8 {
        match self {
            Self::CheckingCache => 5,
            Self::Fetching { .. } => 20,
            Self::Received { .. } => 70,
            Self::Saving => 85,
            Self::Loading => 95,
            Self::UsingCache { .. } | Self::Done { .. } => 100,
        }
    }
}

/// Progress callback for sync operations.
pub trait SyncProgress: Send + Sync {
    fn on_stage(&self, code: &str, stage: &SyncStage);
}

/// Progress reporter that logs each stage through `tracing`.
pub struct TracingProgress;

impl SyncProgress for TracingProgress {
    fn on_stage(&self, code: &str, stage: &SyncStage) {
        tracing::info!(code, percent = stage.percent(), "{stage}");
    }
}

/// Progress reporter that discards everything.
pub struct NoProgress;

impl SyncProgress for NoProgress {
    fn on_stage(&self, _code: &str, _stage: &SyncStage) {}
}
