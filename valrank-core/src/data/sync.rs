//! Sync pipeline: cache check → incremental fetch → coerce → cache → load.
//!
//! Policy for a single security:
//! 1. If the cache already reaches the requested end date → use it
//! 2. Otherwise fetch from the day after the last cached date (or the
//!    requested start when nothing is cached) and merge into the cache
//! 3. If the provider is unavailable or the fetch fails but cached data
//!    exists → serve the cache, flagged stale
//! 4. Otherwise → fail with a clear error
//!
//! A pipeline built without a provider is offline: it only ever reads the
//! cache.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use std::path::PathBuf;

use super::cache::ValuationCache;
use super::coerce::rows_to_series;
use super::provider::{
    CancelToken, DataError, DataProvider, DataSource, FetchResult, SyncProgress, SyncStage,
};
use super::registry::SecurityRegistry;
use crate::domain::{SecurityCode, Series};

/// Options for one sync.
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Re-download the whole range even if cached.
    pub force: bool,
}

/// How the returned series was obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncSource {
    /// Served from the cache without touching the provider.
    Cache,
    /// New rows were fetched and merged into the cache.
    Fetched { source: DataSource, rows: usize },
    /// The provider could not be used; cached data served as-is.
    StaleCache { reason: String },
}

/// How recent the latest record is relative to the requested end date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Freshness {
    Current,
    /// Data ends before a weekday that should have quotes.
    StaleTradingDay { latest: NaiveDate },
    /// Data ends before the reference day, which is a weekend.
    StaleNonTradingDay { latest: NaiveDate },
    NoData,
}

impl Freshness {
    /// Compare the latest available date against `reference` (usually today).
    pub fn assess(latest: Option<NaiveDate>, reference: NaiveDate) -> Self {
        match latest {
            None => Self::NoData,
            Some(latest) if latest >= reference => Self::Current,
            Some(latest) if is_trading_weekday(reference) => Self::StaleTradingDay { latest },
            Some(latest) => Self::StaleNonTradingDay { latest },
        }
    }

    /// One-line note for display, `None` when current.
    pub fn note(&self) -> Option<String> {
        match self {
            Self::Current => None,
            Self::StaleTradingDay { latest } => Some(format!(
                "latest data is from {latest}; today's figures may not be published yet"
            )),
            Self::StaleNonTradingDay { latest } => Some(format!(
                "latest data is from {latest} (today is not a trading day)"
            )),
            Self::NoData => Some("no data in the requested range".to_string()),
        }
    }
}

fn is_trading_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Result of a sync.
#[derive(Debug)]
pub struct SyncOutcome {
    /// Code actually used; may be the alternative market for a bare input.
    pub code: SecurityCode,
    pub name: Option<String>,
    /// Cached records within the requested range.
    pub series: Series,
    pub source: SyncSource,
    pub freshness: Freshness,
}

pub struct SyncPipeline {
    cache: ValuationCache,
    registry: SecurityRegistry,
    provider: Option<Box<dyn DataProvider>>,
    today: NaiveDate,
}

impl SyncPipeline {
    pub fn new(cache_dir: impl Into<PathBuf>, provider: Box<dyn DataProvider>) -> Self {
        Self::build(cache_dir.into(), Some(provider))
    }

    /// Cache-only pipeline: never makes network requests.
    pub fn offline(cache_dir: impl Into<PathBuf>) -> Self {
        Self::build(cache_dir.into(), None)
    }

    fn build(cache_dir: PathBuf, provider: Option<Box<dyn DataProvider>>) -> Self {
        Self {
            registry: SecurityRegistry::in_cache_dir(&cache_dir),
            cache: ValuationCache::new(cache_dir),
            provider,
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Override the reference date used for freshness checks.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn cache(&self) -> &ValuationCache {
        &self.cache
    }

    pub fn registry(&self) -> &SecurityRegistry {
        &self.registry
    }

    pub fn is_offline(&self) -> bool {
        self.provider.is_none()
    }

    pub fn sync(
        &self,
        raw_code: &str,
        request: SyncRequest,
        progress: &dyn SyncProgress,
        cancel: &CancelToken,
    ) -> Result<SyncOutcome, DataError> {
        if request.start > request.end {
            return Err(DataError::ValidationError(format!(
                "start date {} is after end date {}",
                request.start, request.end
            )));
        }

        let bare_input = !raw_code.contains('.');
        let mut code = SecurityCode::normalize(raw_code)?;
        // a bare code may already be cached under the other exchange
        if bare_input && self.cache.meta(code.as_str()).is_none() {
            if let Some(alt) = code.alternative() {
                if self.cache.meta(alt.as_str()).is_some() {
                    code = alt;
                }
            }
        }

        progress.on_stage(code.as_str(), &SyncStage::CheckingCache);
        let cached = self.cache.meta(code.as_str());
        let has_cache = cached.is_some();
        let meta = if request.force { None } else { cached };

        let Some(provider) = self.provider.as_deref() else {
            if !has_cache {
                return Err(DataError::NoCachedData {
                    code: code.to_string(),
                });
            }
            return self.finish(code, request, SyncSource::Cache, progress);
        };

        if let Some(meta) = &meta {
            if meta.end_date >= request.end {
                progress.on_stage(
                    code.as_str(),
                    &SyncStage::UsingCache {
                        rows: meta.row_count,
                    },
                );
                return self.finish(code, request, SyncSource::Cache, progress);
            }
        }

        let fetch_start = match &meta {
            Some(m) => m.end_date + Duration::days(1),
            None => request.start,
        };

        if !provider.is_available() {
            let reason = format!("provider '{}' is unavailable", provider.name());
            return self.fall_back(code, request, reason, has_cache, progress);
        }

        cancel.check()?;
        progress.on_stage(
            code.as_str(),
            &SyncStage::Fetching {
                start: fetch_start,
                end: request.end,
            },
        );
        let allow_alternative = bare_input && !has_cache;
        let fetched = match self.fetch_with_alternative(
            provider,
            &code,
            allow_alternative,
            fetch_start,
            request.end,
            cancel,
        ) {
            Ok(result) => result,
            Err(DataError::Cancelled) => return Err(DataError::Cancelled),
            // incremental window with no new quotes (weekend, holiday)
            Err(DataError::SymbolNotFound { .. }) if has_cache => {
                tracing::debug!(code = %code, %fetch_start, "no new rows since last sync");
                self.touch_registry(&code, None);
                return self.finish(code, request, SyncSource::Cache, progress);
            }
            Err(e) if has_cache => {
                return self.fall_back(code, request, e.to_string(), has_cache, progress)
            }
            Err(e) => return Err(e),
        };

        code = fetched.code.clone();
        progress.on_stage(
            code.as_str(),
            &SyncStage::Received {
                rows: fetched.rows.len(),
            },
        );

        // a cancel that landed after the provider returned still discards the rows
        cancel.check()?;
        let series = rows_to_series(code.as_str(), fetched.fields, &fetched.rows);
        let rows = series.len();
        if rows > 0 {
            progress.on_stage(code.as_str(), &SyncStage::Saving);
            self.cache.write(&series, fetched.source)?;
        }
        self.touch_registry(&code, fetched.name.as_deref());

        let source = if rows > 0 {
            SyncSource::Fetched {
                source: fetched.source,
                rows,
            }
        } else {
            SyncSource::Cache
        };
        self.finish(code, request, source, progress)
    }

    /// Fetch, retrying on the other exchange when a bare code was not found.
    fn fetch_with_alternative(
        &self,
        provider: &dyn DataProvider,
        code: &SecurityCode,
        allow_alternative: bool,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancelToken,
    ) -> Result<FetchResult, DataError> {
        match provider.fetch(code, start, end, cancel) {
            Err(DataError::SymbolNotFound { code: missing }) if allow_alternative => {
                let Some(alt) = code.alternative() else {
                    return Err(DataError::SymbolNotFound { code: missing });
                };
                cancel.check()?;
                tracing::info!(tried = %code, retry = %alt, "security not found, trying other exchange");
                provider.fetch(&alt, start, end, cancel)
            }
            other => other,
        }
    }

    fn fall_back(
        &self,
        code: SecurityCode,
        request: SyncRequest,
        reason: String,
        has_cache: bool,
        progress: &dyn SyncProgress,
    ) -> Result<SyncOutcome, DataError> {
        if !has_cache {
            return Err(DataError::Other(format!(
                "no cached data for '{code}' and download failed: {reason}"
            )));
        }
        tracing::warn!(code = %code, %reason, "serving stale cached data");
        self.finish(code, request, SyncSource::StaleCache { reason }, progress)
    }

    fn touch_registry(&self, code: &SecurityCode, name: Option<&str>) {
        if let Err(e) = self.registry.touch(code.as_str(), name) {
            tracing::warn!(code = %code, error = %e, "failed to update registry");
        }
    }

    fn finish(
        &self,
        code: SecurityCode,
        request: SyncRequest,
        source: SyncSource,
        progress: &dyn SyncProgress,
    ) -> Result<SyncOutcome, DataError> {
        progress.on_stage(code.as_str(), &SyncStage::Loading);
        let series = self
            .cache
            .load(code.as_str(), Some(request.start), Some(request.end))?;
        if source == SyncSource::Cache {
            self.touch_registry(&code, None);
        }

        let reference = request.end.min(self.today);
        let freshness = Freshness::assess(series.last_date(), reference);
        progress.on_stage(code.as_str(), &SyncStage::Done { rows: series.len() });

        Ok(SyncOutcome {
            name: self.registry.name_of(code.as_str()),
            code,
            series,
            source,
            freshness,
        })
    }
}
