//! Parquet cache layer with Hive-style partitioning.
//!
//! Layout: `{cache_dir}/code={CODE}/{year}.parquet`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Merging writes: new rows replace cached rows on the same date
//! - Integrity validation on load (schema check, row count > 0)
//! - Quarantine for corrupt files ({filename}.quarantined)
//! - Metadata sidecar per code (hash, date range, source, valuation columns)

use super::provider::{DataError, DataSource};
use crate::domain::{FieldSet, Record, Series};
use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

const EXPECTED_COLUMNS: [&str; 4] = ["date", "close", "pe_ttm", "pb_mrq"];

/// Metadata sidecar for a cached security.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub code: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub row_count: usize,
    pub data_hash: String,
    pub source: DataSource,
    pub fields: FieldSet,
    pub cached_at: chrono::NaiveDateTime,
}

/// Cache status for a single security.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub code: String,
    pub meta: Option<CacheMeta>,
    pub size_bytes: u64,
}

pub struct ValuationCache {
    cache_dir: PathBuf,
}

impl ValuationCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `{cache_dir}/code={CODE}/`
    fn code_dir(&self, code: &str) -> PathBuf {
        self.cache_dir.join(format!("code={code}"))
    }

    fn year_path(&self, code: &str, year: i32) -> PathBuf {
        self.code_dir(code).join(format!("{year}.parquet"))
    }

    fn meta_path(&self, code: &str) -> PathBuf {
        self.code_dir(code).join("meta.json")
    }

    /// Merge a series into the cache.
    ///
    /// Rows on dates already cached are replaced. The stored field set is the
    /// union of the cached and incoming schemas so an update from a price-only
    /// source does not hide valuation history cached earlier.
    pub fn write(&self, series: &Series, source: DataSource) -> Result<CacheMeta, DataError> {
        if series.is_empty() {
            return Err(DataError::CacheError("no rows to cache".into()));
        }
        let code = series.code();

        let mut merged: BTreeMap<NaiveDate, Record> = BTreeMap::new();
        let mut fields = series.fields();
        if let Some(meta) = self.meta(code) {
            match self.load(code, None, None) {
                Ok(existing) => {
                    fields.has_pe |= meta.fields.has_pe;
                    fields.has_pb |= meta.fields.has_pb;
                    merged.extend(existing.into_records().into_iter().map(|r| (r.date, r)));
                }
                Err(e) => tracing::warn!(code, error = %e, "discarding unreadable cache before write"),
            }
        }
        merged.extend(series.records().iter().map(|r| (r.date, *r)));
        let records: Vec<Record> = merged.into_values().collect();

        let code_dir = self.code_dir(code);
        fs::create_dir_all(&code_dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let mut by_year: BTreeMap<i32, Vec<&Record>> = BTreeMap::new();
        for record in &records {
            by_year.entry(record.date.year()).or_default().push(record);
        }

        for (year, year_records) in &by_year {
            let df = records_to_dataframe(year_records)?;
            let path = self.year_path(code, *year);
            let tmp_path = path.with_extension("parquet.tmp");

            write_parquet(&df, &tmp_path)?;

            fs::rename(&tmp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                DataError::CacheError(format!("atomic rename failed: {e}"))
            })?;
        }

        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Err(DataError::CacheError("no rows to cache".into()));
        };
        let meta = CacheMeta {
            code: code.to_string(),
            start_date: first.date,
            end_date: last.date,
            row_count: records.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(&records)
                    .map_err(|e| DataError::CacheError(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            source,
            fields,
            cached_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(code), meta_json)
            .map_err(|e| DataError::CacheError(format!("meta write: {e}")))?;

        tracing::debug!(code, rows = meta.row_count, end = %meta.end_date, "cache written");
        Ok(meta)
    }

    /// Load cached records for a code within `[start, end]`, sorted by date.
    ///
    /// Fails with `NoCachedData` when nothing is cached for the code at all;
    /// a range with no rows yields an empty series.
    pub fn load(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Series, DataError> {
        let code_dir = self.code_dir(code);
        if !code_dir.exists() {
            return Err(DataError::NoCachedData {
                code: code.to_string(),
            });
        }

        let entries =
            fs::read_dir(&code_dir).map_err(|e| DataError::CacheError(format!("read dir: {e}")))?;

        let mut records = Vec::new();
        let mut found_partition = false;

        for entry in entries {
            let entry = entry.map_err(|e| DataError::CacheError(format!("dir entry: {e}")))?;
            let path = entry.path();

            // Skip non-parquet files (meta.json, .quarantined, etc)
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            found_partition = true;

            let year = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i32>().ok());
            if let Some(year) = year {
                if start.is_some_and(|s| year < s.year()) || end.is_some_and(|e| year > e.year()) {
                    continue;
                }
            }

            match load_and_validate_parquet(&path) {
                Ok(rows) => records.extend(rows),
                Err(e) => {
                    let quarantine = path.with_extension("parquet.quarantined");
                    tracing::warn!(file = %path.display(), error = %e, "quarantining corrupt cache file");
                    let _ = fs::rename(&path, &quarantine);
                }
            }
        }

        if !found_partition {
            return Err(DataError::NoCachedData {
                code: code.to_string(),
            });
        }

        let fields = self.meta(code).map(|m| m.fields).unwrap_or_default();
        records.retain(|r| start.map_or(true, |s| r.date >= s) && end.map_or(true, |e| r.date <= e));
        Ok(Series::canonicalize(code, fields, records))
    }

    /// Metadata sidecar for a code, if present and readable.
    pub fn meta(&self, code: &str) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(code)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Latest cached date for a code.
    pub fn last_date(&self, code: &str) -> Option<NaiveDate> {
        self.meta(code).map(|m| m.end_date)
    }

    /// Every cached code with its metadata and on-disk size, sorted by code.
    pub fn status(&self) -> Result<Vec<CacheStatus>, DataError> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| DataError::CacheError(format!("read dir: {e}")))?;

        let mut statuses = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(code) = name.strip_prefix("code=") else {
                continue;
            };
            statuses.push(CacheStatus {
                code: code.to_string(),
                meta: self.meta(code),
                size_bytes: dir_size(&entry.path()),
            });
        }
        statuses.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(statuses)
    }

    /// Delete everything cached for a code. Returns whether anything existed.
    pub fn remove(&self, code: &str) -> Result<bool, DataError> {
        let dir = self.code_dir(code);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).map_err(|e| DataError::CacheError(format!("remove: {e}")))?;
        Ok(true)
    }
}

fn dir_size(path: &Path) -> u64 {
    fs::read_dir(path)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn records_to_dataframe(records: &[&Record]) -> Result<DataFrame, DataError> {
    let dates: Vec<i32> = records
        .iter()
        .map(|r| (r.date - epoch()).num_days() as i32)
        .collect();
    let closes: Vec<f64> = records.iter().map(|r| r.close).collect();
    let pes: Vec<Option<f64>> = records.iter().map(|r| r.pe_ttm).collect();
    let pbs: Vec<Option<f64>> = records.iter().map(|r| r.pb_mrq).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
        Column::new("close".into(), closes),
        Column::new("pe_ttm".into(), pes),
        Column::new("pb_mrq".into(), pbs),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<Record>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::ValidationError("empty parquet file".into()));
    }
    for col_name in &EXPECTED_COLUMNS {
        if df.column(col_name).is_err() {
            return Err(DataError::ValidationError(format!(
                "missing column '{col_name}'"
            )));
        }
    }

    dataframe_to_records(&df)
}

fn dataframe_to_records(df: &DataFrame) -> Result<Vec<Record>, DataError> {
    let column = |name: &str| {
        df.column(name)
            .map_err(|e| DataError::ParquetError(format!("column read: {e}")))
    };
    let typed = |name: &str, e: PolarsError| DataError::ParquetError(format!("{name} column type: {e}"));

    let date_ca = column("date")?.date().map_err(|e| typed("date", e))?;
    let close_ca = column("close")?.f64().map_err(|e| typed("close", e))?;
    let pe_ca = column("pe_ttm")?.f64().map_err(|e| typed("pe_ttm", e))?;
    let pb_ca = column("pb_mrq")?.f64().map_err(|e| typed("pb_mrq", e))?;

    let epoch = epoch();
    (0..df.height())
        .map(|i| {
            let days = date_ca
                .get(i)
                .ok_or_else(|| DataError::ParquetError(format!("null date at row {i}")))?;
            Ok(Record {
                date: epoch + chrono::Duration::days(i64::from(days)),
                close: close_ca.get(i).unwrap_or(f64::NAN),
                pe_ttm: pe_ca.get(i),
                pb_mrq: pb_ca.get(i),
            })
        })
        .collect()
}
