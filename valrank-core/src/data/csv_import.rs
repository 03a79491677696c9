//! CSV import provider for exchange-style daily exports.
//!
//! Reads `{dir}/{code}.csv` (falling back to `{dir}/{bare}.csv`) with a header
//! row in the usual export layout:
//!
//! ```text
//! date,code,open,high,low,close,preclose,volume,amount,adjustflag,turn,tradestatus,pctChg,isST,peTTM,pbMRQ,psTTM,pcfNcfTTM
//! ```
//!
//! Only `date` and `close` are required. The presence of the `peTTM` / `pbMRQ`
//! columns decides the series [`FieldSet`]; cells stay text until coercion.

use super::provider::{
    CancelToken, DataError, DataProvider, DataSource, FetchResult, RawField, RawRow,
};
use crate::domain::{FieldSet, MetricSelector, SecurityCode};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

pub struct CsvProvider {
    dir: PathBuf,
}

struct Columns {
    date: usize,
    close: usize,
    pe: Option<usize>,
    pb: Option<usize>,
    name: Option<usize>,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Result<Self, DataError> {
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        Ok(Self {
            date: find(&["date"])
                .ok_or_else(|| DataError::ValidationError("missing column 'date'".into()))?,
            close: find(&["close"])
                .ok_or_else(|| DataError::ValidationError("missing column 'close'".into()))?,
            pe: find(&[MetricSelector::Pe.source_field(), "pe_ttm"]),
            pb: find(&[MetricSelector::Pb.source_field(), "pb_mrq"]),
            name: find(&["code_name", "name"]),
        })
    }

    fn fields(&self) -> FieldSet {
        FieldSet {
            has_pe: self.pe.is_some(),
            has_pb: self.pb.is_some(),
        }
    }
}

impl CsvProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, code: &SecurityCode) -> Option<PathBuf> {
        [code.as_str(), code.bare()]
            .iter()
            .map(|stem| self.dir.join(format!("{stem}.csv")))
            .find(|p| p.is_file())
    }

    /// Parse an export file, keeping rows dated within `[start, end]`.
    pub fn read_file(
        path: &Path,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(Vec<RawRow>, FieldSet, Option<String>), DataError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| DataError::Csv(format!("{}: {e}", path.display())))?;

        let headers = reader
            .headers()
            .map_err(|e| DataError::Csv(format!("header: {e}")))?
            .clone();
        let cols = Columns::locate(&headers)?;

        let mut rows = Vec::new();
        let mut name = None;
        let mut skipped = 0usize;
        let cell = |record: &csv::StringRecord, idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .map_or(RawField::Missing, RawField::from)
        };

        for (line, result) in reader.records().enumerate() {
            let record = result.map_err(|e| DataError::Csv(format!("row {}: {e}", line + 1)))?;

            let Some(date) = record
                .get(cols.date)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            else {
                skipped += 1;
                continue;
            };
            if date < start || date > end {
                continue;
            }

            if name.is_none() {
                name = cols
                    .name
                    .and_then(|i| record.get(i))
                    .filter(|n| !n.is_empty())
                    .map(str::to_string);
            }

            rows.push(RawRow {
                date,
                close: cell(&record, Some(cols.close)),
                pe_ttm: cell(&record, cols.pe),
                pb_mrq: cell(&record, cols.pb),
            });
        }

        if skipped > 0 {
            tracing::warn!(file = %path.display(), skipped, "skipped rows with unparseable dates");
        }

        Ok((rows, cols.fields(), name))
    }
}

impl DataProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv_import"
    }

    fn fetch(
        &self,
        code: &SecurityCode,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancelToken,
    ) -> Result<FetchResult, DataError> {
        cancel.check()?;
        let path = self.file_for(code).ok_or_else(|| DataError::SymbolNotFound {
            code: code.to_string(),
        })?;
        let (rows, fields, name) = Self::read_file(&path, start, end)?;
        tracing::debug!(code = %code, rows = rows.len(), ?fields, "read csv export");

        Ok(FetchResult {
            code: code.clone(),
            name,
            rows,
            fields,
            source: DataSource::CsvImport,
        })
    }

    fn is_available(&self) -> bool {
        self.dir.is_dir()
    }
}
