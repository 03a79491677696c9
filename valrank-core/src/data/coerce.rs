//! Numeric coercion at ingestion.
//!
//! Sources deliver valuation fields as numbers, as text (exchange exports use
//! `""` for suspended days) or not at all. Everything funnels through
//! [`coerce_f64`] so "missing" is an explicit `None` before any record reaches
//! the percentile engine.

use crate::domain::{FieldSet, Record, Series};

use super::provider::{RawField, RawRow};

/// Parse a text field as a finite number. Empty, unparseable, NaN and
/// infinite inputs are `None`.
pub fn coerce_f64(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

impl RawField {
    pub fn coerce(&self) -> Option<f64> {
        match self {
            RawField::Missing => None,
            RawField::Number(v) => Some(*v).filter(|v| v.is_finite()),
            RawField::Text(s) => coerce_f64(s),
        }
    }
}

/// Coerce one row. An uncoercible close becomes NaN, which the engine reads
/// as undefined in price-fallback mode.
pub fn coerce_row(row: &RawRow) -> Record {
    Record {
        date: row.date,
        close: row.close.coerce().unwrap_or(f64::NAN),
        pe_ttm: row.pe_ttm.coerce(),
        pb_mrq: row.pb_mrq.coerce(),
    }
}

/// Coerce provider rows into a canonical (sorted, deduplicated) series.
pub fn rows_to_series(code: &str, fields: FieldSet, rows: &[RawRow]) -> Series {
    let records: Vec<Record> = rows.iter().map(coerce_row).collect();
    let before = records.len();
    let series = Series::canonicalize(code, fields, records);
    if series.len() < before {
        tracing::warn!(
            code,
            dropped = before - series.len(),
            "dropped rows with duplicate dates"
        );
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn coerces_text_numbers() {
        assert_eq!(coerce_f64("15.25"), Some(15.25));
        assert_eq!(coerce_f64("  -3.1 "), Some(-3.1));
        assert_eq!(coerce_f64("0"), Some(0.0));
    }

    #[test]
    fn empty_and_garbage_are_missing() {
        assert_eq!(coerce_f64(""), None);
        assert_eq!(coerce_f64("   "), None);
        assert_eq!(coerce_f64("n/a"), None);
        assert_eq!(coerce_f64("NaN"), None);
        assert_eq!(coerce_f64("inf"), None);
    }

    #[test]
    fn raw_field_coercion() {
        assert_eq!(RawField::Missing.coerce(), None);
        assert_eq!(RawField::Number(f64::NAN).coerce(), None);
        assert_eq!(RawField::Number(2.0).coerce(), Some(2.0));
        assert_eq!(RawField::from("7.5").coerce(), Some(7.5));
    }

    #[test]
    fn rows_become_canonical_series() {
        let d = |i: u32| NaiveDate::from_ymd_opt(2024, 5, i).unwrap();
        let row = |day: u32, close: &str, pe: &str| RawRow {
            date: d(day),
            close: RawField::from(close),
            pe_ttm: RawField::from(pe),
            pb_mrq: RawField::Missing,
        };
        let rows = vec![row(3, "11", "9.5"), row(2, "10", ""), row(3, "12", "1")];

        let series = rows_to_series("sz.000001", FieldSet::ALL, &rows);
        assert_eq!(series.len(), 2);
        assert_eq!(series.records()[0].date, d(2));
        assert_eq!(series.records()[0].pe_ttm, None);
        assert_eq!(series.records()[1].close, 11.0);
        assert_eq!(series.records()[1].pe_ttm, Some(9.5));
    }

    #[test]
    fn bad_close_becomes_nan() {
        let row = RawRow {
            date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            close: RawField::from("-"),
            pe_ttm: RawField::Missing,
            pb_mrq: RawField::Missing,
        };
        assert!(coerce_row(&row).close.is_nan());
    }
}
