//! Series: the ordered record history for one security.
//!
//! A `Series` is guaranteed strictly ascending by date with no duplicates.
//! `Series::new` enforces this and reports a violation as a caller-contract
//! fault; `Series::canonicalize` is the lenient ingestion path.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::{FieldSet, Record};

/// Malformed record collections.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("records out of order at index {index}: {date} follows {previous}")]
    Unordered {
        index: usize,
        previous: NaiveDate,
        date: NaiveDate,
    },

    #[error("duplicate date {date} at index {index}")]
    DuplicateDate { index: usize, date: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    code: String,
    fields: FieldSet,
    records: Vec<Record>,
}

impl Series {
    /// Build a series from records that must already be strictly ascending.
    pub fn new(
        code: impl Into<String>,
        fields: FieldSet,
        records: Vec<Record>,
    ) -> Result<Self, SeriesError> {
        for (index, pair) in records.windows(2).enumerate() {
            let (previous, date) = (pair[0].date, pair[1].date);
            if date == previous {
                return Err(SeriesError::DuplicateDate {
                    index: index + 1,
                    date,
                });
            }
            if date < previous {
                return Err(SeriesError::Unordered {
                    index: index + 1,
                    previous,
                    date,
                });
            }
        }

        Ok(Self {
            code: code.into(),
            fields,
            records,
        })
    }

    /// Sort by date and drop repeated dates, keeping the first occurrence.
    pub fn canonicalize(code: impl Into<String>, fields: FieldSet, mut records: Vec<Record>) -> Self {
        // stable sort keeps the first of each duplicate group in front
        records.sort_by_key(|r| r.date);
        records.dedup_by_key(|r| r.date);
        Self {
            code: code.into(),
            fields,
            records,
        }
    }

    pub fn empty(code: impl Into<String>, fields: FieldSet) -> Self {
        Self {
            code: code.into(),
            fields,
            records: Vec::new(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn fields(&self) -> FieldSet {
        self.fields
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.records.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }

    /// Records with `start <= date <= end`; an omitted bound is unbounded.
    pub fn range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> &[Record] {
        let lo = match start {
            Some(s) => self.records.partition_point(|r| r.date < s),
            None => 0,
        };
        let hi = match end {
            Some(e) => self.records.partition_point(|r| r.date <= e),
            None => self.records.len(),
        };
        if lo >= hi {
            return &[];
        }
        &self.records[lo..hi]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn rec(d: u32) -> Record {
        Record::new(day(d), d as f64)
    }

    #[test]
    fn accepts_ascending_records() {
        let s = Series::new("sh.600519", FieldSet::ALL, vec![rec(1), rec(2), rec(5)]).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.first_date(), Some(day(1)));
        assert_eq!(s.last_date(), Some(day(5)));
    }

    #[test]
    fn rejects_duplicate_dates() {
        let err = Series::new("x", FieldSet::ALL, vec![rec(1), rec(2), rec(2)]).unwrap_err();
        assert_eq!(err, SeriesError::DuplicateDate { index: 2, date: day(2) });
    }

    #[test]
    fn rejects_unordered_records() {
        let err = Series::new("x", FieldSet::ALL, vec![rec(3), rec(1)]).unwrap_err();
        assert!(matches!(err, SeriesError::Unordered { index: 1, .. }));
    }

    #[test]
    fn canonicalize_sorts_and_keeps_first_duplicate() {
        let mut dup = rec(2);
        dup.close = 99.0;
        let s = Series::canonicalize("x", FieldSet::ALL, vec![rec(3), rec(2), dup, rec(1)]);
        let dates: Vec<_> = s.records().iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(1), day(2), day(3)]);
        assert_eq!(s.records()[1].close, 2.0);
    }

    #[test]
    fn range_is_inclusive_on_both_ends() {
        let s = Series::new("x", FieldSet::ALL, (1..=10).map(rec).collect()).unwrap();
        let r = s.range(Some(day(3)), Some(day(6)));
        assert_eq!(r.len(), 4);
        assert_eq!(r[0].date, day(3));
        assert_eq!(r[3].date, day(6));
    }

    #[test]
    fn range_with_open_bounds() {
        let s = Series::new("x", FieldSet::ALL, (1..=10).map(rec).collect()).unwrap();
        assert_eq!(s.range(None, None).len(), 10);
        assert_eq!(s.range(Some(day(8)), None).len(), 3);
        assert_eq!(s.range(None, Some(day(2))).len(), 2);
    }

    #[test]
    fn inverted_range_is_empty() {
        let s = Series::new("x", FieldSet::ALL, (1..=10).map(rec).collect()).unwrap();
        assert!(s.range(Some(day(7)), Some(day(3))).is_empty());
    }
}
