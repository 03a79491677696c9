//! Valuation percentile engine.
//!
//! Pure functions over an in-memory [`Series`]: no I/O, no shared state. Any
//! number of callers may rank independent series concurrently.
//!
//! - [`compute`]: rank within a date range (the population is the range)
//! - [`compute_trailing`]: rank against the causal prefix of each record
//! - [`snapshot`]: the latest ranked point as a report-ready summary
//! - [`zone`]: undervalued / fair / overvalued classification

pub mod engine;
pub mod snapshot;
pub mod zone;

pub use engine::{compute, compute_trailing, percentile_rank};
pub use snapshot::{current_valuation, CurrentValuation};
pub use zone::{ValuationZone, ZoneThresholds};

use chrono::NaiveDate;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

use crate::domain::{MetricSelector, Record, Series};

/// Where a ranked value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// The selected valuation field.
    Metric,
    /// The series has no column for the selected metric, so the close price
    /// is ranked instead ("valuation equals price"). Callers should surface
    /// this as reduced fidelity.
    ClosePrice,
}

impl ValueSource {
    pub fn for_series(series: &Series, metric: MetricSelector) -> Self {
        if series.fields().has(metric) {
            Self::Metric
        } else {
            Self::ClosePrice
        }
    }

    pub fn extract(&self, record: &Record, metric: MetricSelector) -> Option<f64> {
        match self {
            Self::Metric => record.metric_value(metric),
            Self::ClosePrice => record.close_value(),
        }
    }
}

/// Which reference set produced the percentiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RankMode {
    Range {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
    Trailing {
        window_days: Option<u32>,
    },
}

/// A record with its extracted valuation value and percentile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedRecord {
    pub record: Record,
    pub value: Option<f64>,
    pub percentile: Option<f64>,
}

impl RankedRecord {
    pub fn date(&self) -> NaiveDate {
        self.record.date
    }

    pub fn close(&self) -> f64 {
        self.record.close
    }
}

/// Engine output for one call: same length and order as the ranked window.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSeries {
    pub code: String,
    pub metric: MetricSelector,
    pub source: ValueSource,
    pub mode: RankMode,
    pub(crate) records: Vec<RankedRecord>,
}

/// Lowest and highest defined values of a ranked series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremes {
    pub min: RankedRecord,
    pub max: RankedRecord,
}

impl RankedSeries {
    pub fn records(&self) -> &[RankedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_price_fallback(&self) -> bool {
        self.source == ValueSource::ClosePrice
    }

    pub fn latest(&self) -> Option<&RankedRecord> {
        self.records.last()
    }

    /// Number of records with a defined percentile.
    pub fn ranked_count(&self) -> usize {
        self.records.iter().filter(|r| r.percentile.is_some()).count()
    }

    /// First occurrences of the minimum and maximum defined values.
    pub fn extremes(&self) -> Option<Extremes> {
        let mut defined = self.records.iter().filter(|r| r.value.is_some());
        let first = *defined.next()?;
        let (min, max) = defined.fold((first, first), |(min, max), r| {
            let v = r.value.unwrap_or(f64::NAN);
            let min = if v < min.value.unwrap_or(f64::NAN) { *r } else { min };
            let max = if v > max.value.unwrap_or(f64::NAN) { *r } else { max };
            (min, max)
        });
        Some(Extremes { min, max })
    }

    /// Re-slice to `[start, end]` without recomputing.
    ///
    /// Percentiles keep the reference window of the original call. Call the
    /// engine again when the population itself should change.
    pub fn visible(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> RankedSeries {
        let records = self
            .records
            .iter()
            .filter(|r| start.map_or(true, |s| r.date() >= s) && end.map_or(true, |e| r.date() <= e))
            .copied()
            .collect();
        self.with_records(records)
    }

    /// Slider-style view starting `fraction` of the way through the series.
    ///
    /// The start index is `floor(fraction * len)`, clamped so at least the last
    /// record stays visible. No recomputation happens.
    pub fn tail_from_fraction(&self, fraction: f64) -> RankedSeries {
        if self.records.is_empty() {
            return self.with_records(Vec::new());
        }
        let len = self.records.len();
        let start = ((fraction.clamp(0.0, 1.0) * len as f64).floor() as usize).min(len - 1);
        self.with_records(self.records[start..].to_vec())
    }

    fn with_records(&self, records: Vec<RankedRecord>) -> RankedSeries {
        RankedSeries {
            code: self.code.clone(),
            metric: self.metric,
            source: self.source,
            mode: self.mode,
            records,
        }
    }

    /// Rows with metric-specific field names (`pe`/`pe_percentile` or `pb`/`pb_percentile`).
    pub fn rows(&self) -> impl Iterator<Item = RankedRow<'_>> {
        let metric = self.metric;
        self.records.iter().map(move |record| RankedRow { metric, record })
    }
}

/// Serialization view of one ranked record.
pub struct RankedRow<'a> {
    pub metric: MetricSelector,
    pub record: &'a RankedRecord,
}

impl Serialize for RankedRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("date", &self.record.date())?;
        map.serialize_entry("close", &self.record.close())?;
        map.serialize_entry(self.metric.value_field(), &self.record.value)?;
        map.serialize_entry(self.metric.percentile_field(), &self.record.percentile)?;
        map.end()
    }
}

impl Serialize for RankedSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<RankedRow<'_>> = self.rows().collect();
        let mut s = serializer.serialize_struct("RankedSeries", 5)?;
        s.serialize_field("code", &self.code)?;
        s.serialize_field("metric", &self.metric)?;
        s.serialize_field("source", &self.source)?;
        s.serialize_field("mode", &self.mode)?;
        s.serialize_field("records", &rows)?;
        s.end()
    }
}

/// Build a daily series from PE values for testing.
///
/// Dates start at 2020-01-01 and advance one calendar day per value; close is
/// `100 + i`; PB is left empty.
#[cfg(test)]
pub fn make_series(pe: &[f64]) -> Series {
    use crate::domain::FieldSet;
    let base = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let records = pe
        .iter()
        .enumerate()
        .map(|(i, &v)| Record::new(base + chrono::Duration::days(i as i64), 100.0 + i as f64).with_pe(v))
        .collect();
    Series::new("sh.600000", FieldSet::ALL, records).unwrap()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for percentile tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-9;
