//! Record: one trading day's observation for a security.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::metric::MetricSelector;

/// Daily close plus the two raw valuation fields.
///
/// Missing valuation data is `None`, never a sentinel. Non-positive ratios
/// (loss-making companies report negative PE) are kept as data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub date: NaiveDate,
    pub close: f64,
    pub pe_ttm: Option<f64>,
    pub pb_mrq: Option<f64>,
}

impl Record {
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self {
            date,
            close,
            pe_ttm: None,
            pb_mrq: None,
        }
    }

    pub fn with_pe(mut self, pe: f64) -> Self {
        self.pe_ttm = Some(pe);
        self
    }

    pub fn with_pb(mut self, pb: f64) -> Self {
        self.pb_mrq = Some(pb);
        self
    }

    /// Raw value of the selected metric field. Non-finite values read as missing.
    pub fn metric_value(&self, metric: MetricSelector) -> Option<f64> {
        let raw = match metric {
            MetricSelector::Pe => self.pe_ttm,
            MetricSelector::Pb => self.pb_mrq,
        };
        raw.filter(|v| v.is_finite())
    }

    /// Close price, or `None` when the close is NaN or infinite.
    pub fn close_value(&self) -> Option<f64> {
        Some(self.close).filter(|v| v.is_finite())
    }
}

/// Which valuation fields a series schema carries at all.
///
/// A field that is absent from the schema is different from a field that is
/// present with every value missing: only the former triggers the close-price
/// fallback in the percentile engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSet {
    pub has_pe: bool,
    pub has_pb: bool,
}

impl FieldSet {
    pub const ALL: FieldSet = FieldSet {
        has_pe: true,
        has_pb: true,
    };

    pub const PRICE_ONLY: FieldSet = FieldSet {
        has_pe: false,
        has_pb: false,
    };

    pub fn has(&self, metric: MetricSelector) -> bool {
        match metric {
            MetricSelector::Pe => self.has_pe,
            MetricSelector::Pb => self.has_pb,
        }
    }
}

impl Default for FieldSet {
    fn default() -> Self {
        Self::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn metric_value_selects_field() {
        let r = Record::new(day(2), 10.0).with_pe(15.0).with_pb(1.2);
        assert_eq!(r.metric_value(MetricSelector::Pe), Some(15.0));
        assert_eq!(r.metric_value(MetricSelector::Pb), Some(1.2));
    }

    #[test]
    fn nan_metric_reads_as_missing() {
        let r = Record::new(day(2), 10.0).with_pe(f64::NAN);
        assert_eq!(r.metric_value(MetricSelector::Pe), None);
        assert_eq!(r.metric_value(MetricSelector::Pb), None);
    }

    #[test]
    fn negative_metric_is_data() {
        let r = Record::new(day(2), 10.0).with_pe(-3.5);
        assert_eq!(r.metric_value(MetricSelector::Pe), Some(-3.5));
    }

    #[test]
    fn close_value_rejects_nan() {
        assert_eq!(Record::new(day(2), f64::NAN).close_value(), None);
        assert_eq!(Record::new(day(2), 9.5).close_value(), Some(9.5));
    }

    #[test]
    fn field_set_lookup() {
        let fields = FieldSet {
            has_pe: true,
            has_pb: false,
        };
        assert!(fields.has(MetricSelector::Pe));
        assert!(!fields.has(MetricSelector::Pb));
        assert!(!FieldSet::PRICE_ONLY.has(MetricSelector::Pe));
    }

    #[test]
    fn record_serialization_roundtrip() {
        let r = Record::new(day(3), 101.5).with_pb(0.9);
        let json = serde_json::to_string(&r).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}
