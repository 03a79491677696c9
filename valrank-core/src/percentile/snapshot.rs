//! Latest-point summaries for report headers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{compute_trailing, RankedSeries, ValueSource, ValuationZone, ZoneThresholds};
use crate::domain::{MetricSelector, Series};

/// The most recent ranked record plus context about how it was ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentValuation {
    pub code: String,
    pub date: NaiveDate,
    pub close: f64,
    pub metric: MetricSelector,
    pub value: Option<f64>,
    pub percentile: Option<f64>,
    /// Records in the ranked window.
    pub total_days: usize,
    pub source: ValueSource,
}

impl CurrentValuation {
    /// Summarize the last record of an already-ranked series.
    pub fn from_ranked(ranked: &RankedSeries) -> Option<Self> {
        let latest = ranked.latest()?;
        Some(Self {
            code: ranked.code.clone(),
            date: latest.date(),
            close: latest.close(),
            metric: ranked.metric,
            value: latest.value,
            percentile: latest.percentile,
            total_days: ranked.len(),
            source: ranked.source,
        })
    }

    pub fn zone(&self, thresholds: &ZoneThresholds) -> Option<ValuationZone> {
        thresholds.classify(self.percentile)
    }
}

/// Trailing-rank the last `years` of a series and summarize its latest point.
///
/// `years` is converted at 365 days per year; `None`, or a span reaching past
/// the calendar, uses the whole history.
/// Returns `None` for an empty series.
pub fn current_valuation(
    series: &Series,
    metric: MetricSelector,
    years: Option<u32>,
) -> Option<CurrentValuation> {
    let window_days = years.map(|y| y.saturating_mul(365));
    CurrentValuation::from_ranked(&compute_trailing(series, metric, window_days))
}
