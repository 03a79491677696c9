//! Range-based and trailing percentile ranking.
//!
//! Both operations share one rank rule: the share of the reference set that
//! is strictly below a value, normalized by `N - 1` and scaled to 0–100. The
//! minimum scores exactly 0 and the maximum exactly 100; tied extremes all
//! score the same. They differ only in the reference set:
//!
//! - [`compute`] ranks every record against the whole filtered window.
//! - [`compute_trailing`] ranks record `i` against records `0..=i` only.

use chrono::{Duration, NaiveDate};
use rayon::prelude::*;

use super::{RankMode, RankedRecord, RankedSeries, ValueSource};
use crate::domain::{MetricSelector, Record, Series};

/// Empirical percentile of `value` within `population`.
///
/// `population` holds the defined values of the reference set and is expected
/// to contain `value`. Returns `None` when fewer than two values are available
/// or `value` is not finite.
pub fn percentile_rank(value: f64, population: &[f64]) -> Option<f64> {
    if !value.is_finite() || population.len() < 2 {
        return None;
    }
    let below = population.iter().filter(|x| **x < value).count();
    Some(scale(below, population.len()))
}

fn scale(below: usize, population: usize) -> f64 {
    (below as f64 / (population - 1) as f64 * 100.0).min(100.0)
}

/// Same rule as [`percentile_rank`] against an ascending-sorted population.
fn rank_sorted(value: f64, sorted: &[f64]) -> f64 {
    let below = sorted.partition_point(|x| *x < value);
    scale(below, sorted.len())
}

fn extract_values(window: &[Record], source: ValueSource, metric: MetricSelector) -> Vec<Option<f64>> {
    window.iter().map(|r| source.extract(r, metric)).collect()
}

fn assemble(
    series: &Series,
    metric: MetricSelector,
    source: ValueSource,
    mode: RankMode,
    window: &[Record],
    values: Vec<Option<f64>>,
    percentiles: Vec<Option<f64>>,
) -> RankedSeries {
    let records = window
        .iter()
        .zip(values)
        .zip(percentiles)
        .map(|((record, value), percentile)| RankedRecord {
            record: *record,
            value,
            percentile,
        })
        .collect();

    RankedSeries {
        code: series.code().to_string(),
        metric,
        source,
        mode,
        records,
    }
}

/// Rank every record in `[start, end]` against all defined values of that window.
///
/// Bounds are inclusive; `None` leaves that side unbounded. Windows with fewer
/// than two records, or fewer than two defined values, come back with values
/// populated and every percentile `None`. If the series schema has no column
/// for `metric`, the close price stands in as the value (see
/// [`ValueSource::ClosePrice`]).
pub fn compute(
    series: &Series,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    metric: MetricSelector,
) -> RankedSeries {
    let window = series.range(start, end);
    let source = ValueSource::for_series(series, metric);
    let values = extract_values(window, source, metric);
    let mode = RankMode::Range { start, end };

    let mut population: Vec<f64> = values.iter().flatten().copied().collect();
    let percentiles = if window.len() < 2 || population.len() < 2 {
        vec![None; window.len()]
    } else {
        population.sort_by(f64::total_cmp);
        values
            .iter()
            .map(|v| v.map(|v| rank_sorted(v, &population)))
            .collect()
    };

    tracing::debug!(
        code = series.code(),
        %metric,
        records = window.len(),
        defined = population.len(),
        "computed range percentiles"
    );

    assemble(series, metric, source, mode, window, values, percentiles)
}

/// Rank each record against the causal prefix ending at (and including) itself.
///
/// With `window_days`, the series is first restricted to records dated on or
/// after `last_date - window_days`. `Some(0)` keeps only the last date; it is
/// not a synonym for the whole history, which is `None`. A window reaching
/// past the earliest representable date is treated as unbounded. The first
/// ranked record never has a percentile: its prefix holds a single value.
pub fn compute_trailing(
    series: &Series,
    metric: MetricSelector,
    window_days: Option<u32>,
) -> RankedSeries {
    let cutoff = window_days.zip(series.last_date()).and_then(|(days, last)| {
        last.checked_sub_signed(Duration::days(i64::from(days)))
    });
    let window = match cutoff {
        Some(start) => series.range(Some(start), None),
        None => series.records(),
    };
    let source = ValueSource::for_series(series, metric);
    let values = extract_values(window, source, metric);
    let mode = RankMode::Trailing { window_days };

    let percentiles: Vec<Option<f64>> = if window.len() < 2 {
        vec![None; window.len()]
    } else {
        (0..values.len())
            .into_par_iter()
            .map(|i| {
                let current = values[i]?;
                let prefix = values[..=i].iter().flatten();
                let (defined, below) = prefix.fold((0usize, 0usize), |(n, b), x| {
                    (n + 1, b + usize::from(*x < current))
                });
                (defined > 1).then(|| scale(below, defined))
            })
            .collect()
    };

    tracing::debug!(
        code = series.code(),
        %metric,
        records = window.len(),
        ?window_days,
        "computed trailing percentiles"
    );

    assemble(series, metric, source, mode, window, values, percentiles)
}
