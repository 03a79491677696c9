//! ValRank Core: historical valuation percentiles for listed securities.
//!
//! - Domain types (security codes, daily records, ordered series, metrics)
//! - Percentile engine: range mode and causal trailing mode
//! - Valuation zones and latest-point snapshots
//! - Data providers (Yahoo Finance, CSV exports, synthetic) behind one trait
//! - Parquet cache with incremental sync and a registry of recent codes
//! - TOML configuration and `tracing` setup

pub mod config;
pub mod data;
pub mod domain;
pub mod logging;
pub mod percentile;

pub use config::{AppConfig, ConfigError, LookbackRange, ProviderKind};
pub use domain::{FieldSet, MetricSelector, Record, SecurityCode, Series};
pub use percentile::{compute, compute_trailing, RankedSeries};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: ranked output and pipeline pieces can cross threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Series>();
        require_sync::<domain::Series>();
        require_send::<domain::SecurityCode>();
        require_sync::<domain::SecurityCode>();
        require_send::<percentile::RankedSeries>();
        require_sync::<percentile::RankedSeries>();
        require_send::<percentile::CurrentValuation>();
        require_sync::<percentile::CurrentValuation>();

        require_send::<data::ValuationCache>();
        require_sync::<data::ValuationCache>();
        require_send::<data::SyncPipeline>();
        require_sync::<data::SyncPipeline>();
        require_send::<data::CancelToken>();
        require_sync::<data::CancelToken>();
        require_send::<data::DataError>();
        require_sync::<data::DataError>();
    }

    /// The engine is a plain function of its input series.
    #[test]
    fn engine_takes_series_by_reference_only() {
        fn _check(series: &Series) -> (RankedSeries, RankedSeries) {
            (
                compute(series, None, None, MetricSelector::Pe),
                compute_trailing(series, MetricSelector::Pb, Some(365)),
            )
        }
    }
}
