//! Deterministic synthetic data for demos and offline development.
//!
//! A random walk on the close, with PE and PB derived from slowly drifting
//! earnings and book value. The generator is seeded from the security code so
//! the same code always yields the same history. Data from this provider is
//! tagged [`DataSource::Synthetic`] and must never be mistaken for real quotes.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::provider::{
    CancelToken, DataError, DataProvider, DataSource, FetchResult, RawField, RawRow,
};
use crate::domain::{FieldSet, SecurityCode};

/// Share of days generated without a PE figure.
const MISSING_PE_RATE: f64 = 0.02;

#[derive(Debug, Default)]
pub struct SyntheticProvider;

impl SyntheticProvider {
    pub fn generate(code: &SecurityCode, start: NaiveDate, end: NaiveDate) -> Vec<RawRow> {
        let seed: [u8; 32] = *blake3::hash(code.as_str().as_bytes()).as_bytes();
        let mut rng = StdRng::from_seed(seed);

        let mut price = rng.gen_range(5.0..200.0_f64);
        let mut eps = price / rng.gen_range(8.0..40.0);
        let mut book = price / rng.gen_range(0.8..6.0);

        let mut rows = Vec::new();
        let mut current = start;
        while current <= end {
            if matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
                current += Duration::days(1);
                continue;
            }

            price *= 1.0 + rng.gen_range(-0.03..0.03);
            eps *= 1.0 + rng.gen_range(-0.002..0.0025);
            book *= 1.0 + rng.gen_range(-0.001..0.0015);

            let pe = if rng.gen_bool(MISSING_PE_RATE) {
                RawField::Missing
            } else {
                RawField::Number(price / eps)
            };

            rows.push(RawRow {
                date: current,
                close: RawField::Number(price),
                pe_ttm: pe,
                pb_mrq: RawField::Number(price / book),
            });
            current += Duration::days(1);
        }
        rows
    }
}

impl DataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(
        &self,
        code: &SecurityCode,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancelToken,
    ) -> Result<FetchResult, DataError> {
        cancel.check()?;
        tracing::warn!(code = %code, "generating synthetic data; results are not real quotes");
        Ok(FetchResult {
            code: code.clone(),
            name: Some(format!("Synthetic {}", code.bare())),
            rows: Self::generate(code, start, end),
            fields: FieldSet::ALL,
            source: DataSource::Synthetic,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}
