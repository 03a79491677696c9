//! Valuation metric selector.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which valuation ratio feeds the percentile engine.
///
/// Each variant carries its source column name and the output field names
/// used when ranked rows are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSelector {
    /// Price / trailing-twelve-month earnings.
    Pe,
    /// Price / most-recent-quarter book value.
    Pb,
}

impl MetricSelector {
    pub const ALL: [MetricSelector; 2] = [MetricSelector::Pe, MetricSelector::Pb];

    /// Column name in exchange-style exports.
    pub fn source_field(&self) -> &'static str {
        match self {
            Self::Pe => "peTTM",
            Self::Pb => "pbMRQ",
        }
    }

    /// Output name of the valuation value.
    pub fn value_field(&self) -> &'static str {
        match self {
            Self::Pe => "pe",
            Self::Pb => "pb",
        }
    }

    /// Output name of the percentile.
    pub fn percentile_field(&self) -> &'static str {
        match self {
            Self::Pe => "pe_percentile",
            Self::Pb => "pb_percentile",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pe => "PE",
            Self::Pb => "PB",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Pe => "price / earnings per share (TTM)",
            Self::Pb => "price / book value per share (MRQ)",
        }
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown valuation metric '{0}' (expected pe or pb)")]
pub struct UnknownMetric(pub String);

impl FromStr for MetricSelector {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pe" | "pettm" => Ok(Self::Pe),
            "pb" | "pbmrq" => Ok(Self::Pb),
            _ => Err(UnknownMetric(s.to_string())),
        }
    }
}
