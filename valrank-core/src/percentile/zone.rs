//! Valuation zones derived from a percentile.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationZone {
    Undervalued,
    Fair,
    Overvalued,
}

impl fmt::Display for ValuationZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undervalued => write!(f, "undervalued"),
            Self::Fair => write!(f, "fair"),
            Self::Overvalued => write!(f, "overvalued"),
        }
    }
}

/// Percentile boundaries: below `low` is undervalued, above `high` overvalued.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneThresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        Self {
            low: 30.0,
            high: 70.0,
        }
    }
}

impl ZoneThresholds {
    /// Both bounds within 0–100 and `low < high`.
    pub fn is_valid(&self) -> bool {
        (0.0..=100.0).contains(&self.low) && (0.0..=100.0).contains(&self.high) && self.low < self.high
    }

    /// Zone for a percentile; `None` when the percentile is undefined.
    pub fn classify(&self, percentile: Option<f64>) -> Option<ValuationZone> {
        let p = percentile?;
        Some(if p < self.low {
            ValuationZone::Undervalued
        } else if p > self.high {
            ValuationZone::Overvalued
        } else {
            ValuationZone::Fair
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_are_fair() {
        let t = ZoneThresholds::default();
        assert_eq!(t.classify(Some(29.99)), Some(ValuationZone::Undervalued));
        assert_eq!(t.classify(Some(30.0)), Some(ValuationZone::Fair));
        assert_eq!(t.classify(Some(70.0)), Some(ValuationZone::Fair));
        assert_eq!(t.classify(Some(70.01)), Some(ValuationZone::Overvalued));
    }

    #[test]
    fn undefined_percentile_has_no_zone() {
        assert_eq!(ZoneThresholds::default().classify(None), None);
    }

    #[test]
    fn validity() {
        assert!(ZoneThresholds::default().is_valid());
        assert!(!ZoneThresholds { low: 70.0, high: 30.0 }.is_valid());
        assert!(!ZoneThresholds { low: -1.0, high: 30.0 }.is_valid());
        assert!(!ZoneThresholds { low: 10.0, high: 130.0 }.is_valid());
    }
}
