//! Application configuration loaded from TOML.
//!
//! ```toml
//! cache_dir = "/var/lib/valrank"
//! default_years = 10
//! log_level = "info"
//! provider = "csv"
//! csv_dir = "./exports"
//!
//! [thresholds.pe]
//! low = 20
//! high = 80
//! ```
//!
//! Every key is optional.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::domain::MetricSelector;
use crate::percentile::ZoneThresholds;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {metric} thresholds: low {low} / high {high} (need 0 <= low < high <= 100)")]
    InvalidThresholds {
        metric: MetricSelector,
        low: f64,
        high: f64,
    },

    #[error("default_years must be at least 1")]
    InvalidYears,
}

/// Which data provider feeds the sync pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Yahoo,
    Csv,
    Synthetic,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yahoo" => Ok(Self::Yahoo),
            "csv" => Ok(Self::Csv),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(format!("unknown provider '{other}' (expected yahoo, csv or synthetic)")),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Yahoo => "yahoo",
            Self::Csv => "csv",
            Self::Synthetic => "synthetic",
        })
    }
}

/// Preset look-back windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookbackRange {
    Years(u32),
    All,
}

impl LookbackRange {
    pub const PRESETS: [LookbackRange; 5] = [
        Self::Years(1),
        Self::Years(3),
        Self::Years(5),
        Self::Years(10),
        Self::All,
    ];

    pub fn years(&self) -> Option<u32> {
        match self {
            Self::Years(y) => Some(*y),
            Self::All => None,
        }
    }

    /// Start of the window ending at `end`, 365 days per year. `None` for all history.
    pub fn start_from(&self, end: NaiveDate) -> Option<NaiveDate> {
        self.years()
            .map(|y| end - Duration::days(i64::from(y) * 365))
    }

    /// Like [`start_from`](Self::start_from), with `All` mapped to [`earliest_history`].
    pub fn start_or_earliest(&self, end: NaiveDate) -> NaiveDate {
        self.start_from(end).unwrap_or_else(earliest_history)
    }
}

/// First trading day of the Shanghai exchange; nothing older is fetched.
pub fn earliest_history() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 12, 19).unwrap_or(NaiveDate::MIN)
}

impl FromStr for LookbackRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "all" {
            return Ok(Self::All);
        }
        s.strip_suffix('y')
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|&n| n > 0)
            .map(Self::Years)
            .ok_or_else(|| format!("invalid range '{s}' (expected 1y, 3y, 5y, 10y or all)"))
    }
}

impl fmt::Display for LookbackRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Years(y) => write!(f, "{y}y"),
            Self::All => f.write_str("all"),
        }
    }
}

/// Zone thresholds per metric.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub pe: ZoneThresholds,
    pub pb: ZoneThresholds,
}

impl Thresholds {
    pub fn for_metric(&self, metric: MetricSelector) -> &ZoneThresholds {
        match metric {
            MetricSelector::Pe => &self.pe,
            MetricSelector::Pb => &self.pb,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache_dir: PathBuf,
    pub default_years: u32,
    pub log_level: String,
    pub provider: ProviderKind,
    /// Directory of CSV exports for the `csv` provider.
    pub csv_dir: PathBuf,
    pub thresholds: Thresholds,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            default_years: 10,
            log_level: "info".to_string(),
            provider: ProviderKind::default(),
            csv_dir: PathBuf::from("exports"),
            thresholds: Thresholds::default(),
        }
    }
}

/// `{config_dir}/valrank/config.toml`, when the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("valrank").join("config.toml"))
}

/// `{data_dir}/valrank`, or `./data` when the platform has no data directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("valrank"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load `explicit` if given, else the default config file if it exists,
    /// else built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_years == 0 {
            return Err(ConfigError::InvalidYears);
        }
        for metric in MetricSelector::ALL {
            let t = self.thresholds.for_metric(metric);
            if !t.is_valid() {
                return Err(ConfigError::InvalidThresholds {
                    metric,
                    low: t.low,
                    high: t.high,
                });
            }
        }
        Ok(())
    }

    pub fn default_range(&self) -> LookbackRange {
        LookbackRange::Years(self.default_years)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.default_years, 10);
        assert_eq!(config.thresholds.pe, ZoneThresholds { low: 30.0, high: 70.0 });
        assert_eq!(config.provider, ProviderKind::Yahoo);
    }

    #[test]
    fn partial_toml_overrides() {
        let config = AppConfig::from_toml(
            r#"
            cache_dir = "/tmp/vr"
            provider = "csv"
            default_years = 5

            [thresholds.pb]
            low = 20
            high = 80
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/vr"));
        assert_eq!(config.provider, ProviderKind::Csv);
        assert_eq!(config.default_range(), LookbackRange::Years(5));
        assert_eq!(config.thresholds.pb.low, 20.0);
        assert_eq!(config.thresholds.pe.low, 30.0);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let err = AppConfig::from_toml("[thresholds.pe]\nlow = 80\nhigh = 20\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThresholds { metric: MetricSelector::Pe, .. }));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valrank.toml");
        std::fs::write(&path, "default_years = 3\n").unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap().default_years, 3);

        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            AppConfig::load(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn unknown_provider_is_parse_error() {
        assert!(matches!(
            AppConfig::from_toml("provider = \"bloomberg\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn lookback_parsing_and_start() {
        assert_eq!("3y".parse::<LookbackRange>().unwrap(), LookbackRange::Years(3));
        assert_eq!("ALL".parse::<LookbackRange>().unwrap(), LookbackRange::All);
        assert!("0y".parse::<LookbackRange>().is_err());
        assert!("3m".parse::<LookbackRange>().is_err());

        let end = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        assert_eq!(
            LookbackRange::Years(1).start_from(end),
            NaiveDate::from_ymd_opt(2023, 7, 1)
        );
        assert_eq!(LookbackRange::All.start_from(end), None);
        assert_eq!(LookbackRange::All.start_or_earliest(end), earliest_history());
        assert_eq!(LookbackRange::PRESETS.len(), 5);
    }
}
