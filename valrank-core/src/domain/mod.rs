//! Domain types for ValRank

pub mod code;
pub mod metric;
pub mod record;
pub mod series;

pub use code::{CodeError, Market, SecurityCode};
pub use metric::{MetricSelector, UnknownMetric};
pub use record::{FieldSet, Record};
pub use series::{Series, SeriesError};
