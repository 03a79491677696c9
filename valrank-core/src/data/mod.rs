//! Data acquisition, coercion and caching

pub mod cache;
pub mod circuit_breaker;
pub mod coerce;
pub mod csv_import;
pub mod provider;
pub mod registry;
pub mod sync;
pub mod synthetic;
pub mod yahoo;

pub use cache::{CacheMeta, CacheStatus, ValuationCache};
pub use circuit_breaker::CircuitBreaker;
pub use coerce::{coerce_f64, rows_to_series};
pub use csv_import::CsvProvider;
pub use provider::{
    CancelToken, DataError, DataProvider, DataSource, FetchResult, NoProgress, RawField, RawRow,
    SyncProgress, SyncStage, TracingProgress,
};
pub use registry::{RegistryEntry, SecurityRegistry};
pub use sync::{Freshness, SyncOutcome, SyncPipeline, SyncRequest, SyncSource};
pub use synthetic::SyntheticProvider;
pub use yahoo::YahooProvider;
