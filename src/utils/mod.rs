//! Utility modules

pub mod alerts;
pub mod database;
pub mod decoder;
pub mod logger;
pub mod metrics;
pub mod persistent_set;
pub mod rate_limiter;
pub mod solana;
pub mod window;

pub use alerts::{AlertRecord, AlertService};
pub use database::DatabaseService;
pub use logger::init_logger;
pub use metrics::MetricsService;
pub use persistent_set::PersistentSet;
pub use rate_limiter::RateLimiter;
pub use solana::SolanaService;
pub use window::{WindowEntry, WindowedAggregator};
