pub mod aggregator;
pub mod app;
pub mod config;
pub mod detection;
pub mod live;
pub mod logging;
pub mod metrics;
pub mod redis_client;
pub mod store;
pub mod taxonomy;
pub mod time_window;
pub mod types;
pub mod working_set;

pub use aggregator::{aggregate, aggregate_in, try_aggregate, StatisticsSnapshot};
pub use taxonomy::{age_group_of, polarity_of, AgeGroup, Emotion, Polarity};
pub use time_window::{TimeRange, TimeWindowSelector};
pub use types::{DetectionRecord, RawDetectionRecord, ValidationError};
