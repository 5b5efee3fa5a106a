//! Workspace message harvest and per-period analysis.
//!
//! The engine walks a team workspace's channels through a rate-limited API
//! client, stores every message once, groups normalized messages into
//! author-period buckets, and schedules exactly one narrative analysis per
//! bucket.

pub mod buckets;
pub mod channels;
pub mod config;
pub mod context;
pub mod generator;
pub mod harvest;
pub mod history;
pub mod normalize;
pub mod period;
pub mod progress;
pub mod scheduler;
pub mod threads;
pub mod walker;
pub mod window;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub use buckets::{AuthorPeriodBucket, BucketBook, BucketMessage};
pub use channels::{enumerate_channels, ChannelFilter};
pub use config::{default_config_path, default_database_path, ConfigError, HarvestConfig};
pub use context::{RunContext, RunStats};
pub use generator::{ChatCompletionsGenerator, NarrativeGenerator, NarrativeRequest};
pub use harvest::{HarvestOptions, Harvester, RunReport, StoreStatus};
pub use period::{CalendarScheme, Period};
pub use progress::{emit_result, ProgressSink, Reporter, StdoutSink, TracingSink};
pub use scheduler::{AnalysisScheduler, BucketOutcome, OutcomeTally, SchedulerReport};
pub use threads::expand_thread;
pub use walker::{ApiWalker, HttpTransport, Page, PageRequest, RawResponse, RetryPolicy, Transport};
pub use window::CollectionWindow;
pub use workspace::{HarvestedMessage, MessageRejected};

pub use harvest_store::{
    AnalysisKey, AnalysisRecord, Author, Channel, ChannelKind, HarvestStore, SqliteStore,
    StoreCounts, StoredMessage,
};
