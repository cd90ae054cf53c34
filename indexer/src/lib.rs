//! Catalog feed pipeline: formats, parsing, validation, bounded download, full and delta
//! processors, and the feed scheduler.

pub mod config;
pub mod delta;
pub mod download;
pub mod error;
pub mod format;
pub mod full;
pub mod job;
pub mod parse;
pub mod scheduler;
pub mod transform;

pub use config::{AppConfig, ConfigError, FeedConfig, FeedJobSpec, SchedulerConfig};
pub use delta::{DeltaFeedProcessor, DeltaReport};
pub use download::{Downloader, FeedSource};
pub use error::{FeedError, ValidationError};
pub use format::FeedFormat;
pub use full::{FullFeedProcessor, FullReport};
pub use job::{FeedJob, FeedKind, JobStatus, RunReport};
pub use scheduler::Scheduler;
