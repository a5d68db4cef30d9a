//! # cortex-watch
//!
//! The live change pipeline: a notify-backed filesystem watcher publishing
//! analyzed change events into an owned bounded channel, an activity
//! detector that modulates debounce and suspends processing under bulk
//! churn, and a priority change processor that collapses rapid edits and
//! dispatches batched reindex work.

pub mod activity;
pub mod processor;
pub mod watcher;

pub use activity::{ActivityConfig, ActivityDetector, ActivityIntensity};
pub use processor::{
    spawn_processor, ChangeBatch, ChangeProcessorHandle, IndexDispatcher, ProcessorConfig,
    ProcessorStats,
};
pub use watcher::{FileWatcher, WatchError, WatcherConfig};
