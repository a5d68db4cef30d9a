//! Change Processor
//!
//! Debounced, prioritized, backpressured dispatch of file-change events.
//! Events arrive on a bounded channel, queue per file, and collapse to the
//! latest event when their debounce timer fires. The debounce interval
//! stretches under high activity and shrinks for critical files; while the
//! activity detector reports suspension, fired batches are dropped and
//! counted as skipped. Queue overflow drops the lowest-priority tail.
//!
//! Dispatch order: deletions first, then critical files serially, then the
//! rest in parallel under the concurrency cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use cortex_core::types::now_ms;
use cortex_core::{ChangeEvent, ChangeKind, IndexingPriority};

use crate::activity::{ActivityDetector, ActivityIntensity};

/// Debounce clamp bounds.
const MIN_DEBOUNCE_MS: u64 = 100;
const MAX_DEBOUNCE_MS: u64 = 10_000;

/// Processor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub debounce_ms: u64,
    pub max_queue_size: usize,
    pub max_concurrent_files: usize,
    /// Events accepted per dispatched batch
    pub batch_size: usize,
    pub suspend_on_high_activity: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            max_queue_size: 100,
            max_concurrent_files: 5,
            batch_size: 50,
            suspend_on_high_activity: true,
        }
    }
}

/// Counters exposed by the processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub enqueued: u64,
    pub collapsed: u64,
    pub batches_dispatched: u64,
    pub files_reindexed: u64,
    pub files_removed: u64,
    pub skipped_suspended: u64,
    pub dropped_overflow: u64,
    pub filtered: u64,
}

/// One dispatched unit: the surviving events of a debounce window.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub events: Vec<ChangeEvent>,
    pub total_importance: f32,
    pub highest_priority: IndexingPriority,
}

/// Receiver of processed change batches, implemented by the indexer.
#[async_trait]
pub trait IndexDispatcher: Send + Sync {
    /// A file was deleted; drop its chunks and graph nodes.
    async fn remove_file(&self, relative_path: &str);

    /// A file needs reindexing at the given priority.
    async fn reindex_file(&self, relative_path: &str, priority: IndexingPriority);
}

/// Handle to a running processor.
pub struct ChangeProcessorHandle {
    sender: mpsc::Sender<ChangeEvent>,
    stats: Arc<Mutex<ProcessorStats>>,
    join: tokio::task::JoinHandle<()>,
}

impl ChangeProcessorHandle {
    /// The channel the watcher publishes into.
    pub fn sender(&self) -> mpsc::Sender<ChangeEvent> {
        self.sender.clone()
    }

    pub fn stats(&self) -> ProcessorStats {
        *self.stats.lock()
    }

    /// Close the intake and wait for in-flight batches to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = self.join.await;
    }
}

/// Spawn the processor loop.
pub fn spawn_processor(
    config: ProcessorConfig,
    dispatcher: Arc<dyn IndexDispatcher>,
    activity: Arc<Mutex<ActivityDetector>>,
) -> ChangeProcessorHandle {
    let (sender, receiver) = mpsc::channel(config.max_queue_size.max(1));
    let stats = Arc::new(Mutex::new(ProcessorStats::default()));
    let loop_stats = stats.clone();

    let join = tokio::spawn(async move {
        ProcessorLoop {
            config,
            dispatcher,
            activity,
            stats: loop_stats,
            pending: HashMap::new(),
            queued_events: 0,
        }
        .run(receiver)
        .await;
    });

    ChangeProcessorHandle {
        sender,
        stats,
        join,
    }
}

struct PendingFile {
    events: Vec<ChangeEvent>,
    deadline: tokio::time::Instant,
}

struct ProcessorLoop {
    config: ProcessorConfig,
    dispatcher: Arc<dyn IndexDispatcher>,
    activity: Arc<Mutex<ActivityDetector>>,
    stats: Arc<Mutex<ProcessorStats>>,
    pending: HashMap<String, PendingFile>,
    queued_events: usize,
}

impl ProcessorLoop {
    async fn run(mut self, mut receiver: mpsc::Receiver<ChangeEvent>) {
        loop {
            let next_deadline = self
                .pending
                .values()
                .map(|p| p.deadline)
                .min();

            eprintln!("DEBUG loop iter, next_deadline={:?}", next_deadline);
            tokio::select! {
                event = receiver.recv() => {
                    eprintln!("DEBUG recv {:?}", event.is_some());
                    match event {
                        Some(event) => self.enqueue(event),
                        None => break, // intake closed
                    }
                }
                _ = sleep_until_opt(next_deadline), if next_deadline.is_some() => {
                    eprintln!("DEBUG fire_due");
                    self.fire_due().await;
                }
            }
        }

        // Drain whatever is still pending before exiting.
        while !self.pending.is_empty() {
            let deadline = self.pending.values().map(|p| p.deadline).min();
            if let Some(deadline) = deadline {
                tokio::time::sleep_until(deadline).await;
            }
            self.fire_due().await;
        }
        info!("Change processor drained and stopped");
    }

    fn enqueue(&mut self, event: ChangeEvent) {
        if !event.should_index && event.kind != ChangeKind::Unlink {
            debug!(
                "Filtered {}: {}",
                event.relative_path,
                event.filter_reason.as_deref().unwrap_or("below threshold")
            );
            self.stats.lock().filtered += 1;
            return;
        }

        {
            let mut activity = self.activity.lock();
            activity.record(event.timestamp);
        }
        self.stats.lock().enqueued += 1;

        // Overflow: drop the lowest-priority queued event.
        if self.queued_events >= self.config.max_queue_size {
            self.drop_lowest_priority();
        }

        let debounce = self.debounce_for(&event);
        let deadline = tokio::time::Instant::now() + debounce;
        let entry = self
            .pending
            .entry(event.relative_path.clone())
            .or_insert_with(|| PendingFile {
                events: Vec::new(),
                deadline,
            });
        entry.deadline = deadline;
        entry.events.push(event);
        self.queued_events += 1;
    }

    /// Debounce = base × activity multiplier × priority multiplier,
    /// clamped to [100 ms, 10 s].
    fn debounce_for(&self, event: &ChangeEvent) -> Duration {
        let intensity = self.activity.lock().intensity(now_ms());
        let activity_mult = match intensity {
            ActivityIntensity::High => 3.0,
            ActivityIntensity::Medium => 1.5,
            ActivityIntensity::Low => 0.8,
        };
        let priority_mult = match event.priority {
            IndexingPriority::Critical => 0.5,
            IndexingPriority::Low => 2.0,
            _ => 1.0,
        };
        let ms = (self.config.debounce_ms as f64 * activity_mult * priority_mult) as u64;
        Duration::from_millis(ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS))
    }

    fn drop_lowest_priority(&mut self) {
        let victim = self
            .pending
            .iter()
            .flat_map(|(file, p)| p.events.iter().map(move |e| (file.clone(), e.priority, e.timestamp)))
            .min_by_key(|(_, priority, timestamp)| (*priority, std::cmp::Reverse(*timestamp)));

        if let Some((file, priority, timestamp)) = victim {
            if let Some(p) = self.pending.get_mut(&file) {
                if let Some(pos) = p
                    .events
                    .iter()
                    .position(|e| e.priority == priority && e.timestamp == timestamp)
                {
                    p.events.remove(pos);
                    self.queued_events -= 1;
                    self.stats.lock().dropped_overflow += 1;
                    warn!("Queue overflow, dropped {:?} event for {}", priority, file);
                }
                if p.events.is_empty() {
                    self.pending.remove(&file);
                }
            }
        }
    }

    async fn fire_due(&mut self) {
        let now = tokio::time::Instant::now();
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(file, _)| file.clone())
            .collect();
        if due.is_empty() {
            return;
        }

        let suspended = self.config.suspend_on_high_activity
            && self.activity.lock().suspend_processing(now_ms());

        let mut batches: Vec<(String, ChangeBatch)> = Vec::new();
        for file in due {
            let Some(pending) = self.pending.remove(&file) else { continue };
            let count = pending.events.len();
            self.queued_events -= count;

            if suspended {
                self.stats.lock().skipped_suspended += count as u64;
                debug!("Suspended, skipping {} events for {}", count, file);
                continue;
            }

            // Collapse to the latest event by timestamp; importance and
            // priority aggregate over the window.
            let total_importance: f32 = pending.events.iter().map(|e| e.importance).sum();
            let highest_priority = pending
                .events
                .iter()
                .map(|e| e.priority)
                .max()
                .unwrap_or(IndexingPriority::Medium);
            let latest = pending
                .events
                .into_iter()
                .max_by_key(|e| e.timestamp)
                .expect("non-empty pending entry");

            self.stats.lock().collapsed += (count as u64).saturating_sub(1);
            batches.push((
                file,
                ChangeBatch {
                    events: vec![latest],
                    total_importance,
                    highest_priority,
                },
            ));
        }

        if !batches.is_empty() {
            self.dispatch(batches).await;
        }
    }

    async fn dispatch(&mut self, batches: Vec<(String, ChangeBatch)>) {
        self.stats.lock().batches_dispatched += batches.len() as u64;

        let mut deletions: Vec<String> = Vec::new();
        let mut critical: Vec<(String, IndexingPriority)> = Vec::new();
        let mut normal: Vec<(String, IndexingPriority)> = Vec::new();

        for (file, batch) in batches {
            let latest = &batch.events[0];
            if latest.kind == ChangeKind::Unlink {
                deletions.push(file);
            } else if batch.highest_priority == IndexingPriority::Critical {
                critical.push((file, batch.highest_priority));
            } else {
                normal.push((file, batch.highest_priority));
            }
        }

        // Deletions first so dangling references resolve as unresolvable
        // before any rebuild.
        for file in deletions {
            self.dispatcher.remove_file(&file).await;
            self.stats.lock().files_removed += 1;
        }

        for (file, priority) in critical {
            self.dispatcher.reindex_file(&file, priority).await;
            self.stats.lock().files_reindexed += 1;
        }

        if !normal.is_empty() {
            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_files.max(1)));
            let mut set = JoinSet::new();
            for (file, priority) in normal {
                let dispatcher = self.dispatcher.clone();
                let semaphore = semaphore.clone();
                let stats = self.stats.clone();
                set.spawn(async move {
                    let _permit = semaphore.acquire().await;
                    dispatcher.reindex_file(&file, priority).await;
                    stats.lock().files_reindexed += 1;
                });
            }
            while set.join_next().await.is_some() {}
        }
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityConfig;
    use std::path::PathBuf;

    #[derive(Default)]
    struct RecordingDispatcher {
        reindexed: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IndexDispatcher for RecordingDispatcher {
        async fn remove_file(&self, relative_path: &str) {
            self.removed.lock().push(relative_path.to_string());
        }

        async fn reindex_file(&self, relative_path: &str, _priority: IndexingPriority) {
            self.reindexed.lock().push(relative_path.to_string());
        }
    }

    fn event(path: &str, kind: ChangeKind, priority: IndexingPriority, ts: u64) -> ChangeEvent {
        ChangeEvent {
            path: PathBuf::from(path),
            relative_path: path.to_string(),
            kind,
            timestamp: ts,
            priority,
            importance: 50.0,
            should_index: true,
            filter_reason: None,
        }
    }

    fn quiet_activity() -> Arc<Mutex<ActivityDetector>> {
        Arc::new(Mutex::new(ActivityDetector::new(ActivityConfig {
            suspend_rate: 1_000_000.0,
            ..Default::default()
        })))
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_collapse_to_one_batch() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let handle = spawn_processor(
            ProcessorConfig {
                debounce_ms: 500,
                ..Default::default()
            },
            dispatcher.clone(),
            quiet_activity(),
        );

        let sender = handle.sender();
        for i in 0..10 {
            sender
                .send(event("src/a.ts", ChangeKind::Change, IndexingPriority::Medium, 1_000 + i))
                .await
                .unwrap();
        }
        handle.shutdown().await;

        assert_eq!(dispatcher.reindexed.lock().len(), 1);
        let stats = {
            // Handle consumed; re-derive from dispatcher side.
            dispatcher.reindexed.lock().clone()
        };
        assert_eq!(stats, vec!["src/a.ts".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collapse_and_skip_counters() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let handle = spawn_processor(ProcessorConfig::default(), dispatcher.clone(), quiet_activity());

        let sender = handle.sender();
        for i in 0..10 {
            sender
                .send(event("src/a.ts", ChangeKind::Change, IndexingPriority::Medium, 1_000 + i))
                .await
                .unwrap();
        }
        // Give the loop a chance to fire the debounce.
        eprintln!("DEBUG before sleep");
        tokio::time::sleep(Duration::from_secs(2)).await;
        eprintln!("DEBUG after sleep");

        let stats = handle.stats();
        eprintln!("DEBUG stats={:?}", stats);
        assert_eq!(stats.batches_dispatched, 1);
        assert_eq!(stats.collapsed, 9);
        assert_eq!(stats.skipped_suspended, 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletions_dispatch_before_reindex() {
        let order = Arc::new(Mutex::new(Vec::<String>::new()));

        struct OrderDispatcher(Arc<Mutex<Vec<String>>>);
        #[async_trait]
        impl IndexDispatcher for OrderDispatcher {
            async fn remove_file(&self, path: &str) {
                self.0.lock().push(format!("remove:{}", path));
            }
            async fn reindex_file(&self, path: &str, _priority: IndexingPriority) {
                self.0.lock().push(format!("reindex:{}", path));
            }
        }

        let handle = spawn_processor(
            ProcessorConfig::default(),
            Arc::new(OrderDispatcher(order.clone())),
            quiet_activity(),
        );
        let sender = handle.sender();
        sender
            .send(event("src/b.ts", ChangeKind::Change, IndexingPriority::Medium, 1_000))
            .await
            .unwrap();
        sender
            .send(event("src/gone.ts", ChangeKind::Unlink, IndexingPriority::Medium, 1_001))
            .await
            .unwrap();
        handle.shutdown().await;

        let order = order.lock().clone();
        let remove_pos = order.iter().position(|s| s.starts_with("remove:")).unwrap();
        let reindex_pos = order.iter().position(|s| s.starts_with("reindex:")).unwrap();
        assert!(remove_pos < reindex_pos, "order was {:?}", order);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspension_skips_batches() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        // Suspend immediately: any rate trips the threshold.
        let activity = Arc::new(Mutex::new(ActivityDetector::new(ActivityConfig {
            suspend_rate: 0.0,
            window_ms: u64::MAX / 4,
            ..Default::default()
        })));
        let handle = spawn_processor(ProcessorConfig::default(), dispatcher.clone(), activity);

        let sender = handle.sender();
        sender
            .send(event("src/a.ts", ChangeKind::Change, IndexingPriority::Medium, now_ms()))
            .await
            .unwrap();
        handle.shutdown().await;

        assert!(dispatcher.reindexed.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_events_never_queue() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let handle = spawn_processor(ProcessorConfig::default(), dispatcher.clone(), quiet_activity());

        let sender = handle.sender();
        let mut filtered = event("img.dat", ChangeKind::Change, IndexingPriority::Skip, 1_000);
        filtered.should_index = false;
        filtered.filter_reason = Some("binary".to_string());
        sender.send(filtered).await.unwrap();
        handle.shutdown().await;

        assert!(dispatcher.reindexed.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_drops_lowest_priority() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let handle = spawn_processor(
            ProcessorConfig {
                max_queue_size: 5,
                debounce_ms: 5_000,
                ..Default::default()
            },
            dispatcher.clone(),
            quiet_activity(),
        );

        let sender = handle.sender();
        for i in 0..5 {
            let priority = if i == 0 {
                IndexingPriority::Low
            } else {
                IndexingPriority::High
            };
            sender
                .send(event(&format!("src/f{}.ts", i), ChangeKind::Change, priority, 1_000 + i))
                .await
                .unwrap();
        }
        // The sixth event overflows the queue; the Low one goes.
        sender
            .send(event("src/late.ts", ChangeKind::Change, IndexingPriority::High, 2_000))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = handle.stats();
        assert_eq!(stats.dropped_overflow, 1);
        handle.shutdown().await;

        let reindexed = dispatcher.reindexed.lock().clone();
        assert!(!reindexed.contains(&"src/f0.ts".to_string()));
        assert!(reindexed.contains(&"src/late.ts".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_priority_shortens_debounce() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let handle = spawn_processor(
            ProcessorConfig {
                debounce_ms: 1_000,
                ..Default::default()
            },
            dispatcher.clone(),
            quiet_activity(),
        );

        let sender = handle.sender();
        sender
            .send(event("src/core.ts", ChangeKind::Change, IndexingPriority::Critical, 1_000))
            .await
            .unwrap();

        // Critical multiplier 0.5 × low-activity 0.8 = 400ms; at 450ms the
        // batch is already out.
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(dispatcher.reindexed.lock().len(), 1);
        handle.shutdown().await;
    }
}
