//! Audit logger
//!
//! Events enter a queue and a background task flushes them every
//! `flush_interval` (default 30 s) or immediately when the queue reaches
//! `max_queue_size` (default 10 000). Audit never drops: reaching the high
//! water mark triggers a flush rather than shedding events.
//!
//! Flush groups events by UTC date and appends newline-delimited JSON to
//! `audit_logs/audit_<YYYY-MM-DD>.jsonl`. Queries walk the date-range files
//! line by line; malformed lines are skipped with a warning, never raised to
//! the caller.

use parking_lot::Mutex;
use silo_core::{CancelToken, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::event::{AuditCategory, AuditEvent};

/// Default background flush period.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Default queue high-water mark.
pub const DEFAULT_MAX_QUEUE: usize = 10_000;

const LOG_SUBDIR: &str = "audit_logs";

/// Append-only audit logger with batched durable flush.
pub struct AuditLogger {
    dir: PathBuf,
    queue: Mutex<VecDeque<AuditEvent>>,
    flush_now: Notify,
    flush_interval: Duration,
    max_queue_size: usize,
}

impl AuditLogger {
    /// Create a logger writing under `<root>/audit_logs`.
    pub fn new(root: &Path) -> Result<Self> {
        let dir = root.join(LOG_SUBDIR);
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            queue: Mutex::new(VecDeque::new()),
            flush_now: Notify::new(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_queue_size: DEFAULT_MAX_QUEUE,
        })
    }

    /// Override the flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Override the queue high-water mark.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Directory the log files live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Enqueue one event. Never blocks and never drops; reaching the high
    /// water mark wakes the flusher instead.
    pub fn log(&self, event: AuditEvent) {
        let depth = {
            let mut queue = self.queue.lock();
            queue.push_back(event);
            queue.len()
        };
        if depth >= self.max_queue_size {
            self.flush_now.notify_one();
        }
    }

    /// Events currently waiting for a flush.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drain the queue to disk, grouping by UTC date.
    pub async fn flush(&self) -> Result<usize> {
        let drained: Vec<AuditEvent> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        if drained.is_empty() {
            return Ok(0);
        }

        let mut by_date: BTreeMap<chrono::NaiveDate, Vec<&AuditEvent>> = BTreeMap::new();
        for event in &drained {
            by_date
                .entry(event.timestamp.date_naive())
                .or_default()
                .push(event);
        }

        for (date, events) in by_date {
            let path = self.file_for(date);
            let mut lines = String::new();
            for event in events {
                lines.push_str(&serde_json::to_string(event)?);
                lines.push('\n');
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(lines.as_bytes()).await?;
            file.flush().await?;
        }
        debug!(count = drained.len(), "audit flush complete");
        Ok(drained.len())
    }

    /// Spawn the background flusher; returns its handle.
    pub fn spawn_flusher(self: &Arc<Self>) -> AuditFlusher {
        let logger = self.clone();
        let cancel = CancelToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(logger.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = logger.flush_now.notified() => {}
                }
                if task_cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = logger.flush().await {
                    warn!(error = %e, "audit flush failed; events remain queued");
                }
            }
            // Final drain on shutdown
            if let Err(e) = logger.flush().await {
                warn!(error = %e, "final audit flush failed");
            }
        });
        AuditFlusher {
            logger: self.clone(),
            cancel,
            handle,
        }
    }

    /// Query flushed events.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let mut out = Vec::new();
        for path in self.files_in_range(query.start, query.end)? {
            let content = tokio::fs::read_to_string(&path).await?;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AuditEvent>(line) {
                    Ok(event) => {
                        if query.matches(&event) {
                            out.push(event);
                        }
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping malformed audit line");
                    }
                }
            }
        }
        out.sort_by_key(|e| e.timestamp);
        Ok(out)
    }

    /// Aggregate counts over a date range.
    pub async fn statistics(
        &self,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<AuditStatistics> {
        let events = self
            .query(&AuditQuery {
                start,
                end,
                ..Default::default()
            })
            .await?;
        let mut stats = AuditStatistics {
            total: events.len(),
            ..Default::default()
        };
        for event in &events {
            *stats
                .by_category
                .entry(format!("{:?}", event.category))
                .or_default() += 1;
            *stats.by_action.entry(event.action.clone()).or_default() += 1;
            if !event.success {
                stats.failures += 1;
            }
        }
        Ok(stats)
    }

    fn file_for(&self, date: chrono::NaiveDate) -> PathBuf {
        self.dir.join(format!("audit_{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Log files whose date falls in `[start, end]`, sorted by name.
    fn files_in_range(
        &self,
        start: Option<chrono::DateTime<chrono::Utc>>,
        end: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(date) = name
                .strip_prefix("audit_")
                .and_then(|rest| rest.strip_suffix(".jsonl"))
                .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            else {
                continue;
            };
            if start.map_or(false, |s| date < s.date_naive()) {
                continue;
            }
            if end.map_or(false, |e| date > e.date_naive()) {
                continue;
            }
            files.push(entry.path());
        }
        files.sort();
        Ok(files)
    }
}

/// Handle to the background flusher task.
pub struct AuditFlusher {
    logger: Arc<AuditLogger>,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl AuditFlusher {
    /// Stop the flusher after a final drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        // Wake the select loop so it observes the cancellation promptly
        self.logger.flush_now.notify_one();
        let _ = self.handle.await;
    }
}

/// In-memory filters applied to flushed events.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Inclusive range start
    pub start: Option<chrono::DateTime<chrono::Utc>>,
    /// Inclusive range end
    pub end: Option<chrono::DateTime<chrono::Utc>>,
    /// Category filter
    pub category: Option<AuditCategory>,
    /// Exact action filter
    pub action: Option<String>,
    /// Actor id filter
    pub actor_id: Option<String>,
    /// Resource type filter
    pub resource_type: Option<String>,
    /// Resource id filter
    pub resource_id: Option<String>,
    /// Keep only failures
    pub failures_only: bool,
    /// Free-text match on actor name or resource id
    pub text: Option<String>,
}

impl AuditQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        if self.start.map_or(false, |s| event.timestamp < s) {
            return false;
        }
        if self.end.map_or(false, |e| event.timestamp > e) {
            return false;
        }
        if self.category.map_or(false, |c| event.category != c) {
            return false;
        }
        if self
            .action
            .as_deref()
            .map_or(false, |a| event.action != a)
        {
            return false;
        }
        if self
            .actor_id
            .as_deref()
            .map_or(false, |a| event.actor_id.as_deref() != Some(a))
        {
            return false;
        }
        if self
            .resource_type
            .as_deref()
            .map_or(false, |r| event.resource_type.as_deref() != Some(r))
        {
            return false;
        }
        if self
            .resource_id
            .as_deref()
            .map_or(false, |r| event.resource_id.as_deref() != Some(r))
        {
            return false;
        }
        if self.failures_only && event.success {
            return false;
        }
        if let Some(text) = &self.text {
            let in_actor = event
                .actor_name
                .as_deref()
                .map_or(false, |n| n.contains(text.as_str()));
            let in_resource = event
                .resource_id
                .as_deref()
                .map_or(false, |r| r.contains(text.as_str()));
            if !in_actor && !in_resource {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts over a query range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditStatistics {
    /// Total events in range
    pub total: usize,
    /// Count per category
    pub by_category: HashMap<String, usize>,
    /// Count per action
    pub by_action: HashMap<String, usize>,
    /// Events with `success = false`
    pub failures: usize,
}
