use std::sync::atomic::{AtomicU64, Ordering};
use tracing::instrument;

#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, value: u64) {
        self.count.fetch_add(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Live counters of a synchronization run, shared by every task of the run.
#[derive(Debug)]
pub struct SyncStats {
    /// secrets handed to a transfer worker
    pub read: Counter,
    /// secrets written (or that would have been written, in dry-run mode)
    pub written: Counter,
    /// secrets left alone because they already exist at the destination
    pub skipped: Counter,
    pub errors: Counter,
    start_time: std::time::Instant,
}

impl SyncStats {
    pub fn new() -> Self {
        Self {
            read: Counter::new(),
            written: Counter::new(),
            skipped: Counter::new(),
            errors: Counter::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn get_duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    #[instrument(skip(self))]
    pub fn summary(&self) -> Summary {
        Summary {
            read: self.read.get(),
            written: self.written.get(),
            skipped: self.skipped.get(),
            errors: self.errors.get(),
        }
    }
}

impl Default for SyncStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub read: u64,
    pub written: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl Summary {
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            read: self.read + other.read,
            written: self.written + other.written,
            skipped: self.skipped + other.skipped,
            errors: self.errors + other.errors,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "secrets read: {}\n\
            secrets written: {}\n\
            secrets skipped (already exist): {}\n\
            errors: {}",
            self.read, self.written, self.skipped, self.errors,
        )
    }
}

pub struct ProgressPrinter<'a> {
    stats: &'a SyncStats,
    last_read: u64,
    last_update: std::time::Instant,
}

impl<'a> ProgressPrinter<'a> {
    pub fn new(stats: &'a SyncStats) -> Self {
        Self {
            stats,
            last_read: stats.read.get(),
            last_update: std::time::Instant::now(),
        }
    }

    /// Single line used as the progress bar message.
    pub fn status_line(&self) -> String {
        let summary = self.stats.summary();
        format!(
            "read: {} | written: {} | skipped: {} | errors: {}",
            summary.read, summary.written, summary.skipped, summary.errors
        )
    }

    pub fn print(&mut self) -> anyhow::Result<String> {
        let time_now = std::time::Instant::now();
        let summary = self.stats.summary();
        let total_duration_secs = self.stats.get_duration().as_secs_f64();
        let curr_duration_secs = (time_now - self.last_update).as_secs_f64();
        let average_rate = summary.read as f64 / total_duration_secs;
        let current_rate = (summary.read - self.last_read) as f64 / curr_duration_secs;
        // update self
        self.last_read = summary.read;
        self.last_update = time_now;
        Ok(format!(
            "---------------------\n\
            SECRETS:\n\
            average: {:>10.2} secrets/s\n\
            current: {:>10.2} secrets/s\n\
            -----------------------\n\
            read:    {:>10}\n\
            written: {:>10}\n\
            skipped: {:>10}\n\
            errors:  {:>10}",
            average_rate,
            current_rate,
            summary.read,
            summary.written,
            summary.skipped,
            summary.errors,
        ))
    }
}
