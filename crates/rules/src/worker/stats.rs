use chrono::{DateTime, Utc};
use serde::Serialize;

/// Running counters since the poller was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStats {
    pub ticks: u64,
    /// Successful executions (items created).
    pub executed: u64,
    /// Failed executions plus failed due-set queries.
    pub errors: u64,
    /// Rules retired because their execution limit was reached.
    pub retired: u64,
    /// Due rules passed over while backing off.
    pub skipped_backoff: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
}

/// Outcome of a single tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub due: usize,
    pub executed: usize,
    pub errors: usize,
    pub retired: usize,
    pub skipped: usize,
}

impl PollerStats {
    pub(crate) fn absorb(&mut self, at: DateTime<Utc>, report: &TickReport) {
        self.ticks += 1;
        self.last_check = Some(at);
        self.executed += report.executed as u64;
        self.errors += report.errors as u64;
        self.retired += report.retired as u64;
        self.skipped_backoff += report.skipped as u64;
        if report.executed > 0 {
            self.last_execution = Some(at);
        }
    }
}
