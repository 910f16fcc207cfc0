//! Per-rule execution history kept in memory.
//!
//! Each rule gets a capped FIFO of [`AuditEntry`] values (default 500). The
//! engine writes one entry per phase it passes through; the poller adds
//! backoff notes. Intended for operator introspection, not durable audit.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_ENTRIES_PER_RULE: usize = 500;
const DEFAULT_QUERY_LIMIT: usize = 100;

/// Severity of an audit entry, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Step of a rule execution that produced an entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Load,
    LimitCheck,
    Render,
    StageResolution,
    AssigneeResolution,
    /// Next fire computation, before the item is created.
    Schedule,
    ItemCreation,
    Persist,
    Assignment,
    Notification,
    Complete,
    Backoff,
}

/// One recorded step of a rule execution.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub rule_id: String,
    pub level: AuditLevel,
    pub phase: ExecutionPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Filter for [`AuditLog::query`]. Empty fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    /// Minimum level, inclusive.
    pub level: Option<AuditLevel>,
    /// Only entries from this phase.
    pub phase: Option<ExecutionPhase>,
    /// Maximum entries returned (default 100).
    pub limit: Option<usize>,
    /// Only entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// In-memory per-rule audit log with FIFO eviction.
pub struct AuditLog {
    entries: RwLock<HashMap<String, VecDeque<AuditEntry>>>,
    max_entries_per_rule: usize,
}

impl AuditLog {
    /// Create an audit log with the default cap of 500 entries per rule.
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES_PER_RULE)
    }

    /// Create an audit log with a custom per-rule entry cap (at least 1).
    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries_per_rule: max.max(1),
        }
    }

    /// Append an entry without details.
    pub fn record(
        &self,
        rule_id: &str,
        level: AuditLevel,
        phase: ExecutionPhase,
        message: impl Into<String>,
    ) {
        self.record_with_details(rule_id, level, phase, message, None);
    }

    /// Append an entry with optional structured details.
    pub fn record_with_details(
        &self,
        rule_id: &str,
        level: AuditLevel,
        phase: ExecutionPhase,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            rule_id: rule_id.to_string(),
            level,
            phase,
            message: message.into(),
            details,
        };

        // A panic elsewhere must not silence the audit trail.
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let deque = guard.entry(rule_id.to_string()).or_default();
        deque.push_back(entry);
        while deque.len() > self.max_entries_per_rule {
            deque.pop_front();
        }
    }

    /// Entries for `rule_id`, newest first.
    pub fn query(&self, rule_id: &str, query: &AuditQuery) -> Vec<AuditEntry> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let Some(deque) = guard.get(rule_id) else {
            return Vec::new();
        };

        deque
            .iter()
            .rev()
            .filter(|e| query.level.map_or(true, |l| e.level >= l))
            .filter(|e| query.phase.map_or(true, |p| e.phase == p))
            .filter(|e| query.since.map_or(true, |s| e.timestamp >= s))
            .take(query.limit.unwrap_or(DEFAULT_QUERY_LIMIT))
            .cloned()
            .collect()
    }

    /// Most recent entry for `rule_id`, if any.
    pub fn last(&self, rule_id: &str) -> Option<AuditEntry> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(rule_id).and_then(|d| d.back().cloned())
    }

    /// Drop every entry for `rule_id`.
    pub fn clear(&self, rule_id: &str) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(rule_id);
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
