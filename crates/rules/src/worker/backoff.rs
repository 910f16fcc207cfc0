//! Per-rule failure backoff.
//!
//! After `threshold` consecutive failures a rule is skipped until
//! `now + base * 2^(failures - threshold)`, capped at `max`. The stored
//! schedule is never touched; a success forgets the rule.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Doublings beyond this cannot change a capped delay.
const MAX_DOUBLINGS: u32 = 20;

#[derive(Debug, Clone, Default)]
struct FailureState {
    consecutive: u32,
    retry_after: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct FailureBackoff {
    threshold: u32,
    base: Duration,
    max: Duration,
    rules: HashMap<String, FailureState>,
}

impl FailureBackoff {
    /// `threshold = 0` disables backoff.
    pub fn new(threshold: u32, base: Duration, max: Duration) -> Self {
        Self {
            threshold,
            base,
            max: max.max(base),
            rules: HashMap::new(),
        }
    }

    pub fn should_skip(&self, rule_id: &str, now: DateTime<Utc>) -> bool {
        self.rules
            .get(rule_id)
            .and_then(|s| s.retry_after)
            .is_some_and(|until| now < until)
    }

    /// Count a failure. Returns the retry instant when the rule enters or
    /// stays in backoff.
    pub fn record_failure(&mut self, rule_id: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let state = self.rules.entry(rule_id.to_string()).or_default();
        state.consecutive = state.consecutive.saturating_add(1);
        if self.threshold == 0 || state.consecutive < self.threshold {
            return None;
        }

        let doublings = (state.consecutive - self.threshold).min(MAX_DOUBLINGS);
        let delay = self
            .base
            .checked_mul(1u32 << doublings)
            .unwrap_or(self.max)
            .min(self.max);
        let until = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365));
        state.retry_after = Some(until);
        Some(until)
    }

    pub fn record_success(&mut self, rule_id: &str) {
        self.rules.remove(rule_id);
    }

    pub fn failures(&self, rule_id: &str) -> u32 {
        self.rules.get(rule_id).map_or(0, |s| s.consecutive)
    }

    /// Forget every rule not in `live`. Rules in backoff stay due, so an id
    /// missing from the due set was deleted, disabled, or rescheduled.
    pub fn retain_only<'a>(&mut self, live: impl IntoIterator<Item = &'a str>) {
        let live: HashSet<&str> = live.into_iter().collect();
        self.rules.retain(|id, _| live.contains(id.as_str()));
    }

    /// Number of rules with failure state.
    pub fn tracked(&self) -> usize {
        self.rules.len()
    }
}
