//! In-process mutual exclusion per rule id.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Tracks rule ids with an execution in flight.
#[derive(Debug, Clone, Default)]
pub struct RuleGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl RuleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `rule_id`. `None` if it is already claimed; the claim is
    /// released when the returned permit drops.
    pub fn try_acquire(&self, rule_id: &str) -> Option<RulePermit> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(rule_id.to_string()) {
            return None;
        }
        Some(RulePermit {
            rule_id: rule_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_held(&self, rule_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(rule_id)
    }
}

#[derive(Debug)]
pub struct RulePermit {
    rule_id: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RulePermit {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.rule_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_until_release() {
        let guard = RuleGuard::new();
        let permit = guard.try_acquire("r1").unwrap();
        assert!(guard.try_acquire("r1").is_none());
        assert!(guard.try_acquire("r2").is_some());
        assert!(guard.is_held("r1"));

        drop(permit);
        assert!(!guard.is_held("r1"));
        assert!(guard.try_acquire("r1").is_some());
    }
}
