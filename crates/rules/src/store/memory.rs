//! In-memory rule store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::{RuleStore, RuleTransaction, StoreError};
use crate::schema::RecurringRule;

type RuleMap = Arc<Mutex<HashMap<String, RecurringRule>>>;

/// Map-backed [`RuleStore`]. Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuleStore {
    rules: RuleMap,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule.
    pub async fn insert(&self, rule: RecurringRule) {
        self.rules.lock().await.insert(rule.id.clone(), rule);
    }

    /// Snapshot of a stored rule.
    pub async fn get(&self, id: &str) -> Option<RecurringRule> {
        self.rules.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rules.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rules.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl RuleStore for MemoryRuleStore {
    type Tx = MemoryTransaction;

    async fn get_by_id(&self, id: &str) -> Result<Option<RecurringRule>, StoreError> {
        Ok(self.get(id).await)
    }

    async fn due_set(&self, now: DateTime<Utc>) -> Result<Vec<RecurringRule>, StoreError> {
        let rules = self.rules.lock().await;
        let mut due: Vec<RecurringRule> = rules.values().filter(|r| r.is_due(now)).cloned().collect();
        due.sort_by(|a, b| {
            a.next_execution_at
                .cmp(&b.next_execution_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(due)
    }

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        Ok(MemoryTransaction {
            rules: Arc::clone(&self.rules),
            staged: Vec::new(),
        })
    }

    async fn record_error(&self, id: &str, message: &str) -> Result<(), StoreError> {
        let mut rules = self.rules.lock().await;
        let rule = rules
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        rule.last_execution_error = Some(message.to_string());
        Ok(())
    }
}

/// Transaction over a [`MemoryRuleStore`].
///
/// Writes are staged and applied on commit, after re-checking each staged
/// rule's `execution_count` against the stored one.
#[derive(Debug)]
pub struct MemoryTransaction {
    rules: RuleMap,
    staged: Vec<(RecurringRule, u32)>,
}

#[async_trait::async_trait]
impl RuleTransaction for MemoryTransaction {
    async fn load_for_update(&mut self, id: &str) -> Result<Option<RecurringRule>, StoreError> {
        if let Some((rule, _)) = self.staged.iter().rev().find(|(r, _)| r.id == id) {
            return Ok(Some(rule.clone()));
        }
        Ok(self.rules.lock().await.get(id).cloned())
    }

    async fn update(
        &mut self,
        rule: &RecurringRule,
        expected_execution_count: u32,
    ) -> Result<bool, StoreError> {
        let current = match self.rules.lock().await.get(&rule.id) {
            Some(stored) => stored.execution_count,
            None => return Err(StoreError::NotFound(rule.id.clone())),
        };
        if current != expected_execution_count {
            debug!(rule_id = %rule.id, current, expected = expected_execution_count, "stale update rejected");
            return Ok(false);
        }
        self.staged.push((rule.clone(), expected_execution_count));
        Ok(true)
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut rules = self.rules.lock().await;
        for (rule, expected) in &self.staged {
            match rules.get(&rule.id) {
                Some(stored) if stored.execution_count == *expected => {}
                Some(_) => return Err(StoreError::Conflict(rule.id.clone())),
                None => return Err(StoreError::NotFound(rule.id.clone())),
            }
        }
        for (rule, _) in self.staged {
            rules.insert(rule.id.clone(), rule);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
