//! Mock collaborators and fixtures shared by engine and worker tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;

use crate::collaborators::{
    AssignmentService, CollaboratorError, IdentityDirectory, ItemDraft, ItemRef,
    NotificationService, StageDirectory, WorkItemService,
};
use crate::engine::RuleExecutor;
use crate::schema::RecurringRule;
use crate::settings::StaticSettings;
use crate::store::{MemoryRuleStore, MemoryTransaction};

/// Thursday 2026-10-15 10:00 UTC.
pub fn thursday_10am() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 15, 10, 0, 0).unwrap()
}

/// Active daily rule due one minute before `thursday_10am`.
pub fn daily_rule(id: &str) -> RecurringRule {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "processId": "proc-1",
        "name": format!("Rule {}", id),
        "template": {
            "title": "Check {{current_date}}",
            "description": "Week {{week_number}}",
            "priority": "high",
            "dueInDays": 2,
            "data": { "month": "{{current_month}}", "n": 1 },
            "tags": ["recurring"]
        },
        "scheduleType": "daily",
        "scheduleConfig": { "interval": 1, "time": "09:00" },
        "timezone": "UTC",
        "isActive": true,
        "nextExecutionAt": "2026-10-15T09:59:00Z"
    }))
    .unwrap()
}

// ── Stages ──────────────────────────────────────────────────────────

pub struct MockStages {
    pub default_stage: Option<String>,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl MockStages {
    pub fn with_default(stage: &str) -> Self {
        Self {
            default_stage: Some(stage.to_string()),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            default_stage: None,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl StageDirectory for MockStages {
    async fn resolve_stage(
        &self,
        _process_id: &str,
        hint: Option<&str>,
    ) -> Result<Option<String>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CollaboratorError::Unavailable("stage directory down".into()));
        }
        match hint {
            Some(h) if h.starts_with("stage-") => Ok(Some(h.to_string())),
            _ => Ok(self.default_stage.clone()),
        }
    }
}

// ── Identities ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockIdentities {
    pub active: HashSet<String>,
}

impl MockIdentities {
    pub fn with_users(users: &[&str]) -> Self {
        Self {
            active: users.iter().map(|u| u.to_string()).collect(),
        }
    }
}

#[async_trait::async_trait]
impl IdentityDirectory for MockIdentities {
    async fn resolve_user(&self, hint: &str) -> Result<Option<String>, CollaboratorError> {
        Ok(self.active.get(hint).cloned())
    }
}

// ── Work items ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockWorkItems {
    /// Rule ids whose item creation fails.
    pub fail_for: HashSet<String>,
    /// When set, every create bumps the stored rule's count, as a competing
    /// writer would.
    pub interfere_with: Option<MemoryRuleStore>,
    /// Rule ids whose item creation panics.
    pub panic_for: HashSet<String>,
    /// Sleep inside every create, to hold a tick open.
    pub delay: Option<Duration>,
    pub created: Mutex<Vec<ItemDraft>>,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    /// Highest number of creates seen running at once.
    pub max_in_flight: AtomicUsize,
}

impl MockWorkItems {
    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            fail_for: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn panicking_for(ids: &[&str]) -> Self {
        Self {
            panic_for: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub async fn created(&self) -> Vec<ItemDraft> {
        self.created.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl WorkItemService<MemoryTransaction> for MockWorkItems {
    async fn create(
        &self,
        _tx: &mut MemoryTransaction,
        draft: &ItemDraft,
    ) -> Result<ItemRef, CollaboratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_for.contains(&draft.rule_id) {
            panic!("work item service crashed on {}", draft.rule_id);
        }
        if let Some(delay) = self.delay {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.fail_for.contains(&draft.rule_id) {
            return Err(CollaboratorError::Rejected("ticket table full".into()));
        }
        if let Some(store) = &self.interfere_with {
            if let Some(mut rule) = store.get(&draft.rule_id).await {
                rule.execution_count += 1;
                store.insert(rule).await;
            }
        }
        self.created.lock().await.push(draft.clone());
        Ok(ItemRef(format!("item-{}", n + 1)))
    }
}

// ── Assignments / notifications ─────────────────────────────────────

#[derive(Default)]
pub struct MockAssignments {
    pub fail: bool,
    pub assigned: Mutex<Vec<(ItemRef, String)>>,
}

#[async_trait::async_trait]
impl AssignmentService for MockAssignments {
    async fn assign(&self, item: &ItemRef, user_id: &str) -> Result<(), CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Unavailable("assignment service down".into()));
        }
        self.assigned.lock().await.push((item.clone(), user_id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockNotifications {
    pub sent: Mutex<Vec<(Vec<String>, String)>>,
}

#[async_trait::async_trait]
impl NotificationService for MockNotifications {
    async fn notify(&self, user_ids: &[String], message: &str) -> Result<(), CollaboratorError> {
        self.sent.lock().await.push((user_ids.to_vec(), message.to_string()));
        Ok(())
    }
}

// ── Fixture ─────────────────────────────────────────────────────────

pub struct Fixture {
    pub store: Arc<MemoryRuleStore>,
    pub stages: Arc<MockStages>,
    pub work_items: Arc<MockWorkItems>,
    pub executor: Arc<RuleExecutor<MemoryRuleStore>>,
}

impl Fixture {
    pub async fn new(rules: Vec<RecurringRule>) -> Self {
        Self::with(rules, MockStages::with_default("stage-open"), MockWorkItems::default()).await
    }

    pub async fn with(rules: Vec<RecurringRule>, stages: MockStages, work_items: MockWorkItems) -> Self {
        let store = MemoryRuleStore::new();
        for rule in rules {
            store.insert(rule).await;
        }
        Self::on_store(store, stages, work_items)
    }

    /// Wire mocks around an existing store.
    pub fn on_store(store: MemoryRuleStore, stages: MockStages, work_items: MockWorkItems) -> Self {
        let store = Arc::new(store);
        let stages = Arc::new(stages);
        let work_items = Arc::new(work_items);
        let executor = RuleExecutor::new(
            Arc::clone(&store),
            stages.clone(),
            Arc::new(MockIdentities::with_users(&["alice"])),
            work_items.clone(),
            &StaticSettings::default(),
        );
        Self {
            store,
            stages,
            work_items,
            executor: Arc::new(executor),
        }
    }
}
