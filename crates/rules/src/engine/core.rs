//! [`RuleExecutor`] construction and public entry points.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::audit_log::{AuditLevel, AuditLog, ExecutionPhase};
use crate::collaborators::{
    AssignmentService, IdentityDirectory, NotificationService, StageDirectory, WorkItemService,
};
use crate::schema::{ExecutionErrorKind, ExecutionResult, RecurringRule};
use crate::scheduler::ScheduleCalculator;
use crate::settings::SettingsProvider;
use crate::store::{RuleStore, StoreError};

use super::guard::RuleGuard;

/// Creator recorded on items when no actor is given.
pub const SYSTEM_ACTOR: &str = "system";

/// Executes recurring rules against a [`RuleStore`] and its collaborators.
pub struct RuleExecutor<S: RuleStore> {
    pub(super) store: Arc<S>,
    pub(super) stages: Arc<dyn StageDirectory>,
    pub(super) identities: Arc<dyn IdentityDirectory>,
    pub(super) work_items: Arc<dyn WorkItemService<S::Tx>>,
    pub(super) assignments: Option<Arc<dyn AssignmentService>>,
    pub(super) notifications: Option<Arc<dyn NotificationService>>,
    pub(super) calculator: ScheduleCalculator,
    pub(super) guard: RuleGuard,
    pub(super) audit: Arc<AuditLog>,
}

impl<S: RuleStore> RuleExecutor<S> {
    /// Executor with the required collaborators. Assignment and notification
    /// are off until attached with [`with_assignments`](Self::with_assignments)
    /// and [`with_notifications`](Self::with_notifications).
    pub fn new(
        store: Arc<S>,
        stages: Arc<dyn StageDirectory>,
        identities: Arc<dyn IdentityDirectory>,
        work_items: Arc<dyn WorkItemService<S::Tx>>,
        settings: &dyn SettingsProvider,
    ) -> Self {
        Self {
            store,
            stages,
            identities,
            work_items,
            assignments: None,
            notifications: None,
            calculator: ScheduleCalculator::new(settings),
            guard: RuleGuard::new(),
            audit: Arc::new(AuditLog::new()),
        }
    }

    /// Record an assignment for each item that has an assignee.
    pub fn with_assignments(mut self, service: Arc<dyn AssignmentService>) -> Self {
        self.assignments = Some(service);
        self
    }

    /// Notify the assignee of each new item.
    pub fn with_notifications(mut self, service: Arc<dyn NotificationService>) -> Self {
        self.notifications = Some(service);
        self
    }

    /// Share an audit log with other components (e.g. the poller).
    pub fn with_audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn calculator(&self) -> &ScheduleCalculator {
        &self.calculator
    }

    /// Execute `rule_id` at the current instant.
    pub async fn execute(&self, rule_id: &str, actor: Option<&str>) -> ExecutionResult {
        self.execute_at(rule_id, actor, Utc::now()).await
    }

    /// Manual trigger. Same semantics as [`execute`](Self::execute); the rule
    /// does not need to be due.
    pub async fn execute_now(&self, rule_id: &str, actor: Option<&str>) -> ExecutionResult {
        info!(rule_id = %rule_id, actor = actor.unwrap_or(SYSTEM_ACTOR), "manual execution requested");
        self.execute(rule_id, actor).await
    }

    /// Execute `rule_id` as if the current instant were `now`.
    pub async fn execute_at(
        &self,
        rule_id: &str,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> ExecutionResult {
        let Some(_permit) = self.guard.try_acquire(rule_id) else {
            warn!(rule_id = %rule_id, "execution already in progress");
            self.audit.record(
                rule_id,
                AuditLevel::Warning,
                ExecutionPhase::Load,
                "rejected: execution already in progress",
            );
            return ExecutionResult::failure(
                rule_id,
                None,
                ExecutionErrorKind::ConcurrentExecution,
                "another execution of this rule is in progress",
            );
        };

        match self.run(rule_id, actor, now).await {
            Ok(result) => result,
            Err(failure) => self.settle_failure(rule_id, failure).await,
        }
    }

    /// Rules due at `now` (default: the current instant). Read-only.
    pub async fn list_due(&self, now: Option<DateTime<Utc>>) -> Result<Vec<RecurringRule>, StoreError> {
        self.store.due_set(now.unwrap_or_else(Utc::now)).await
    }
}
