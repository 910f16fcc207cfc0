//! The transactional execution pipeline and its post-commit side effects.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use crate::audit_log::{AuditLevel, ExecutionPhase};
use crate::collaborators::{ItemDraft, ItemRef};
use crate::schema::{ExecutionErrorKind, ExecutionResult, RecurringRule, RuleTemplate};
use crate::store::{RuleStore, RuleTransaction, StoreError};
use crate::templates::{render_template, TemplateContext};

use super::core::{RuleExecutor, SYSTEM_ACTOR};

/// A failed execution before it is turned into a result.
pub(super) struct Failure {
    kind: ExecutionErrorKind,
    phase: ExecutionPhase,
    message: String,
    rule: Option<RecurringRule>,
}

impl Failure {
    fn new(kind: ExecutionErrorKind, phase: ExecutionPhase, message: impl Into<String>) -> Self {
        Self {
            kind,
            phase,
            message: message.into(),
            rule: None,
        }
    }

    fn with_rule(mut self, rule: &RecurringRule) -> Self {
        self.rule = Some(rule.clone());
        self
    }

    fn persistence(phase: ExecutionPhase, e: StoreError) -> Self {
        Self::new(ExecutionErrorKind::PersistenceError, phase, e.to_string())
    }

    /// Failures of the unit of work proper leave a note on the rule.
    fn is_recorded(&self) -> bool {
        matches!(
            self.kind,
            ExecutionErrorKind::StageResolutionFailed
                | ExecutionErrorKind::TicketCreationFailed
                | ExecutionErrorKind::InvalidSchedule
                | ExecutionErrorKind::PersistenceError
        )
    }
}

/// What the transactional phase decided.
enum Outcome {
    /// Limit already reached; the rule was retired without firing.
    Retired(RecurringRule),
    Fired {
        rule: RecurringRule,
        template: RuleTemplate,
        item: ItemRef,
        assignee: Option<String>,
        warnings: Vec<String>,
    },
}

impl<S: RuleStore> RuleExecutor<S> {
    /// Run the unit of work, commit it, then perform best-effort side effects.
    pub(super) async fn run(
        &self,
        rule_id: &str,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ExecutionResult, Failure> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| Failure::persistence(ExecutionPhase::Load, e))?;

        let outcome = match self.fire(&mut tx, rule_id, actor, now).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                if let Err(e) = tx.rollback().await {
                    warn!(rule_id = %rule_id, error = %e, "rollback failed");
                }
                return Err(failure);
            }
        };

        if let Err(e) = tx.commit().await {
            let failure = Failure::persistence(ExecutionPhase::Persist, e);
            return Err(match &outcome {
                Outcome::Retired(rule) | Outcome::Fired { rule, .. } => failure.with_rule(rule),
            });
        }

        match outcome {
            Outcome::Retired(rule) => {
                info!(rule_id = %rule_id, executions = rule.execution_count, "execution limit reached, rule retired");
                self.audit.record(
                    rule_id,
                    AuditLevel::Info,
                    ExecutionPhase::LimitCheck,
                    format!("limit of {} executions reached; rule retired", rule.execution_count),
                );
                Ok(ExecutionResult::failure(
                    rule_id,
                    Some(&rule),
                    ExecutionErrorKind::ExecutionLimitReached,
                    "execution limit reached; rule retired",
                ))
            }
            Outcome::Fired {
                rule,
                template,
                item,
                assignee,
                mut warnings,
            } => {
                self.after_commit(&rule, &template, &item, assignee.as_deref(), &mut warnings)
                    .await;

                let is_completed = !rule.is_active;
                info!(
                    rule_id = %rule_id,
                    item = %item,
                    execution_count = rule.execution_count,
                    completed = is_completed,
                    "rule executed"
                );
                self.audit.record_with_details(
                    rule_id,
                    AuditLevel::Info,
                    ExecutionPhase::Complete,
                    format!("created item {}", item),
                    Some(serde_json::json!({
                        "executionCount": rule.execution_count,
                        "nextExecutionAt": rule.next_execution_at,
                        "completed": is_completed,
                    })),
                );

                let message = if is_completed {
                    format!("created item {}; final execution, rule completed", item)
                } else {
                    format!("created item {}", item)
                };
                Ok(ExecutionResult {
                    rule_id: rule.id.clone(),
                    success: true,
                    ticket_ref: Some(item.0),
                    execution_count: rule.execution_count,
                    max_executions: rule.max_executions,
                    is_completed,
                    next_execution_at: rule.next_execution_at,
                    message,
                    error_kind: None,
                    warnings,
                })
            }
        }
    }

    /// Everything that must succeed or fail together.
    async fn fire(
        &self,
        tx: &mut S::Tx,
        rule_id: &str,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Outcome, Failure> {
        // ── Load ────────────────────────────────────────────────────
        let rule = tx
            .load_for_update(rule_id)
            .await
            .map_err(|e| Failure::persistence(ExecutionPhase::Load, e))?
            .ok_or_else(|| {
                Failure::new(
                    ExecutionErrorKind::RuleNotFound,
                    ExecutionPhase::Load,
                    format!("rule {} not found", rule_id),
                )
            })?;

        // ── Limit check ─────────────────────────────────────────────
        // Checked before activity so an exhausted rule always reports the limit.
        if rule.limit_reached() {
            let mut retired = rule.clone();
            retired.retire();
            if retired != rule {
                let applied = tx
                    .update(&retired, rule.execution_count)
                    .await
                    .map_err(|e| Failure::persistence(ExecutionPhase::LimitCheck, e).with_rule(&rule))?;
                if !applied {
                    return Err(concurrent(&rule));
                }
            }
            return Ok(Outcome::Retired(retired));
        }

        if !rule.is_active {
            return Err(Failure::new(
                ExecutionErrorKind::RuleInactive,
                ExecutionPhase::Load,
                format!("rule {} is inactive", rule_id),
            )
            .with_rule(&rule));
        }

        // ── Render ──────────────────────────────────────────────────
        let tz = self.calculator.timezone(&rule.timezone);
        let template = render_template(&rule.template, &TemplateContext::new(now, tz));
        debug!(rule_id = %rule_id, title = %template.title, "template rendered");

        // ── Stage ───────────────────────────────────────────────────
        let stage_id = match self
            .stages
            .resolve_stage(&rule.process_id, template.stage_hint.as_deref())
            .await
        {
            Ok(Some(stage)) => stage,
            Ok(None) => {
                return Err(Failure::new(
                    ExecutionErrorKind::StageResolutionFailed,
                    ExecutionPhase::StageResolution,
                    format!("process {} has no stage to place the item in", rule.process_id),
                )
                .with_rule(&rule));
            }
            Err(e) => {
                return Err(Failure::new(
                    ExecutionErrorKind::StageResolutionFailed,
                    ExecutionPhase::StageResolution,
                    format!("stage lookup failed: {}", e),
                )
                .with_rule(&rule));
            }
        };

        // ── Assignee (soft) ─────────────────────────────────────────
        let mut warnings = Vec::new();
        let assignee = match template.assignee_hint.as_deref().filter(|h| !h.is_empty()) {
            None => None,
            Some(hint) => match self.identities.resolve_user(hint).await {
                Ok(Some(user)) => Some(user),
                Ok(None) => {
                    warnings.push(format!("assignee {} not found or inactive; item left unassigned", hint));
                    None
                }
                Err(e) => {
                    warnings.push(format!("assignee lookup failed: {}; item left unassigned", e));
                    None
                }
            },
        };
        for w in &warnings {
            warn!(rule_id = %rule_id, "{}", w);
            self.audit
                .record(rule_id, AuditLevel::Warning, ExecutionPhase::AssigneeResolution, w.clone());
        }

        // ── Schedule ────────────────────────────────────────────────
        // Computed before the item exists so a bad schedule creates nothing.
        let expected = rule.execution_count;
        let mut updated = rule.clone();
        updated.execution_count = expected.saturating_add(1);
        let completed = updated.limit_reached();
        updated.next_execution_at = if completed {
            None
        } else {
            let next = self
                .calculator
                .compute_next(rule.schedule_type, &rule.schedule_config, &rule.timezone, now)
                .map_err(|e| {
                    Failure::new(ExecutionErrorKind::InvalidSchedule, ExecutionPhase::Schedule, e.to_string())
                        .with_rule(&rule)
                })?;
            Some(next)
        };
        updated.is_active = !completed;
        updated.last_executed_at = Some(now);
        updated.last_execution_error = None;

        // ── Item creation ───────────────────────────────────────────
        let due_at = match template.due_in_days {
            None => None,
            Some(days) => Some(due_date(now, days).ok_or_else(|| {
                Failure::new(
                    ExecutionErrorKind::TicketCreationFailed,
                    ExecutionPhase::ItemCreation,
                    format!("due date {} days from {} is out of range", days, now.to_rfc3339()),
                )
                .with_rule(&rule)
            })?),
        };
        let draft = ItemDraft {
            process_id: rule.process_id.clone(),
            rule_id: rule.id.clone(),
            title: template.title.clone(),
            description: template.description.clone(),
            stage_id,
            assignee_id: assignee.clone(),
            priority: template.priority.clone(),
            due_at,
            data: template.data.clone(),
            tags: template.tags.clone(),
            created_by: actor.unwrap_or(SYSTEM_ACTOR).to_string(),
        };
        let item = self.work_items.create(tx, &draft).await.map_err(|e| {
            Failure::new(
                ExecutionErrorKind::TicketCreationFailed,
                ExecutionPhase::ItemCreation,
                format!("item creation failed: {}", e),
            )
            .with_rule(&rule)
        })?;

        // ── Counters ────────────────────────────────────────────────
        let applied = tx
            .update(&updated, expected)
            .await
            .map_err(|e| Failure::persistence(ExecutionPhase::Persist, e).with_rule(&rule))?;
        if !applied {
            return Err(concurrent(&rule));
        }

        Ok(Outcome::Fired {
            rule: updated,
            template,
            item,
            assignee,
            warnings,
        })
    }

    /// Assignment and notification. Failures become warnings.
    async fn after_commit(
        &self,
        rule: &RecurringRule,
        template: &RuleTemplate,
        item: &ItemRef,
        assignee: Option<&str>,
        warnings: &mut Vec<String>,
    ) {
        let Some(user) = assignee else {
            return;
        };

        if let Some(assignments) = &self.assignments {
            match assignments.assign(item, user).await {
                Ok(()) => self.audit.record(
                    &rule.id,
                    AuditLevel::Debug,
                    ExecutionPhase::Assignment,
                    format!("assigned {} to {}", item, user),
                ),
                Err(e) => {
                    warn!(rule_id = %rule.id, item = %item, error = %e, "assignment failed");
                    self.audit.record(
                        &rule.id,
                        AuditLevel::Warning,
                        ExecutionPhase::Assignment,
                        format!("assignment failed: {}", e),
                    );
                    warnings.push(format!("assignment failed: {}", e));
                }
            }
        }

        if let Some(notifications) = &self.notifications {
            let message = format!("New item \"{}\" from recurring rule \"{}\"", template.title, rule.name);
            if let Err(e) = notifications.notify(&[user.to_string()], &message).await {
                warn!(rule_id = %rule.id, item = %item, error = %e, "notification failed");
                self.audit.record(
                    &rule.id,
                    AuditLevel::Warning,
                    ExecutionPhase::Notification,
                    format!("notification failed: {}", e),
                );
                warnings.push(format!("notification failed: {}", e));
            }
        }
    }

    /// Log, audit, and persist the error note, then build the result.
    pub(super) async fn settle_failure(&self, rule_id: &str, failure: Failure) -> ExecutionResult {
        let level = match failure.kind {
            ExecutionErrorKind::RuleNotFound | ExecutionErrorKind::RuleInactive => AuditLevel::Info,
            ExecutionErrorKind::ConcurrentExecution => AuditLevel::Warning,
            _ => AuditLevel::Error,
        };
        if level == AuditLevel::Error {
            error!(rule_id = %rule_id, kind = %failure.kind, "{}", failure.message);
        } else {
            info!(rule_id = %rule_id, kind = %failure.kind, "{}", failure.message);
        }
        self.audit
            .record(rule_id, level, failure.phase, failure.message.clone());

        if failure.is_recorded() {
            if let Err(e) = self.store.record_error(rule_id, &failure.message).await {
                warn!(rule_id = %rule_id, error = %e, "could not record execution error");
            }
        }

        ExecutionResult::failure(rule_id, failure.rule.as_ref(), failure.kind, failure.message)
    }
}

fn concurrent(rule: &RecurringRule) -> Failure {
    Failure::new(
        ExecutionErrorKind::ConcurrentExecution,
        ExecutionPhase::Persist,
        format!("rule {} was modified by another execution", rule.id),
    )
    .with_rule(rule)
}

/// `now + days`, or `None` outside chrono's range.
fn due_date(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    now.checked_add_signed(TimeDelta::try_days(days)?)
}
