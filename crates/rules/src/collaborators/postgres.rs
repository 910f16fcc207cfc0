//! PostgreSQL collaborator adapters over the `process_stages`, `users`,
//! `tickets`, `ticket_assignments`, and `notifications` tables.

use sqlx::PgPool;
use tracing::{debug, error};
use uuid::Uuid;

use super::{
    AssignmentService, CollaboratorError, IdentityDirectory, ItemDraft, ItemRef,
    NotificationService, StageDirectory, WorkItemService,
};
use crate::store::PgRuleTransaction;

/// Foreign-key and check violations are the caller's fault, not the database's.
fn map_db_error(e: sqlx::Error) -> CollaboratorError {
    if let sqlx::Error::Database(ref db_err) = e {
        if matches!(db_err.code().as_deref(), Some("23503") | Some("23514") | Some("23502")) {
            return CollaboratorError::Rejected(db_err.message().to_string());
        }
    }
    if matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) {
        return CollaboratorError::Unavailable(e.to_string());
    }
    error!("collaborator database error: {}", e);
    CollaboratorError::Database(e)
}

fn parse_item_id(item: &ItemRef) -> Result<Uuid, CollaboratorError> {
    Uuid::parse_str(&item.0)
        .map_err(|e| CollaboratorError::Rejected(format!("invalid item reference '{}': {}", item, e)))
}

// ── Stages ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PgStageDirectory {
    pool: PgPool,
}

impl PgStageDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StageDirectory for PgStageDirectory {
    async fn resolve_stage(
        &self,
        process_id: &str,
        hint: Option<&str>,
    ) -> Result<Option<String>, CollaboratorError> {
        if let Some(hint) = hint.filter(|h| !h.is_empty()) {
            let hinted = sqlx::query_scalar::<_, String>(
                "SELECT id FROM process_stages WHERE id = $1 AND process_id = $2",
            )
            .bind(hint)
            .bind(process_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;

            if hinted.is_some() {
                return Ok(hinted);
            }
            debug!(process_id, stage = hint, "stage hint not in process, using default");
        }

        sqlx::query_scalar::<_, String>(
            "SELECT id FROM process_stages
             WHERE process_id = $1
             ORDER BY is_default DESC, position ASC
             LIMIT 1",
        )
        .bind(process_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)
    }
}

// ── Users ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PgIdentityDirectory {
    pool: PgPool,
}

impl PgIdentityDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdentityDirectory for PgIdentityDirectory {
    async fn resolve_user(&self, hint: &str) -> Result<Option<String>, CollaboratorError> {
        sqlx::query_scalar::<_, String>("SELECT id FROM users WHERE id = $1 AND is_active = true")
            .bind(hint)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)
    }
}

// ── Tickets ─────────────────────────────────────────────────────────

/// Inserts tickets on the rule transaction's connection.
#[derive(Debug, Clone, Default)]
pub struct PgWorkItemService;

#[async_trait::async_trait]
impl WorkItemService<PgRuleTransaction> for PgWorkItemService {
    async fn create(
        &self,
        tx: &mut PgRuleTransaction,
        draft: &ItemDraft,
    ) -> Result<ItemRef, CollaboratorError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tickets (id, process_id, rule_id, title, description, stage_id,
                                  assignee_id, priority, due_at, data, tags, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(id)
        .bind(&draft.process_id)
        .bind(&draft.rule_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.stage_id)
        .bind(&draft.assignee_id)
        .bind(&draft.priority)
        .bind(draft.due_at)
        .bind(&draft.data)
        .bind(&draft.tags)
        .bind(&draft.created_by)
        .execute(tx.conn())
        .await
        .map_err(map_db_error)?;

        Ok(ItemRef(id.to_string()))
    }
}

// ── Assignments ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PgAssignmentService {
    pool: PgPool,
}

impl PgAssignmentService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AssignmentService for PgAssignmentService {
    async fn assign(&self, item: &ItemRef, user_id: &str) -> Result<(), CollaboratorError> {
        let ticket_id = parse_item_id(item)?;
        sqlx::query(
            "INSERT INTO ticket_assignments (ticket_id, user_id)
             VALUES ($1, $2)
             ON CONFLICT (ticket_id, user_id) DO NOTHING",
        )
        .bind(ticket_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }
}

// ── Notifications ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PgNotificationService {
    pool: PgPool,
}

impl PgNotificationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NotificationService for PgNotificationService {
    async fn notify(&self, user_ids: &[String], message: &str) -> Result<(), CollaboratorError> {
        if user_ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO notifications (id, user_id, message)
             SELECT gen_random_uuid(), u, $2 FROM UNNEST($1::text[]) AS u",
        )
        .bind(user_ids)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }
}
