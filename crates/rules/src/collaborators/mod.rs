//! External services the execution engine depends on.
//!
//! Only [`WorkItemService`] participates in the rule transaction; assignment
//! and notification run after commit and are best-effort.

mod postgres;

pub use postgres::{
    PgAssignmentService, PgIdentityDirectory, PgNotificationService, PgStageDirectory,
    PgWorkItemService,
};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Errors from collaborator calls.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request (validation, constraint, unknown id).
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Everything needed to create one work item from a fired rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDraft {
    pub process_id: String,
    pub rule_id: String,
    pub title: String,
    pub description: Option<String>,
    pub stage_id: String,
    pub assignee_id: Option<String>,
    pub priority: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub data: serde_json::Value,
    pub tags: Vec<String>,
    pub created_by: String,
}

/// Opaque reference to a created work item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ItemRef(pub String);

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait::async_trait]
pub trait StageDirectory: Send + Sync {
    /// The hinted stage if it belongs to `process_id`, else the process's
    /// default stage. `None` when the process has no stages.
    async fn resolve_stage(
        &self,
        process_id: &str,
        hint: Option<&str>,
    ) -> Result<Option<String>, CollaboratorError>;
}

#[async_trait::async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// The hinted user if it still exists and is active.
    async fn resolve_user(&self, hint: &str) -> Result<Option<String>, CollaboratorError>;
}

/// Creates work items inside the caller's rule transaction `Tx`.
#[async_trait::async_trait]
pub trait WorkItemService<Tx: Send>: Send + Sync {
    async fn create(&self, tx: &mut Tx, draft: &ItemDraft) -> Result<ItemRef, CollaboratorError>;
}

#[async_trait::async_trait]
pub trait AssignmentService: Send + Sync {
    async fn assign(&self, item: &ItemRef, user_id: &str) -> Result<(), CollaboratorError>;
}

#[async_trait::async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, user_ids: &[String], message: &str) -> Result<(), CollaboratorError>;
}
