//! Rule persistence.
//!
//! The engine talks to storage only through [`RuleStore`] and
//! [`RuleTransaction`]; adapters own all schema knowledge.
//!
//! - [`MemoryRuleStore`]: map-backed, used by tests and embedders.
//! - [`PgRuleStore`]: PostgreSQL via `sqlx`, row locks plus a conditional
//!   update on `execution_count`.

mod memory;
mod postgres;

pub use memory::{MemoryRuleStore, MemoryTransaction};
pub use postgres::{PgRuleStore, PgRuleTransaction};

use chrono::{DateTime, Utc};

use crate::schema::RecurringRule;

/// Errors from rule store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("rule not found: {0}")]
    NotFound(String),

    /// The optimistic concurrency check failed at commit time.
    #[error("rule {0} was modified concurrently")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to decode rule {id}: {reason}")]
    Decode { id: String, reason: String },
}

/// One atomic unit of work over the rule store.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// its writes.
#[async_trait::async_trait]
pub trait RuleTransaction: Send {
    /// Read a rule and hold it for the rest of the transaction.
    async fn load_for_update(&mut self, id: &str) -> Result<Option<RecurringRule>, StoreError>;

    /// Write back lifecycle state if the stored `execution_count` still
    /// equals `expected_execution_count`. Returns `false` when it does not.
    async fn update(
        &mut self,
        rule: &RecurringRule,
        expected_execution_count: u32,
    ) -> Result<bool, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Versioned access to persisted recurring rules.
#[async_trait::async_trait]
pub trait RuleStore: Send + Sync {
    type Tx: RuleTransaction + 'static;

    async fn get_by_id(&self, id: &str) -> Result<Option<RecurringRule>, StoreError>;

    /// Active rules with `next_execution_at <= now` and remaining executions,
    /// oldest first.
    async fn due_set(&self, now: DateTime<Utc>) -> Result<Vec<RecurringRule>, StoreError>;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Note a failure on the rule outside any transaction. Schedule fields
    /// are left untouched.
    async fn record_error(&self, id: &str, message: &str) -> Result<(), StoreError>;
}
