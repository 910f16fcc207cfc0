//! PostgreSQL rule store over the `recurring_rules` table.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, error};

use super::{RuleStore, RuleTransaction, StoreError};
use crate::schema::{RecurringRule, ScheduleType};

const RULE_COLUMNS: &str = "id, process_id, name, description, template, schedule_type,
    schedule_config, timezone, is_active, execution_count, max_executions,
    next_execution_at, last_executed_at, last_execution_error";

// ── Row mapping ─────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct RuleRow {
    id: String,
    process_id: String,
    name: String,
    description: Option<String>,
    template: serde_json::Value,
    schedule_type: String,
    schedule_config: serde_json::Value,
    timezone: String,
    is_active: bool,
    execution_count: i32,
    max_executions: Option<i32>,
    next_execution_at: Option<DateTime<Utc>>,
    last_executed_at: Option<DateTime<Utc>>,
    last_execution_error: Option<String>,
}

impl TryFrom<RuleRow> for RecurringRule {
    type Error = StoreError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let decode = |reason: String| StoreError::Decode {
            id: row.id.clone(),
            reason,
        };
        let schedule_type: ScheduleType = row.schedule_type.parse().map_err(decode)?;
        let template = serde_json::from_value(row.template.clone())
            .map_err(|e| decode(format!("template: {}", e)))?;
        let schedule_config = serde_json::from_value(row.schedule_config.clone())
            .map_err(|e| decode(format!("schedule_config: {}", e)))?;
        let execution_count = u32::try_from(row.execution_count)
            .map_err(|_| decode(format!("negative execution_count {}", row.execution_count)))?;
        let max_executions = row
            .max_executions
            .map(|m| u32::try_from(m).map_err(|_| decode(format!("negative max_executions {}", m))))
            .transpose()?;

        Ok(RecurringRule {
            id: row.id,
            process_id: row.process_id,
            name: row.name,
            description: row.description,
            template,
            schedule_type,
            schedule_config,
            timezone: row.timezone,
            is_active: row.is_active,
            execution_count,
            max_executions,
            next_execution_at: row.next_execution_at,
            last_executed_at: row.last_executed_at,
            last_execution_error: row.last_execution_error,
        })
    }
}

fn count_to_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

// ── Store ───────────────────────────────────────────────────────────

/// [`RuleStore`] backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgRuleStore {
    pool: PgPool,
}

impl PgRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl RuleStore for PgRuleStore {
    type Tx = PgRuleTransaction;

    async fn get_by_id(&self, id: &str) -> Result<Option<RecurringRule>, StoreError> {
        let sql = format!("SELECT {} FROM recurring_rules WHERE id = $1", RULE_COLUMNS);
        let row = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RecurringRule::try_from).transpose()
    }

    async fn due_set(&self, now: DateTime<Utc>) -> Result<Vec<RecurringRule>, StoreError> {
        let sql = format!(
            "SELECT {} FROM recurring_rules
             WHERE is_active = true
               AND next_execution_at <= $1
               AND (max_executions IS NULL OR execution_count < max_executions)
             ORDER BY next_execution_at, id",
            RULE_COLUMNS
        );
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        // One undecodable row must not hide the rest of the due set.
        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            match RecurringRule::try_from(row) {
                Ok(rule) => rules.push(rule),
                Err(e) => error!(error = %e, "skipping undecodable rule in due set"),
            }
        }
        Ok(rules)
    }

    async fn begin(&self) -> Result<PgRuleTransaction, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgRuleTransaction { tx })
    }

    async fn record_error(&self, id: &str, message: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE recurring_rules SET last_execution_error = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

// ── Transaction ─────────────────────────────────────────────────────

/// An open PostgreSQL transaction. Rows read through
/// [`load_for_update`](RuleTransaction::load_for_update) stay locked until
/// commit or rollback.
pub struct PgRuleTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgRuleTransaction {
    /// Connection for collaborators that write inside this transaction.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait::async_trait]
impl RuleTransaction for PgRuleTransaction {
    async fn load_for_update(&mut self, id: &str) -> Result<Option<RecurringRule>, StoreError> {
        let sql = format!("SELECT {} FROM recurring_rules WHERE id = $1 FOR UPDATE", RULE_COLUMNS);
        let row = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(RecurringRule::try_from).transpose()
    }

    async fn update(
        &mut self,
        rule: &RecurringRule,
        expected_execution_count: u32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE recurring_rules SET
                is_active = $2,
                execution_count = $3,
                next_execution_at = $4,
                last_executed_at = $5,
                last_execution_error = $6,
                updated_at = now()
             WHERE id = $1 AND execution_count = $7",
        )
        .bind(&rule.id)
        .bind(rule.is_active)
        .bind(count_to_db(rule.execution_count))
        .bind(rule.next_execution_at)
        .bind(rule.last_executed_at)
        .bind(&rule.last_execution_error)
        .bind(count_to_db(expected_execution_count))
        .execute(&mut *self.tx)
        .await?;

        let applied = result.rows_affected() == 1;
        if !applied {
            debug!(rule_id = %rule.id, expected = expected_execution_count, "conditional update matched no row");
        }
        Ok(applied)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
