//! Recurring rule data model with serde (de)serialization.
//!
//! Defines the persisted shape of a rule:
//! - `RecurringRule`: identity, template, schedule, and lifecycle state
//! - `RuleTemplate`: the work item every fire materializes
//! - `ScheduleType` / `ScheduleConfig`: the recurrence definition
//!
//! plus the typed outcome of one execution (`ExecutionResult`).
//! Field names serialize as camelCase to match the rule-authoring API.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Schedule type ───────────────────────────────────────────────────

/// Recurrence kinds understood by the schedule calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Minutes,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// Behaves like `Minutes`; kept distinct so authoring tools can round-trip it.
    Custom,
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleType::Minutes => write!(f, "minutes"),
            ScheduleType::Daily => write!(f, "daily"),
            ScheduleType::Weekly => write!(f, "weekly"),
            ScheduleType::Monthly => write!(f, "monthly"),
            ScheduleType::Yearly => write!(f, "yearly"),
            ScheduleType::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minutes" => Ok(ScheduleType::Minutes),
            "daily" => Ok(ScheduleType::Daily),
            "weekly" => Ok(ScheduleType::Weekly),
            "monthly" => Ok(ScheduleType::Monthly),
            "yearly" => Ok(ScheduleType::Yearly),
            "custom" => Ok(ScheduleType::Custom),
            other => Err(format!("unknown schedule type: '{}'", other)),
        }
    }
}

// ── Time of day ─────────────────────────────────────────────────────

/// Wall-clock `HH:MM` in the rule's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("invalid time '{}': expected HH:MM", s))?;
        let hour: u32 = h.parse().map_err(|_| format!("invalid hour in '{}'", s))?;
        // Tolerate a trailing seconds component ("08:30:00").
        let minute_part = m.split(':').next().unwrap_or(m);
        let minute: u32 = minute_part
            .parse()
            .map_err(|_| format!("invalid minute in '{}'", s))?;
        TimeOfDay::new(hour, minute).ok_or_else(|| format!("time out of range: '{}'", s))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

// ── Schedule config ─────────────────────────────────────────────────

/// Per-type recurrence parameters. Every field is optional; the calculator
/// ignores the ones its schedule type does not use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    /// Count of the schedule type's unit between fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeOfDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    /// Weekday indices, 0 = Sunday through 6 = Saturday.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<u8>,
}

// ── Template ────────────────────────────────────────────────────────

/// The work item a rule materializes on every fire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTemplate {
    /// Item title; placeholders allowed.
    pub title: String,
    /// Item body; placeholders allowed.
    #[serde(default)]
    pub description: Option<String>,
    /// Preferred stage; ignored unless it belongs to the rule's process.
    #[serde(default)]
    pub stage_hint: Option<String>,
    /// Preferred assignee; dropped with a warning when unknown or inactive.
    #[serde(default)]
    pub assignee_hint: Option<String>,
    /// Copied onto the item verbatim.
    #[serde(default)]
    pub priority: Option<String>,
    /// Due date as a day offset from the execution instant.
    #[serde(default)]
    pub due_in_days: Option<i64>,
    /// Free-form payload copied onto the item after placeholder rendering.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Item labels; placeholders allowed.
    #[serde(default)]
    pub tags: Vec<String>,
}

// ── Recurring rule ──────────────────────────────────────────────────

/// A persisted recurrence definition plus the template for the item it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringRule {
    pub id: String,
    /// Process the produced items belong to.
    pub process_id: String,
    /// Human-readable label, used in notifications.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub template: RuleTemplate,
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub schedule_config: ScheduleConfig,
    /// IANA zone name for wall-clock schedule fields and placeholders.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Cleared when the rule is retired or disabled.
    pub is_active: bool,
    /// Successful fires so far. Doubles as the optimistic concurrency token.
    #[serde(default)]
    pub execution_count: u32,
    /// Ceiling on `execution_count`; `None` means unbounded.
    #[serde(default)]
    pub max_executions: Option<u32>,
    /// Next due instant; `None` once retired.
    #[serde(default)]
    pub next_execution_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
    /// Note left by the last failed execution, cleared on success.
    #[serde(default)]
    pub last_execution_error: Option<String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl RecurringRule {
    /// Whether the execution ceiling has been reached.
    pub fn limit_reached(&self) -> bool {
        self.max_executions
            .is_some_and(|max| self.execution_count >= max)
    }

    /// Whether the due-set query would return this rule at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && !self.limit_reached()
            && self.next_execution_at.is_some_and(|next| next <= now)
    }

    /// Retire the rule: inactive, nothing scheduled.
    pub fn retire(&mut self) {
        self.is_active = false;
        self.next_execution_at = None;
    }
}

// ── Execution outcome ───────────────────────────────────────────────

/// Typed failure classes surfaced by the execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    RuleNotFound,
    RuleInactive,
    /// Terminal outcome, not an error state: the rule has been retired.
    ExecutionLimitReached,
    StageResolutionFailed,
    TicketCreationFailed,
    /// The rule's schedule has no representable next fire.
    InvalidSchedule,
    PersistenceError,
    /// Another execution of the same rule is in flight.
    ConcurrentExecution,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionErrorKind::RuleNotFound => "rule_not_found",
            ExecutionErrorKind::RuleInactive => "rule_inactive",
            ExecutionErrorKind::ExecutionLimitReached => "execution_limit_reached",
            ExecutionErrorKind::StageResolutionFailed => "stage_resolution_failed",
            ExecutionErrorKind::TicketCreationFailed => "ticket_creation_failed",
            ExecutionErrorKind::InvalidSchedule => "invalid_schedule",
            ExecutionErrorKind::PersistenceError => "persistence_error",
            ExecutionErrorKind::ConcurrentExecution => "concurrent_execution",
        };
        f.write_str(s)
    }
}

/// Result of one `execute` call. Every engine outcome is one of these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub rule_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_ref: Option<String>,
    pub execution_count: u32,
    pub max_executions: Option<u32>,
    pub is_completed: bool,
    pub next_execution_at: Option<DateTime<Utc>>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ExecutionErrorKind>,
    /// Soft failures that did not abort the execution (e.g. dropped assignee).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ExecutionResult {
    /// Failure result that carries the rule's counters as last seen.
    pub fn failure(
        rule_id: &str,
        rule: Option<&RecurringRule>,
        kind: ExecutionErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            success: false,
            ticket_ref: None,
            execution_count: rule.map(|r| r.execution_count).unwrap_or(0),
            max_executions: rule.and_then(|r| r.max_executions),
            is_completed: rule.is_some_and(|r| r.limit_reached()),
            next_execution_at: rule.and_then(|r| r.next_execution_at),
            message: message.into(),
            error_kind: Some(kind),
            warnings: Vec::new(),
        }
    }
}
