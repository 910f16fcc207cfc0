//! Recurring rule scheduling and execution.
//!
//! This crate provides:
//! - The rule data model with camelCase serde (de)serialization
//! - A pure next-fire calculator for minutes/daily/weekly/monthly/yearly rules
//! - Placeholder rendering for rule templates
//! - Rule store adapters (in-memory and PostgreSQL)
//! - The transactional execution engine and its collaborator traits
//! - A timer-driven poller that dispatches due rules

pub mod audit_log;
pub mod collaborators;
pub mod engine;
pub mod scheduler;
pub mod schema;
pub mod settings;
pub mod store;
pub mod templates;
pub mod worker;

#[cfg(test)]
mod testing;

pub use engine::RuleExecutor;
pub use schema::{ExecutionErrorKind, ExecutionResult, RecurringRule, ScheduleConfig, ScheduleType};
pub use settings::{SettingsProvider, StaticSettings};
pub use worker::RulePoller;
