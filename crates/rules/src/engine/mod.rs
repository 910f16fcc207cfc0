//! Rule execution engine.
//!
//! [`RuleExecutor`] turns one due rule into one work item. The core phase
//! (load, limit check, render, stage and assignee resolution, item creation,
//! counter update) runs inside a single store transaction; assignment and
//! notification follow the commit and never undo it. Every outcome, failures
//! included, comes back as an [`ExecutionResult`](crate::schema::ExecutionResult).

mod core;
mod execution;
mod guard;


pub use self::core::{RuleExecutor, SYSTEM_ACTOR};
pub use self::guard::{RuleGuard, RulePermit};
