//! Next-fire computation for recurring rules.
//!
//! [`compute_next`] is a pure function of the schedule type, its config, the
//! rule's timezone, and a reference instant. It performs no I/O and is the only
//! place recurrence arithmetic happens; the engine calls it after every fire
//! and rule authoring calls it (through [`seed_next_execution`]) to seed the
//! first fire.

mod calculator;
pub(crate) mod timezone;

#[cfg(test)]
mod tests;

pub use self::calculator::{
    compute_next, effective_interval, seed_next_execution, ScheduleCalculator, ScheduleError,
};
pub use self::timezone::parse_timezone;
