//! Due-rule poller.
//!
//! One background loop per process. Each tick queries the due set and hands
//! every rule to the [`RuleExecutor`](crate::engine::RuleExecutor) in order;
//! a failing rule is counted and backed off but never stops the tick.

mod backoff;
mod poller;
mod stats;


pub use self::backoff::FailureBackoff;
pub use self::poller::{clamp_interval, PollerState, RulePoller};
pub use self::stats::{PollerStats, TickReport};
