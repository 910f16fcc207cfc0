//! [`RulePoller`]: timer-driven discovery and dispatch of due rules.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::audit_log::{AuditLevel, ExecutionPhase};
use crate::engine::RuleExecutor;
use crate::schema::ExecutionErrorKind;
use crate::settings::SettingsProvider;
use crate::store::RuleStore;

use super::backoff::FailureBackoff;
use super::stats::{PollerStats, TickReport};

/// Whether the background loop is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Running,
}

/// Shared between the poller handle and its background loop.
struct PollerInner<S: RuleStore> {
    executor: Arc<RuleExecutor<S>>,
    stats: RwLock<PollerStats>,
    backoff: Mutex<FailureBackoff>,
    /// Held for the whole of a tick so ticks never overlap.
    tick_lock: tokio::sync::Mutex<()>,
}

/// Background loop plus the shutdown signal owned by that run.
struct Running {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

/// Periodically executes every due rule, one at a time.
///
/// Call [`start`](Self::start) once; the first tick fires immediately.
/// [`stop`](Self::stop) lets an in-flight tick finish and is idempotent.
pub struct RulePoller<S: RuleStore + 'static> {
    inner: Arc<PollerInner<S>>,
    bounds: (Duration, Duration),
    running: Mutex<Option<Running>>,
}

impl<S: RuleStore + 'static> RulePoller<S> {
    /// Poller over `executor`, taking tick bounds and backoff policy from
    /// `settings`. Nothing runs until [`start`](Self::start).
    pub fn new(executor: Arc<RuleExecutor<S>>, settings: &dyn SettingsProvider) -> Self {
        let (base, max) = settings.backoff_window();
        Self {
            inner: Arc::new(PollerInner {
                executor,
                stats: RwLock::new(PollerStats::default()),
                backoff: Mutex::new(FailureBackoff::new(settings.failure_threshold(), base, max)),
                tick_lock: tokio::sync::Mutex::new(()),
            }),
            bounds: settings.tick_interval_bounds(),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PollerState {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.as_ref() {
            Some(r) if !r.handle.is_finished() => PollerState::Running,
            _ => PollerState::Stopped,
        }
    }

    /// Snapshot of the running counters.
    pub fn stats(&self) -> PollerStats {
        self.inner
            .stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start ticking every `interval_ms` (clamped to the configured bounds).
    /// Returns the interval in effect. A second call while running is a no-op.
    pub fn start(&self, interval_ms: u64) -> Duration {
        let interval = clamp_interval(Duration::from_millis(interval_ms), self.bounds);

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            warn!("rule poller already running");
            return interval;
        }

        // A fresh signal per run: a permit left by stopping a dead loop must
        // not end the next one.
        let shutdown = Arc::new(Notify::new());
        let inner = Arc::clone(&self.inner);
        let signal = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = signal.notified() => break,
                    _ = ticker.tick() => {
                        inner.run_tick(Utc::now()).await;
                    }
                }
            }
            debug!("rule poller loop exited");
        });
        *running = Some(Running { handle, shutdown });

        info!(interval_secs = interval.as_secs(), "rule poller started");
        interval
    }

    /// Stop ticking. Waits for an in-flight tick to finish.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running { handle, shutdown }) = running else {
            return;
        };

        shutdown.notify_one();
        if let Err(e) = handle.await {
            error!(error = %e, "rule poller task ended abnormally");
        }
        let stats = self.stats();
        info!(
            ticks = stats.ticks,
            executed = stats.executed,
            errors = stats.errors,
            "rule poller stopped"
        );
    }

    /// Run one tick as of `now`, outside the timer. Serialized with timer ticks.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        self.inner.run_tick(now).await
    }
}

impl<S: RuleStore + 'static> PollerInner<S> {
    async fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let _serial = self.tick_lock.lock().await;
        let mut report = TickReport::default();

        let due = match self.executor.list_due(Some(now)).await {
            Ok(rules) => rules,
            Err(e) => {
                error!(error = %e, "failed to query due rules");
                report.errors = 1;
                self.finish(now, &report);
                return report;
            }
        };
        report.due = due.len();
        debug!(due = report.due, "poller tick");
        self.lock_backoff().retain_only(due.iter().map(|r| r.id.as_str()));

        for rule in due {
            if self.lock_backoff().should_skip(&rule.id, now) {
                debug!(rule_id = %rule.id, "rule in backoff, skipping");
                report.skipped += 1;
                continue;
            }

            // Each rule runs in its own task so a panic is contained to it.
            let executor = Arc::clone(&self.executor);
            let rule_id = rule.id.clone();
            let joined =
                tokio::spawn(async move { executor.execute_at(&rule_id, None, now).await }).await;
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    report.errors += 1;
                    error!(rule_id = %rule.id, error = %e, "rule execution aborted");
                    self.executor.audit_log().record(
                        &rule.id,
                        AuditLevel::Error,
                        ExecutionPhase::Load,
                        format!("execution aborted: {}", e),
                    );
                    self.note_failure(&rule.id, now);
                    continue;
                }
            };
            if result.success {
                report.executed += 1;
                self.lock_backoff().record_success(&rule.id);
                continue;
            }

            match result.error_kind {
                Some(ExecutionErrorKind::ExecutionLimitReached) => {
                    report.retired += 1;
                    self.lock_backoff().record_success(&rule.id);
                }
                kind => {
                    report.errors += 1;
                    warn!(rule_id = %rule.id, error = %result.message, "rule execution failed");
                    if counts_toward_backoff(kind) {
                        self.note_failure(&rule.id, now);
                    }
                }
            }
        }

        self.finish(now, &report);
        report
    }

    fn note_failure(&self, rule_id: &str, now: DateTime<Utc>) {
        let (until, failures) = {
            let mut backoff = self.lock_backoff();
            let until = backoff.record_failure(rule_id, now);
            (until, backoff.failures(rule_id))
        };
        if let Some(until) = until {
            warn!(rule_id = %rule_id, failures, retry_after = %until, "rule backed off");
            self.executor.audit_log().record(
                rule_id,
                AuditLevel::Warning,
                ExecutionPhase::Backoff,
                format!("{} consecutive failures; skipped until {}", failures, until.to_rfc3339()),
            );
        }
    }

    fn finish(&self, now: DateTime<Utc>, report: &TickReport) {
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .absorb(now, report);
    }

    fn lock_backoff(&self) -> std::sync::MutexGuard<'_, FailureBackoff> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Failures of the rule itself. Missing, inactive, and contended rules are not.
fn counts_toward_backoff(kind: Option<ExecutionErrorKind>) -> bool {
    matches!(
        kind,
        Some(
            ExecutionErrorKind::StageResolutionFailed
                | ExecutionErrorKind::TicketCreationFailed
                | ExecutionErrorKind::InvalidSchedule
                | ExecutionErrorKind::PersistenceError
        )
    )
}

/// Clamp `requested` into `[min, max]`, warning when it had to move.
pub fn clamp_interval(requested: Duration, bounds: (Duration, Duration)) -> Duration {
    let (min, max) = if bounds.0 <= bounds.1 {
        bounds
    } else {
        (bounds.1, bounds.0)
    };
    let clamped = requested.clamp(min, max);
    if clamped != requested {
        warn!(
            requested_ms = requested.as_millis() as u64,
            clamped_ms = clamped.as_millis() as u64,
            "poll interval out of range, clamped"
        );
    }
    clamped
}
