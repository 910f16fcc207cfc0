//! Settings provider consumed by the calculator, engine, and poller.

use std::time::Duration;

use recur_core::Config;

/// Externally supplied defaults and bounds.
pub trait SettingsProvider: Send + Sync {
    /// Interval used by `minutes`/`custom` rules that omit one.
    fn default_minutes_interval(&self) -> u32;

    /// Zone applied when a rule's timezone is empty.
    fn default_timezone(&self) -> &str;

    /// Inclusive (min, max) bounds for the poller tick interval.
    fn tick_interval_bounds(&self) -> (Duration, Duration);

    /// Consecutive failures before a rule is backed off. 0 disables backoff.
    fn failure_threshold(&self) -> u32;

    /// (base, max) backoff window.
    fn backoff_window(&self) -> (Duration, Duration);
}

impl SettingsProvider for Config {
    fn default_minutes_interval(&self) -> u32 {
        self.schedule.default_minutes_interval
    }

    fn default_timezone(&self) -> &str {
        &self.schedule.default_timezone
    }

    fn tick_interval_bounds(&self) -> (Duration, Duration) {
        self.worker.tick_bounds()
    }

    fn failure_threshold(&self) -> u32 {
        self.worker.failure_threshold
    }

    fn backoff_window(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.worker.backoff_base_secs),
            Duration::from_secs(self.worker.backoff_max_secs),
        )
    }
}

/// Fixed settings, mostly for tests and embedding without env config.
#[derive(Debug, Clone)]
pub struct StaticSettings {
    pub default_minutes_interval: u32,
    pub default_timezone: String,
    pub min_tick: Duration,
    pub max_tick: Duration,
    pub failure_threshold: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            default_minutes_interval: 60,
            default_timezone: "UTC".to_string(),
            min_tick: Duration::from_secs(60),
            max_tick: Duration::from_secs(3600),
            failure_threshold: 5,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(3600),
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn default_minutes_interval(&self) -> u32 {
        self.default_minutes_interval
    }

    fn default_timezone(&self) -> &str {
        &self.default_timezone
    }

    fn tick_interval_bounds(&self) -> (Duration, Duration) {
        (self.min_tick, self.max_tick)
    }

    fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    fn backoff_window(&self) -> (Duration, Duration) {
        (self.backoff_base, self.backoff_max)
    }
}
