use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RecurError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub worker: WorkerConfig,
    pub schedule: ScheduleDefaults,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RECUR_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("RECUR_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            worker: WorkerConfig::from_env_profiled(p),
            schedule: ScheduleDefaults::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<(), RecurError> {
        if self.worker.min_tick_ms == 0 {
            return Err(RecurError::Config("RECUR_TICK_MIN_MS must be > 0".into()));
        }
        if self.worker.min_tick_ms > self.worker.max_tick_ms {
            return Err(RecurError::Config(format!(
                "RECUR_TICK_MIN_MS ({}) exceeds RECUR_TICK_MAX_MS ({})",
                self.worker.min_tick_ms, self.worker.max_tick_ms
            )));
        }
        if self.worker.backoff_base_secs > self.worker.backoff_max_secs {
            return Err(RecurError::Config(format!(
                "RECUR_BACKOFF_BASE_SECS ({}) exceeds RECUR_BACKOFF_MAX_SECS ({})",
                self.worker.backoff_base_secs, self.worker.backoff_max_secs
            )));
        }
        if self.schedule.default_minutes_interval == 0 {
            return Err(RecurError::Config(
                "RECUR_DEFAULT_MINUTES_INTERVAL must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  worker:      tick={}ms (bounds {}..={}ms), failure_threshold={}",
            self.worker.tick_interval_ms,
            self.worker.min_tick_ms,
            self.worker.max_tick_ms,
            self.worker.failure_threshold
        );
        tracing::info!(
            "  schedule:    default_minutes={}, default_tz={}",
            self.schedule.default_minutes_interval,
            self.schedule.default_timezone
        );
    }

    /// Return a redacted view safe for display (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "worker": {
                "tick_interval_ms": self.worker.tick_interval_ms,
                "min_tick_ms": self.worker.min_tick_ms,
                "max_tick_ms": self.worker.max_tick_ms,
                "failure_threshold": self.worker.failure_threshold,
            },
            "schedule": {
                "default_minutes_interval": self.schedule.default_minutes_interval,
                "default_timezone": self.schedule.default_timezone,
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            postgres: PostgresConfig::default(),
            worker: WorkerConfig::default(),
            schedule: ScheduleDefaults::default(),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "recur"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 5),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "recur".to_string(),
            username: None,
            password: None,
            ssl_mode: "prefer".to_string(),
            max_connections: 5,
        }
    }
}

// ── Worker loop ───────────────────────────────────────────────

/// Due-rule poller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Requested tick interval in milliseconds (clamped to the bounds below).
    pub tick_interval_ms: u64,
    pub min_tick_ms: u64,
    pub max_tick_ms: u64,
    /// Consecutive failures before a rule enters backoff.
    pub failure_threshold: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            tick_interval_ms: profiled_env_u64(p, "RECUR_TICK_INTERVAL_MS", d.tick_interval_ms),
            min_tick_ms: profiled_env_u64(p, "RECUR_TICK_MIN_MS", d.min_tick_ms),
            max_tick_ms: profiled_env_u64(p, "RECUR_TICK_MAX_MS", d.max_tick_ms),
            failure_threshold: profiled_env_u32(p, "RECUR_FAILURE_THRESHOLD", d.failure_threshold),
            backoff_base_secs: profiled_env_u64(p, "RECUR_BACKOFF_BASE_SECS", d.backoff_base_secs),
            backoff_max_secs: profiled_env_u64(p, "RECUR_BACKOFF_MAX_SECS", d.backoff_max_secs),
        }
    }

    pub fn tick_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.min_tick_ms),
            Duration::from_millis(self.max_tick_ms),
        )
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5 * 60 * 1000,
            min_tick_ms: 60 * 1000,
            max_tick_ms: 60 * 60 * 1000,
            failure_threshold: 5,
            backoff_base_secs: 60,
            backoff_max_secs: 3600,
        }
    }
}

// ── Schedule defaults ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDefaults {
    /// Interval used by `minutes` rules that omit one.
    pub default_minutes_interval: u32,
    /// IANA zone used when a rule carries an empty timezone.
    pub default_timezone: String,
}

impl ScheduleDefaults {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            default_minutes_interval: profiled_env_u32(p, "RECUR_DEFAULT_MINUTES_INTERVAL", 60),
            default_timezone: profiled_env_or(p, "RECUR_DEFAULT_TIMEZONE", "UTC"),
        }
    }
}

impl Default for ScheduleDefaults {
    fn default() -> Self {
        Self {
            default_minutes_interval: 60,
            default_timezone: "UTC".to_string(),
        }
    }
}
