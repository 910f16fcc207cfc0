//! Recurrence arithmetic for the five schedule kinds.

use chrono::{DateTime, Datelike, Months, NaiveDateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::schema::{RecurringRule, ScheduleConfig, ScheduleType};
use crate::settings::SettingsProvider;

use super::timezone::{apply_time, days_in_month, parse_timezone, resolve_local, to_local};

/// Days scanned forward when matching `days_of_week`.
const WEEKDAY_SCAN_DAYS: i64 = 14;

/// Upper bound on corrective steps when a candidate is not after `now`.
const MAX_FORWARD_STEPS: u32 = 366;

/// Interval actually used for `ty`.
///
/// Missing intervals default to 1, except `minutes`/`custom` which fall back
/// to `default_minutes`. An explicit 0 is treated as 1.
pub fn effective_interval(ty: ScheduleType, config: &ScheduleConfig, default_minutes: u32) -> u32 {
    match config.interval {
        Some(0) => {
            debug!(schedule_type = %ty, "interval 0 treated as 1");
            1
        }
        Some(n) => n,
        None => match ty {
            ScheduleType::Minutes | ScheduleType::Custom => default_minutes.max(1),
            _ => 1,
        },
    }
}

/// The next fire of a schedule falls outside chrono's representable range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{schedule_type} schedule with interval {interval} overflows the supported date range")]
pub struct ScheduleError {
    pub schedule_type: ScheduleType,
    /// Interval after defaulting.
    pub interval: u32,
}

/// Compute the next fire instant strictly after `now`.
///
/// Pure and deterministic: the same inputs always produce the same instant.
/// Wall-clock fields (`time`, `day_of_month`, `days_of_week`) are interpreted
/// in `tz`. Intervals large enough to leave chrono's date range yield
/// [`ScheduleError`].
pub fn compute_next(
    ty: ScheduleType,
    config: &ScheduleConfig,
    tz: Tz,
    now: DateTime<Utc>,
    default_minutes: u32,
) -> Result<DateTime<Utc>, ScheduleError> {
    let interval = effective_interval(ty, config, default_minutes);
    let local_now = to_local(tz, now);

    let next = match ty {
        ScheduleType::Minutes | ScheduleType::Custom => next_minutes(config, tz, now, interval),
        ScheduleType::Daily => next_daily(config, tz, now, local_now, interval),
        ScheduleType::Weekly => next_weekly(config, tz, now, local_now, interval),
        ScheduleType::Monthly => next_monthly(config, tz, now, local_now, interval),
        ScheduleType::Yearly => next_yearly(config, tz, now, local_now, interval),
    };

    next.and_then(|next| ensure_after(next, now, ty, interval))
        .ok_or(ScheduleError {
            schedule_type: ty,
            interval,
        })
}

fn add_days(at: NaiveDateTime, days: i64) -> Option<NaiveDateTime> {
    at.checked_add_signed(TimeDelta::try_days(days)?)
}

fn next_minutes(config: &ScheduleConfig, tz: Tz, now: DateTime<Utc>, interval: u32) -> Option<DateTime<Utc>> {
    let next = now.checked_add_signed(TimeDelta::try_minutes(i64::from(interval))?)?;
    if config.time.is_none() {
        return Some(next);
    }

    let local = apply_time(to_local(tz, next), config.time);
    let candidate = resolve_local(tz, local);
    if candidate <= now {
        Some(resolve_local(tz, add_days(local, 1)?))
    } else {
        Some(candidate)
    }
}

fn next_daily(
    config: &ScheduleConfig,
    tz: Tz,
    now: DateTime<Utc>,
    local_now: NaiveDateTime,
    interval: u32,
) -> Option<DateTime<Utc>> {
    let days = i64::from(interval);
    let local = apply_time(add_days(local_now, days)?, config.time);
    let candidate = resolve_local(tz, local);
    if candidate <= now {
        Some(resolve_local(tz, add_days(local, days)?))
    } else {
        Some(candidate)
    }
}

fn next_weekly(
    config: &ScheduleConfig,
    tz: Tz,
    now: DateTime<Utc>,
    local_now: NaiveDateTime,
    interval: u32,
) -> Option<DateTime<Utc>> {
    let days: Vec<u32> = config
        .days_of_week
        .iter()
        .filter(|d| **d <= 6)
        .map(|d| u32::from(*d))
        .collect();

    if !days.is_empty() {
        for offset in 0..WEEKDAY_SCAN_DAYS {
            let day = add_days(local_now, offset)?;
            if !days.contains(&day.weekday().num_days_from_sunday()) {
                continue;
            }
            let candidate = resolve_local(tz, apply_time(day, config.time));
            if candidate > now {
                return Some(candidate);
            }
        }
    }

    let base = add_days(local_now, 7 * i64::from(interval))?;
    Some(resolve_local(tz, apply_time(base, config.time)))
}

fn next_monthly(
    config: &ScheduleConfig,
    tz: Tz,
    now: DateTime<Utc>,
    local_now: NaiveDateTime,
    interval: u32,
) -> Option<DateTime<Utc>> {
    let candidate = monthly_candidate(config, tz, local_now, interval)?;
    if candidate <= now {
        monthly_candidate(config, tz, local_now, interval.checked_mul(2)?)
    } else {
        Some(candidate)
    }
}

/// `local_now + months`, with `day_of_month` clamped into the target month.
fn monthly_candidate(
    config: &ScheduleConfig,
    tz: Tz,
    local_now: NaiveDateTime,
    months: u32,
) -> Option<DateTime<Utc>> {
    // chrono clamps the day to the target month's last day when needed.
    let shifted = local_now.checked_add_months(Months::new(months))?;

    let shifted = match config.day_of_month {
        Some(dom) => {
            let day = dom.clamp(1, days_in_month(shifted.date()));
            shifted.with_day(day).unwrap_or(shifted)
        }
        None => shifted,
    };

    Some(resolve_local(tz, apply_time(shifted, config.time)))
}

fn next_yearly(
    config: &ScheduleConfig,
    tz: Tz,
    now: DateTime<Utc>,
    local_now: NaiveDateTime,
    interval: u32,
) -> Option<DateTime<Utc>> {
    let years = |n: u32| local_now.checked_add_months(Months::new(n.checked_mul(12)?));
    let candidate = resolve_local(tz, apply_time(years(interval)?, config.time));
    if candidate <= now {
        let later = years(interval.checked_add(1)?)?;
        Some(resolve_local(tz, apply_time(later, config.time)))
    } else {
        Some(candidate)
    }
}

/// Guarantee the result lies strictly after `now`, stepping forward by the
/// schedule's unit if a DST edge or clamping pulled it back.
fn ensure_after(
    mut next: DateTime<Utc>,
    now: DateTime<Utc>,
    ty: ScheduleType,
    interval: u32,
) -> Option<DateTime<Utc>> {
    let step = match ty {
        ScheduleType::Minutes | ScheduleType::Custom => TimeDelta::try_minutes(i64::from(interval))?,
        _ => TimeDelta::try_days(1)?,
    };
    let mut steps = 0;
    while next <= now && steps < MAX_FORWARD_STEPS {
        next = next.checked_add_signed(step)?;
        steps += 1;
    }
    if next <= now {
        now.checked_add_signed(TimeDelta::try_minutes(1)?)
    } else {
        Some(next)
    }
}

/// Calculator bound to a settings provider's defaults.
#[derive(Debug, Clone)]
pub struct ScheduleCalculator {
    default_minutes: u32,
    default_timezone: String,
}

impl ScheduleCalculator {
    /// Capture the default minutes interval and timezone from `settings`.
    pub fn new(settings: &dyn SettingsProvider) -> Self {
        Self {
            default_minutes: settings.default_minutes_interval(),
            default_timezone: settings.default_timezone().to_string(),
        }
    }

    /// [`compute_next`] with the timezone given by name.
    pub fn compute_next(
        &self,
        ty: ScheduleType,
        config: &ScheduleConfig,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let tz = parse_timezone(timezone, &self.default_timezone);
        compute_next(ty, config, tz, now, self.default_minutes)
    }

    /// Resolve a rule's timezone name against the configured default.
    pub fn timezone(&self, name: &str) -> Tz {
        parse_timezone(name, &self.default_timezone)
    }
}

/// Initial `next_execution_at` for a newly authored rule: an explicit start
/// time when it is still ahead of `now`, otherwise the calculator's answer.
pub fn seed_next_execution(
    calculator: &ScheduleCalculator,
    ty: ScheduleType,
    config: &ScheduleConfig,
    timezone: &str,
    start_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    match start_at {
        Some(start) if start > now => Ok(start),
        _ => calculator.compute_next(ty, config, timezone, now),
    }
}

impl RecurringRule {
    /// Seed `next_execution_at` for a freshly authored rule.
    pub fn seed(
        &mut self,
        calculator: &ScheduleCalculator,
        start_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        self.next_execution_at = Some(seed_next_execution(
            calculator,
            self.schedule_type,
            &self.schedule_config,
            &self.timezone,
            start_at,
            now,
        )?);
        Ok(())
    }
}
