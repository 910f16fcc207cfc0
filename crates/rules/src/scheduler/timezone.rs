//! Timezone resolution and local wall-clock helpers.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::schema::TimeOfDay;

/// Resolve an IANA zone name, falling back to `default` for empty input and
/// to UTC for names chrono-tz does not know.
pub fn parse_timezone(name: &str, default: &str) -> Tz {
    let name = name.trim();
    let name = if name.is_empty() { default.trim() } else { name };
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(e) => {
            warn!(timezone = %name, error = %e, "unknown timezone, using UTC");
            Tz::UTC
        }
    }
}

/// Map a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant. Nonexistent
/// times (DST spring-forward gap) take the first valid minute after the gap.
pub(crate) fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return dt.with_timezone(&Utc);
    }
    let mut probe = naive;
    for _ in 0..(4 * 60) {
        let Some(next) = probe.checked_add_signed(Duration::minutes(1)) else {
            break;
        };
        probe = next;
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            return dt.with_timezone(&Utc);
        }
    }
    Utc.from_utc_datetime(&naive)
}

/// Local wall-clock representation of `at` in `tz`.
pub(crate) fn to_local(tz: Tz, at: DateTime<Utc>) -> NaiveDateTime {
    at.with_timezone(&tz).naive_local()
}

/// Replace the time-of-day (seconds cleared) when `time` is set.
pub(crate) fn apply_time(naive: NaiveDateTime, time: Option<TimeOfDay>) -> NaiveDateTime {
    match time.and_then(|t| NaiveTime::from_hms_opt(t.hour, t.minute, 0)) {
        Some(t) => naive.date().and_time(t),
        None => naive,
    }
}

/// Number of days in the month containing `date`.
pub(crate) fn days_in_month(date: NaiveDate) -> u32 {
    use chrono::Datelike;
    let (y, m) = (date.year(), date.month());
    let first_of_next = if m == 12 {
        NaiveDate::from_ymd_opt(y + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(y, m + 1, 1)
    };
    first_of_next
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}
