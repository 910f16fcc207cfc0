//! Tests for the scheduler module.

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
    use chrono_tz::Tz;

    use crate::schema::{ScheduleConfig, ScheduleType, TimeOfDay};
    use crate::scheduler::{
        compute_next, effective_interval, seed_next_execution, ScheduleCalculator, ScheduleError,
    };
    use crate::settings::StaticSettings;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn config(interval: Option<u32>, time: Option<&str>) -> ScheduleConfig {
        ScheduleConfig {
            interval,
            time: time.map(|t| t.parse::<TimeOfDay>().unwrap()),
            ..Default::default()
        }
    }

    fn next(ty: ScheduleType, cfg: &ScheduleConfig, now: DateTime<Utc>) -> DateTime<Utc> {
        compute_next(ty, cfg, Tz::UTC, now, 60).unwrap()
    }

    // 2026-10-15 is a Thursday.
    fn thursday_10am() -> DateTime<Utc> {
        utc(2026, 10, 15, 10, 0)
    }

    // -- effective_interval ------------------------------------------------

    #[test]
    fn interval_zero_is_treated_as_one() {
        let cfg = config(Some(0), None);
        assert_eq!(effective_interval(ScheduleType::Daily, &cfg, 60), 1);
        assert_eq!(effective_interval(ScheduleType::Minutes, &cfg, 60), 1);
    }

    #[test]
    fn missing_interval_defaults_per_type() {
        let cfg = config(None, None);
        assert_eq!(effective_interval(ScheduleType::Minutes, &cfg, 45), 45);
        assert_eq!(effective_interval(ScheduleType::Custom, &cfg, 45), 45);
        assert_eq!(effective_interval(ScheduleType::Weekly, &cfg, 45), 1);
        assert_eq!(effective_interval(ScheduleType::Monthly, &cfg, 45), 1);
    }

    // -- minutes / custom --------------------------------------------------

    #[test]
    fn minutes_adds_interval() {
        let now = thursday_10am();
        let cfg = config(Some(15), None);
        assert_eq!(next(ScheduleType::Minutes, &cfg, now), now + Duration::minutes(15));
    }

    #[test]
    fn minutes_without_interval_uses_default() {
        let now = thursday_10am();
        assert_eq!(
            next(ScheduleType::Minutes, &config(None, None), now),
            now + Duration::minutes(60)
        );
    }

    #[test]
    fn custom_behaves_like_minutes() {
        let now = thursday_10am();
        let cfg = config(Some(90), None);
        assert_eq!(
            next(ScheduleType::Custom, &cfg, now),
            next(ScheduleType::Minutes, &cfg, now)
        );
    }

    #[test]
    fn minutes_with_time_rolls_to_next_day_when_passed() {
        let now = thursday_10am();
        let cfg = config(Some(30), Some("09:00"));
        assert_eq!(next(ScheduleType::Minutes, &cfg, now), utc(2026, 10, 16, 9, 0));
    }

    // -- daily -------------------------------------------------------------

    #[test]
    fn daily_interval_zero_fires_next_day() {
        let now = thursday_10am();
        assert_eq!(
            next(ScheduleType::Daily, &config(Some(0), None), now),
            utc(2026, 10, 16, 10, 0)
        );
    }

    #[test]
    fn daily_applies_time() {
        let now = thursday_10am();
        let cfg = config(Some(1), Some("09:00"));
        assert_eq!(next(ScheduleType::Daily, &cfg, now), utc(2026, 10, 16, 9, 0));
    }

    #[test]
    fn daily_time_is_local_to_rule_timezone() {
        // 10:00 UTC is 18:00 in Manila (UTC+8); next 08:00 Manila is 00:00 UTC.
        let now = thursday_10am();
        let cfg = config(Some(1), Some("08:00"));
        let at = compute_next(ScheduleType::Daily, &cfg, chrono_tz::Asia::Manila, now, 60).unwrap();
        assert_eq!(at, utc(2026, 10, 16, 0, 0));
    }

    #[test]
    fn daily_time_in_dst_gap_moves_past_gap() {
        // 02:30 on 2026-03-08 does not exist in New York; first valid minute is 03:00 EDT.
        let now = utc(2026, 3, 7, 17, 0);
        let cfg = config(Some(1), Some("02:30"));
        let at = compute_next(ScheduleType::Daily, &cfg, chrono_tz::America::New_York, now, 60).unwrap();
        assert_eq!(at, utc(2026, 3, 8, 7, 0));
    }

    // -- weekly ------------------------------------------------------------

    #[test]
    fn weekly_picks_following_monday_after_thursday() {
        let now = thursday_10am();
        let cfg = ScheduleConfig {
            interval: Some(1),
            days_of_week: vec![1, 3],
            ..Default::default()
        };
        let at = next(ScheduleType::Weekly, &cfg, now);
        assert_eq!(at.weekday(), Weekday::Mon);
        assert_eq!(at, utc(2026, 10, 19, 10, 0));
    }

    #[test]
    fn weekly_today_with_passed_time_waits_a_week() {
        let now = thursday_10am();
        let cfg = ScheduleConfig {
            interval: Some(1),
            time: TimeOfDay::new(9, 0),
            days_of_week: vec![4],
            ..Default::default()
        };
        let at = next(ScheduleType::Weekly, &cfg, now);
        assert!((at.date_naive() - now.date_naive()).num_days() >= 7);
        assert_eq!(at, utc(2026, 10, 22, 9, 0));
    }

    #[test]
    fn weekly_today_with_later_time_fires_today() {
        let now = thursday_10am();
        let cfg = ScheduleConfig {
            time: TimeOfDay::new(17, 30),
            days_of_week: vec![4],
            ..Default::default()
        };
        assert_eq!(next(ScheduleType::Weekly, &cfg, now), utc(2026, 10, 15, 17, 30));
    }

    #[test]
    fn weekly_without_days_adds_interval_weeks() {
        let now = thursday_10am();
        let cfg = config(Some(2), None);
        assert_eq!(next(ScheduleType::Weekly, &cfg, now), now + Duration::days(14));
    }

    #[test]
    fn weekly_ignores_out_of_range_days() {
        let now = thursday_10am();
        let cfg = ScheduleConfig {
            interval: Some(1),
            days_of_week: vec![9],
            ..Default::default()
        };
        assert_eq!(next(ScheduleType::Weekly, &cfg, now), now + Duration::days(7));
    }

    // -- monthly -----------------------------------------------------------

    #[test]
    fn monthly_day_31_clamps_to_thirty_day_month() {
        let now = utc(2026, 3, 15, 10, 0);
        let cfg = ScheduleConfig {
            interval: Some(1),
            time: TimeOfDay::new(9, 0),
            day_of_month: Some(31),
            ..Default::default()
        };
        assert_eq!(next(ScheduleType::Monthly, &cfg, now), utc(2026, 4, 30, 9, 0));
    }

    #[test]
    fn monthly_day_31_clamps_to_february() {
        let now = utc(2026, 1, 31, 10, 0);
        let cfg = ScheduleConfig {
            day_of_month: Some(31),
            ..Default::default()
        };
        assert_eq!(next(ScheduleType::Monthly, &cfg, now), utc(2026, 2, 28, 10, 0));
    }

    #[test]
    fn monthly_without_day_keeps_day_when_valid() {
        let now = utc(2026, 5, 12, 8, 0);
        assert_eq!(
            next(ScheduleType::Monthly, &config(Some(3), None), now),
            utc(2026, 8, 12, 8, 0)
        );
    }

    // -- yearly ------------------------------------------------------------

    #[test]
    fn yearly_adds_interval_years() {
        let now = thursday_10am();
        let cfg = config(Some(1), Some("06:15"));
        assert_eq!(next(ScheduleType::Yearly, &cfg, now), utc(2027, 10, 15, 6, 15));
    }

    #[test]
    fn yearly_from_leap_day_clamps() {
        let now = utc(2028, 2, 29, 12, 0);
        assert_eq!(
            next(ScheduleType::Yearly, &config(None, None), now),
            utc(2029, 2, 28, 12, 0)
        );
    }

    // -- general invariants ------------------------------------------------

    #[test]
    fn every_kind_is_strictly_after_now() {
        let nows = [
            thursday_10am(),
            utc(2026, 12, 31, 23, 59),
            utc(2028, 2, 29, 0, 0),
            utc(2026, 3, 8, 6, 59),
        ];
        let configs = [
            config(None, None),
            config(Some(0), Some("00:00")),
            config(Some(1), Some("23:59")),
            ScheduleConfig {
                interval: Some(2),
                time: TimeOfDay::new(2, 30),
                day_of_month: Some(31),
                days_of_week: vec![0, 6],
            },
        ];
        let zones = [Tz::UTC, chrono_tz::America::New_York, chrono_tz::Asia::Kolkata];
        for ty in [
            ScheduleType::Minutes,
            ScheduleType::Daily,
            ScheduleType::Weekly,
            ScheduleType::Monthly,
            ScheduleType::Yearly,
            ScheduleType::Custom,
        ] {
            for now in nows {
                for cfg in &configs {
                    for tz in zones {
                        let at = compute_next(ty, cfg, tz, now, 60).unwrap();
                        assert!(at > now, "{ty} {cfg:?} {tz} {now} -> {at}");
                    }
                }
            }
        }
    }

    #[test]
    fn computation_is_deterministic() {
        let now = thursday_10am();
        let cfg = ScheduleConfig {
            interval: Some(1),
            time: TimeOfDay::new(9, 0),
            days_of_week: vec![1, 3, 5],
            ..Default::default()
        };
        let a = next(ScheduleType::Weekly, &cfg, now);
        let b = next(ScheduleType::Weekly, &cfg, now);
        assert_eq!(a, b);
    }

    // -- ScheduleCalculator / seeding --------------------------------------

    #[test]
    fn calculator_uses_settings_defaults() {
        let settings = StaticSettings {
            default_minutes_interval: 5,
            ..Default::default()
        };
        let calc = ScheduleCalculator::new(&settings);
        let now = thursday_10am();
        assert_eq!(
            calc.compute_next(ScheduleType::Minutes, &config(None, None), "UTC", now),
            Ok(now + Duration::minutes(5))
        );
    }

    #[test]
    fn calculator_unknown_timezone_behaves_as_utc() {
        let calc = ScheduleCalculator::new(&StaticSettings::default());
        let now = thursday_10am();
        let cfg = config(Some(1), Some("09:00"));
        assert_eq!(
            calc.compute_next(ScheduleType::Daily, &cfg, "Nowhere/Special", now),
            calc.compute_next(ScheduleType::Daily, &cfg, "UTC", now)
        );
    }

    #[test]
    fn seed_prefers_future_start() {
        let calc = ScheduleCalculator::new(&StaticSettings::default());
        let now = thursday_10am();
        let start = now + Duration::days(3);
        let cfg = config(Some(1), None);
        assert_eq!(
            seed_next_execution(&calc, ScheduleType::Daily, &cfg, "UTC", Some(start), now),
            Ok(start)
        );
    }

    #[test]
    fn seed_ignores_past_start() {
        let calc = ScheduleCalculator::new(&StaticSettings::default());
        let now = thursday_10am();
        let cfg = config(Some(1), None);
        let seeded = seed_next_execution(
            &calc,
            ScheduleType::Daily,
            &cfg,
            "UTC",
            Some(now - Duration::hours(1)),
            now,
        );
        assert_eq!(seeded, Ok(utc(2026, 10, 16, 10, 0)));
    }

    #[test]
    fn rule_seed_sets_next_execution() {
        let mut rule: crate::schema::RecurringRule = serde_json::from_value(serde_json::json!({
            "id": "r1", "processId": "p1", "name": "n",
            "template": { "title": "t" },
            "scheduleType": "minutes",
            "scheduleConfig": { "interval": 30 },
            "isActive": true
        }))
        .unwrap();
        let calc = ScheduleCalculator::new(&StaticSettings::default());
        let now = thursday_10am();
        rule.seed(&calc, None, now).unwrap();
        assert_eq!(rule.next_execution_at, Some(now + Duration::minutes(30)));
    }

    // -- out-of-range intervals --------------------------------------------

    #[test]
    fn huge_day_intervals_are_errors_not_panics() {
        let now = thursday_10am();
        let cfg = config(Some(200_000_000), Some("09:00"));
        for ty in [ScheduleType::Daily, ScheduleType::Weekly] {
            let err = compute_next(ty, &cfg, Tz::UTC, now, 60).unwrap_err();
            assert_eq!(err, ScheduleError { schedule_type: ty, interval: 200_000_000 });
        }

        let weekdays = ScheduleConfig {
            days_of_week: vec![9],
            ..cfg.clone()
        };
        assert!(compute_next(ScheduleType::Weekly, &weekdays, Tz::UTC, now, 60).is_err());
    }

    #[test]
    fn huge_month_and_year_intervals_are_errors() {
        let now = thursday_10am();
        let cfg = config(Some(u32::MAX), None);
        assert!(compute_next(ScheduleType::Monthly, &cfg, Tz::UTC, now, 60).is_err());
        assert!(compute_next(ScheduleType::Yearly, &cfg, Tz::UTC, now, 60).is_err());
    }

    #[test]
    fn largest_minutes_interval_still_computes() {
        let now = thursday_10am();
        let cfg = config(Some(u32::MAX), None);
        let at = compute_next(ScheduleType::Minutes, &cfg, Tz::UTC, now, 60).unwrap();
        assert_eq!(at, now + Duration::minutes(i64::from(u32::MAX)));
    }

    #[test]
    fn rule_seed_reports_out_of_range_schedule() {
        let mut rule: crate::schema::RecurringRule = serde_json::from_value(serde_json::json!({
            "id": "r1", "processId": "p1", "name": "n",
            "template": { "title": "t" },
            "scheduleType": "daily",
            "scheduleConfig": { "interval": 200000000 },
            "isActive": true
        }))
        .unwrap();
        let calc = ScheduleCalculator::new(&StaticSettings::default());
        assert!(rule.seed(&calc, None, thursday_10am()).is_err());
        assert_eq!(rule.next_execution_at, None);
    }
}
