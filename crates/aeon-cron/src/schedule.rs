//! The schedule grammar and next-run computation.
//!
//! Accepted forms (lowercase, whitespace-trimmed):
//! - `every <N>{s|m|h|d}` — recurring interval
//! - `in <N>{s|m|h|d}`    — one-shot after a delay
//! - `at HH:MM`, `at H:MMam|pm`, `at <H>am|pm` — one-shot at the next
//!   matching clock time (today if still ahead, otherwise tomorrow)
//! - `hourly` | `daily` | `weekly` — fixed recurring periods
//!
//! Anything else is a validation error at create time. A schedule is a
//! one-shot iff its expression begins with `in ` or `at `.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// A parsed schedule expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Schedule {
    /// Recurring interval.
    Every(Duration),
    /// One-shot delay.
    In(Duration),
    /// One-shot at the next matching clock time.
    At { hour: u32, minute: u32 },
    Hourly,
    Daily,
    Weekly,
}

impl Schedule {
    /// One-shot schedules auto-pause after firing once.
    pub fn is_oneshot(&self) -> bool {
        matches!(self, Schedule::In(_) | Schedule::At { .. })
    }
}

/// Whether an expression denotes a one-shot, without fully parsing it.
pub fn is_oneshot_expr(expr: &str) -> bool {
    let e = expr.trim().to_lowercase();
    e.starts_with("in ") || e.starts_with("at ")
}

/// Parse a schedule expression.
pub fn parse(expr: &str) -> anyhow::Result<Schedule> {
    let e = expr.trim().to_lowercase();

    match e.as_str() {
        "hourly" => return Ok(Schedule::Hourly),
        "daily" => return Ok(Schedule::Daily),
        "weekly" => return Ok(Schedule::Weekly),
        _ => {}
    }

    if let Some(rest) = e.strip_prefix("every ") {
        return Ok(Schedule::Every(parse_interval(rest)?));
    }
    if let Some(rest) = e.strip_prefix("in ") {
        return Ok(Schedule::In(parse_interval(rest)?));
    }
    if let Some(rest) = e.strip_prefix("at ") {
        let (hour, minute) = parse_clock(rest)?;
        return Ok(Schedule::At { hour, minute });
    }

    anyhow::bail!(
        "invalid schedule '{}'; expected 'every N[smhd]', 'in N[smhd]', 'at HH:MM', hourly, daily, or weekly",
        expr.trim()
    )
}

/// Compute the next run time for `expr` from `now`.
pub fn next_run(expr: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let schedule = parse(expr)?;
    Ok(match schedule {
        Schedule::Every(d) | Schedule::In(d) => now + d,
        Schedule::Hourly => now + Duration::hours(1),
        Schedule::Daily => now + Duration::days(1),
        Schedule::Weekly => now + Duration::weeks(1),
        Schedule::At { hour, minute } => {
            let today = now.date_naive().and_hms_opt(hour, minute, 0).unwrap();
            let candidate = Utc.from_utc_datetime(&today);
            if candidate > now {
                candidate
            } else {
                candidate + Duration::days(1)
            }
        }
    })
}

/// Parse `<N>{s|m|h|d}`, e.g. `90s`, `5m`, `2h`, `1d`.
fn parse_interval(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.len() < 2 {
        anyhow::bail!("invalid interval '{s}'");
    }
    let (num, unit) = s.split_at(s.len() - 1);
    let n: i64 = num
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid interval number '{num}'"))?;
    if n <= 0 {
        anyhow::bail!("interval must be positive, got '{s}'");
    }
    Ok(match unit {
        "s" => Duration::seconds(n),
        "m" => Duration::minutes(n),
        "h" => Duration::hours(n),
        "d" => Duration::days(n),
        _ => anyhow::bail!("invalid interval unit '{unit}' in '{s}'"),
    })
}

/// Parse `HH:MM`, `H:MMam|pm`, or `Ham|pm` into a 24h (hour, minute).
fn parse_clock(s: &str) -> anyhow::Result<(u32, u32)> {
    let s = s.trim();

    let (body, meridiem) = if let Some(b) = s.strip_suffix("am") {
        (b.trim(), Some(false))
    } else if let Some(b) = s.strip_suffix("pm") {
        (b.trim(), Some(true))
    } else {
        (s, None)
    };

    let (h_str, m_str) = match body.split_once(':') {
        Some((h, m)) => (h, m),
        None => (body, "0"),
    };

    let mut hour: u32 = h_str
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hour in 'at {s}'"))?;
    let minute: u32 = m_str
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute in 'at {s}'"))?;

    match meridiem {
        Some(pm) => {
            if hour == 0 || hour > 12 {
                anyhow::bail!("invalid 12-hour clock hour in 'at {s}'");
            }
            if pm && hour != 12 {
                hour += 12;
            } else if !pm && hour == 12 {
                hour = 0;
            }
        }
        None => {
            // Bare 24h form requires an explicit minute.
            if !body.contains(':') {
                anyhow::bail!("invalid schedule 'at {s}'; use HH:MM or H[:MM]am/pm");
            }
        }
    }

    if hour > 23 || minute > 59 {
        anyhow::bail!("clock time out of range in 'at {s}'");
    }
    Ok((hour, minute))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn t(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_every() {
        assert_eq!(parse("every 30s").unwrap(), Schedule::Every(Duration::seconds(30)));
        assert_eq!(parse("every 5m").unwrap(), Schedule::Every(Duration::minutes(5)));
        assert_eq!(parse("every 2h").unwrap(), Schedule::Every(Duration::hours(2)));
        assert_eq!(parse("every 1d").unwrap(), Schedule::Every(Duration::days(1)));
    }

    #[test]
    fn test_parse_in() {
        assert_eq!(parse("in 1m").unwrap(), Schedule::In(Duration::minutes(1)));
        assert_eq!(parse("in 45s").unwrap(), Schedule::In(Duration::seconds(45)));
    }

    #[test]
    fn test_parse_at_24h() {
        assert_eq!(parse("at 09:30").unwrap(), Schedule::At { hour: 9, minute: 30 });
        assert_eq!(parse("at 23:59").unwrap(), Schedule::At { hour: 23, minute: 59 });
    }

    #[test]
    fn test_parse_at_12h() {
        assert_eq!(parse("at 7pm").unwrap(), Schedule::At { hour: 19, minute: 0 });
        assert_eq!(parse("at 7:15pm").unwrap(), Schedule::At { hour: 19, minute: 15 });
        assert_eq!(parse("at 12am").unwrap(), Schedule::At { hour: 0, minute: 0 });
        assert_eq!(parse("at 12pm").unwrap(), Schedule::At { hour: 12, minute: 0 });
    }

    #[test]
    fn test_parse_fixed_periods() {
        assert_eq!(parse("hourly").unwrap(), Schedule::Hourly);
        assert_eq!(parse("daily").unwrap(), Schedule::Daily);
        assert_eq!(parse("weekly").unwrap(), Schedule::Weekly);
    }

    #[test]
    fn test_parse_trims_and_lowercases() {
        assert_eq!(parse("  EVERY 5M  ").unwrap(), Schedule::Every(Duration::minutes(5)));
        assert_eq!(parse(" AT 7PM ").unwrap(), Schedule::At { hour: 19, minute: 0 });
    }

    #[test]
    fn test_parse_rejects_unknown_forms() {
        for bad in [
            "",
            "sometimes",
            "every day",
            "every 5x",
            "every -5m",
            "every 0s",
            "in",
            "at 25:00",
            "at 9:75",
            "at 9",
            "at 13pm",
            "0 9 * * *",
        ] {
            assert!(parse(bad).is_err(), "'{bad}' should be rejected");
        }
    }

    #[test]
    fn test_is_oneshot() {
        assert!(parse("in 5m").unwrap().is_oneshot());
        assert!(parse("at 09:00").unwrap().is_oneshot());
        assert!(!parse("every 5m").unwrap().is_oneshot());
        assert!(!parse("daily").unwrap().is_oneshot());

        assert!(is_oneshot_expr("in 5m"));
        assert!(is_oneshot_expr("  At 7pm"));
        assert!(!is_oneshot_expr("every 5m"));
    }

    #[test]
    fn test_next_run_intervals() {
        let now = t(2026, 3, 1, 12, 0, 0);
        assert_eq!(next_run("in 1m", now).unwrap(), now + Duration::minutes(1));
        assert_eq!(next_run("every 2h", now).unwrap(), now + Duration::hours(2));
        assert_eq!(next_run("hourly", now).unwrap(), now + Duration::hours(1));
        assert_eq!(next_run("daily", now).unwrap(), now + Duration::days(1));
        assert_eq!(next_run("weekly", now).unwrap(), now + Duration::weeks(1));
    }

    #[test]
    fn test_next_run_at_later_today() {
        let now = t(2026, 3, 1, 12, 0, 0);
        let next = next_run("at 18:30", now).unwrap();
        assert_eq!(next, t(2026, 3, 1, 18, 30, 0));
    }

    #[test]
    fn test_next_run_at_rolls_to_tomorrow() {
        let now = t(2026, 3, 1, 19, 0, 0);
        let next = next_run("at 18:30", now).unwrap();
        assert_eq!(next, t(2026, 3, 2, 18, 30, 0));
    }

    #[test]
    fn test_next_run_at_exact_now_rolls_over() {
        let now = t(2026, 3, 1, 18, 30, 0);
        let next = next_run("at 18:30", now).unwrap();
        assert_eq!(next, t(2026, 3, 2, 18, 30, 0));
    }
}
