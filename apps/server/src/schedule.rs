//! Schedule model: the recurring weekly pattern, per-date exceptions,
//! and the "effective hours" resolution between them.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::BookingError;
use crate::models::{ScheduleExceptionRow, WorkScheduleRow};

pub const EXCEPTION_DAY_OFF: &str = "day_off";
pub const EXCEPTION_CUSTOM_HOURS: &str = "custom_hours";

// ── Wall-clock time ──

/// Minutes from midnight. Parsed from strict `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay(pub i64);

impl TimeOfDay {
    pub fn parse(s: &str) -> Result<Self, BookingError> {
        let bad = || BookingError::InvalidScheduleFormat(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(bad)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(bad());
        }
        // Digits only; i64::parse alone would let "+9" or "-1" through
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let hours: i64 = h.parse().map_err(|_| bad())?;
        let minutes: i64 = m.parse().map_err(|_| bad())?;
        if hours > 23 || minutes > 59 {
            return Err(bad());
        }
        Ok(Self(hours * 60 + minutes))
    }

    pub fn minutes(&self) -> i64 {
        self.0
    }

    pub fn format(&self) -> String {
        format!("{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// The open/close window of a working day. Half-open: a slot may end
/// exactly at `end` but not start there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayHours {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

/// A forbidden sub-interval inside the working window (lunch etc).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakSpan {
    #[serde(with = "time_of_day_str")]
    pub start: TimeOfDay,
    #[serde(with = "time_of_day_str")]
    pub end: TimeOfDay,
}

mod time_of_day_str {
    use super::TimeOfDay;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &TimeOfDay, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<TimeOfDay, D::Error> {
        let raw = String::deserialize(d)?;
        TimeOfDay::parse(&raw).map_err(de::Error::custom)
    }
}

/// Parse the `breaks` JSON column of a work_schedules row.
pub fn parse_breaks(json: &str) -> Result<Vec<BreakSpan>, BookingError> {
    serde_json::from_str(json)
        .map_err(|_| BookingError::InvalidScheduleFormat(json.to_string()))
}

/// 0 = Monday … 6 = Sunday.
pub fn day_of_week(date: NaiveDate) -> i64 {
    date.weekday().num_days_from_monday() as i64
}

// ── Effective hours resolution ──

/// Pure precedence rule: exception for the exact date wins over the
/// weekly row; no row (or a non-working day / day off) means closed.
pub fn resolve_effective_hours(
    exception: Option<&ScheduleExceptionRow>,
    weekly: Option<&WorkScheduleRow>,
) -> Result<Option<DayHours>, BookingError> {
    if let Some(exc) = exception {
        if exc.exception_type == EXCEPTION_DAY_OFF {
            return Ok(None);
        }
        // custom_hours: explicit window replacing the weekly pattern
        let start = exc.start_time.as_deref().ok_or(BookingError::IncompleteException)?;
        let end = exc.end_time.as_deref().ok_or(BookingError::IncompleteException)?;
        return Ok(Some(DayHours {
            start: TimeOfDay::parse(start)?,
            end: TimeOfDay::parse(end)?,
        }));
    }

    let Some(row) = weekly else { return Ok(None) };
    if !row.is_working_day {
        return Ok(None);
    }
    Ok(Some(DayHours {
        start: TimeOfDay::parse(&row.start_time)?,
        end: TimeOfDay::parse(&row.end_time)?,
    }))
}

/// Fetch the weekly row + exception for a date and resolve them.
/// Returns the working window with its breaks, or None when closed.
pub async fn effective_hours(
    db: &SqlitePool,
    vendor_id: i64,
    date: NaiveDate,
) -> Result<Option<(DayHours, Vec<BreakSpan>)>, BookingError> {
    let exception = sqlx::query_as::<_, ScheduleExceptionRow>(
        "SELECT id, vendor_id, exception_date, exception_type, start_time, end_time, reason
         FROM schedule_exceptions WHERE vendor_id = ? AND exception_date = ?",
    )
    .bind(vendor_id)
    .bind(date.format("%Y-%m-%d").to_string())
    .fetch_optional(db)
    .await?;

    let weekly = sqlx::query_as::<_, WorkScheduleRow>(
        "SELECT id, vendor_id, day_of_week, start_time, end_time, breaks, is_working_day
         FROM work_schedules WHERE vendor_id = ? AND day_of_week = ?",
    )
    .bind(vendor_id)
    .bind(day_of_week(date))
    .fetch_optional(db)
    .await?;

    let hours = resolve_effective_hours(exception.as_ref(), weekly.as_ref())?;

    // Custom-hours exceptions replace the whole day, breaks included
    let breaks = match (&hours, &exception, &weekly) {
        (Some(_), None, Some(row)) => parse_breaks(&row.breaks)?,
        _ => Vec::new(),
    };

    Ok(hours.map(|h| (h, breaks)))
}

/// Validation for the vendor settings PUT: window sane, breaks inside
/// the window and pairwise non-overlapping.
pub fn validate_day(
    start_time: &str,
    end_time: &str,
    breaks: &[(String, String)],
) -> Result<(), BookingError> {
    let start = TimeOfDay::parse(start_time)?;
    let end = TimeOfDay::parse(end_time)?;
    if start >= end {
        return Err(BookingError::InvalidScheduleFormat(format!(
            "{}-{}",
            start_time, end_time
        )));
    }

    let mut spans: Vec<(TimeOfDay, TimeOfDay)> = Vec::with_capacity(breaks.len());
    for (b_start, b_end) in breaks {
        let bs = TimeOfDay::parse(b_start)?;
        let be = TimeOfDay::parse(b_end)?;
        if bs >= be || bs < start || be > end {
            return Err(BookingError::InvalidScheduleFormat(format!(
                "{}-{}",
                b_start, b_end
            )));
        }
        spans.push((bs, be));
    }
    spans.sort();
    for pair in spans.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(BookingError::InvalidScheduleFormat("breaks overlap".into()));
        }
    }
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn weekly(start: &str, end: &str, working: bool) -> WorkScheduleRow {
        WorkScheduleRow {
            id: 1,
            vendor_id: 1,
            day_of_week: 0,
            start_time: start.to_string(),
            end_time: end.to_string(),
            breaks: "[]".to_string(),
            is_working_day: working,
        }
    }

    fn exception(kind: &str, start: Option<&str>, end: Option<&str>) -> ScheduleExceptionRow {
        ScheduleExceptionRow {
            id: 1,
            vendor_id: 1,
            exception_date: "2026-03-02".to_string(),
            exception_type: kind.to_string(),
            start_time: start.map(str::to_string),
            end_time: end.map(str::to_string),
            reason: None,
        }
    }

    // ── TimeOfDay ──

    #[test]
    fn test_parse_valid_time() {
        assert_eq!(TimeOfDay::parse("09:00").unwrap().minutes(), 540);
        assert_eq!(TimeOfDay::parse("00:00").unwrap().minutes(), 0);
        assert_eq!(TimeOfDay::parse("23:59").unwrap().minutes(), 1439);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["9:00", "24:00", "12:60", "noon", "12-30", "", "12:3"] {
            assert!(TimeOfDay::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_parse_rejects_signed_components() {
        for bad in ["+9:30", "-1:30", "09:+5", "09:-5", "+09:30"] {
            assert!(TimeOfDay::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_format_roundtrip() {
        assert_eq!(TimeOfDay::parse("07:05").unwrap().format(), "07:05");
        assert_eq!(TimeOfDay(17 * 60).format(), "17:00");
    }

    #[test]
    fn test_day_of_week_monday_is_zero() {
        // 2026-03-02 is a Monday
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_eq!(day_of_week(monday), 0);
        assert_eq!(day_of_week(monday + chrono::Days::new(6)), 6);
    }

    // ── resolve_effective_hours ──

    #[test]
    fn test_weekly_row_used_without_exception() {
        let row = weekly("09:00", "18:00", true);
        let hours = resolve_effective_hours(None, Some(&row)).unwrap().unwrap();
        assert_eq!(hours.start.minutes(), 540);
        assert_eq!(hours.end.minutes(), 1080);
    }

    #[test]
    fn test_no_row_means_closed() {
        assert!(resolve_effective_hours(None, None).unwrap().is_none());
    }

    #[test]
    fn test_non_working_day_means_closed() {
        let row = weekly("09:00", "18:00", false);
        assert!(resolve_effective_hours(None, Some(&row)).unwrap().is_none());
    }

    #[test]
    fn test_day_off_exception_overrides_weekly() {
        let row = weekly("09:00", "18:00", true);
        let exc = exception(EXCEPTION_DAY_OFF, None, None);
        assert!(resolve_effective_hours(Some(&exc), Some(&row)).unwrap().is_none());
    }

    #[test]
    fn test_custom_hours_replace_weekly() {
        let row = weekly("09:00", "18:00", true);
        let exc = exception(EXCEPTION_CUSTOM_HOURS, Some("12:00"), Some("15:00"));
        let hours = resolve_effective_hours(Some(&exc), Some(&row)).unwrap().unwrap();
        assert_eq!(hours.start.format(), "12:00");
        assert_eq!(hours.end.format(), "15:00");
    }

    #[test]
    fn test_custom_hours_work_even_on_day_without_weekly_row() {
        let exc = exception(EXCEPTION_CUSTOM_HOURS, Some("10:00"), Some("14:00"));
        let hours = resolve_effective_hours(Some(&exc), None).unwrap().unwrap();
        assert_eq!(hours.start.format(), "10:00");
    }

    #[test]
    fn test_incomplete_exception_is_rejected() {
        let exc = exception(EXCEPTION_CUSTOM_HOURS, Some("12:00"), None);
        assert!(matches!(
            resolve_effective_hours(Some(&exc), None),
            Err(BookingError::IncompleteException)
        ));
    }

    #[test]
    fn test_malformed_weekly_time_is_rejected() {
        let row = weekly("9am", "18:00", true);
        assert!(matches!(
            resolve_effective_hours(None, Some(&row)),
            Err(BookingError::InvalidScheduleFormat(_))
        ));
    }

    // ── breaks ──

    #[test]
    fn test_parse_breaks_json() {
        let spans = parse_breaks(r#"[{"start":"13:00","end":"14:00"}]"#).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start.format(), "13:00");
        assert_eq!(spans[0].end.format(), "14:00");
    }

    #[test]
    fn test_parse_breaks_empty() {
        assert!(parse_breaks("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_breaks_bad_json() {
        assert!(parse_breaks("lunch at one").is_err());
        assert!(parse_breaks(r#"[{"start":"25:00","end":"14:00"}]"#).is_err());
    }

    // ── validate_day ──

    #[test]
    fn test_validate_day_accepts_sane_window() {
        assert!(validate_day("09:00", "18:00", &[]).is_ok());
    }

    #[test]
    fn test_validate_day_rejects_inverted_window() {
        assert!(validate_day("18:00", "09:00", &[]).is_err());
        assert!(validate_day("09:00", "09:00", &[]).is_err());
    }

    #[test]
    fn test_validate_day_rejects_break_outside_window() {
        let breaks = vec![("08:00".to_string(), "10:00".to_string())];
        assert!(validate_day("09:00", "18:00", &breaks).is_err());
    }

    #[test]
    fn test_validate_day_rejects_overlapping_breaks() {
        let breaks = vec![
            ("12:00".to_string(), "13:30".to_string()),
            ("13:00".to_string(), "14:00".to_string()),
        ];
        assert!(validate_day("09:00", "18:00", &breaks).is_err());
    }

    #[test]
    fn test_validate_day_allows_touching_breaks() {
        let breaks = vec![
            ("12:00".to_string(), "13:00".to_string()),
            ("13:00".to_string(), "14:00".to_string()),
        ];
        assert!(validate_day("09:00", "18:00", &breaks).is_ok());
    }
}
