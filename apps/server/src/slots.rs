//! Slot generation: the pure, deterministic scan that turns effective
//! hours + existing bookings into the list of bookable start times.
//!
//! Everything here is advisory. The authoritative overlap check happens
//! again inside the booking transaction (`booking.rs`) at commit time.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::error::BookingError;
use crate::schedule::{BreakSpan, DayHours, TimeOfDay};

/// Fallback when a vendor row somehow carries a non-positive step.
const DEFAULT_STEP_MIN: i64 = 60;

// ── Conflict checker ──

/// Half-open interval on the vendor's local timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// The single overlap predicate used everywhere: break checks, busy
/// checks, and the commit-time re-validation. Touching endpoints do
/// not overlap, so back-to-back bookings are allowed.
pub fn intervals_overlap(a: &Interval, b: &Interval) -> bool {
    a.start < b.end && b.start < a.end
}

fn spans_overlap(a_start: i64, a_end: i64, b: &BreakSpan) -> bool {
    a_start < b.end.minutes() && b.start.minutes() < a_end
}

// ── Slot generator ──

#[derive(Debug)]
pub struct SlotRequest<'a> {
    pub date: NaiveDate,
    /// Effective hours for the date; None means the vendor is closed.
    pub hours: Option<DayHours>,
    pub breaks: &'a [BreakSpan],
    /// Intervals of bookings in {pending, confirmed}.
    pub busy: &'a [Interval],
    pub duration_min: i64,
    pub buffer_after_min: i64,
    pub step_min: i64,
    /// Current time on the vendor's wall clock.
    pub now: NaiveDateTime,
    pub min_lead_min: i64,
}

/// Scan the working window at `step_min` granularity and keep every
/// candidate start `t` where:
/// - `[t, t+duration)` fits inside the effective hours,
/// - `[t, t+duration)` touches no break,
/// - `[t, t+duration+buffer)` overlaps no busy interval,
/// - `t >= now + min_lead`.
///
/// Pure function of its inputs: same request, same ascending output.
pub fn generate_slots(req: &SlotRequest) -> Result<Vec<TimeOfDay>, BookingError> {
    if req.duration_min <= 0 || req.buffer_after_min < 0 {
        return Err(BookingError::InvalidServiceDuration);
    }
    let Some(hours) = req.hours else {
        return Ok(Vec::new());
    };

    let step = if req.step_min > 0 { req.step_min } else { DEFAULT_STEP_MIN };
    let earliest = req.now + Duration::minutes(req.min_lead_min);

    let mut slots = Vec::new();
    let mut t = hours.start.minutes();
    while t + req.duration_min <= hours.end.minutes() {
        let slot_end = t + req.duration_min;

        if req.breaks.iter().any(|b| spans_overlap(t, slot_end, b)) {
            t += step;
            continue;
        }

        let start_at = req.date.and_time(
            chrono::NaiveTime::from_num_seconds_from_midnight_opt((t * 60) as u32, 0)
                .ok_or(BookingError::InvalidServiceDuration)?,
        );
        if start_at < earliest {
            t += step;
            continue;
        }

        // Buffer extends what the new booking occupies, not the day window
        let candidate = Interval {
            start: start_at,
            end: start_at + Duration::minutes(req.duration_min + req.buffer_after_min),
        };
        if req.busy.iter().any(|b| intervals_overlap(&candidate, b)) {
            t += step;
            continue;
        }

        slots.push(TimeOfDay(t));
        t += step;
    }

    Ok(slots)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::TimeOfDay;
    use chrono::NaiveDate;

    // 2026-03-02 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn at(date: NaiveDate, hhmm: &str) -> NaiveDateTime {
        let t = TimeOfDay::parse(hhmm).unwrap();
        date.and_time(
            chrono::NaiveTime::from_num_seconds_from_midnight_opt((t.minutes() * 60) as u32, 0)
                .unwrap(),
        )
    }

    fn busy(date: NaiveDate, start: &str, end: &str) -> Interval {
        Interval {
            start: at(date, start),
            end: at(date, end),
        }
    }

    fn hours(start: &str, end: &str) -> Option<DayHours> {
        Some(DayHours {
            start: TimeOfDay::parse(start).unwrap(),
            end: TimeOfDay::parse(end).unwrap(),
        })
    }

    fn brk(start: &str, end: &str) -> BreakSpan {
        BreakSpan {
            start: TimeOfDay::parse(start).unwrap(),
            end: TimeOfDay::parse(end).unwrap(),
        }
    }

    /// Mon-Fri 09:00-18:00, 60-min service, no buffer, now = Monday
    /// 07:00, 2h lead.
    fn base_request<'a>(busy: &'a [Interval], breaks: &'a [BreakSpan]) -> SlotRequest<'a> {
        SlotRequest {
            date: monday(),
            hours: hours("09:00", "18:00"),
            breaks,
            busy,
            duration_min: 60,
            buffer_after_min: 0,
            step_min: 60,
            now: at(monday(), "07:00"),
            min_lead_min: 120,
        }
    }

    fn formatted(slots: &[TimeOfDay]) -> Vec<String> {
        slots.iter().map(TimeOfDay::format).collect()
    }

    // ── intervals_overlap ──

    #[test]
    fn test_overlap_partial() {
        let a = busy(monday(), "10:00", "11:00");
        let b = busy(monday(), "10:30", "11:30");
        assert!(intervals_overlap(&a, &b));
        assert!(intervals_overlap(&b, &a));
    }

    #[test]
    fn test_overlap_containment() {
        let outer = busy(monday(), "09:00", "18:00");
        let inner = busy(monday(), "12:00", "13:00");
        assert!(intervals_overlap(&outer, &inner));
        assert!(intervals_overlap(&inner, &outer));
    }

    #[test]
    fn test_back_to_back_is_not_overlap() {
        let a = busy(monday(), "10:00", "11:00");
        let b = busy(monday(), "11:00", "12:00");
        assert!(!intervals_overlap(&a, &b));
        assert!(!intervals_overlap(&b, &a));
    }

    #[test]
    fn test_disjoint_days_do_not_overlap() {
        let a = busy(monday(), "10:00", "11:00");
        let b = busy(monday().succ_opt().unwrap(), "10:00", "11:00");
        assert!(!intervals_overlap(&a, &b));
    }

    // ── generate_slots: spec scenarios ──

    #[test]
    fn test_full_open_day_yields_nine_hourly_slots() {
        let slots = generate_slots(&base_request(&[], &[])).unwrap();
        assert_eq!(slots.len(), 9);
        assert_eq!(slots[0].format(), "09:00");
        assert_eq!(slots[8].format(), "17:00");
    }

    #[test]
    fn test_existing_booking_blocks_only_its_hour() {
        let taken = [busy(monday(), "12:00", "13:00")];
        let slots = formatted(&generate_slots(&base_request(&taken, &[])).unwrap());
        assert!(!slots.contains(&"12:00".to_string()));
        // Back-to-back boundaries stay bookable
        assert!(slots.contains(&"11:00".to_string()));
        assert!(slots.contains(&"13:00".to_string()));
        assert_eq!(slots.len(), 8);
    }

    #[test]
    fn test_break_excludes_slot_without_any_booking() {
        let breaks = [brk("13:00", "14:00")];
        let slots = formatted(&generate_slots(&base_request(&[], &breaks)).unwrap());
        assert!(!slots.contains(&"13:00".to_string()));
        assert!(slots.contains(&"12:00".to_string()));
        assert!(slots.contains(&"14:00".to_string()));
    }

    #[test]
    fn test_service_longer_than_window_yields_empty_not_error() {
        let mut req = base_request(&[], &[]);
        req.duration_min = 600; // 10h against a 9h day
        assert!(generate_slots(&req).unwrap().is_empty());
    }

    #[test]
    fn test_nonpositive_duration_is_rejected() {
        let mut req = base_request(&[], &[]);
        req.duration_min = 0;
        assert!(matches!(
            generate_slots(&req),
            Err(BookingError::InvalidServiceDuration)
        ));
        req.duration_min = -30;
        assert!(generate_slots(&req).is_err());
    }

    #[test]
    fn test_closed_day_yields_empty() {
        let mut req = base_request(&[], &[]);
        req.hours = None;
        assert!(generate_slots(&req).unwrap().is_empty());
    }

    #[test]
    fn test_lead_time_cuts_morning_slots() {
        let mut req = base_request(&[], &[]);
        req.now = at(monday(), "08:30"); // + 2h lead → nothing before 10:30
        let slots = formatted(&generate_slots(&req).unwrap());
        assert_eq!(slots.first().unwrap(), "11:00");
    }

    #[test]
    fn test_lead_time_exact_boundary_is_allowed() {
        // now 07:00 + 120min = 09:00, and t >= earliest keeps 09:00
        let slots = formatted(&generate_slots(&base_request(&[], &[])).unwrap());
        assert_eq!(slots.first().unwrap(), "09:00");
    }

    #[test]
    fn test_slot_may_end_exactly_at_closing() {
        let mut req = base_request(&[], &[]);
        req.hours = hours("16:00", "18:00");
        req.duration_min = 120;
        let slots = formatted(&generate_slots(&req).unwrap());
        assert_eq!(slots, vec!["16:00"]);
    }

    #[test]
    fn test_buffer_extends_busy_footprint() {
        let taken = [busy(monday(), "12:00", "13:00")];
        let mut req = base_request(&taken, &[]);
        req.buffer_after_min = 30;
        let slots = formatted(&generate_slots(&req).unwrap());
        // 11:00 + 60 + 30 buffer runs into the 12:00 booking
        assert!(!slots.contains(&"11:00".to_string()));
        assert!(slots.contains(&"10:00".to_string()));
        // After the booking the buffer trails into free time, fine
        assert!(slots.contains(&"13:00".to_string()));
    }

    #[test]
    fn test_booking_on_another_day_is_ignored() {
        let taken = [busy(monday().succ_opt().unwrap(), "12:00", "13:00")];
        let slots = generate_slots(&base_request(&taken, &[])).unwrap();
        assert_eq!(slots.len(), 9);
    }

    #[test]
    fn test_half_hour_step() {
        let mut req = base_request(&[], &[]);
        req.step_min = 30;
        req.hours = hours("09:00", "11:00");
        let slots = formatted(&generate_slots(&req).unwrap());
        assert_eq!(slots, vec!["09:00", "09:30", "10:00"]);
    }

    #[test]
    fn test_generation_is_idempotent() {
        let taken = [busy(monday(), "12:00", "13:00"), busy(monday(), "15:00", "16:00")];
        let breaks = [brk("13:00", "14:00")];
        let a = generate_slots(&base_request(&taken, &breaks)).unwrap();
        let b = generate_slots(&base_request(&taken, &breaks)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_output_is_sorted_ascending() {
        let taken = [busy(monday(), "10:00", "11:00")];
        let slots = generate_slots(&base_request(&taken, &[])).unwrap();
        let mut sorted = slots.clone();
        sorted.sort();
        assert_eq!(slots, sorted);
    }

    /// Completeness: every step-aligned candidate that satisfies all
    /// constraints must be present (no under-generation).
    #[test]
    fn test_no_under_generation() {
        let taken = [busy(monday(), "12:00", "13:00")];
        let breaks = [brk("15:00", "16:00")];
        let slots = formatted(&generate_slots(&base_request(&taken, &breaks)).unwrap());
        let expected: Vec<String> = ["09:00", "10:00", "11:00", "13:00", "14:00", "16:00", "17:00"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(slots, expected);
    }

    #[test]
    fn test_cancelled_interval_not_in_busy_reopens_slot() {
        // The caller only feeds {pending, confirmed} intervals, so a
        // cancelled 15:00 booking simply isn't here anymore.
        let slots = formatted(&generate_slots(&base_request(&[], &[])).unwrap());
        assert!(slots.contains(&"15:00".to_string()));
    }
}
