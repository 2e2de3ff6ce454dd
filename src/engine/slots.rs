use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta};

use crate::catalog::AppointmentTypeCatalog;
use crate::model::*;

/// Booked ranges grouped by doctor and calendar date.
pub type BookedTimes = HashMap<(DoctorId, NaiveDate), Vec<TimeRange>>;

// ── Slot Generation ───────────────────────────────────────────────

/// Group existing appointments by `(doctor, date)`.
///
/// Each booking occupies `[start, start + duration(its own type))`. A booking
/// whose type has since left the catalog keeps its stored end time.
pub fn group_booked(appointments: &[Appointment], types: &dyn AppointmentTypeCatalog) -> BookedTimes {
    let mut booked: BookedTimes = HashMap::new();
    for appt in appointments {
        let range = match types.duration_minutes(&appt.appointment_type) {
            Some(minutes) => TimeRange::starting_at(appt.start_time, minutes),
            None => appt.range(),
        };
        booked
            .entry((appt.doctor_id, appt.date()))
            .or_default()
            .push(range);
    }
    for ranges in booked.values_mut() {
        ranges.sort_by_key(|r| r.start);
    }
    booked
}

/// Walk one working window on `date` at a fixed step and return every start
/// time whose `[start, start + duration)` fits the window and misses `booked`.
///
/// The walk stops at the first candidate that would run past the window end.
pub fn walk_window(
    date: NaiveDate,
    window: &WorkingWindow,
    duration_minutes: u32,
    interval_minutes: u32,
    booked: &[TimeRange],
) -> Vec<NaiveTime> {
    debug_assert!(interval_minutes > 0, "interval must be positive");
    let step = TimeDelta::minutes(i64::from(interval_minutes.max(1)));
    let (mut cursor, window_end) = window.on(date);
    let mut times = Vec::new();

    while cursor < window_end {
        let candidate = TimeRange::starting_at(cursor, duration_minutes);
        if candidate.end > window_end {
            break;
        }
        if !booked.iter().any(|b| candidate.overlaps(b)) {
            times.push(cursor.time());
        }
        cursor += step;
    }
    times
}

/// Available start times for one appointment type across `dates` and
/// `doctors`. Rows come out date-major, then in doctor order; a doctor with
/// no free start on a date produces no row.
pub fn generate_available_slots(
    appointment_type: &AppointmentType,
    dates: &[NaiveDate],
    doctors: &[Doctor],
    booked: &BookedTimes,
    interval_minutes: u32,
) -> Vec<DoctorSlots> {
    let mut rows = Vec::new();

    for &date in dates {
        let weekday = date.weekday();
        for doctor in doctors {
            let mut windows = doctor.windows_on(weekday).peekable();
            if windows.peek().is_none() {
                continue;
            }

            let taken = booked
                .get(&(doctor.id, date))
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            let times: Vec<String> = windows
                .flat_map(|w| {
                    walk_window(
                        date,
                        w,
                        appointment_type.duration_minutes,
                        interval_minutes,
                        taken,
                    )
                })
                .map(|t| t.format("%H:%M").to_string())
                .collect();

            if !times.is_empty() {
                rows.push(DoctorSlots {
                    date,
                    doctor_name: doctor.name.clone(),
                    doctor_id: doctor.id,
                    available_start_times: times,
                });
            }
        }
    }

    rows
}

/// Consecutive dates `first ..= first + days - 1`.
pub fn date_range(first: NaiveDate, days: u32) -> Vec<NaiveDate> {
    first.iter_days().take(days as usize).collect()
}
