use chrono::{Datelike, NaiveDateTime};

use crate::model::*;

use super::EngineError;

pub(crate) fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// True when some working window on the request's weekday contains both
/// endpoints. Both bounds are inclusive, so a booking may end exactly when
/// the window closes.
pub(crate) fn doctor_available(doctor: &Doctor, range: &TimeRange) -> bool {
    let date = range.start.date();
    doctor.windows_on(date.weekday()).any(|w| {
        let (window_start, window_end) = w.on(date);
        let between = |t: NaiveDateTime| window_start <= t && t <= window_end;
        between(range.start) && between(range.end)
    })
}

pub(crate) fn check_doctor_available(doctor: &Doctor, range: &TimeRange) -> Result<(), EngineError> {
    if doctor_available(doctor, range) {
        Ok(())
    } else {
        Err(EngineError::DoctorUnavailable {
            doctor_id: doctor.id,
            start: range.start,
        })
    }
}

/// Reject `range` if it overlaps any of `existing` (half-open test).
pub(crate) fn check_no_overlap<'a>(
    existing: impl IntoIterator<Item = &'a Appointment>,
    range: &TimeRange,
) -> Result<(), EngineError> {
    for appt in existing {
        if appt.range().overlaps(range) {
            return Err(EngineError::SlotOverlap(appt.id));
        }
    }
    Ok(())
}
