use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type DoctorId = u32;
pub type PatientId = u64;

/// Half-open interval `[start, end)` in local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    /// Range starting at `start` lasting `minutes`.
    pub fn starting_at(start: NaiveDateTime, minutes: u32) -> Self {
        Self::new(start, start + TimeDelta::minutes(i64::from(minutes)))
    }

    /// Like [`starting_at`](Self::starting_at), but `None` when the end is
    /// past the last representable instant.
    pub fn try_starting_at(start: NaiveDateTime, minutes: u32) -> Option<Self> {
        let end = start.checked_add_signed(TimeDelta::minutes(i64::from(minutes)))?;
        (start < end).then_some(Self { start, end })
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The whole calendar day `[date 00:00, date+1 00:00)`.
    /// Clamped at `NaiveDateTime::MAX` on the last representable date.
    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_time(NaiveTime::MIN);
        let end = start
            .checked_add_signed(TimeDelta::days(1))
            .unwrap_or(NaiveDateTime::MAX);
        Self::new(start, end)
    }
}

/// A recurring weekly interval during which a doctor accepts appointments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingWindow {
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl WorkingWindow {
    pub fn new(day_of_week: Weekday, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            day_of_week,
            start_time,
            end_time,
        }
    }

    /// Concrete start/end of this window on `date`. Caller checks the weekday.
    pub fn on(&self, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        (date.and_time(self.start_time), date.and_time(self.end_time))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: DoctorId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "schedules")]
    pub schedule: Vec<WorkingWindow>,
}

impl Doctor {
    /// Windows that apply on the given weekday, in catalog order.
    pub fn windows_on(&self, day: Weekday) -> impl Iterator<Item = &WorkingWindow> {
        self.schedule.iter().filter(move |w| w.day_of_week == day)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentType {
    pub key: String,
    pub name: String,
    #[serde(rename = "duration_in_mins")]
    pub duration_minutes: u32,
}

/// A persisted booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub appointment_type: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

impl Appointment {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn date(&self) -> NaiveDate {
        self.start_time.date()
    }
}

/// A booking request before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAppointment {
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub appointment_type: String,
    pub start_time: NaiveDateTime,
}

/// One bookable offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub date: NaiveDate,
    pub doctor_id: DoctorId,
    pub start_time: NaiveTime,
}

impl Slot {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }
}

/// Available start times for one doctor on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorSlots {
    pub date: NaiveDate,
    #[serde(rename = "doctor")]
    pub doctor_name: String,
    pub doctor_id: DoctorId,
    #[serde(rename = "available_start_time")]
    pub available_start_times: Vec<String>,
}

impl DoctorSlots {
    /// Expand the `HH:MM` strings back into individual slots.
    pub fn slots(&self) -> Vec<Slot> {
        self.available_start_times
            .iter()
            .filter_map(|t| NaiveTime::parse_from_str(t, "%H:%M").ok())
            .map(|start_time| Slot {
                date: self.date,
                doctor_id: self.doctor_id,
                start_time,
            })
            .collect()
    }
}

/// Availability keyed by appointment type.
pub type Availability = std::collections::BTreeMap<String, Vec<DoctorSlots>>;

/// Who is allowed to cancel a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelScope {
    Patient(PatientId),
    Doctor(DoctorId),
    Any,
}

impl CancelScope {
    pub fn permits(&self, appointment: &Appointment) -> bool {
        match self {
            CancelScope::Patient(id) => appointment.patient_id == *id,
            CancelScope::Doctor(id) => appointment.doctor_id == *id,
            CancelScope::Any => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub doctor_id: Option<DoctorId>,
    pub patient_id: Option<PatientId>,
    pub appointment_type: Option<String>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.doctor_id.is_none_or(|d| appointment.doctor_id == d)
            && self.patient_id.is_none_or(|p| appointment.patient_id == p)
            && self
                .appointment_type
                .as_deref()
                .is_none_or(|t| appointment.appointment_type == t)
    }
}

/// A patient-facing view of an upcoming appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingAppointment {
    pub id: Ulid,
    pub appointment_type: String,
    pub appointment_name: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub doctor_id: DoctorId,
    pub doctor_name: String,
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentBooked(Appointment),
    AppointmentCancelled { id: Ulid, doctor_id: DoctorId },
}

impl Event {
    pub fn doctor_id(&self) -> DoctorId {
        match self {
            Event::AppointmentBooked(a) => a.doctor_id,
            Event::AppointmentCancelled { doctor_id, .. } => *doctor_id,
        }
    }
}
