use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use crate::limits::*;
use crate::model::*;

use super::conflict::now_local;
use super::slots::{date_range, generate_available_slots, group_booked};
use super::{Engine, EngineError};

const UNKNOWN_DOCTOR: &str = "Unknown Doctor";

impl Engine {
    /// Free slots for every appointment type over the next `number_of_days`
    /// days, starting tomorrow.
    pub async fn available_appointments(&self, number_of_days: u32) -> Result<Availability, EngineError> {
        let tomorrow = now_local().date() + TimeDelta::days(1);
        self.available_appointments_from(tomorrow, number_of_days).await
    }

    /// Free slots for `number_of_days` consecutive dates beginning at `first_date`.
    pub async fn available_appointments_from(
        &self,
        first_date: NaiveDate,
        number_of_days: u32,
    ) -> Result<Availability, EngineError> {
        if number_of_days == 0 || number_of_days > MAX_NUMBER_OF_DAYS {
            return Err(EngineError::InvalidRequest("number of days must be 1..=14"));
        }
        let dates = date_range(first_date, number_of_days);
        let (Some(&first), Some(&last)) = (dates.first(), dates.last()) else {
            return Ok(Availability::new());
        };

        let window = TimeRange::new(TimeRange::day(first).start, TimeRange::day(last).end);
        let existing = self.store.appointments_between(window).await?;
        let booked = group_booked(&existing, self.types.as_ref());
        let doctors = self.schedules.doctors();

        let availability = self
            .types
            .appointment_types()
            .into_iter()
            .map(|t| {
                let rows = generate_available_slots(&t, &dates, &doctors, &booked, self.settings.interval_minutes);
                (t.key, rows)
            })
            .collect();
        Ok(availability)
    }

    pub async fn upcoming_for_patient(&self, patient_id: PatientId) -> Result<Vec<UpcomingAppointment>, EngineError> {
        self.upcoming_for_patient_at(patient_id, now_local()).await
    }

    /// The patient's appointments starting strictly after `now`, earliest first.
    pub async fn upcoming_for_patient_at(
        &self,
        patient_id: PatientId,
        now: NaiveDateTime,
    ) -> Result<Vec<UpcomingAppointment>, EngineError> {
        let filter = AppointmentFilter {
            patient_id: Some(patient_id),
            ..Default::default()
        };
        let upcoming = self
            .store
            .list(&filter)
            .await?
            .into_iter()
            .filter(|a| a.start_time > now)
            .map(|a| {
                let appointment_name = self
                    .types
                    .appointment_type(&a.appointment_type)
                    .map_or_else(|| a.appointment_type.clone(), |t| t.name);
                let doctor_name = self
                    .schedules
                    .doctor(a.doctor_id)
                    .map_or_else(|| UNKNOWN_DOCTOR.to_string(), |d| d.name);
                UpcomingAppointment {
                    id: a.id,
                    appointment_type: a.appointment_type,
                    appointment_name,
                    start_time: a.start_time,
                    end_time: a.end_time,
                    doctor_id: a.doctor_id,
                    doctor_name,
                }
            })
            .collect();
        Ok(upcoming)
    }

    /// Stored appointments matching `filter`, by start time.
    pub async fn list_appointments(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, EngineError> {
        self.store.list(filter).await
    }

    pub fn doctors(&self) -> Vec<Doctor> {
        self.schedules.doctors()
    }

    pub fn doctor(&self, id: DoctorId) -> Result<Doctor, EngineError> {
        self.resolve_doctor(id)
    }

    pub fn appointment_types(&self) -> Vec<AppointmentType> {
        self.types.appointment_types()
    }
}
