use chrono::NaiveDateTime;
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;

use super::conflict::{check_doctor_available, now_local};
use super::{Engine, EngineError};

impl Engine {
    /// Validate a booking request and commit it.
    ///
    /// The schedule check runs first so that requests outside working hours
    /// never reach the store. The overlap check and the insert happen together
    /// inside [`BookingStore::insert_if_free`](super::BookingStore::insert_if_free).
    pub async fn create_appointment(&self, request: NewAppointment) -> Result<Appointment, EngineError> {
        let result = self.try_create(request).await;
        let outcome = match &result {
            Ok(_) => "created",
            Err(e) => e.kind(),
        };
        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_create(&self, request: NewAppointment) -> Result<Appointment, EngineError> {
        let doctor = self.resolve_doctor(request.doctor_id)?;
        let appointment_type = self.resolve_type(&request.appointment_type)?;
        let range = TimeRange::try_starting_at(request.start_time, appointment_type.duration_minutes)
            .ok_or(EngineError::InvalidRequest("start time out of range"))?;

        check_doctor_available(&doctor, &range)?;

        let appointment = Appointment {
            id: Ulid::new(),
            patient_id: request.patient_id,
            doctor_id: doctor.id,
            appointment_type: appointment_type.key,
            start_time: range.start,
            end_time: range.end,
        };

        match self.store.insert_if_free(appointment.clone()).await {
            Ok(()) => {
                info!(
                    "booked {} for patient {} with doctor {} at {}",
                    appointment.id, appointment.patient_id, appointment.doctor_id, appointment.start_time
                );
                Ok(appointment)
            }
            Err(e) => {
                warn!("booking rejected for doctor {} at {}: {e}", doctor.id, range.start);
                Err(e)
            }
        }
    }

    /// Cancel a future appointment on behalf of `scope`.
    pub async fn cancel_appointment(&self, id: Ulid, scope: CancelScope) -> Result<Appointment, EngineError> {
        self.cancel_appointment_at(id, scope, now_local()).await
    }

    /// Cancellation against an explicit clock reading. An appointment that
    /// ended before `now` stays on record.
    pub async fn cancel_appointment_at(
        &self,
        id: Ulid,
        scope: CancelScope,
        now: NaiveDateTime,
    ) -> Result<Appointment, EngineError> {
        let guard = |appointment: &Appointment| {
            if !scope.permits(appointment) {
                return Err(EngineError::AppointmentNotFound(id));
            }
            if appointment.end_time < now {
                return Err(EngineError::AlreadyPast(id));
            }
            Ok(())
        };
        let removed = self.store.remove_if(id, &guard).await?;
        info!("cancelled {} (doctor {})", removed.id, removed.doctor_id);
        Ok(removed)
    }
}
