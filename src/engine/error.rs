use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::DoctorId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    DoctorNotFound(DoctorId),
    AppointmentTypeNotFound(String),
    DoctorUnavailable {
        doctor_id: DoctorId,
        start: NaiveDateTime,
    },
    /// Conflicts with the booking carrying this id.
    SlotOverlap(Ulid),
    AppointmentNotFound(Ulid),
    AlreadyPast(Ulid),
    InvalidRequest(&'static str),
    InvalidCatalog(String),
    WalError(String),
}

/// Coarse classification the host maps onto its own response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    BadRequest,
    NotFound,
    Unprocessable,
    Internal,
}

impl ErrorStatus {
    pub fn code(self) -> u16 {
        match self {
            ErrorStatus::BadRequest => 400,
            ErrorStatus::NotFound => 404,
            ErrorStatus::Unprocessable => 422,
            ErrorStatus::Internal => 500,
        }
    }
}

impl EngineError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            EngineError::DoctorNotFound(_)
            | EngineError::DoctorUnavailable { .. }
            | EngineError::SlotOverlap(_)
            | EngineError::AlreadyPast(_) => ErrorStatus::BadRequest,
            EngineError::AppointmentNotFound(_) => ErrorStatus::NotFound,
            EngineError::AppointmentTypeNotFound(_) | EngineError::InvalidRequest(_) => {
                ErrorStatus::Unprocessable
            }
            EngineError::InvalidCatalog(_) | EngineError::WalError(_) => ErrorStatus::Internal,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::DoctorNotFound(_) => "doctor_not_found",
            EngineError::AppointmentTypeNotFound(_) => "appointment_type_not_found",
            EngineError::DoctorUnavailable { .. } => "doctor_unavailable",
            EngineError::SlotOverlap(_) => "slot_overlap",
            EngineError::AppointmentNotFound(_) => "appointment_not_found",
            EngineError::AlreadyPast(_) => "already_past",
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::InvalidCatalog(_) => "invalid_catalog",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::DoctorNotFound(id) => {
                write!(f, "no doctor found with id {id}")
            }
            EngineError::AppointmentTypeNotFound(key) => {
                write!(f, "unknown appointment type: {key}")
            }
            EngineError::DoctorUnavailable { doctor_id, start } => write!(
                f,
                "doctor {doctor_id} is not available at {}",
                start.format("%Y-%m-%d %H:%M")
            ),
            EngineError::SlotOverlap(id) => {
                write!(f, "appointment time overlaps with existing appointment {id}")
            }
            EngineError::AppointmentNotFound(id) => write!(f, "appointment not found: {id}"),
            EngineError::AlreadyPast(id) => {
                write!(f, "cannot cancel past appointment {id}")
            }
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::InvalidCatalog(msg) => write!(f, "invalid catalog: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
