//! Read-only reference data: doctors with their weekly schedules, and the
//! appointment types patients can book.
//!
//! The engine only sees the two traits below, so a database-backed catalog
//! can replace [`StaticCatalog`] without touching scheduling logic.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{NaiveTime, Weekday};
use serde::Deserialize;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;

pub trait ScheduleCatalog: Send + Sync {
    fn doctor(&self, id: DoctorId) -> Option<Doctor>;

    /// All doctors, ordered by id.
    fn doctors(&self) -> Vec<Doctor>;
}

pub trait AppointmentTypeCatalog: Send + Sync {
    fn appointment_type(&self, key: &str) -> Option<AppointmentType>;

    /// All types, in catalog order.
    fn appointment_types(&self) -> Vec<AppointmentType>;

    fn duration_minutes(&self, key: &str) -> Option<u32> {
        self.appointment_type(key).map(|t| t.duration_minutes)
    }
}

/// Catalog held entirely in memory, built once at startup.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    doctors: BTreeMap<DoctorId, Doctor>,
    types: Vec<AppointmentType>,
}

/// On-disk layout of a catalog file.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    doctors: Vec<Doctor>,
    appointment_types: Vec<AppointmentType>,
}

impl StaticCatalog {
    pub fn new(doctors: Vec<Doctor>, types: Vec<AppointmentType>) -> Result<Self, EngineError> {
        if doctors.len() > MAX_DOCTORS {
            return Err(EngineError::InvalidCatalog("too many doctors".into()));
        }
        if types.len() > MAX_APPOINTMENT_TYPES {
            return Err(EngineError::InvalidCatalog("too many appointment types".into()));
        }

        let mut by_id = BTreeMap::new();
        for doctor in doctors {
            validate_doctor(&doctor)?;
            let id = doctor.id;
            if by_id.insert(id, doctor).is_some() {
                return Err(EngineError::InvalidCatalog(format!("duplicate doctor id {id}")));
            }
        }

        let mut keys = HashSet::new();
        for t in &types {
            if t.key.is_empty() || t.key.len() > MAX_TYPE_KEY_LEN {
                return Err(EngineError::InvalidCatalog(format!(
                    "bad appointment type key {:?}",
                    t.key
                )));
            }
            if t.duration_minutes == 0 || t.duration_minutes > MAX_DURATION_MINUTES {
                return Err(EngineError::InvalidCatalog(format!(
                    "appointment type {} has invalid duration {}",
                    t.key, t.duration_minutes
                )));
            }
            if !keys.insert(t.key.as_str()) {
                return Err(EngineError::InvalidCatalog(format!(
                    "duplicate appointment type {}",
                    t.key
                )));
            }
        }

        Ok(Self {
            doctors: by_id,
            types,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| EngineError::InvalidCatalog(e.to_string()))?;
        Self::new(file.doctors, file.appointment_types)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidCatalog(format!("{}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// The clinic's standing reference data.
    pub fn builtin() -> Self {
        let doctors = vec![
            doctor(
                1,
                "Harry Potter",
                "harry.potter@example.com",
                &[
                    (Weekday::Sun, 9, 12),
                    (Weekday::Sun, 13, 17),
                    (Weekday::Mon, 9, 12),
                    (Weekday::Mon, 13, 17),
                ],
            ),
            doctor(
                2,
                "Hermione Granger",
                "hermione.granger@example.com",
                &[
                    (Weekday::Wed, 9, 12),
                    (Weekday::Thu, 9, 12),
                    (Weekday::Fri, 12, 17),
                ],
            ),
            doctor(
                3,
                "Ron Weasley",
                "ron.weasley@example.com",
                &[
                    (Weekday::Wed, 12, 17),
                    (Weekday::Thu, 12, 17),
                    (Weekday::Fri, 9, 12),
                ],
            ),
            doctor(
                4,
                "Draco Malfoy",
                "draco.malfoy@example.com",
                &[(Weekday::Sat, 9, 12), (Weekday::Sat, 13, 17)],
            ),
        ];
        let types = vec![
            appointment_type("new_patient", "New Patient Consultation", 30),
            appointment_type("consultation", "Regular Consultation", 60),
            appointment_type("follow_up", "Follow-up Consultation", 20),
        ];
        Self {
            doctors: doctors.into_iter().map(|d| (d.id, d)).collect(),
            types,
        }
    }
}

fn validate_doctor(doctor: &Doctor) -> Result<(), EngineError> {
    if doctor.name.len() > MAX_NAME_LEN {
        return Err(EngineError::InvalidCatalog(format!(
            "doctor {} name too long",
            doctor.id
        )));
    }
    if doctor.schedule.len() > MAX_WINDOWS_PER_DOCTOR {
        return Err(EngineError::InvalidCatalog(format!(
            "doctor {} has too many working windows",
            doctor.id
        )));
    }
    for w in &doctor.schedule {
        if w.start_time >= w.end_time {
            return Err(EngineError::InvalidCatalog(format!(
                "doctor {} window on {} starts at {} but ends at {}",
                doctor.id, w.day_of_week, w.start_time, w.end_time
            )));
        }
    }
    Ok(())
}

fn doctor(id: DoctorId, name: &str, email: &str, hours: &[(Weekday, u32, u32)]) -> Doctor {
    let hour = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap_or(NaiveTime::MIN);
    Doctor {
        id,
        name: name.to_string(),
        email: Some(email.to_string()),
        schedule: hours
            .iter()
            .map(|&(day, start, end)| WorkingWindow::new(day, hour(start), hour(end)))
            .collect(),
    }
}

fn appointment_type(key: &str, name: &str, duration_minutes: u32) -> AppointmentType {
    AppointmentType {
        key: key.to_string(),
        name: name.to_string(),
        duration_minutes,
    }
}

impl ScheduleCatalog for StaticCatalog {
    fn doctor(&self, id: DoctorId) -> Option<Doctor> {
        self.doctors.get(&id).cloned()
    }

    fn doctors(&self) -> Vec<Doctor> {
        self.doctors.values().cloned().collect()
    }
}

impl AppointmentTypeCatalog for StaticCatalog {
    fn appointment_type(&self, key: &str) -> Option<AppointmentType> {
        self.types.iter().find(|t| t.key == key).cloned()
    }

    fn appointment_types(&self) -> Vec<AppointmentType> {
        self.types.clone()
    }
}
