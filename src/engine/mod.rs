mod conflict;
mod error;
mod mutations;
mod queries;
mod slots;
mod store;

pub use error::{EngineError, ErrorStatus};
pub use slots::{BookedTimes, date_range, generate_available_slots, group_booked, walk_window};
pub use store::{BookingLedger, BookingStore, DoctorBook, RemoveGuard, SharedDoctorBook};

use std::sync::Arc;

use crate::catalog::{AppointmentTypeCatalog, ScheduleCatalog, StaticCatalog};
use crate::limits::*;
use crate::model::*;

/// Scheduling settings passed in by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Step between offered start times.
    pub interval_minutes: u32,
    /// Days offered when a caller does not say.
    pub default_number_of_days: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            interval_minutes: 10,
            default_number_of_days: 7,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.interval_minutes == 0 || self.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(EngineError::InvalidRequest("interval must be 1..=1440 minutes"));
        }
        if self.default_number_of_days == 0 || self.default_number_of_days > MAX_NUMBER_OF_DAYS {
            return Err(EngineError::InvalidRequest("default number of days must be 1..=14"));
        }
        Ok(())
    }
}

/// The slot engine: reads the catalogs, reads and writes the booking store.
pub struct Engine {
    schedules: Arc<dyn ScheduleCatalog>,
    types: Arc<dyn AppointmentTypeCatalog>,
    store: Arc<dyn BookingStore>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        schedules: Arc<dyn ScheduleCatalog>,
        types: Arc<dyn AppointmentTypeCatalog>,
        store: Arc<dyn BookingStore>,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        Ok(Self {
            schedules,
            types,
            store,
            settings,
        })
    }

    /// Engine over a single catalog serving both doctors and types.
    pub fn with_catalog(
        catalog: Arc<StaticCatalog>,
        store: Arc<dyn BookingStore>,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        Self::new(catalog.clone(), catalog, store, settings)
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    pub(super) fn resolve_doctor(&self, id: DoctorId) -> Result<Doctor, EngineError> {
        self.schedules.doctor(id).ok_or(EngineError::DoctorNotFound(id))
    }

    pub(super) fn resolve_type(&self, key: &str) -> Result<AppointmentType, EngineError> {
        self.types
            .appointment_type(key)
            .ok_or_else(|| EngineError::AppointmentTypeNotFound(key.to_string()))
    }
}
