/// Furthest ahead `available` may look, in days.
pub const MAX_NUMBER_OF_DAYS: u32 = 14;

/// Slot step and appointment durations are bounded by one day.
pub const MAX_INTERVAL_MINUTES: u32 = 24 * 60;
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

pub const MAX_DOCTORS: usize = 10_000;
pub const MAX_APPOINTMENT_TYPES: usize = 1_000;
pub const MAX_WINDOWS_PER_DOCTOR: usize = 1_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TYPE_KEY_LEN: usize = 64;

/// Max bookings held for a single doctor.
pub const MAX_APPOINTMENTS_PER_DOCTOR: usize = 1_000_000;

/// Max bytes in a single wire request line.
pub const MAX_LINE_LEN: usize = 64 * 1024;
