//! Hard input bounds. Everything a client can grow is capped.

pub const MAX_CONSULTANTS_PER_PRACTICE: usize = 10_000;
pub const MAX_WINDOWS_PER_DAY: usize = 16;
pub const MAX_APPOINTMENTS_PER_CALENDAR: usize = 100_000;
pub const MAX_HOLDS_PER_CALENDAR: usize = 1_000;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_REASON_LEN: usize = 512;
pub const MAX_NOTES_LEN: usize = 4_096;

pub const MAX_PRACTICES: usize = 256;
pub const MAX_PRACTICE_NAME_LEN: usize = 128;

/// Bookings may not target dates further out than this.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 366;
