use chrono::{NaiveTime, Timelike};

use crate::limits::*;
use crate::model::{DayHours, SessionSettings, Slot, WeekHours, Window};

use super::EngineError;

fn minutes_from_midnight(t: NaiveTime) -> u32 {
    t.num_seconds_from_midnight() / 60
}

fn time_at(minutes: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
}

/// Compile one window into candidate slots. Deterministic: the first slot
/// starts at `window.start`, each spans `duration_min`, the cursor advances
/// by `duration_min + buffer_min`, and generation stops before a slot would
/// cross `window.end`. Zero slots if the duration doesn't fit.
pub fn generate_slots(window: &Window, duration_min: u32, buffer_min: u32) -> Vec<Slot> {
    let mut slots = Vec::new();
    if duration_min == 0 {
        return slots;
    }
    let window_end = minutes_from_midnight(window.end);
    let step = duration_min + buffer_min;
    let mut cursor = minutes_from_midnight(window.start);
    while cursor + duration_min <= window_end {
        let (Some(start), Some(end)) = (time_at(cursor), time_at(cursor + duration_min)) else {
            break;
        };
        slots.push(Slot::new(start, end));
        cursor += step;
    }
    slots
}

/// Compile a whole day: each enabled window independently, concatenated and
/// sorted ascending by start. Disabled days compile to nothing.
pub fn compile_day(day: &DayHours, duration_min: u32, buffer_min: u32) -> Vec<Slot> {
    if !day.enabled {
        return Vec::new();
    }
    let mut slots: Vec<Slot> = day
        .windows
        .iter()
        .flat_map(|w| generate_slots(w, duration_min, buffer_min))
        .collect();
    slots.sort_by_key(|s| s.start);
    slots
}

/// Reject bad working-hours configuration up front — `InvalidWindow` is a
/// configuration-time failure, never a booking-time one.
pub fn validate_week(week: &WeekHours) -> Result<(), EngineError> {
    for day in &week.days {
        if !day.enabled {
            continue;
        }
        if day.windows.len() > MAX_WINDOWS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many windows in a day"));
        }
        for window in &day.windows {
            if window.start >= window.end {
                return Err(EngineError::InvalidWindow("window start must be before end"));
            }
        }
        let mut sorted = day.windows.clone();
        sorted.sort_by_key(|w| w.start);
        for pair in sorted.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(EngineError::InvalidWindow("windows within a day overlap"));
            }
        }
    }
    Ok(())
}

pub fn validate_settings(settings: &SessionSettings) -> Result<(), EngineError> {
    if settings.duration_min == 0 {
        return Err(EngineError::InvalidWindow("session duration must be positive"));
    }
    if settings.max_sessions_per_day == 0 {
        return Err(EngineError::InvalidWindow("max sessions per day must be positive"));
    }
    Ok(())
}
