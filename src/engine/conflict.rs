use ulid::Ulid;

use crate::limits::*;
use crate::model::{CalendarState, Span};

use super::EngineError;

/// Does `span` overlap any Upcoming appointment on this calendar?
/// `exclude` skips one appointment id (used by reschedule to ignore the
/// appointment being moved). Half-open semantics throughout: an appointment
/// ending exactly when `span` starts is not a conflict.
pub(super) fn consultant_conflict(
    calendar: &CalendarState,
    span: &Span,
    exclude: Option<Ulid>,
) -> bool {
    calendar
        .overlapping(span)
        .any(|a| a.is_upcoming() && exclude != Some(a.id))
}

/// Does `span` overlap any of the client's busy spans (their own Upcoming
/// appointments, across all consultants)?
pub(super) fn client_conflict(busy: &[Span], span: &Span) -> bool {
    busy.iter().any(|b| b.overlaps(span))
}

/// True when the consultant already carries `max_sessions_per_day`
/// non-cancelled appointments on the span's date.
pub(super) fn session_cap_reached(calendar: &CalendarState, span: &Span) -> bool {
    let booked = calendar.booked_on(span.date()).count();
    booked >= calendar.settings.max_sessions_per_day as usize
}

pub(super) fn validate_text(
    reason: Option<&str>,
    notes: Option<&str>,
) -> Result<(), EngineError> {
    if reason.is_some_and(|r| r.len() > MAX_REASON_LEN) {
        return Err(EngineError::LimitExceeded("reason too long"));
    }
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

/// Booking-time span sanity: well-formed, not in the past, not absurdly far
/// out. Today is allowed — the availability resolver handles elapsed slots
/// within the current day.
pub(super) fn validate_span(span: &Span, today: chrono::NaiveDate) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::ValidationError("interval start must be before end"));
    }
    if span.start.date() != span.end.date() {
        return Err(EngineError::ValidationError("interval must stay within one day"));
    }
    if span.date() < today {
        return Err(EngineError::ValidationError("booking date is in the past"));
    }
    if (span.date() - today).num_days() > MAX_BOOKING_HORIZON_DAYS {
        return Err(EngineError::LimitExceeded("booking date too far out"));
    }
    Ok(())
}
