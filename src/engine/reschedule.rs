use ulid::Ulid;

use crate::model::*;

use super::conflict::{client_conflict, consultant_conflict, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Atomically relocate an existing appointment. The new interval is
    /// validated against the consultant's and the client's other Upcoming
    /// appointments, excluding the appointment being moved. On success the
    /// span is replaced and status resets to Upcoming (undoing any prior
    /// partial state); on failure the original row is left untouched and
    /// `SlotUnavailable` comes back. No hold, no payment — reschedule mutates
    /// the appointment directly.
    pub async fn reschedule_appointment(
        &self,
        id: Ulid,
        new_span: Span,
    ) -> Result<Appointment, EngineError> {
        validate_span(&new_span, self.today())?;

        let (consultant_id, mut guard) = self.appointment_write(&id).await?;
        let current = guard.appointment(id).ok_or(EngineError::NotFound(id))?;
        let client_id = current.client_id;

        if consultant_conflict(&guard, &new_span, Some(id)) {
            return Err(EngineError::SlotUnavailable);
        }
        let client_busy = self.client_busy_on(&client_id, new_span.date(), Some(id));
        if client_conflict(&client_busy, &new_span) {
            return Err(EngineError::SlotUnavailable);
        }

        let event = Event::AppointmentRescheduled {
            id,
            consultant_id,
            span: new_span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.appointment(id).cloned().ok_or(EngineError::NotFound(id))
    }
}
