use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::resolve_day_slots;
use super::conflict::{
    client_conflict, consultant_conflict, session_cap_reached, validate_span, validate_text,
};
use super::{Engine, EngineError};

/// What the user picked before submitting: the hold's draft payload.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub consultant_id: Ulid,
    pub client_id: Ulid,
    pub date: NaiveDate,
    pub slot: Slot,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub fee: Option<i64>,
}

/// Guard a transition against the state-machine table.
fn advance(hold: &BookingHold, to: HoldStatus) -> Result<(), EngineError> {
    if hold.status.can_advance(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            from: hold.status,
            to,
        })
    }
}

impl Engine {
    /// Start a booking flow: persist the Draft. Validation failures here are
    /// `ValidationError` — nothing is reserved yet.
    pub async fn open_booking(&self, draft: BookingDraft) -> Result<Ulid, EngineError> {
        if draft.consultant_id == draft.client_id {
            return Err(EngineError::ValidationError("client and consultant must differ"));
        }
        if draft.slot.start >= draft.slot.end {
            return Err(EngineError::ValidationError("slot start must be before end"));
        }
        validate_span(&Span::from_slot(draft.date, draft.slot), self.today())?;
        validate_text(draft.reason.as_deref(), draft.notes.as_deref())?;

        let mut guard = self.calendar_write(&draft.consultant_id).await?;
        if guard.holds.len() >= MAX_HOLDS_PER_CALENDAR {
            return Err(EngineError::LimitExceeded("too many holds on calendar"));
        }

        let hold = BookingHold {
            id: Ulid::new(),
            consultant_id: draft.consultant_id,
            client_id: draft.client_id,
            date: draft.date,
            slot: draft.slot,
            status: HoldStatus::Draft,
            expires_at: None,
            reason: draft.reason,
            notes: draft.notes,
            fee: draft.fee,
        };
        let id = hold.id;
        let event = Event::HoldOpened { hold };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    /// Draft → PreChecked: re-run the resolver against *current* data, not
    /// the client's possibly-stale slot list. On `SlotUnavailable` the hold
    /// stays Draft and the client refreshes its list.
    pub async fn submit_booking(&self, hold_id: Ulid) -> Result<(), EngineError> {
        let (consultant_id, mut guard) = self.hold_write(&hold_id).await?;
        let hold = guard.hold(hold_id).ok_or(EngineError::NotFound(hold_id))?;
        advance(hold, HoldStatus::PreChecked)?;
        let (client_id, date, slot) = (hold.client_id, hold.date, hold.slot);
        let duration = hold.span().duration_min() as u32;

        let client_busy = self.client_busy_on(&client_id, date, None);
        let open = resolve_day_slots(&guard, date, Some(duration), &client_busy, self.now());
        if !open.contains(&slot) {
            return Err(EngineError::SlotUnavailable);
        }

        let event = Event::HoldSubmitted { id: hold_id, consultant_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// PreChecked → Held: stamp the server-authoritative expiry and hand off
    /// to the payment step. No re-validation — the commit-time check is the
    /// serializer.
    pub async fn place_hold(&self, hold_id: Ulid) -> Result<NaiveDateTime, EngineError> {
        let (consultant_id, mut guard) = self.hold_write(&hold_id).await?;
        let hold = guard.hold(hold_id).ok_or(EngineError::NotFound(hold_id))?;
        advance(hold, HoldStatus::Held)?;

        let expires_at = self.now() + self.hold_ttl();
        let event = Event::HoldPlaced {
            id: hold_id,
            consultant_id,
            expires_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::HOLDS_PLACED_TOTAL).increment(1);
        Ok(expires_at)
    }

    /// Held → Confirmed, on successful payment. The appointment row is
    /// written atomically with the status change. Commit-time re-validation
    /// closes the race where another hold confirmed first: the loser's hold
    /// moves to Expired and gets `SlotUnavailable`; no partial appointment is
    /// ever created.
    pub async fn confirm_booking(&self, hold_id: Ulid) -> Result<Appointment, EngineError> {
        let (consultant_id, mut guard) = self.hold_write(&hold_id).await?;
        let hold = guard
            .hold(hold_id)
            .ok_or(EngineError::NotFound(hold_id))?
            .clone();
        advance(&hold, HoldStatus::Confirmed)?;

        let now = self.now();
        if hold.expires_at.is_none_or(|e| e <= now) {
            let event = Event::HoldReleased {
                id: hold_id,
                consultant_id,
                terminal: HoldStatus::Expired,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL).increment(1);
            return Err(EngineError::HoldExpired);
        }

        let span = hold.span();
        let client_busy = self.client_busy_on(&hold.client_id, hold.date, None);
        let lost_race = consultant_conflict(&guard, &span, None)
            || session_cap_reached(&guard, &span)
            || client_conflict(&client_busy, &span);
        if lost_race {
            let event = Event::HoldReleased {
                id: hold_id,
                consultant_id,
                terminal: HoldStatus::Expired,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            metrics::counter!(crate::observability::COMMIT_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotUnavailable);
        }

        let appointment = Appointment {
            id: Ulid::new(),
            consultant_id,
            client_id: hold.client_id,
            span,
            status: AppointmentStatus::Upcoming,
            reason: hold.reason.clone(),
            notes: hold.notes.clone(),
            fee: hold.fee,
        };
        let event = Event::HoldConfirmed {
            id: hold_id,
            consultant_id,
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::HOLDS_CONFIRMED_TOTAL).increment(1);
        Ok(appointment)
    }

    /// Explicit user abort from any non-terminal state. Same release effect
    /// as expiry, distinguished for auditing.
    pub async fn cancel_booking(&self, hold_id: Ulid) -> Result<(), EngineError> {
        let (consultant_id, mut guard) = self.hold_write(&hold_id).await?;
        let hold = guard.hold(hold_id).ok_or(EngineError::NotFound(hold_id))?;
        advance(hold, HoldStatus::Cancelled)?;

        let event = Event::HoldReleased {
            id: hold_id,
            consultant_id,
            terminal: HoldStatus::Cancelled,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::HOLDS_CANCELLED_TOTAL).increment(1);
        Ok(())
    }

    /// Held → Expired, driven by the reaper once `expires_at` elapses. The
    /// slot becomes visible to other users again.
    pub async fn expire_hold(&self, hold_id: Ulid) -> Result<(), EngineError> {
        let (consultant_id, mut guard) = self.hold_write(&hold_id).await?;
        let hold = guard.hold(hold_id).ok_or(EngineError::NotFound(hold_id))?;
        advance(hold, HoldStatus::Expired)?;

        let event = Event::HoldReleased {
            id: hold_id,
            consultant_id,
            terminal: HoldStatus::Expired,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL).increment(1);
        Ok(())
    }
}
