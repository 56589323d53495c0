use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    client_conflict, consultant_conflict, session_cap_reached, validate_span, validate_text,
};
use super::slots::{validate_settings, validate_week};
use super::{Engine, EngineError, WalCommand};

/// Payload for the direct appointment-creation path (consultant/admin books
/// on a client's behalf, no payment hold).
#[derive(Debug, Clone)]
pub struct AppointmentDraft {
    pub consultant_id: Ulid,
    pub client_id: Ulid,
    pub span: Span,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub fee: Option<i64>,
}

impl Engine {
    pub async fn register_consultant(
        &self,
        id: Ulid,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_CONSULTANTS_PER_PRACTICE {
            return Err(EngineError::LimitExceeded("too many consultants"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("consultant name too long"));
            }
        // Reserve the id atomically — two racing registrations must not both
        // pass an existence check and then clobber each other's calendar.
        let cal = Arc::new(RwLock::new(CalendarState::new(id, name.clone())));
        match self.state.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(vacant) => {
                vacant.insert(cal);
            }
        }

        let event = Event::ConsultantRegistered { id, name };
        if let Err(e) = self.wal_append(&event).await {
            self.state.remove(&id);
            return Err(e);
        }
        self.notify.send(id, &event);
        Ok(())
    }

    /// Replace a consultant's weekly hours. `InvalidWindow` is rejected here,
    /// at configuration time — booking never sees a malformed week.
    pub async fn set_working_hours(
        &self,
        consultant_id: Ulid,
        week: WeekHours,
    ) -> Result<(), EngineError> {
        validate_week(&week)?;
        let mut guard = self.calendar_write(&consultant_id).await?;
        let event = Event::WorkingHoursSet { consultant_id, week };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn update_settings(
        &self,
        consultant_id: Ulid,
        settings: SessionSettings,
    ) -> Result<(), EngineError> {
        validate_settings(&settings)?;
        let mut guard = self.calendar_write(&consultant_id).await?;
        let event = Event::SettingsUpdated { consultant_id, settings };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Direct creation (skips the hold machine) — still fully conflict-checked
    /// against both parties.
    pub async fn create_appointment(
        &self,
        draft: AppointmentDraft,
    ) -> Result<Appointment, EngineError> {
        if draft.consultant_id == draft.client_id {
            return Err(EngineError::ValidationError("client and consultant must differ"));
        }
        validate_span(&draft.span, self.today())?;
        validate_text(draft.reason.as_deref(), draft.notes.as_deref())?;

        let mut guard = self.calendar_write(&draft.consultant_id).await?;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_CALENDAR {
            return Err(EngineError::LimitExceeded("too many appointments on calendar"));
        }
        if consultant_conflict(&guard, &draft.span, None)
            || session_cap_reached(&guard, &draft.span)
        {
            return Err(EngineError::SlotUnavailable);
        }
        let client_busy = self.client_busy_on(&draft.client_id, draft.span.date(), None);
        if client_conflict(&client_busy, &draft.span) {
            return Err(EngineError::SlotUnavailable);
        }

        let appointment = Appointment {
            id: Ulid::new(),
            consultant_id: draft.consultant_id,
            client_id: draft.client_id,
            span: draft.span,
            status: AppointmentStatus::Upcoming,
            reason: draft.reason,
            notes: draft.notes,
            fee: draft.fee,
        };
        let event = Event::AppointmentCreated { appointment: appointment.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(appointment)
    }

    /// Partial update: `status`/`notes` are replaced when given, kept
    /// otherwise. `notes` is patched through a double option — `Some(None)`
    /// clears stored notes, outer `None` leaves them alone.
    pub async fn update_appointment(
        &self,
        id: Ulid,
        status: Option<AppointmentStatus>,
        notes: Option<Option<String>>,
    ) -> Result<Appointment, EngineError> {
        validate_text(None, notes.as_ref().and_then(|n| n.as_deref()))?;
        let (consultant_id, mut guard) = self.appointment_write(&id).await?;
        let current = guard
            .appointment(id)
            .ok_or(EngineError::NotFound(id))?
            .clone();

        // Reinstating a Cancelled/Completed appointment puts it back on the
        // live schedule, so it must pass the same checks as a fresh booking.
        let new_status = status.unwrap_or(current.status);
        if new_status == AppointmentStatus::Upcoming
            && current.status != AppointmentStatus::Upcoming
        {
            // Completed appointments already count toward the daily cap;
            // only a Cancelled one re-enters the count on reinstatement.
            let reenters_cap = current.status == AppointmentStatus::Cancelled;
            if consultant_conflict(&guard, &current.span, Some(id))
                || (reenters_cap && session_cap_reached(&guard, &current.span))
            {
                return Err(EngineError::SlotUnavailable);
            }
            let busy = self.client_busy_on(&current.client_id, current.span.date(), Some(id));
            if client_conflict(&busy, &current.span) {
                return Err(EngineError::SlotUnavailable);
            }
        }

        let event = Event::AppointmentUpdated {
            id,
            consultant_id,
            status: new_status,
            notes: notes.unwrap_or(current.notes),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.appointment(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn cancel_appointment(&self, id: Ulid) -> Result<(), EngineError> {
        let (consultant_id, mut guard) = self.appointment_write(&id).await?;
        if guard.appointment(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::AppointmentCancelled { id, consultant_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Held holds whose TTL has elapsed, for the reaper.
    pub fn collect_expired_holds(&self, now: NaiveDateTime) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for entry in self.state.iter() {
            let cal = entry.value().clone();
            if let Ok(guard) = cal.try_read() {
                for hold in &guard.holds {
                    if hold.status == HoldStatus::Held
                        && hold.expires_at.is_some_and(|e| e <= now)
                    {
                        expired.push(hold.id);
                    }
                }
            }
        }
        expired
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    /// Terminal holds and cancelled appointments are dropped here — this is
    /// where "destroyed on terminal transition" becomes physical.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        let ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();

        for id in ids {
            let Some(cal) = self.get_calendar(&id) else { continue };
            let mut guard = cal.write().await;

            let cancelled: Vec<Ulid> = guard
                .appointments
                .iter()
                .filter(|a| a.status == AppointmentStatus::Cancelled)
                .map(|a| a.id)
                .collect();
            for appt_id in cancelled {
                guard.remove_appointment(appt_id);
                self.appointment_index.remove(&appt_id);
            }
            for hold in guard.holds.iter().filter(|h| h.status.is_terminal()) {
                self.hold_index.remove(&hold.id);
            }
            guard.prune_terminal_holds();

            events.push(Event::ConsultantRegistered {
                id: guard.id,
                name: guard.name.clone(),
            });
            events.push(Event::WorkingHoursSet {
                consultant_id: guard.id,
                week: guard.week.clone(),
            });
            events.push(Event::SettingsUpdated {
                consultant_id: guard.id,
                settings: guard.settings,
            });
            for appointment in &guard.appointments {
                events.push(Event::AppointmentCreated {
                    appointment: appointment.clone(),
                });
            }
            for hold in &guard.holds {
                events.push(Event::HoldOpened { hold: hold.clone() });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
