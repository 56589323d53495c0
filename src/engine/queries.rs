use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

use super::availability::{resolve_day_slots, ActorRole};
use super::{Engine, EngineError, SharedCalendar};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultantInfo {
    pub id: Ulid,
    pub name: Option<String>,
}

impl Engine {
    /// The §6 contract: bookable slots for a consultant on a date, ascending.
    /// An unknown consultant yields an empty list, same as a fully booked day.
    pub async fn get_available_slots(
        &self,
        consultant_id: Ulid,
        date: NaiveDate,
        duration_min: Option<u32>,
    ) -> Vec<Slot> {
        let Some(cal) = self.get_calendar(&consultant_id) else {
            return Vec::new();
        };
        let guard = cal.read().await;
        resolve_day_slots(&guard, date, duration_min, &[], self.now())
    }

    /// Role-aware availability: the consultant's open slots minus the
    /// client's own Upcoming bookings, whichever side is asking.
    pub async fn resolve_availability(
        &self,
        role: ActorRole,
        actor_id: Ulid,
        counterparty_id: Ulid,
        date: NaiveDate,
        duration_min: Option<u32>,
    ) -> Result<Vec<Slot>, EngineError> {
        let (consultant_id, client_id) = match role {
            ActorRole::Client => (counterparty_id, actor_id),
            ActorRole::Consultant => (actor_id, counterparty_id),
        };
        let cal = self
            .get_calendar(&consultant_id)
            .ok_or(EngineError::NotFound(consultant_id))?;
        let guard = cal.read().await;
        let client_busy = self.client_busy_on(&client_id, date, None);
        Ok(resolve_day_slots(
            &guard,
            date,
            duration_min,
            &client_busy,
            self.now(),
        ))
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let consultant_id = self
            .consultant_of_appointment(&id)
            .ok_or(EngineError::NotFound(id))?;
        let cal = self
            .get_calendar(&consultant_id)
            .ok_or(EngineError::NotFound(consultant_id))?;
        let guard = cal.read().await;
        guard.appointment(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// All of a consultant's appointments, optionally restricted to one date.
    pub async fn list_appointments(
        &self,
        consultant_id: Ulid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, EngineError> {
        let cal = self
            .get_calendar(&consultant_id)
            .ok_or(EngineError::NotFound(consultant_id))?;
        let guard = cal.read().await;
        Ok(guard
            .appointments
            .iter()
            .filter(|a| date.is_none_or(|d| a.span.date() == d))
            .cloned()
            .collect())
    }

    pub async fn get_hold(&self, id: Ulid) -> Result<BookingHold, EngineError> {
        let consultant_id = self
            .consultant_of_hold(&id)
            .ok_or(EngineError::NotFound(id))?;
        let cal = self
            .get_calendar(&consultant_id)
            .ok_or(EngineError::NotFound(consultant_id))?;
        let guard = cal.read().await;
        guard.hold(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn get_hours(
        &self,
        consultant_id: Ulid,
    ) -> Result<(WeekHours, SessionSettings), EngineError> {
        let cal = self
            .get_calendar(&consultant_id)
            .ok_or(EngineError::NotFound(consultant_id))?;
        let guard = cal.read().await;
        Ok((guard.week.clone(), guard.settings))
    }

    pub async fn list_consultants(&self) -> Vec<ConsultantInfo> {
        let calendars: Vec<SharedCalendar> =
            self.state.iter().map(|entry| entry.value().clone()).collect();
        let mut consultants = Vec::with_capacity(calendars.len());
        for cal in calendars {
            let guard = cal.read().await;
            consultants.push(ConsultantInfo {
                id: guard.id,
                name: guard.name.clone(),
            });
        }
        consultants
    }
}
