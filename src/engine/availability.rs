use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::model::{CalendarState, Slot, Span};

use super::slots::compile_day;

/// Who is asking for availability. The role decides which party's hours are
/// compiled and whose own bookings are additionally subtracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Consultant,
    Client,
}

/// The SlotAvailabilityResolver core. Pure over the calendar snapshot:
///
/// 1. compile the day's candidate slots from working hours;
/// 2. subtract non-cancelled appointments and unexpired Held holds;
/// 3. subtract the counterparty client's own busy spans;
/// 4. if the date is today, drop slots not starting strictly after `now`;
/// 5. if the day is already at `max_sessions_per_day`, nothing is bookable.
///
/// The output is always a subset of the compiled candidates, ascending;
/// empty is a normal result.
pub fn resolve_day_slots(
    calendar: &CalendarState,
    date: NaiveDate,
    duration_min: Option<u32>,
    client_busy: &[Span],
    now: NaiveDateTime,
) -> Vec<Slot> {
    let settings = &calendar.settings;
    if calendar.booked_on(date).count() >= settings.max_sessions_per_day as usize {
        return Vec::new();
    }

    let duration = duration_min.unwrap_or(settings.duration_min);
    let candidates = compile_day(calendar.week.day(date.weekday()), duration, settings.buffer_min);

    let mut busy: Vec<Span> = calendar.booked_on(date).map(|a| a.span).collect();
    busy.extend(calendar.reserving_spans(date, now));
    busy.extend_from_slice(client_busy);

    candidates
        .into_iter()
        .filter(|slot| {
            let span = Span::from_slot(date, *slot);
            !busy.iter().any(|b| b.overlaps(&span))
        })
        .filter(|slot| date != now.date() || date.and_time(slot.start) > now)
        .collect()
}
