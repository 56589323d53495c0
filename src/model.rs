use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open wall-clock interval `[start, end)`. All times are naive local
/// time — the engine does no timezone arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn from_slot(date: NaiveDate, slot: Slot) -> Self {
        Self::new(date.and_time(slot.start), date.and_time(slot.end))
    }

    pub fn duration_min(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }
}

/// A candidate bookable interval within a single day, half-open `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Slot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Slot start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Render as the wire format `"HH:MM - HH:MM"`.
    pub fn label(&self) -> String {
        format!(
            "{} - {}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// A configured working-hours range within which slots are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// One weekday's working-hours configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub enabled: bool,
    pub windows: Vec<Window>,
}

/// Weekly working hours, Monday-first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekHours {
    pub days: [DayHours; 7],
}

impl WeekHours {
    pub fn day(&self, weekday: Weekday) -> &DayHours {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    pub fn day_mut(&mut self, weekday: Weekday) -> &mut DayHours {
        &mut self.days[weekday.num_days_from_monday() as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub duration_min: u32,
    pub buffer_min: u32,
    pub max_sessions_per_day: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            duration_min: 60,
            buffer_min: 0,
            max_sessions_per_day: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Upcoming,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub consultant_id: Ulid,
    pub client_id: Ulid,
    pub span: Span,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    /// Session fee in minor currency units.
    pub fee: Option<i64>,
}

impl Appointment {
    pub fn is_upcoming(&self) -> bool {
        self.status == AppointmentStatus::Upcoming
    }
}

/// Booking hold lifecycle. `Confirmed`, `Expired` and `Cancelled` are
/// terminal; a new booking attempt always starts a fresh `Draft`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    Draft,
    PreChecked,
    Held,
    Confirmed,
    Expired,
    Cancelled,
}

impl HoldStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Expired | Self::Cancelled)
    }

    /// The transition table. Cancel is allowed from any non-terminal state;
    /// everything else follows Draft → PreChecked → Held → terminal.
    pub fn can_advance(self, to: HoldStatus) -> bool {
        use HoldStatus::*;
        matches!(
            (self, to),
            (Draft, PreChecked)
                | (PreChecked, Held)
                | (Held, Confirmed)
                | (Held, Expired)
                | (Draft | PreChecked | Held, Cancelled)
        )
    }
}

/// A time-boxed, not-yet-committed reservation of a slot pending payment
/// confirmation. The draft payload is flattened into the struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingHold {
    pub id: Ulid,
    pub consultant_id: Ulid,
    pub client_id: Ulid,
    pub date: NaiveDate,
    pub slot: Slot,
    pub status: HoldStatus,
    /// Set when the hold enters `Held`; server-authoritative.
    pub expires_at: Option<NaiveDateTime>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub fee: Option<i64>,
}

impl BookingHold {
    pub fn span(&self) -> Span {
        Span::from_slot(self.date, self.slot)
    }

    /// A hold reserves its slot only while Held and unexpired.
    pub fn is_reserving(&self, now: NaiveDateTime) -> bool {
        self.status == HoldStatus::Held && self.expires_at.is_some_and(|e| e > now)
    }
}

/// Per-consultant calendar: configuration plus all appointments and holds.
#[derive(Debug, Clone)]
pub struct CalendarState {
    pub id: Ulid,
    pub name: Option<String>,
    pub week: WeekHours,
    pub settings: SessionSettings,
    /// Sorted by `span.start`.
    pub appointments: Vec<Appointment>,
    pub holds: Vec<BookingHold>,
}

impl CalendarState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            week: WeekHours::default(),
            settings: SessionSettings::default(),
            appointments: Vec::new(),
            holds: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appointment.span.start, |a| a.span.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Appointments whose span overlaps the query window. Binary search skips
    /// everything starting at or after `query.end`; half-open semantics.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.span.end > query.start)
    }

    /// Non-cancelled appointments on the given date.
    pub fn booked_on(&self, date: NaiveDate) -> impl Iterator<Item = &Appointment> {
        self.appointments
            .iter()
            .filter(move |a| a.span.date() == date && a.status != AppointmentStatus::Cancelled)
    }

    pub fn hold(&self, id: Ulid) -> Option<&BookingHold> {
        self.holds.iter().find(|h| h.id == id)
    }

    pub fn hold_mut(&mut self, id: Ulid) -> Option<&mut BookingHold> {
        self.holds.iter_mut().find(|h| h.id == id)
    }

    /// Spans reserved by Held, unexpired holds on the given date.
    pub fn reserving_spans(&self, date: NaiveDate, now: NaiveDateTime) -> Vec<Span> {
        self.holds
            .iter()
            .filter(|h| h.date == date && h.is_reserving(now))
            .map(|h| h.span())
            .collect()
    }

    /// Drop terminal holds (done at WAL compaction).
    pub fn prune_terminal_holds(&mut self) {
        self.holds.retain(|h| !h.status.is_terminal());
    }
}

/// The event types — flat, no nesting. This is the WAL record format and the
/// notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    ConsultantRegistered {
        id: Ulid,
        name: Option<String>,
    },
    WorkingHoursSet {
        consultant_id: Ulid,
        week: WeekHours,
    },
    SettingsUpdated {
        consultant_id: Ulid,
        settings: SessionSettings,
    },
    AppointmentCreated {
        appointment: Appointment,
    },
    AppointmentRescheduled {
        id: Ulid,
        consultant_id: Ulid,
        span: Span,
    },
    AppointmentUpdated {
        id: Ulid,
        consultant_id: Ulid,
        status: AppointmentStatus,
        notes: Option<String>,
    },
    AppointmentCancelled {
        id: Ulid,
        consultant_id: Ulid,
    },
    HoldOpened {
        hold: BookingHold,
    },
    HoldSubmitted {
        id: Ulid,
        consultant_id: Ulid,
    },
    HoldPlaced {
        id: Ulid,
        consultant_id: Ulid,
        expires_at: NaiveDateTime,
    },
    HoldConfirmed {
        id: Ulid,
        consultant_id: Ulid,
        appointment: Appointment,
    },
    HoldReleased {
        id: Ulid,
        consultant_id: Ulid,
        terminal: HoldStatus,
    },
}

impl Event {
    /// The consultant calendar this event applies to.
    pub fn consultant_id(&self) -> Ulid {
        match self {
            Event::ConsultantRegistered { id, .. } => *id,
            Event::WorkingHoursSet { consultant_id, .. }
            | Event::SettingsUpdated { consultant_id, .. }
            | Event::AppointmentRescheduled { consultant_id, .. }
            | Event::AppointmentUpdated { consultant_id, .. }
            | Event::AppointmentCancelled { consultant_id, .. }
            | Event::HoldSubmitted { consultant_id, .. }
            | Event::HoldPlaced { consultant_id, .. }
            | Event::HoldConfirmed { consultant_id, .. }
            | Event::HoldReleased { consultant_id, .. } => *consultant_id,
            Event::AppointmentCreated { appointment } => appointment.consultant_id,
            Event::HoldOpened { hold } => hold.consultant_id,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn span_overlap_half_open() {
        let date = d(2026, 3, 2);
        let a = Span::new(dt(date, 9, 0), dt(date, 10, 0));
        let b = Span::new(dt(date, 9, 30), dt(date, 10, 30));
        let c = Span::new(dt(date, 10, 0), dt(date, 11, 0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a)); // symmetric
        assert!(a.overlaps(&a)); // self-overlap
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_duration_and_date() {
        let date = d(2026, 3, 2);
        let s = Span::new(dt(date, 9, 0), dt(date, 10, 30));
        assert_eq!(s.duration_min(), 90);
        assert_eq!(s.date(), date);
    }

    #[test]
    fn slot_label_format() {
        let slot = Slot::new(t(9, 0), t(10, 0));
        assert_eq!(slot.label(), "09:00 - 10:00");
    }

    #[test]
    fn week_hours_monday_first_indexing() {
        let mut week = WeekHours::default();
        week.day_mut(Weekday::Wed).enabled = true;
        assert!(!week.day(Weekday::Mon).enabled);
        assert!(week.day(Weekday::Wed).enabled);
        assert_eq!(week.days[2], *week.day(Weekday::Wed));
    }

    #[test]
    fn hold_transition_table() {
        use HoldStatus::*;
        assert!(Draft.can_advance(PreChecked));
        assert!(PreChecked.can_advance(Held));
        assert!(Held.can_advance(Confirmed));
        assert!(Held.can_advance(Expired));
        assert!(Draft.can_advance(Cancelled));
        assert!(PreChecked.can_advance(Cancelled));
        assert!(Held.can_advance(Cancelled));

        assert!(!Draft.can_advance(Held)); // no skipping
        assert!(!PreChecked.can_advance(Confirmed));
        assert!(!Draft.can_advance(Expired));
        for terminal in [Confirmed, Expired, Cancelled] {
            assert!(terminal.is_terminal());
            for to in [Draft, PreChecked, Held, Confirmed, Expired, Cancelled] {
                assert!(!terminal.can_advance(to));
            }
        }
    }

    #[test]
    fn hold_reserving_requires_held_and_unexpired() {
        let date = d(2026, 3, 2);
        let mut hold = BookingHold {
            id: Ulid::new(),
            consultant_id: Ulid::new(),
            client_id: Ulid::new(),
            date,
            slot: Slot::new(t(9, 0), t(10, 0)),
            status: HoldStatus::Held,
            expires_at: Some(dt(date, 8, 10)),
            reason: None,
            notes: None,
            fee: None,
        };
        assert!(hold.is_reserving(dt(date, 8, 0)));
        assert!(!hold.is_reserving(dt(date, 8, 10))); // expiry instant
        assert!(!hold.is_reserving(dt(date, 8, 30)));

        hold.status = HoldStatus::PreChecked;
        assert!(!hold.is_reserving(dt(date, 8, 0)));
    }

    #[test]
    fn appointment_ordering_in_calendar() {
        let date = d(2026, 3, 2);
        let cid = Ulid::new();
        let mut cal = CalendarState::new(cid, None);
        cal.insert_appointment(appointment(
            cid,
            Ulid::new(),
            Span::new(dt(date, 14, 0), dt(date, 15, 0)),
        ));
        cal.insert_appointment(appointment(
            cid,
            Ulid::new(),
            Span::new(dt(date, 9, 0), dt(date, 10, 0)),
        ));
        cal.insert_appointment(appointment(
            cid,
            Ulid::new(),
            Span::new(dt(date, 11, 0), dt(date, 12, 0)),
        ));
        let starts: Vec<_> = cal.appointments.iter().map(|a| a.span.start).collect();
        assert_eq!(
            starts,
            vec![dt(date, 9, 0), dt(date, 11, 0), dt(date, 14, 0)]
        );
    }

    #[test]
    fn overlapping_scan_skips_adjacent_and_disjoint() {
        let date = d(2026, 3, 2);
        let cid = Ulid::new();
        let mut cal = CalendarState::new(cid, None);
        for (s, e) in [(8, 9), (10, 11), (15, 16)] {
            cal.insert_appointment(appointment(
                cid,
                Ulid::new(),
                Span::new(dt(date, s, 0), dt(date, e, 0)),
            ));
        }
        // Query [9:00, 15:00): appointment ending at 9:00 and starting at
        // 15:00 are both out; only 10:00-11:00 overlaps.
        let query = Span::new(dt(date, 9, 0), dt(date, 15, 0));
        let hits: Vec<_> = cal.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span.start, dt(date, 10, 0));
    }

    #[test]
    fn booked_on_excludes_cancelled_and_other_dates() {
        let date = d(2026, 3, 2);
        let other = d(2026, 3, 3);
        let cid = Ulid::new();
        let mut cal = CalendarState::new(cid, None);
        let mut cancelled = appointment(
            cid,
            Ulid::new(),
            Span::new(dt(date, 9, 0), dt(date, 10, 0)),
        );
        cancelled.status = AppointmentStatus::Cancelled;
        cal.insert_appointment(cancelled);
        cal.insert_appointment(appointment(
            cid,
            Ulid::new(),
            Span::new(dt(date, 11, 0), dt(date, 12, 0)),
        ));
        cal.insert_appointment(appointment(
            cid,
            Ulid::new(),
            Span::new(dt(other, 11, 0), dt(other, 12, 0)),
        ));
        assert_eq!(cal.booked_on(date).count(), 1);
    }

    #[test]
    fn prune_terminal_holds_keeps_live_ones() {
        let date = d(2026, 3, 2);
        let cid = Ulid::new();
        let mut cal = CalendarState::new(cid, None);
        for status in [
            HoldStatus::Draft,
            HoldStatus::Held,
            HoldStatus::Expired,
            HoldStatus::Confirmed,
        ] {
            cal.holds.push(BookingHold {
                id: Ulid::new(),
                consultant_id: cid,
                client_id: Ulid::new(),
                date,
                slot: Slot::new(t(9, 0), t(10, 0)),
                status,
                expires_at: None,
                reason: None,
                notes: None,
                fee: None,
            });
        }
        cal.prune_terminal_holds();
        let statuses: Vec<_> = cal.holds.iter().map(|h| h.status).collect();
        assert_eq!(statuses, vec![HoldStatus::Draft, HoldStatus::Held]);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let date = d(2026, 3, 2);
        let cid = Ulid::new();
        let event = Event::AppointmentCreated {
            appointment: appointment(
                cid,
                Ulid::new(),
                Span::new(dt(date, 9, 0), dt(date, 10, 0)),
            ),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.consultant_id(), cid);
    }
}
