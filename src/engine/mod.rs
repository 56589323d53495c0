mod availability;
mod conflict;
mod error;
mod hold;
mod mutations;
mod queries;
mod reschedule;
mod slots;

pub use availability::{resolve_day_slots, ActorRole};
pub use error::EngineError;
pub use hold::BookingDraft;
pub use mutations::AppointmentDraft;
pub use queries::ConsultantInfo;
pub use slots::{compile_day, generate_slots, validate_settings, validate_week};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<CalendarState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// Block until the first Append arrives, buffer it, drain every immediately
/// available Append, then flush once and respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// One client's committed busy interval, indexed for cross-consultant
/// double-booking checks.
#[derive(Debug, Clone, Copy)]
struct ClientBusy {
    appointment_id: Ulid,
    span: Span,
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedCalendar>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
    hold_ttl: Duration,
    /// appointment id → consultant id
    appointment_index: DashMap<Ulid, Ulid>,
    /// hold id → consultant id
    hold_index: DashMap<Ulid, Ulid>,
    /// client id → that client's Upcoming appointment spans (all consultants)
    client_index: DashMap<Ulid, Vec<ClientBusy>>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        hold_ttl: Duration,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            clock,
            hold_ttl,
            appointment_index: DashMap::new(),
            hold_index: DashMap::new(),
            client_index: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly. Never use blocking_write here because
        // this may run inside an async context (lazy practice creation).
        for event in &events {
            match event {
                Event::ConsultantRegistered { id, name } => {
                    let cal = CalendarState::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(cal)));
                }
                other => {
                    let consultant_id = other.consultant_id();
                    if let Some(entry) = engine.state.get(&consultant_id) {
                        let cal = entry.clone();
                        let mut guard = cal.try_write().expect("replay: uncontended write");
                        engine.apply(&mut guard, other);
                    }
                }
            }
        }

        Ok(engine)
    }

    pub(super) fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Current time from the injected clock, for callers outside the engine
    /// (the reaper compares hold expiries against it).
    pub fn clock_now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub(super) fn today(&self) -> NaiveDate {
        self.clock.now().date()
    }

    pub(super) fn hold_ttl(&self) -> Duration {
        self.hold_ttl
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_calendar(&self, id: &Ulid) -> Option<SharedCalendar> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn consultant_of_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_index.get(appointment_id).map(|e| *e.value())
    }

    pub fn consultant_of_hold(&self, hold_id: &Ulid) -> Option<Ulid> {
        self.hold_index.get(hold_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        cal: &mut CalendarState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        let consultant_id = event.consultant_id();
        self.apply(cal, event);
        self.notify.send(consultant_id, event);
        Ok(())
    }

    /// Acquire the write lock for a consultant's calendar.
    pub(super) async fn calendar_write(
        &self,
        consultant_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<CalendarState>, EngineError> {
        let cal = self
            .get_calendar(consultant_id)
            .ok_or(EngineError::NotFound(*consultant_id))?;
        Ok(cal.write_owned().await)
    }

    /// Lookup appointment → consultant, then lock that calendar.
    pub(super) async fn appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<CalendarState>), EngineError> {
        let consultant_id = self
            .consultant_of_appointment(appointment_id)
            .ok_or(EngineError::NotFound(*appointment_id))?;
        let guard = self.calendar_write(&consultant_id).await?;
        Ok((consultant_id, guard))
    }

    /// Lookup hold → consultant, then lock that calendar.
    pub(super) async fn hold_write(
        &self,
        hold_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<CalendarState>), EngineError> {
        let consultant_id = self
            .consultant_of_hold(hold_id)
            .ok_or(EngineError::NotFound(*hold_id))?;
        let guard = self.calendar_write(&consultant_id).await?;
        Ok((consultant_id, guard))
    }

    /// The client's committed Upcoming spans on `date`, optionally excluding
    /// one appointment (reschedule ignores the one being moved).
    pub(super) fn client_busy_on(
        &self,
        client_id: &Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Vec<Span> {
        self.client_index
            .get(client_id)
            .map(|busy| {
                busy.iter()
                    .filter(|b| b.span.date() == date && exclude != Some(b.appointment_id))
                    .map(|b| b.span)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn client_track(&self, appointment: &Appointment) {
        self.client_index
            .entry(appointment.client_id)
            .or_default()
            .push(ClientBusy {
                appointment_id: appointment.id,
                span: appointment.span,
            });
    }

    fn client_untrack(&self, client_id: &Ulid, appointment_id: Ulid) {
        if let Some(mut busy) = self.client_index.get_mut(client_id) {
            busy.retain(|b| b.appointment_id != appointment_id);
        }
    }

    fn client_retrack(&self, appointment: &Appointment) {
        self.client_untrack(&appointment.client_id, appointment.id);
        if appointment.is_upcoming() {
            self.client_track(appointment);
        }
    }

    /// Apply an event to a calendar (no locking — caller holds the lock) and
    /// keep the cross-calendar indexes in sync. Used by both replay and live
    /// commits.
    fn apply(&self, cal: &mut CalendarState, event: &Event) {
        match event {
            Event::WorkingHoursSet { week, .. } => {
                cal.week = week.clone();
            }
            Event::SettingsUpdated { settings, .. } => {
                cal.settings = *settings;
            }
            Event::AppointmentCreated { appointment } => {
                self.appointment_index
                    .insert(appointment.id, appointment.consultant_id);
                if appointment.is_upcoming() {
                    self.client_track(appointment);
                }
                cal.insert_appointment(appointment.clone());
            }
            Event::AppointmentRescheduled { id, span, .. } => {
                if let Some(mut appt) = cal.remove_appointment(*id) {
                    appt.span = *span;
                    appt.status = AppointmentStatus::Upcoming;
                    self.client_retrack(&appt);
                    cal.insert_appointment(appt);
                }
            }
            Event::AppointmentUpdated { id, status, notes, .. } => {
                if let Some(pos) = cal.appointments.iter().position(|a| a.id == *id) {
                    cal.appointments[pos].status = *status;
                    cal.appointments[pos].notes = notes.clone();
                    let appt = cal.appointments[pos].clone();
                    self.client_retrack(&appt);
                }
            }
            Event::AppointmentCancelled { id, .. } => {
                if let Some(pos) = cal.appointments.iter().position(|a| a.id == *id) {
                    cal.appointments[pos].status = AppointmentStatus::Cancelled;
                    let client_id = cal.appointments[pos].client_id;
                    self.client_untrack(&client_id, *id);
                }
            }
            Event::HoldOpened { hold } => {
                self.hold_index.insert(hold.id, hold.consultant_id);
                cal.holds.push(hold.clone());
            }
            Event::HoldSubmitted { id, .. } => {
                if let Some(hold) = cal.hold_mut(*id) {
                    hold.status = HoldStatus::PreChecked;
                }
            }
            Event::HoldPlaced { id, expires_at, .. } => {
                if let Some(hold) = cal.hold_mut(*id) {
                    hold.status = HoldStatus::Held;
                    hold.expires_at = Some(*expires_at);
                }
            }
            Event::HoldConfirmed { id, appointment, .. } => {
                if let Some(hold) = cal.hold_mut(*id) {
                    hold.status = HoldStatus::Confirmed;
                }
                self.appointment_index
                    .insert(appointment.id, appointment.consultant_id);
                if appointment.is_upcoming() {
                    self.client_track(appointment);
                }
                cal.insert_appointment(appointment.clone());
            }
            Event::HoldReleased { id, terminal, .. } => {
                if let Some(hold) = cal.hold_mut(*id) {
                    hold.status = *terminal;
                }
            }
            // Registration is handled at the DashMap level, not here.
            Event::ConsultantRegistered { .. } => {}
        }
    }
}
