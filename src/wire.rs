use std::io;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use crate::engine::{
    ActorRole, AppointmentDraft, BookingDraft, ConsultantInfo, Engine, EngineError,
};
use crate::model::*;
use crate::observability;
use crate::registry::PracticeRegistry;

const MAX_LINE_LEN: usize = 64 * 1024;

/// One request per line, JSON, tagged by `cmd`. The first request on a
/// connection must be `attach`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Attach {
        practice: String,
    },
    RegisterConsultant {
        id: Ulid,
        name: Option<String>,
    },
    SetWorkingHours {
        consultant_id: Ulid,
        week: WeekHours,
    },
    UpdateSettings {
        consultant_id: Ulid,
        settings: SessionSettings,
    },
    GetHours {
        consultant_id: Ulid,
    },
    ListConsultants,
    GetAvailableSlots {
        consultant_id: Ulid,
        date: NaiveDate,
        duration_min: Option<u32>,
    },
    ResolveAvailability {
        role: ActorRole,
        actor_id: Ulid,
        counterparty_id: Ulid,
        date: NaiveDate,
        duration_min: Option<u32>,
    },
    CreateAppointment {
        consultant_id: Ulid,
        client_id: Ulid,
        span: Span,
        reason: Option<String>,
        notes: Option<String>,
        fee: Option<i64>,
    },
    GetAppointment {
        id: Ulid,
    },
    ListAppointments {
        consultant_id: Ulid,
        date: Option<NaiveDate>,
    },
    UpdateAppointment {
        id: Ulid,
        status: Option<AppointmentStatus>,
        notes: Option<String>,
        /// Drop stored notes entirely. Wins over `notes` when both are set.
        #[serde(default)]
        clear_notes: bool,
    },
    CancelAppointment {
        id: Ulid,
    },
    Reschedule {
        id: Ulid,
        span: Span,
    },
    OpenBooking {
        consultant_id: Ulid,
        client_id: Ulid,
        date: NaiveDate,
        slot: Slot,
        reason: Option<String>,
        notes: Option<String>,
        fee: Option<i64>,
    },
    SubmitBooking {
        id: Ulid,
    },
    PlaceHold {
        id: Ulid,
    },
    ConfirmBooking {
        id: Ulid,
    },
    CancelBooking {
        id: Ulid,
    },
    GetHold {
        id: Ulid,
    },
    Subscribe {
        consultant_id: Ulid,
    },
}

/// A bookable slot as presented to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotView {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub label: String,
}

impl From<Slot> for SlotView {
    fn from(slot: Slot) -> Self {
        Self {
            start: slot.start,
            end: slot.end,
            label: slot.label(),
        }
    }
}

/// One reply per line, JSON, tagged by `reply`. `notification` lines arrive
/// out of band after a `subscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Ok,
    Attached {
        practice: String,
    },
    Slots {
        slots: Vec<SlotView>,
    },
    Appointment {
        appointment: Appointment,
    },
    Appointments {
        appointments: Vec<Appointment>,
    },
    Hold {
        hold: BookingHold,
    },
    BookingOpened {
        id: Ulid,
    },
    HoldPlaced {
        expires_at: NaiveDateTime,
    },
    Hours {
        week: WeekHours,
        settings: SessionSettings,
    },
    Consultants {
        consultants: Vec<ConsultantInfo>,
    },
    Subscribed {
        consultant_id: Ulid,
    },
    Notification {
        event: Event,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl Reply {
    fn error(kind: &str, message: impl Into<String>) -> Self {
        Reply::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<EngineError> for Reply {
    fn from(e: EngineError) -> Self {
        Reply::error(e.kind(), e.to_string())
    }
}

fn to_io(e: tokio_util::codec::LinesCodecError) -> io::Error {
    match e {
        tokio_util::codec::LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

/// Drive one client connection: require `attach`, then dispatch requests and
/// interleave subscription notifications until the peer hangs up.
pub async fn process_connection(
    socket: TcpStream,
    registry: Arc<PracticeRegistry>,
) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    // Attach phase
    let engine = loop {
        let Some(line) = framed.next().await else {
            return Ok(()); // peer closed before attaching
        };
        let line = line.map_err(to_io)?;
        match serde_json::from_str::<Request>(&line) {
            Ok(Request::Attach { practice }) => match registry.get_or_create(&practice) {
                Ok(engine) => {
                    framed
                        .send(encode(&Reply::Attached { practice }))
                        .await
                        .map_err(to_io)?;
                    break engine;
                }
                Err(e) => {
                    framed
                        .send(encode(&Reply::error("attach_failed", e.to_string())))
                        .await
                        .map_err(to_io)?;
                }
            },
            Ok(_) => {
                framed
                    .send(encode(&Reply::error("not_attached", "attach to a practice first")))
                    .await
                    .map_err(to_io)?;
            }
            Err(e) => {
                framed
                    .send(encode(&Reply::error("bad_request", e.to_string())))
                    .await
                    .map_err(to_io)?;
            }
        }
    };

    // Subscriptions feed this channel; forwarder tasks exit when it closes.
    let (notify_tx, mut notify_rx) = mpsc::channel::<Event>(256);

    loop {
        tokio::select! {
            line = framed.next() => {
                let Some(line) = line else { break };
                let line = line.map_err(to_io)?;
                let reply = match serde_json::from_str::<Request>(&line) {
                    Ok(Request::Subscribe { consultant_id }) => {
                        subscribe(&engine, consultant_id, notify_tx.clone());
                        Reply::Subscribed { consultant_id }
                    }
                    Ok(req) => {
                        let label = observability::request_label(&req);
                        let start = std::time::Instant::now();
                        let reply = dispatch(&engine, req).await;
                        let status = match reply {
                            Reply::Error { .. } => "error",
                            _ => "ok",
                        };
                        metrics::counter!(
                            observability::REQUESTS_TOTAL,
                            "command" => label,
                            "status" => status
                        )
                        .increment(1);
                        metrics::histogram!(
                            observability::REQUEST_DURATION_SECONDS,
                            "command" => label
                        )
                        .record(start.elapsed().as_secs_f64());
                        reply
                    }
                    Err(e) => Reply::error("bad_request", e.to_string()),
                };
                framed.send(encode(&reply)).await.map_err(to_io)?;
            }
            Some(event) = notify_rx.recv() => {
                framed
                    .send(encode(&Reply::Notification { event }))
                    .await
                    .map_err(to_io)?;
            }
        }
    }

    Ok(())
}

fn encode(reply: &Reply) -> String {
    serde_json::to_string(reply).unwrap_or_else(|e| {
        format!(r#"{{"reply":"error","kind":"internal","message":"{e}"}}"#)
    })
}

fn subscribe(engine: &Arc<Engine>, consultant_id: Ulid, tx: mpsc::Sender<Event>) {
    let mut rx = engine.notify.subscribe(consultant_id);
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if tx.send(event).await.is_err() {
                break; // connection gone
            }
        }
    });
}

async fn dispatch(engine: &Arc<Engine>, req: Request) -> Reply {
    match req {
        // Handled before dispatch
        Request::Attach { .. } => Reply::error("already_attached", "already attached"),
        Request::Subscribe { .. } => unreachable!("subscribe handled by the connection loop"),

        Request::RegisterConsultant { id, name } => {
            match engine.register_consultant(id, name).await {
                Ok(()) => Reply::Ok,
                Err(e) => e.into(),
            }
        }
        Request::SetWorkingHours { consultant_id, week } => {
            match engine.set_working_hours(consultant_id, week).await {
                Ok(()) => Reply::Ok,
                Err(e) => e.into(),
            }
        }
        Request::UpdateSettings { consultant_id, settings } => {
            match engine.update_settings(consultant_id, settings).await {
                Ok(()) => Reply::Ok,
                Err(e) => e.into(),
            }
        }
        Request::GetHours { consultant_id } => match engine.get_hours(consultant_id).await {
            Ok((week, settings)) => Reply::Hours { week, settings },
            Err(e) => e.into(),
        },
        Request::ListConsultants => Reply::Consultants {
            consultants: engine.list_consultants().await,
        },
        Request::GetAvailableSlots { consultant_id, date, duration_min } => Reply::Slots {
            slots: engine
                .get_available_slots(consultant_id, date, duration_min)
                .await
                .into_iter()
                .map(SlotView::from)
                .collect(),
        },
        Request::ResolveAvailability { role, actor_id, counterparty_id, date, duration_min } => {
            match engine
                .resolve_availability(role, actor_id, counterparty_id, date, duration_min)
                .await
            {
                Ok(slots) => Reply::Slots {
                    slots: slots.into_iter().map(SlotView::from).collect(),
                },
                Err(e) => e.into(),
            }
        }
        Request::CreateAppointment { consultant_id, client_id, span, reason, notes, fee } => {
            match engine
                .create_appointment(AppointmentDraft {
                    consultant_id,
                    client_id,
                    span,
                    reason,
                    notes,
                    fee,
                })
                .await
            {
                Ok(appointment) => Reply::Appointment { appointment },
                Err(e) => e.into(),
            }
        }
        Request::GetAppointment { id } => match engine.get_appointment(id).await {
            Ok(appointment) => Reply::Appointment { appointment },
            Err(e) => e.into(),
        },
        Request::ListAppointments { consultant_id, date } => {
            match engine.list_appointments(consultant_id, date).await {
                Ok(appointments) => Reply::Appointments { appointments },
                Err(e) => e.into(),
            }
        }
        Request::UpdateAppointment { id, status, notes, clear_notes } => {
            let notes_patch = if clear_notes { Some(None) } else { notes.map(Some) };
            match engine.update_appointment(id, status, notes_patch).await {
                Ok(appointment) => Reply::Appointment { appointment },
                Err(e) => e.into(),
            }
        }
        Request::CancelAppointment { id } => match engine.cancel_appointment(id).await {
            Ok(()) => Reply::Ok,
            Err(e) => e.into(),
        },
        Request::Reschedule { id, span } => match engine.reschedule_appointment(id, span).await {
            Ok(appointment) => Reply::Appointment { appointment },
            Err(e) => e.into(),
        },
        Request::OpenBooking { consultant_id, client_id, date, slot, reason, notes, fee } => {
            match engine
                .open_booking(BookingDraft {
                    consultant_id,
                    client_id,
                    date,
                    slot,
                    reason,
                    notes,
                    fee,
                })
                .await
            {
                Ok(id) => Reply::BookingOpened { id },
                Err(e) => e.into(),
            }
        }
        Request::SubmitBooking { id } => match engine.submit_booking(id).await {
            Ok(()) => Reply::Ok,
            Err(e) => e.into(),
        },
        Request::PlaceHold { id } => match engine.place_hold(id).await {
            Ok(expires_at) => Reply::HoldPlaced { expires_at },
            Err(e) => e.into(),
        },
        Request::ConfirmBooking { id } => match engine.confirm_booking(id).await {
            Ok(appointment) => Reply::Appointment { appointment },
            Err(e) => e.into(),
        },
        Request::CancelBooking { id } => match engine.cancel_booking(id).await {
            Ok(()) => Reply::Ok,
            Err(e) => e.into(),
        },
        Request::GetHold { id } => match engine.get_hold(id).await {
            Ok(hold) => Reply::Hold { hold },
            Err(e) => e.into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::*;

    #[test]
    fn request_parses_from_json_line() {
        let cid = Ulid::new();
        let line = format!(
            r#"{{"cmd":"get_available_slots","consultant_id":"{cid}","date":"2026-03-02"}}"#
        );
        let req: Request = serde_json::from_str(&line).unwrap();
        match req {
            Request::GetAvailableSlots { consultant_id, date, duration_min } => {
                assert_eq!(consultant_id, cid);
                assert_eq!(date, d(2026, 3, 2));
                assert_eq!(duration_min, None);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn slot_view_carries_label() {
        let view = SlotView::from(Slot::new(t(9, 0), t(10, 0)));
        assert_eq!(view.label, "09:00 - 10:00");
    }

    #[test]
    fn error_reply_serializes_kind() {
        let reply = Reply::from(EngineError::SlotUnavailable);
        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains(r#""kind":"slot_unavailable""#));
    }
}
