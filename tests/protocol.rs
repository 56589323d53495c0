use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use slotd::clock::SystemClock;
use slotd::model::*;
use slotd::registry::PracticeRegistry;
use slotd::wire::{self, Reply, Request};

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let registry = Arc::new(PracticeRegistry::new(
        dir,
        1000,
        chrono::Duration::minutes(10),
        Arc::new(SystemClock),
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let reg = registry.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, reg).await;
            });
        }
    });

    addr
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
        }
    }

    async fn send(&mut self, req: &Request) -> Reply {
        self.framed
            .send(serde_json::to_string(req).unwrap())
            .await
            .unwrap();
        self.recv().await.expect("reply expected")
    }

    async fn recv(&mut self) -> Option<Reply> {
        let line = self.framed.next().await?.ok()?;
        Some(serde_json::from_str(&line).unwrap())
    }

    /// Wait for a notification, skipping nothing, with a timeout.
    async fn recv_notification(&mut self, timeout: Duration) -> Option<Event> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Some(Reply::Notification { event })) => Some(event),
            _ => None,
        }
    }

    async fn attach(addr: SocketAddr, practice: &str) -> Self {
        let mut client = Self::connect(addr).await;
        let reply = client
            .send(&Request::Attach {
                practice: practice.into(),
            })
            .await;
        assert!(matches!(reply, Reply::Attached { .. }));
        client
    }
}

/// The next Monday at least a week out, so today-cutoff never interferes.
fn next_monday() -> NaiveDate {
    let base = chrono::Local::now().naive_local().date() + Days::new(7);
    base + Days::new((7 - base.weekday().num_days_from_monday() as u64) % 7)
}

fn monday_9_to_5() -> WeekHours {
    let mut week = WeekHours::default();
    let mon = week.day_mut(Weekday::Mon);
    mon.enabled = true;
    mon.windows.push(Window {
        start: chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end: chrono::NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
    });
    week
}

async fn register_with_hours(client: &mut Client) -> Ulid {
    let cid = Ulid::new();
    let reply = client
        .send(&Request::RegisterConsultant {
            id: cid,
            name: Some("Dr. Okafor".into()),
        })
        .await;
    assert!(matches!(reply, Reply::Ok));
    let reply = client
        .send(&Request::SetWorkingHours {
            consultant_id: cid,
            week: monday_9_to_5(),
        })
        .await;
    assert!(matches!(reply, Reply::Ok));
    cid
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn requests_before_attach_are_rejected() {
    let addr = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let reply = client.send(&Request::ListConsultants).await;
    match reply {
        Reply::Error { kind, .. } => assert_eq!(kind, "not_attached"),
        other => panic!("unexpected reply: {other:?}"),
    }

    // Attaching afterwards still works
    let reply = client
        .send(&Request::Attach {
            practice: "riverside".into(),
        })
        .await;
    assert!(matches!(reply, Reply::Attached { .. }));
}

#[tokio::test]
async fn malformed_line_reports_bad_request() {
    let addr = start_test_server().await;
    let mut client = Client::attach(addr, "riverside").await;

    client.framed.send("{not json").await.unwrap();
    match client.recv().await.unwrap() {
        Reply::Error { kind, .. } => assert_eq!(kind, "bad_request"),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn slot_listing_over_the_wire() {
    let addr = start_test_server().await;
    let mut client = Client::attach(addr, "riverside").await;
    let cid = register_with_hours(&mut client).await;

    let reply = client
        .send(&Request::GetAvailableSlots {
            consultant_id: cid,
            date: next_monday(),
            duration_min: None,
        })
        .await;
    match reply {
        Reply::Slots { slots } => {
            assert_eq!(slots.len(), 8);
            assert_eq!(slots[0].label, "09:00 - 10:00");
            assert_eq!(slots[7].label, "16:00 - 17:00");
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn booking_flow_over_the_wire() {
    let addr = start_test_server().await;
    let mut client = Client::attach(addr, "riverside").await;
    let cid = register_with_hours(&mut client).await;
    let patient = Ulid::new();
    let date = next_monday();

    let reply = client
        .send(&Request::OpenBooking {
            consultant_id: cid,
            client_id: patient,
            date,
            slot: Slot::new(
                chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            ),
            reason: Some("follow-up".into()),
            notes: None,
            fee: Some(9_500),
        })
        .await;
    let hold_id = match reply {
        Reply::BookingOpened { id } => id,
        other => panic!("unexpected reply: {other:?}"),
    };

    assert!(matches!(
        client.send(&Request::SubmitBooking { id: hold_id }).await,
        Reply::Ok
    ));
    assert!(matches!(
        client.send(&Request::PlaceHold { id: hold_id }).await,
        Reply::HoldPlaced { .. }
    ));

    let appointment = match client.send(&Request::ConfirmBooking { id: hold_id }).await {
        Reply::Appointment { appointment } => appointment,
        other => panic!("unexpected reply: {other:?}"),
    };
    assert_eq!(appointment.client_id, patient);
    assert_eq!(appointment.status, AppointmentStatus::Upcoming);

    // The booked slot is gone from the list
    let reply = client
        .send(&Request::GetAvailableSlots {
            consultant_id: cid,
            date,
            duration_min: None,
        })
        .await;
    match reply {
        Reply::Slots { slots } => {
            assert_eq!(slots.len(), 7);
            assert_eq!(slots[0].label, "10:00 - 11:00");
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn engine_errors_carry_their_kind() {
    let addr = start_test_server().await;
    let mut client = Client::attach(addr, "riverside").await;

    let reply = client
        .send(&Request::GetHold { id: Ulid::new() })
        .await;
    match reply {
        Reply::Error { kind, .. } => assert_eq!(kind, "not_found"),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn subscriber_sees_committed_events() {
    let addr = start_test_server().await;
    let mut watcher = Client::attach(addr, "riverside").await;
    let cid = register_with_hours(&mut watcher).await;

    assert!(matches!(
        watcher.send(&Request::Subscribe { consultant_id: cid }).await,
        Reply::Subscribed { .. }
    ));

    // A second connection books an appointment on the watched calendar
    let mut booker = Client::attach(addr, "riverside").await;
    let reply = booker
        .send(&Request::CreateAppointment {
            consultant_id: cid,
            client_id: Ulid::new(),
            span: Span::from_slot(
                next_monday(),
                Slot::new(
                    chrono::NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                    chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                ),
            ),
            reason: None,
            notes: None,
            fee: None,
        })
        .await;
    assert!(matches!(reply, Reply::Appointment { .. }));

    let event = watcher
        .recv_notification(Duration::from_secs(5))
        .await
        .expect("expected a notification");
    assert!(matches!(event, Event::AppointmentCreated { .. }));
}

#[tokio::test]
async fn practices_are_isolated_over_the_wire() {
    let addr = start_test_server().await;
    let mut client_a = Client::attach(addr, "practice_a").await;
    let cid = register_with_hours(&mut client_a).await;

    // The same consultant ID does not exist in another practice
    let mut client_b = Client::attach(addr, "practice_b").await;
    let reply = client_b
        .send(&Request::GetHours { consultant_id: cid })
        .await;
    match reply {
        Reply::Error { kind, .. } => assert_eq!(kind, "not_found"),
        other => panic!("unexpected reply: {other:?}"),
    }
}
