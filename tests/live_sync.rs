use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use tandemgrid::desk::{Desk, DetailsEdit, FixedClock};
use tandemgrid::engine::Engine;
use tandemgrid::error::DeskError;
use tandemgrid::grid::GridChange;
use tandemgrid::model::*;
use tandemgrid::notify::NotifyHub;
use tandemgrid::patch::BookingPatch;
use tandemgrid::roles::{Actor, Role};
use tandemgrid::session::SessionCoordinator;
use tandemgrid::store::{Store, StoreError};

// ── Test infrastructure ──────────────────────────────────────

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, 14).unwrap()
}

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 7, 10)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tandemgrid_test_sync");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
    let _ = std::fs::remove_file(&path);
    path
}

async fn fly(engine: &Engine, uid: &str, date: NaiveDate, time_slot: &str) {
    engine
        .add_availability(AvailabilitySlot {
            pilot_uid: uid.into(),
            date,
            time_slot: time_slot.into(),
        })
        .await
        .unwrap();
}

/// Three pilots flying 07:30 on `day()`.
async fn crewed_store(name: &str) -> Arc<Engine> {
    let engine = Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap();
    for (uid, display_name) in [("p1", "Anna"), ("p2", "Ben"), ("p3", "Cleo")] {
        engine
            .upsert_pilot(Pilot {
                uid: uid.into(),
                display_name: display_name.into(),
                female_pilot: uid == "p1",
            })
            .await
            .unwrap();
        fly(&engine, uid, day(), "07:30").await;
    }
    Arc::new(engine)
}

fn desk(store: Arc<dyn Store>, role: Role, user: &str) -> Desk {
    Desk::new(store, Actor::new(user, user, role)).with_clock(Arc::new(FixedClock(now())))
}

fn request(people: u32) -> NewBooking {
    NewBooking {
        date: day(),
        time_index: 0,
        number_of_people: people,
        customer_name: "Jo Customer".into(),
        email: "jo@example.com".into(),
        ..Default::default()
    }
}

/// Passes everything through to the engine until told to fail writes.
struct FlakyStore {
    inner: Arc<Engine>,
    down: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn booking(&self, id: Ulid) -> Result<Booking, StoreError> {
        self.inner.booking(id).await
    }

    async fn day(&self, date: NaiveDate) -> Result<DayState, StoreError> {
        self.inner.day(date).await
    }

    async fn pilots(&self) -> Result<Vec<Pilot>, StoreError> {
        self.inner.pilots().await
    }

    async fn add_booking(&self, booking: Booking) -> Result<(), StoreError> {
        self.check()?;
        Store::add_booking(self.inner.as_ref(), booking).await
    }

    async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, StoreError> {
        self.check()?;
        Store::update_booking(self.inner.as_ref(), id, patch).await
    }

    async fn enqueue_email(&self, request: EmailRequest) -> Result<(), StoreError> {
        self.check()?;
        Store::enqueue_email(self.inner.as_ref(), request).await
    }

    async fn email(&self, id: Ulid) -> Result<EmailRequest, StoreError> {
        Store::email(self.inner.as_ref(), id).await
    }

    async fn mark_email(&self, id: Ulid, status: EmailStatus) -> Result<(), StoreError> {
        self.inner.mark_email(id, status).await
    }

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.inner.subscribe(topic)
    }
}

// ── Stale availability ───────────────────────────────────────

#[tokio::test]
async fn stale_picture_told_apart_from_overrun() {
    let engine = crewed_store("stale").await;
    let mut pete = desk(engine.clone(), Role::Pilot, "pete");
    let paula = desk(engine.clone(), Role::Pilot, "paula");
    let id = pete.create_booking(request(1)).await.unwrap().booking.id;

    pete.open_edit(id).await.unwrap();
    assert_eq!(pete.edit_resize(3).await.unwrap(), 3);

    // Another client takes two seats while the form is open.
    assert_ok!(paula.create_booking(request(2)).await);
    assert_eq!(pete.target_capacity().await.unwrap(), 1);
    assert_eq!(pete.session().unwrap().seen(), 3);

    let err = assert_err!(pete.save_edit().await);
    assert_eq!(
        err,
        DeskError::StaleAvailability { requested: 3, available: 1, seen: 3 }
    );
    assert_eq!(pete.session().unwrap().draft().number_of_people, 3);

    // Once the editor has seen the new figure it is a plain overrun.
    assert_eq!(pete.edit_resize(3).await.unwrap(), 1);
    let err = assert_err!(pete.save_edit().await);
    assert_eq!(err, DeskError::CapacityExceeded { requested: 3, available: 1 });

    pete.edit_resize(1).await.unwrap();
    let saved = assert_ok!(pete.save_edit().await);
    assert_eq!(saved.booking.number_of_people, 1);
    pete.close_edit().await.unwrap();
}

// ── Dual-buffer grid ─────────────────────────────────────────

#[tokio::test]
async fn grid_view_frozen_while_editing() {
    let engine = crewed_store("frozen").await;
    let coordinator = Arc::new(SessionCoordinator::new());
    let mut ada = desk(engine.clone(), Role::Admin, "ada").with_coordinator(coordinator.clone());
    let other = desk(engine.clone(), Role::Agency, "sky");

    let id = ada.create_booking(request(1)).await.unwrap().booking.id;
    let mut grid = ada.open_grid(day()).await.unwrap();
    assert_eq!(grid.view().bookings.len(), 1);
    assert_eq!(grid.roster().len(), 3);

    ada.open_edit(id).await.unwrap();
    assert!(grid.is_frozen());

    other.create_booking(request(1)).await.unwrap();
    assert_eq!(grid.sync(engine.as_ref()).await.unwrap(), 1);
    assert_eq!(grid.live().bookings.len(), 2);
    assert_eq!(grid.view().bookings.len(), 1);
    // Selectors read the live buffer.
    assert_eq!(grid.capacity(&Default::default())[0].available, 1);

    ada.close_edit().await.unwrap();
    assert!(!grid.is_frozen());
    grid.sync(engine.as_ref()).await.unwrap();
    assert_eq!(grid.view().bookings.len(), 2);
}

#[tokio::test]
async fn grid_follows_roster_and_moves() {
    let engine = crewed_store("follow").await;
    let ada = desk(engine.clone(), Role::Admin, "ada");
    let id = ada.create_booking(request(1)).await.unwrap().booking.id;
    let mut grid = ada.open_grid(day()).await.unwrap();

    engine
        .upsert_pilot(Pilot {
            uid: "p2".into(),
            display_name: "Aaron".into(),
            female_pilot: false,
        })
        .await
        .unwrap();
    grid.sync(engine.as_ref()).await.unwrap();
    let names: Vec<String> = grid.roster().into_iter().map(|p| p.display_name).collect();
    assert_eq!(names, vec!["Aaron", "Anna", "Cleo"]);

    let tomorrow = day().succ_opt().unwrap();
    let patch = BookingPatch {
        date: Some(tomorrow),
        ..Default::default()
    };
    engine.update_booking(id, patch).await.unwrap();
    let change = grid.next_change(engine.as_ref()).await.unwrap();
    assert!(matches!(
        change,
        GridChange::Store(Event::BookingUpdated { previous_date, .. }) if previous_date == day()
    ));
    assert!(grid.view().bookings.is_empty());
}

#[tokio::test]
async fn waiting_grid_catches_up_when_edit_closes() {
    let engine = crewed_store("release").await;
    let coordinator = Arc::new(SessionCoordinator::new());
    let mut ada = desk(engine.clone(), Role::Admin, "ada").with_coordinator(coordinator.clone());
    let other = desk(engine.clone(), Role::Agency, "sky");
    let id = ada.create_booking(request(1)).await.unwrap().booking.id;
    let mut grid = ada.open_grid(day()).await.unwrap();

    ada.open_edit(id).await.unwrap();
    other.create_booking(request(1)).await.unwrap();
    let change = grid.next_change(engine.as_ref()).await.unwrap();
    assert!(matches!(change, GridChange::Store(Event::BookingAdded { .. })));
    assert_eq!(grid.view().bookings.len(), 1);

    ada.close_edit().await.unwrap();
    let change = tokio::time::timeout(Duration::from_secs(1), grid.next_change(engine.as_ref()))
        .await
        .expect("grid should wake when the session ends")
        .unwrap();
    assert!(matches!(change, GridChange::Released));
    assert_eq!(grid.view().bookings.len(), 2);
}

// ── Concurrent edits ─────────────────────────────────────────

#[tokio::test]
async fn concurrent_writers_merge_per_field() {
    let engine = crewed_store("merge").await;
    let mut ada = desk(engine.clone(), Role::Admin, "ada");
    let pete = desk(engine.clone(), Role::Pilot, "pete");
    let id = ada.create_booking(request(1)).await.unwrap().booking.id;

    ada.open_edit(id).await.unwrap();
    ada.edit_details(DetailsEdit {
        notes: Some("vegetarian lunch".into()),
        ..Default::default()
    })
    .unwrap();

    pete.quick_status(id, BookingStatus::Confirmed, None).await.unwrap();

    let saved = ada.save_edit().await.unwrap();
    assert_eq!(saved.booking.notes, "vegetarian lunch");
    assert_eq!(saved.booking.booking_status, BookingStatus::Confirmed);
    assert_eq!(ada.session().unwrap().live(), &saved.booking);
    ada.close_edit().await.unwrap();
}

#[tokio::test]
async fn session_tracks_the_target_day() {
    let engine = crewed_store("target").await;
    let mut pete = desk(engine.clone(), Role::Pilot, "pete");
    let id = pete.create_booking(request(1)).await.unwrap().booking.id;
    let tomorrow = day().succ_opt().unwrap();

    pete.open_edit(id).await.unwrap();
    assert_eq!(pete.edit_reschedule(tomorrow, 0).await.unwrap(), 0);
    assert_eq!(pete.session().unwrap().view().date(), tomorrow);

    fly(&engine, "p3", tomorrow, "07:30").await;
    assert_eq!(pete.target_capacity().await.unwrap(), 1);

    let saved = assert_ok!(pete.save_edit().await);
    assert_eq!(saved.booking.date, tomorrow);
    assert!(engine.day_snapshot(day()).await.bookings.is_empty());
    pete.close_edit().await.unwrap();
}

// ── Store failures ───────────────────────────────────────────

#[tokio::test]
async fn store_outage_keeps_the_draft() {
    let engine = crewed_store("outage").await;
    let flaky = Arc::new(FlakyStore {
        inner: engine.clone(),
        down: AtomicBool::new(false),
    });
    let mut ada = desk(flaky.clone(), Role::Admin, "ada");
    let id = ada.create_booking(request(2)).await.unwrap().booking.id;

    ada.open_edit(id).await.unwrap();
    ada.edit_details(DetailsEdit {
        phone: Some("+41 79 000 00 00".into()),
        ..Default::default()
    })
    .unwrap();

    flaky.down.store(true, Ordering::SeqCst);
    let err = assert_err!(ada.save_edit().await);
    assert_eq!(err, DeskError::StoreUnavailable("connection reset".into()));
    assert_eq!(ada.session().unwrap().draft().phone, "+41 79 000 00 00");
    assert_eq!(engine.get_booking(id).await.unwrap().phone, "");
    assert!(matches!(
        ada.create_booking(request(1)).await,
        Err(DeskError::StoreUnavailable(_))
    ));

    flaky.down.store(false, Ordering::SeqCst);
    let saved = assert_ok!(ada.save_edit().await);
    assert_eq!(saved.booking.phone, "+41 79 000 00 00");
    ada.close_edit().await.unwrap();
}

// ── Confirmation email ───────────────────────────────────────

#[tokio::test]
async fn confirmation_email_outcome() {
    let engine = crewed_store("email").await;
    let ada = desk(engine.clone(), Role::Admin, "ada");
    let id = ada.create_booking(request(2)).await.unwrap().booking.id;

    let email_id = ada.request_confirmation(id).await.unwrap();
    let queued = engine.email(email_id).unwrap();
    assert_eq!(queued.to, "jo@example.com");
    assert_eq!(queued.time, "07:30");
    assert_eq!(queued.number_of_people, 2);
    assert_eq!(queued.status, EmailStatus::Pending);
    let history = engine.get_booking(id).await.unwrap().history;
    assert_eq!(history.last().unwrap().action, HistoryAction::ConfirmationRequested);

    let sender = engine.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        sender.mark_email(email_id, EmailStatus::Sent).await.unwrap();
    });
    let outcome = ada.await_email_outcome(email_id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome, EmailStatus::Sent);

    // Nobody answers this one.
    let second = ada.request_confirmation(id).await.unwrap();
    let outcome = ada.await_email_outcome(second, Duration::from_millis(30)).await.unwrap();
    assert_eq!(outcome, EmailStatus::Pending);
    engine
        .mark_email(second, EmailStatus::Failed("mailbox full".into()))
        .await
        .unwrap();
    let outcome = ada.await_email_outcome(second, Duration::from_millis(30)).await.unwrap();
    assert_eq!(outcome, EmailStatus::Failed("mailbox full".into()));
}

#[tokio::test]
async fn confirmation_needs_an_address() {
    let engine = crewed_store("no_address").await;
    let ada = desk(engine.clone(), Role::Admin, "ada");
    let booking = ada
        .create_booking(NewBooking {
            email: String::new(),
            ..request(1)
        })
        .await
        .unwrap()
        .booking;
    assert!(matches!(
        ada.request_confirmation(booking.id).await,
        Err(DeskError::Invalid(_))
    ));
    assert!(engine.pending_emails().is_empty());
    assert!(matches!(
        ada.request_confirmation(Ulid::new()).await,
        Err(DeskError::NotFound(_))
    ));
}
