mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{available_female_slots, available_slots, day_capacity, day_roster, RosterEntry};
pub use conflict::{available_columns, occupied_columns, place, Placement};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::schedule::TimeSlotSchedule;
use crate::wal::Wal;

pub type SharedDayState = Arc<RwLock<DayState>>;

/// A booking can change days between the index lookup and taking the day
/// lock; give up after this many re-reads.
const MOVE_RETRIES: usize = 3;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush what we have before compacting or reporting.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-buffered bytes don't ride
    // along with the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
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
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The live schedule store: per-day state behind its own lock, a pilot
/// directory and the email outbox. Writes go WAL first, then memory, then
/// subscribers.
pub struct Engine {
    days: DashMap<NaiveDate, SharedDayState>,
    pilots: DashMap<String, Pilot>,
    outbox: DashMap<Ulid, EmailRequest>,
    /// Reverse lookup: booking id → the day holding it.
    booking_dates: DashMap<Ulid, NaiveDate>,
    schedule: TimeSlotSchedule,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared; compaction holds it exclusively while it snapshots.
    /// Always taken before any day lock.
    snapshot_lock: RwLock<()>,
    pub notify: Arc<NotifyHub>,
}

/// Apply an event to one day; the caller holds its lock.
fn apply_to_day(day: &mut DayState, event: &Event, booking_dates: &DashMap<Ulid, NaiveDate>) {
    day.absorb(event);
    match event {
        Event::BookingAdded { booking } | Event::BookingUpdated { booking, .. }
            if booking.date == day.date =>
        {
            booking_dates.insert(booking.id, booking.date);
        }
        _ => {}
    }
}

/// Days an event touches; a moved booking touches its old day first.
fn event_dates(event: &Event) -> Vec<NaiveDate> {
    event
        .topics()
        .into_iter()
        .filter_map(|topic| match topic {
            Topic::Day(date) => Some(date),
            Topic::Roster | Topic::Outbox => None,
        })
        .collect()
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_schedule(wal_path, notify, TimeSlotSchedule::default())
    }

    pub fn with_schedule(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        schedule: TimeSlotSchedule,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            days: DashMap::new(),
            pilots: DashMap::new(),
            outbox: DashMap::new(),
            booking_dates: DashMap::new(),
            schedule,
            wal_tx,
            snapshot_lock: RwLock::new(()),
            notify,
        };

        // We're the sole owner of every day Arc here, so try_write never
        // contends. Blocking lock calls would panic inside the runtime.
        for event in &events {
            engine.apply_to_directory(event);
            for date in event_dates(event) {
                let day = engine.day_entry(date);
                if let Ok(mut guard) = day.try_write() {
                    apply_to_day(&mut guard, event, &engine.booking_dates);
                }
            }
        }
        tracing::info!(
            "replayed {} events from {}: {} pilots, {} bookings",
            events.len(),
            wal_path.display(),
            engine.pilots.len(),
            engine.booking_dates.len()
        );

        Ok(engine)
    }

    pub fn schedule(&self) -> &TimeSlotSchedule {
        &self.schedule
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

    fn get_day(&self, date: NaiveDate) -> Option<SharedDayState> {
        self.days.get(&date).map(|e| e.value().clone())
    }

    fn day_entry(&self, date: NaiveDate) -> SharedDayState {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .value()
            .clone()
    }

    fn apply_to_directory(&self, event: &Event) {
        match event {
            Event::PilotUpserted { pilot } => {
                self.pilots.insert(pilot.uid.clone(), pilot.clone());
            }
            Event::PilotRemoved { uid } => {
                self.pilots.remove(uid);
            }
            Event::EmailQueued { request } => {
                self.outbox.insert(request.id, request.clone());
            }
            Event::EmailStatusChanged { id, status } => {
                if let Some(mut request) = self.outbox.get_mut(id) {
                    request.status = status.clone();
                }
            }
            Event::AvailabilityAdded { .. }
            | Event::AvailabilityRemoved { .. }
            | Event::BookingAdded { .. }
            | Event::BookingUpdated { .. } => {}
        }
    }

    /// WAL-append + apply + notify. `days` are the locked days the event touches.
    async fn persist_and_apply(
        &self,
        days: &mut [&mut DayState],
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_directory(event);
        for day in days.iter_mut() {
            apply_to_day(day, event, &self.booking_dates);
        }
        self.notify.publish(event);
        Ok(())
    }
}
