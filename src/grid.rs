//! Live read model of one schedule day, as a viewer's grid shows it.

use chrono::NaiveDate;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};

use crate::engine::{day_capacity, day_roster, RosterEntry};
use crate::model::*;
use crate::observability::{SYNC_EVENTS_TOTAL, SYNC_RESYNCS_TOTAL};
use crate::schedule::TimeSlotSchedule;
use crate::session::SessionCoordinator;
use crate::store::{Store, StoreError};

/// What woke a grid waiting in [`DayGrid::next_change`].
#[derive(Debug, Clone)]
pub enum GridChange {
    /// A store change, already applied.
    Store(Event),
    /// The edit session ended; the view caught up with `live`.
    Released,
}

/// Two buffers of the same day: `live` follows the store, `view` is what gets
/// rendered and is frozen while an edit session is open on this client.
pub struct DayGrid {
    live: DayState,
    view: DayState,
    pilots: Vec<Pilot>,
    day_rx: broadcast::Receiver<Event>,
    roster_rx: broadcast::Receiver<Event>,
    editing: watch::Receiver<bool>,
    /// False once the coordinator is dropped.
    coordinated: bool,
}

impl DayGrid {
    pub async fn open(
        store: &dyn Store,
        date: NaiveDate,
        coordinator: &SessionCoordinator,
    ) -> Result<Self, StoreError> {
        let day_rx = store.subscribe(Topic::Day(date));
        let roster_rx = store.subscribe(Topic::Roster);
        let live = store.day(date).await?;
        let pilots = store.pilots().await?;
        Ok(Self {
            view: live.clone(),
            live,
            pilots,
            day_rx,
            roster_rx,
            editing: coordinator.watch(),
            coordinated: true,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.live.date
    }

    /// The rendered day.
    pub fn view(&self) -> &DayState {
        &self.view
    }

    pub fn live(&self) -> &DayState {
        &self.live
    }

    pub fn is_frozen(&self) -> bool {
        *self.editing.borrow()
    }

    /// Grid columns of the rendered day.
    pub fn roster(&self) -> Vec<RosterEntry> {
        day_roster(&self.view, &self.pilots)
    }

    /// Capacity from the live buffer, so selectors stay current mid-edit.
    pub fn capacity(&self, schedule: &TimeSlotSchedule) -> Vec<SlotCapacity> {
        day_capacity(&self.live, &self.pilots, schedule.slots_for(self.live.date))
    }

    /// Apply every pending change without waiting. Returns how many arrived.
    pub async fn sync(&mut self, store: &dyn Store) -> Result<usize, StoreError> {
        let mut applied = 0;
        let mut lagged = false;
        for rx in [&mut self.day_rx, &mut self.roster_rx] {
            loop {
                match rx.try_recv() {
                    Ok(event) => {
                        apply(&mut self.live, &mut self.pilots, &event);
                        applied += 1;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Lagged(_)) => lagged = true,
                    Err(TryRecvError::Closed) => {
                        return Err(StoreError::Unavailable("change feed closed".into()));
                    }
                }
            }
        }
        metrics::counter!(SYNC_EVENTS_TOTAL).increment(applied as u64);
        if lagged {
            self.resync(store).await?;
        }
        self.publish();
        Ok(applied)
    }

    /// Wait for the next change to this day or the pilot directory, or for
    /// the client's edit session to end, and bring the view up to date.
    pub async fn next_change(&mut self, store: &dyn Store) -> Result<GridChange, StoreError> {
        loop {
            let received = tokio::select! {
                r = self.day_rx.recv() => r,
                r = self.roster_rx.recv() => r,
                changed = self.editing.changed(), if self.coordinated => {
                    if changed.is_err() {
                        self.coordinated = false;
                        continue;
                    }
                    if *self.editing.borrow_and_update() {
                        continue;
                    }
                    self.publish();
                    return Ok(GridChange::Released);
                }
            };
            match received {
                Ok(event) => {
                    apply(&mut self.live, &mut self.pilots, &event);
                    metrics::counter!(SYNC_EVENTS_TOTAL).increment(1);
                    self.publish();
                    return Ok(GridChange::Store(event));
                }
                Err(RecvError::Lagged(_)) => {
                    self.resync(store).await?;
                    self.publish();
                }
                Err(RecvError::Closed) => {
                    return Err(StoreError::Unavailable("change feed closed".into()));
                }
            }
        }
    }

    async fn resync(&mut self, store: &dyn Store) -> Result<(), StoreError> {
        tracing::warn!("grid for {} lagged behind the store, refetching", self.live.date);
        metrics::counter!(SYNC_RESYNCS_TOTAL).increment(1);
        self.live = store.day(self.live.date).await?;
        self.pilots = store.pilots().await?;
        Ok(())
    }

    /// Copy `live` into `view` unless an edit session holds the view.
    fn publish(&mut self) {
        if !*self.editing.borrow_and_update() {
            self.view.clone_from(&self.live);
        }
    }
}

fn apply(day: &mut DayState, pilots: &mut Vec<Pilot>, event: &Event) {
    match event {
        Event::PilotUpserted { pilot } => match pilots.iter_mut().find(|p| p.uid == pilot.uid) {
            Some(existing) => *existing = pilot.clone(),
            None => pilots.push(pilot.clone()),
        },
        Event::PilotRemoved { uid } => pilots.retain(|p| &p.uid != uid),
        _ => day.absorb(event),
    }
}
