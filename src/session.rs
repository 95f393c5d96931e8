//! Edit sessions: the client-wide editing gate and the dual-buffer working
//! copy of the booking being edited.
//!
//! While a session is open the grid stops copying store changes into the
//! view it renders, and the edit form works on `draft` only. Store changes
//! still flow into `live` and into the target-date view, so the capacity shown
//! to the editor stays current.

use chrono::NaiveDate;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch};
use ulid::Ulid;

use crate::engine::{available_slots, day_roster, RosterEntry};
use crate::model::*;
use crate::observability::{EDIT_SESSIONS_ACTIVE, SYNC_EVENTS_TOTAL, SYNC_RESYNCS_TOTAL};
use crate::schedule::TimeSlotSchedule;
use crate::store::{Store, StoreError};

/// The one-session-per-client editing flag. Not a lock: other clients are
/// free to write the same booking meanwhile.
pub struct SessionCoordinator {
    editing: watch::Sender<bool>,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCoordinator {
    pub fn new() -> Self {
        Self {
            editing: watch::channel(false).0,
        }
    }

    /// Start editing. `false` if a session is already open.
    pub fn begin(&self) -> bool {
        let started = self.editing.send_if_modified(|editing| {
            if *editing {
                false
            } else {
                *editing = true;
                true
            }
        });
        if started {
            metrics::gauge!(EDIT_SESSIONS_ACTIVE).increment(1.0);
            tracing::debug!("edit session started");
        }
        started
    }

    pub fn end(&self) {
        let ended = self
            .editing
            .send_if_modified(|editing| std::mem::replace(editing, false));
        if ended {
            metrics::gauge!(EDIT_SESSIONS_ACTIVE).decrement(1.0);
            tracing::debug!("edit session ended");
        }
    }

    pub fn is_editing(&self) -> bool {
        *self.editing.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.editing.subscribe()
    }
}

/// Availability, pilots and bookings of the date the draft currently
/// targets. Refetched whenever the draft moves to another day.
#[derive(Debug, Clone)]
pub struct EditedDateView {
    pub day: DayState,
    pub pilots: Vec<Pilot>,
}

impl EditedDateView {
    pub async fn fetch(store: &dyn Store, date: NaiveDate) -> Result<Self, StoreError> {
        Ok(Self {
            day: store.day(date).await?,
            pilots: store.pilots().await?,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.day.date
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        day_roster(&self.day, &self.pilots)
    }

    /// Seats left at `time_index`, not counting `exclude`. Zero for an index
    /// off the day's schedule.
    pub fn available(&self, schedule: &TimeSlotSchedule, time_index: u32, exclude: Option<Ulid>) -> u32 {
        match schedule.time_at(self.day.date, time_index) {
            Some(time_slot) => available_slots(&self.day, time_slot, time_index, exclude),
            None => 0,
        }
    }
}

/// One topic's change feed.
struct Feed {
    topic: Topic,
    rx: broadcast::Receiver<Event>,
}

impl Feed {
    fn subscribe(store: &dyn Store, topic: Topic) -> Self {
        Self {
            topic,
            rx: store.subscribe(topic),
        }
    }

    fn day(store: &dyn Store, date: NaiveDate) -> Self {
        Self::subscribe(store, Topic::Day(date))
    }

    fn is_day(&self, date: NaiveDate) -> bool {
        self.topic == Topic::Day(date)
    }

    /// Move pending changes into `out`. `Ok(true)` if some were lost to lag.
    fn drain(&mut self, out: &mut Vec<Event>) -> Result<bool, StoreError> {
        let mut lagged = false;
        loop {
            match self.rx.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Empty) => return Ok(lagged),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!("change feed for {:?} lagged by {missed}", self.topic);
                    lagged = true;
                }
                Err(TryRecvError::Closed) => {
                    return Err(StoreError::Unavailable("change feed closed".into()));
                }
            }
        }
    }
}

/// Working state of one open edit.
pub struct EditSession {
    /// Snapshot the draft is diffed against; advanced on every save.
    pub(crate) baseline: Booking,
    /// Always the store's current version of the booking.
    pub(crate) live: Booking,
    /// The editor's copy; only the desk's edit operations touch it.
    pub(crate) draft: Booking,
    pub(crate) view: EditedDateView,
    /// Seats the editor was shown at the draft's slot when they last picked it.
    pub(crate) seen: u32,
    /// Changes on the day the booking is stored under.
    home: Feed,
    /// Pilot directory changes, so pilots added mid-edit can be assigned.
    roster: Feed,
    /// Changes on the draft's day, once the draft moves off `home`.
    away: Option<Feed>,
}

impl EditSession {
    pub async fn open(
        store: &dyn Store,
        booking: Booking,
        schedule: &TimeSlotSchedule,
    ) -> Result<Self, StoreError> {
        // Subscribe before fetching so nothing falls between the two.
        let home = Feed::day(store, booking.date);
        let roster = Feed::subscribe(store, Topic::Roster);
        let view = EditedDateView::fetch(store, booking.date).await?;
        let seen = view.available(schedule, booking.time_index, Some(booking.id));
        Ok(Self {
            baseline: booking.clone(),
            live: booking.clone(),
            draft: booking,
            view,
            seen,
            home,
            roster,
            away: None,
        })
    }

    pub fn id(&self) -> Ulid {
        self.draft.id
    }

    pub fn draft(&self) -> &Booking {
        &self.draft
    }

    pub fn live(&self) -> &Booking {
        &self.live
    }

    pub fn view(&self) -> &EditedDateView {
        &self.view
    }

    pub fn seen(&self) -> u32 {
        self.seen
    }

    /// Remember what the editor is shown for the draft's current slot.
    pub(crate) fn look(&mut self, schedule: &TimeSlotSchedule) -> u32 {
        self.seen = self
            .view
            .available(schedule, self.draft.time_index, Some(self.draft.id));
        self.seen
    }

    /// Point the view at the draft's date after a move to another day.
    pub(crate) async fn retarget(&mut self, store: &dyn Store) -> Result<(), StoreError> {
        let date = self.draft.date;
        if date == self.view.date() {
            return Ok(());
        }
        let away = (!self.home.is_day(date)).then(|| Feed::day(store, date));
        self.view = EditedDateView::fetch(store, date).await?;
        self.away = away;
        Ok(())
    }

    /// Apply store changes that arrived since the last call to `live` and to
    /// the view. The draft is never touched. Returns the number of changes.
    pub(crate) async fn sync(&mut self, store: &dyn Store) -> Result<usize, StoreError> {
        let mut events = Vec::new();
        let mut lagged = self.home.drain(&mut events)?;
        lagged |= self.roster.drain(&mut events)?;
        if let Some(away) = self.away.as_mut() {
            lagged |= away.drain(&mut events)?;
        }
        for event in &events {
            self.absorb(event);
        }
        metrics::counter!(SYNC_EVENTS_TOTAL).increment(events.len() as u64);

        if lagged {
            metrics::counter!(SYNC_RESYNCS_TOTAL).increment(1);
            self.view = EditedDateView::fetch(store, self.view.date()).await?;
            self.live = store.booking(self.live.id).await?;
        }
        // Another client moved the booking: follow it to its new day.
        if !self.home.is_day(self.live.date) {
            self.home = Feed::day(store, self.live.date);
            if self.away.as_ref().is_some_and(|f| f.is_day(self.live.date)) {
                self.away = None;
            }
        }
        Ok(events.len())
    }

    fn absorb(&mut self, event: &Event) {
        match event {
            Event::PilotUpserted { pilot } => {
                match self.view.pilots.iter_mut().find(|p| p.uid == pilot.uid) {
                    Some(existing) => *existing = pilot.clone(),
                    None => self.view.pilots.push(pilot.clone()),
                }
            }
            Event::PilotRemoved { uid } => self.view.pilots.retain(|p| &p.uid != uid),
            Event::BookingUpdated { booking, .. } if booking.id == self.live.id => {
                self.view.day.absorb(event);
                self.live = booking.clone();
            }
            _ => self.view.day.absorb(event),
        }
    }

    /// After a successful save the stored version is the new baseline, and
    /// the draft picks up whatever other clients changed meanwhile.
    pub(crate) fn saved(&mut self, stored: Booking) {
        self.baseline = stored.clone();
        self.live = stored.clone();
        self.draft = stored;
    }
}
