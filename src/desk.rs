//! The booking desk: the flows one signed-in user drives against the store.
//!
//! Capacity is checked against a fresh read of the target day right before
//! every write. Nothing stops another client from taking the same seats
//! between that read and the write; privileged users overbook anyway.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::engine::{available_female_slots, available_slots, day_capacity, day_roster, occupied_columns, place};
use crate::error::DeskError;
use crate::grid::DayGrid;
use crate::lifecycle::{self, NoShowDecision};
use crate::model::*;
use crate::observability::{BOOKINGS_SAVED_TOTAL, CAPACITY_REJECTIONS_TOTAL, OVERBOOKINGS_TOTAL};
use crate::patch::BookingPatch;
use crate::roles::{Actor, Permissions};
use crate::schedule::TimeSlotSchedule;
use crate::session::{EditSession, SessionCoordinator};
use crate::store::Store;

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time; booking dates are local calendar days.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// A clock stuck at one instant.
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Outcome of a booking write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saved {
    pub booking: Booking,
    /// Went past the computed capacity (privileged actors only).
    pub overbooked: bool,
    /// Landed past the right-most occupied column: the grid grows.
    pub expanded: bool,
}

impl Saved {
    fn unchanged(booking: Booking) -> Self {
        Self {
            booking,
            overbooked: false,
            expanded: false,
        }
    }
}

/// Field edits without side effects beyond the history line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailsEdit {
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub flight_type: Option<String>,
    pub booking_source: Option<String>,
    pub female_pilots_required: Option<u32>,
    pub commission: Option<Option<i64>>,
    pub commission_status: Option<CommissionStatus>,
}

#[derive(Debug, Default)]
struct Claim {
    overbooked: bool,
    expanded: bool,
}

pub struct Desk {
    store: Arc<dyn Store>,
    actor: Actor,
    schedule: Arc<TimeSlotSchedule>,
    coordinator: Arc<SessionCoordinator>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    session: Option<EditSession>,
}

impl Desk {
    pub fn new(store: Arc<dyn Store>, actor: Actor) -> Self {
        Self {
            store,
            actor,
            schedule: Arc::new(TimeSlotSchedule::default()),
            coordinator: Arc::new(SessionCoordinator::new()),
            clock: Arc::new(SystemClock),
            grace: Duration::hours(24),
            session: None,
        }
    }

    pub fn with_schedule(mut self, schedule: Arc<TimeSlotSchedule>) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How long after the end of a booking's day non-admins may still edit it.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Departure schedule and edit grace from the process configuration.
    pub fn with_config(self, config: &Config) -> Self {
        let grace = config.edit_grace;
        self.with_schedule(Arc::new(config.schedule.clone()))
            .with_grace(grace)
    }

    /// Share the editing gate with grids opened elsewhere in this client.
    pub fn with_coordinator(mut self, coordinator: Arc<SessionCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    pub fn session(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    fn time_slot(&self, date: NaiveDate, time_index: u32) -> Result<String, DeskError> {
        self.schedule
            .time_at(date, time_index)
            .map(str::to_string)
            .ok_or_else(|| DeskError::Invalid(format!("no departure #{time_index} on {date}")))
    }

    // ── Capacity for selectors ───────────────────────────────

    /// Every departure of `date` with its seat counts, for the time selector.
    pub async fn slot_capacity(&self, date: NaiveDate) -> Result<Vec<SlotCapacity>, DeskError> {
        let day = self.store.day(date).await?;
        let pilots = self.store.pilots().await?;
        Ok(day_capacity(&day, &pilots, self.schedule.slots_for(date)))
    }

    pub async fn available_slots(
        &self,
        date: NaiveDate,
        time_index: u32,
        exclude: Option<Ulid>,
    ) -> Result<u32, DeskError> {
        let time_slot = self.time_slot(date, time_index)?;
        let day = self.store.day(date).await?;
        Ok(available_slots(&day, &time_slot, time_index, exclude))
    }

    /// Female pilots still unnamed at the departure.
    pub async fn available_female_slots(
        &self,
        date: NaiveDate,
        time_index: u32,
        exclude: Option<Ulid>,
    ) -> Result<u32, DeskError> {
        let time_slot = self.time_slot(date, time_index)?;
        let day = self.store.day(date).await?;
        let pilots = self.store.pilots().await?;
        Ok(available_female_slots(&day, &pilots, &time_slot, time_index, exclude))
    }

    pub async fn open_grid(&self, date: NaiveDate) -> Result<DayGrid, DeskError> {
        Ok(DayGrid::open(self.store.as_ref(), date, &self.coordinator).await?)
    }

    // ── Creation ─────────────────────────────────────────────

    pub async fn create_booking(&self, input: NewBooking) -> Result<Saved, DeskError> {
        lifecycle::validate_headcount(input.number_of_people)?;
        let mut booking = lifecycle::new_booking(Ulid::new(), input, &self.actor, self.clock.now(), 0);
        let claim = self.claim(&mut booking, None, None).await?;
        self.store.add_booking(booking.clone()).await?;

        metrics::counter!(BOOKINGS_SAVED_TOTAL, "outcome" => "created").increment(1);
        info!(
            "booking {} created by {}: {} #{} columns {}..{}",
            booking.id,
            self.actor.user_name,
            booking.date,
            booking.time_index,
            booking.pilot_index,
            booking.columns().end()
        );
        Ok(Saved {
            booking,
            overbooked: claim.overbooked,
            expanded: claim.expanded,
        })
    }

    /// Make sure `booking` has seats at its slot and a grid position.
    ///
    /// `previous` is the stored version; a booking that stays at its slot
    /// without growing keeps its seats and its columns. `seen` is the capacity
    /// the editor was shown, which tells a stale picture from a plain overrun.
    async fn claim(
        &self,
        booking: &mut Booking,
        previous: Option<&Booking>,
        seen: Option<u32>,
    ) -> Result<Claim, DeskError> {
        if !booking.holds_seats() {
            return Ok(Claim::default());
        }
        let same_slot = previous
            .is_some_and(|p| p.holds_seats() && p.is_at(booking.date, booking.time_index));
        let grew = previous.is_none_or(|p| booking.number_of_people > p.number_of_people);
        if same_slot && !grew {
            return Ok(Claim::default());
        }

        let time_slot = self.time_slot(booking.date, booking.time_index)?;
        let day = self.store.day(booking.date).await?;
        let exclude = previous.map(|p| p.id);
        let requested = booking.number_of_people;
        let available = available_slots(&day, &time_slot, booking.time_index, exclude);
        let privileged = self.actor.is_privileged();
        let overbooked = requested > available;
        if overbooked && !privileged {
            return Err(self.reject(requested, available, seen));
        }

        let occupied = occupied_columns(&day, booking.time_index, exclude);
        let keeps_columns = same_slot && booking.columns().iter().all(|c| !occupied.contains(&c));
        let mut expanded = false;
        if !keeps_columns {
            let pilots = self.store.pilots().await?;
            let roster = day_roster(&day, &pilots);
            let placement = place(
                &day,
                &roster,
                &time_slot,
                booking.time_index,
                requested,
                exclude,
                privileged,
            )
            .ok_or_else(|| self.reject(requested, available, seen))?;
            booking.pilot_index = placement.column();
            expanded = placement.is_expansion();
        }

        if overbooked {
            metrics::counter!(OVERBOOKINGS_TOTAL).increment(1);
            warn!(
                "booking {} overbooks {} {}: {requested} requested, {available} available",
                booking.id, booking.date, time_slot
            );
        }
        Ok(Claim {
            overbooked,
            expanded,
        })
    }

    fn reject(&self, requested: u32, available: u32, seen: Option<u32>) -> DeskError {
        match seen {
            Some(seen) if seen >= requested => {
                metrics::counter!(CAPACITY_REJECTIONS_TOTAL, "kind" => "stale").increment(1);
                info!("availability changed under {}: {seen} seen, {available} now", self.actor.user_name);
                DeskError::StaleAvailability {
                    requested,
                    available,
                    seen,
                }
            }
            _ => {
                metrics::counter!(CAPACITY_REJECTIONS_TOTAL, "kind" => "capacity").increment(1);
                DeskError::CapacityExceeded {
                    requested,
                    available,
                }
            }
        }
    }

    // ── Edit sessions ────────────────────────────────────────

    /// Start editing a booking; returns the draft.
    pub async fn open_edit(&mut self, id: Ulid) -> Result<&Booking, DeskError> {
        if self.session.is_some() {
            return Err(DeskError::EditSessionActive);
        }
        let booking = self.store.booking(id).await?;
        lifecycle::check_edit(&self.actor, &booking, self.clock.now(), self.grace)?;
        if !self.coordinator.begin() {
            return Err(DeskError::EditSessionActive);
        }
        match EditSession::open(self.store.as_ref(), booking, &self.schedule).await {
            Ok(session) => {
                info!("{} opened booking {id}", self.actor.user_name);
                Ok(&self.session.insert(session).draft)
            }
            Err(e) => {
                self.coordinator.end();
                Err(e.into())
            }
        }
    }

    /// Move the draft to another day or departure. Returns the seats the
    /// editor now sees there.
    pub async fn edit_reschedule(&mut self, date: NaiveDate, time_index: u32) -> Result<u32, DeskError> {
        self.time_slot(date, time_index)?;
        let now = self.clock.now();
        let session = self.session.as_mut().ok_or(DeskError::NoEditSession)?;
        lifecycle::reschedule(&mut session.draft, date, time_index, &self.actor.user_name, now);
        session.retarget(self.store.as_ref()).await?;
        session.sync(self.store.as_ref()).await?;
        Ok(session.look(&self.schedule))
    }

    /// Change the headcount. Returns the seats the editor now sees at the slot.
    pub async fn edit_resize(&mut self, number_of_people: u32) -> Result<u32, DeskError> {
        let now = self.clock.now();
        let session = self.session.as_mut().ok_or(DeskError::NoEditSession)?;
        lifecycle::resize(&mut session.draft, number_of_people, &self.actor.user_name, now)?;
        session.sync(self.store.as_ref()).await?;
        Ok(session.look(&self.schedule))
    }

    pub fn edit_status(
        &mut self,
        to: BookingStatus,
        decision: Option<NoShowDecision>,
    ) -> Result<(), DeskError> {
        let now = self.clock.now();
        let session = self.session.as_mut().ok_or(DeskError::NoEditSession)?;
        lifecycle::check_status_change(&self.actor, &session.draft, to, now, self.grace)?;
        lifecycle::change_status(&mut session.draft, to, decision, &self.actor.user_name, now)
    }

    /// Put a pilot (by display name, `""` to clear) on a seat.
    /// Name `pilot` for `seat`; `""` clears the seat. The pilot must be in
    /// the directory as of now, so store changes are pulled in first.
    pub async fn edit_assign_pilot(&mut self, seat: usize, pilot: &str) -> Result<(), DeskError> {
        let now = self.clock.now();
        let session = self.session.as_mut().ok_or(DeskError::NoEditSession)?;
        lifecycle::check_edit(&self.actor, &session.draft, now, self.grace)?;
        session.sync(self.store.as_ref()).await?;
        if !pilot.is_empty() && !session.view.pilots.iter().any(|p| p.display_name == pilot) {
            return Err(DeskError::Invalid(format!("unknown pilot {pilot}")));
        }
        lifecycle::assign_pilot(&mut session.draft, seat, pilot, &self.actor.user_name, now)
    }

    pub fn edit_payment(
        &mut self,
        pilot: &str,
        amount: Option<i64>,
        method: Option<PaymentMethod>,
    ) -> Result<(), DeskError> {
        let now = self.clock.now();
        let session = self.session.as_mut().ok_or(DeskError::NoEditSession)?;
        lifecycle::check_edit(&self.actor, &session.draft, now, self.grace)?;
        lifecycle::set_payment(&mut session.draft, pilot, amount, method, &self.actor.user_name, now)
    }

    pub fn edit_details(&mut self, edit: DetailsEdit) -> Result<(), DeskError> {
        let now = self.clock.now();
        let session = self.session.as_mut().ok_or(DeskError::NoEditSession)?;
        lifecycle::check_edit(&self.actor, &session.draft, now, self.grace)?;

        let draft = &mut session.draft;
        let mut changed = Vec::new();
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = edit.$field {
                    if draft.$field != v {
                        draft.$field = v;
                        changed.push(stringify!($field));
                    }
                })*
            };
        }
        take!(
            customer_name,
            phone,
            email,
            notes,
            flight_type,
            booking_source,
            female_pilots_required,
            commission,
            commission_status,
        );
        if !changed.is_empty() {
            lifecycle::record(draft, HistoryAction::Updated, &self.actor.user_name, now, changed.join(", "));
        }
        Ok(())
    }

    /// Seats left at the draft's slot right now, without touching what the
    /// editor was last shown.
    pub async fn target_capacity(&mut self) -> Result<u32, DeskError> {
        let session = self.session.as_mut().ok_or(DeskError::NoEditSession)?;
        session.sync(self.store.as_ref()).await?;
        Ok(session
            .view
            .available(&self.schedule, session.draft.time_index, Some(session.draft.id)))
    }

    /// Write the draft's changes. The session stays open; on any error the
    /// draft is kept as it was.
    pub async fn save_edit(&mut self) -> Result<Saved, DeskError> {
        let mut session = self.session.take().ok_or(DeskError::NoEditSession)?;
        let result = self.save_session(&mut session).await;
        self.session = Some(session);
        result
    }

    async fn save_session(&self, session: &mut EditSession) -> Result<Saved, DeskError> {
        session.sync(self.store.as_ref()).await?;
        lifecycle::check_edit(&self.actor, &session.live, self.clock.now(), self.grace)?;

        let mut draft = session.draft.clone();
        let claim = self
            .claim(&mut draft, Some(&session.live), Some(session.seen))
            .await?;
        let patch = BookingPatch::diff(&session.baseline, &draft);
        if patch.is_empty() {
            return Ok(Saved::unchanged(session.live.clone()));
        }

        let stored = self.store.update_booking(draft.id, patch).await?;
        session.saved(stored.clone());
        metrics::counter!(BOOKINGS_SAVED_TOTAL, "outcome" => "updated").increment(1);
        info!("booking {} saved by {}", stored.id, self.actor.user_name);
        Ok(Saved {
            booking: stored,
            overbooked: claim.overbooked,
            expanded: claim.expanded,
        })
    }

    /// End the session, discarding unsaved edits. A booking that is cancelled
    /// in the store gives back its pilots now; returns it if it did.
    pub async fn close_edit(&mut self) -> Result<Option<Booking>, DeskError> {
        let session = self.session.take().ok_or(DeskError::NoEditSession)?;
        let result = self.release_cancelled(session.id()).await;
        self.coordinator.end();
        result
    }

    async fn release_cancelled(&self, id: Ulid) -> Result<Option<Booking>, DeskError> {
        let current = self.store.booking(id).await?;
        let mut released = current.clone();
        if !lifecycle::release_if_cancelled(&mut released) {
            return Ok(None);
        }
        lifecycle::record(
            &mut released,
            HistoryAction::PilotsAssigned,
            &self.actor.user_name,
            self.clock.now(),
            "released on cancellation",
        );
        let stored = self
            .store
            .update_booking(id, BookingPatch::diff(&current, &released))
            .await?;
        info!("cancelled booking {id} released its pilots");
        Ok(Some(stored))
    }

    // ── Quick actions ────────────────────────────────────────

    /// One-click status change, written at once and independent of any open
    /// session. A cancellation releases the pilots immediately.
    pub async fn quick_status(
        &self,
        id: Ulid,
        to: BookingStatus,
        decision: Option<NoShowDecision>,
    ) -> Result<Saved, DeskError> {
        let current = self.store.booking(id).await?;
        let now = self.clock.now();
        lifecycle::check_status_change(&self.actor, &current, to, now, self.grace)?;

        let mut updated = current.clone();
        lifecycle::change_status(&mut updated, to, decision, &self.actor.user_name, now)?;
        lifecycle::release_if_cancelled(&mut updated);
        let claim = self.claim(&mut updated, Some(&current), None).await?;

        let patch = BookingPatch::diff(&current, &updated);
        if patch.is_empty() {
            return Ok(Saved::unchanged(current));
        }
        let stored = self.store.update_booking(id, patch).await?;
        metrics::counter!(BOOKINGS_SAVED_TOTAL, "outcome" => "status").increment(1);
        info!("booking {id} set {} -> {to} by {}", current.booking_status, self.actor.user_name);
        Ok(Saved {
            booking: stored,
            overbooked: claim.overbooked,
            expanded: claim.expanded,
        })
    }

    // ── Confirmation email ───────────────────────────────────

    /// Queue a confirmation for the external mail sender. Returns the request id.
    pub async fn request_confirmation(&self, booking_id: Ulid) -> Result<Ulid, DeskError> {
        let booking = self.store.booking(booking_id).await?;
        let now = self.clock.now();
        lifecycle::check_edit(&self.actor, &booking, now, self.grace)?;
        if booking.email.is_empty() {
            return Err(DeskError::Invalid("booking has no email address".into()));
        }
        let request = EmailRequest {
            id: Ulid::new(),
            kind: EmailKind::BookingConfirmation,
            to: booking.email.clone(),
            booking_id,
            customer_name: booking.customer_name.clone(),
            date: booking.date,
            time: self.time_slot(booking.date, booking.time_index)?,
            number_of_people: booking.number_of_people,
            status: EmailStatus::Pending,
        };
        self.store.enqueue_email(request.clone()).await?;

        let mut noted = booking.clone();
        lifecycle::record(
            &mut noted,
            HistoryAction::ConfirmationRequested,
            &self.actor.user_name,
            now,
            format!("to {}", booking.email),
        );
        self.store
            .update_booking(booking_id, BookingPatch::diff(&booking, &noted))
            .await?;
        info!("confirmation {} queued for booking {booking_id}", request.id);
        Ok(request.id)
    }

    /// Wait for the sender to report on a queued email. Still `Pending` when
    /// nothing was reported within `timeout`.
    pub async fn await_email_outcome(
        &self,
        id: Ulid,
        timeout: std::time::Duration,
    ) -> Result<EmailStatus, DeskError> {
        let mut rx = self.store.subscribe(Topic::Outbox);
        let status = self.store.email(id).await?.status;
        if status != EmailStatus::Pending {
            return Ok(status);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Err(_) => return Ok(EmailStatus::Pending),
                Ok(Ok(Event::EmailStatusChanged { id: changed, status }))
                    if changed == id && status != EmailStatus::Pending =>
                {
                    return Ok(status);
                }
                Ok(Ok(_)) => {}
                Ok(Err(RecvError::Lagged(_))) => {
                    let status = self.store.email(id).await?.status;
                    if status != EmailStatus::Pending {
                        return Ok(status);
                    }
                }
                Ok(Err(RecvError::Closed)) => {
                    return Err(DeskError::StoreUnavailable("outbox feed closed".into()));
                }
            }
        }
    }
}
