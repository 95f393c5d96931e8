use chrono::NaiveDate;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::lifecycle::is_consistent;
use crate::limits::*;
use crate::model::*;
use crate::patch::BookingPatch;

use super::{Engine, EngineError, WalCommand, MOVE_RETRIES};

impl Engine {
    // ── Pilot directory ──────────────────────────────────────

    pub async fn upsert_pilot(&self, pilot: Pilot) -> Result<(), EngineError> {
        if pilot.uid.is_empty() {
            return Err(EngineError::Invalid("pilot uid is empty"));
        }
        if pilot.uid.len() > MAX_NAME_LEN || pilot.display_name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("pilot name too long"));
        }
        if !self.pilots.contains_key(&pilot.uid) && self.pilots.len() >= MAX_PILOTS {
            return Err(EngineError::LimitExceeded("too many pilots"));
        }

        let _gate = self.snapshot_lock.read().await;
        let event = Event::PilotUpserted { pilot };
        self.persist_and_apply(&mut [], &event).await
    }

    /// Availability records of the pilot stay; the grid shows them under the uid.
    pub async fn remove_pilot(&self, uid: &str) -> Result<(), EngineError> {
        if !self.pilots.contains_key(uid) {
            return Err(EngineError::UnknownPilot(uid.to_string()));
        }
        let _gate = self.snapshot_lock.read().await;
        let event = Event::PilotRemoved { uid: uid.to_string() };
        self.persist_and_apply(&mut [], &event).await
    }

    // ── Availability ─────────────────────────────────────────

    /// Returns `false` if the pilot was already available at that slot.
    pub async fn add_availability(&self, slot: AvailabilitySlot) -> Result<bool, EngineError> {
        if slot.time_slot.len() > MAX_TIME_SLOT_LEN {
            return Err(EngineError::LimitExceeded("time slot too long"));
        }
        if !self.pilots.contains_key(&slot.pilot_uid) {
            return Err(EngineError::UnknownPilot(slot.pilot_uid));
        }
        self.check_time_slot(slot.date, &slot.time_slot)?;

        let _gate = self.snapshot_lock.read().await;
        let day = self.day_entry(slot.date);
        let mut guard = day.write().await;
        if guard.is_available(&slot.pilot_uid, &slot.time_slot) {
            return Ok(false);
        }
        let event = Event::AvailabilityAdded { slot };
        self.persist_and_apply(&mut [&mut *guard], &event).await?;
        Ok(true)
    }

    /// Returns `false` if there was nothing to remove.
    pub async fn remove_availability(&self, slot: AvailabilitySlot) -> Result<bool, EngineError> {
        let _gate = self.snapshot_lock.read().await;
        let Some(day) = self.get_day(slot.date) else {
            return Ok(false);
        };
        let mut guard = day.write().await;
        if !guard.is_available(&slot.pilot_uid, &slot.time_slot) {
            return Ok(false);
        }
        let event = Event::AvailabilityRemoved { slot };
        self.persist_and_apply(&mut [&mut *guard], &event).await?;
        Ok(true)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Store a new booking as given. Capacity is not checked here: the store
    /// keeps whatever the desk decided, overbookings included.
    pub async fn add_booking(&self, booking: Booking) -> Result<(), EngineError> {
        self.validate_booking(&booking)?;

        let _gate = self.snapshot_lock.read().await;
        let day = self.day_entry(booking.date);
        let mut guard = day.write().await;
        if self.booking_dates.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on this day"));
        }
        let event = Event::BookingAdded { booking };
        self.persist_and_apply(&mut [&mut *guard], &event).await
    }

    /// Apply a sparse patch over the stored booking; fields the patch leaves
    /// out keep whatever the store holds now. A date change moves the booking
    /// between days under both day locks, taken in date order.
    pub async fn update_booking(
        &self,
        id: Ulid,
        patch: BookingPatch,
    ) -> Result<Booking, EngineError> {
        let _gate = self.snapshot_lock.read().await;
        for _ in 0..MOVE_RETRIES {
            let from = self.booking_date(id)?;
            let to = patch.date.unwrap_or(from);

            if from == to {
                let day = self.day_entry(from);
                let mut guard = day.write().await;
                let Some(current) = guard.booking(id) else {
                    continue;
                };
                let updated = self.patched(current, &patch)?;
                let event = Event::BookingUpdated {
                    booking: updated.clone(),
                    previous_date: from,
                };
                self.persist_and_apply(&mut [&mut *guard], &event).await?;
                return Ok(updated);
            }

            let first = self.day_entry(from.min(to));
            let second = self.day_entry(from.max(to));
            let mut first_guard = first.write().await;
            let mut second_guard = second.write().await;
            let (src, dst) = if from < to {
                (&mut *first_guard, &mut *second_guard)
            } else {
                (&mut *second_guard, &mut *first_guard)
            };
            let Some(current) = src.booking(id) else {
                continue;
            };
            let updated = self.patched(current, &patch)?;
            if dst.bookings.len() >= MAX_BOOKINGS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many bookings on this day"));
            }
            let event = Event::BookingUpdated {
                booking: updated.clone(),
                previous_date: from,
            };
            self.persist_and_apply(&mut [src, dst], &event).await?;
            return Ok(updated);
        }
        Err(EngineError::NotFound(id))
    }

    fn patched(&self, current: &Booking, patch: &BookingPatch) -> Result<Booking, EngineError> {
        let mut updated = current.clone();
        patch.apply_to(&mut updated);
        self.validate_booking(&updated)?;
        Ok(updated)
    }

    fn validate_booking(&self, booking: &Booking) -> Result<(), EngineError> {
        if booking.number_of_people == 0 || booking.number_of_people > MAX_PEOPLE_PER_BOOKING {
            return Err(EngineError::LimitExceeded("number of people out of range"));
        }
        self.check_time_index(booking.date, booking.time_index)?;
        if booking.pilot_index > MAX_GRID_COLUMNS - booking.number_of_people {
            return Err(EngineError::LimitExceeded("grid column out of range"));
        }
        if booking.assigned_pilots.len() != booking.number_of_people as usize {
            return Err(EngineError::Invalid("seat list does not match headcount"));
        }
        if !is_consistent(booking) {
            return Err(EngineError::Invalid("payment for a pilot not on the booking"));
        }
        let names = [
            &booking.customer_name,
            &booking.flight_type,
            &booking.phone,
            &booking.email,
            &booking.booking_source,
            &booking.created_by,
        ];
        if names.iter().any(|s| s.len() > MAX_NAME_LEN)
            || booking.assigned_pilots.iter().any(|s| s.len() > MAX_NAME_LEN)
        {
            return Err(EngineError::LimitExceeded("field too long"));
        }
        if booking.notes.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        if booking.history.len() > MAX_HISTORY_ENTRIES {
            return Err(EngineError::LimitExceeded("history too long"));
        }
        Ok(())
    }

    fn check_time_index(&self, date: NaiveDate, time_index: u32) -> Result<(), EngineError> {
        match self.schedule.time_at(date, time_index) {
            Some(_) => Ok(()),
            None => Err(EngineError::InvalidTimeSlot(format!("{date} #{time_index}"))),
        }
    }

    fn check_time_slot(&self, date: NaiveDate, time_slot: &str) -> Result<(), EngineError> {
        if self.schedule.slots_for(date).iter().any(|s| s == time_slot) {
            Ok(())
        } else {
            Err(EngineError::InvalidTimeSlot(format!("{date} {time_slot}")))
        }
    }

    // ── Email outbox ─────────────────────────────────────────

    pub async fn enqueue_email(&self, request: EmailRequest) -> Result<(), EngineError> {
        if request.to.is_empty() {
            return Err(EngineError::Invalid("email has no recipient"));
        }
        if self.outbox.contains_key(&request.id) {
            return Err(EngineError::AlreadyExists(request.id));
        }
        let _gate = self.snapshot_lock.read().await;
        let event = Event::EmailQueued { request };
        self.persist_and_apply(&mut [], &event).await
    }

    /// Reported by the external mail sender.
    pub async fn set_email_status(&self, id: Ulid, status: EmailStatus) -> Result<(), EngineError> {
        if !self.outbox.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let _gate = self.snapshot_lock.read().await;
        let event = Event::EmailStatusChanged { id, status };
        self.persist_and_apply(&mut [], &event).await
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event list reproducing the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.snapshot_lock.write().await;
        let mut events = Vec::new();

        let mut pilots: Vec<Pilot> = self.pilots.iter().map(|e| e.value().clone()).collect();
        pilots.sort_by(|a, b| a.uid.cmp(&b.uid));
        events.extend(pilots.into_iter().map(|pilot| Event::PilotUpserted { pilot }));

        let mut dates: Vec<NaiveDate> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort();
        for date in dates {
            let Some(day) = self.get_day(date) else {
                continue;
            };
            let guard = day.read().await;
            let mut slots: Vec<AvailabilitySlot> = guard
                .availability
                .iter()
                .flat_map(|(uid, times)| {
                    times.iter().map(move |time| AvailabilitySlot {
                        pilot_uid: uid.clone(),
                        date,
                        time_slot: time.clone(),
                    })
                })
                .collect();
            slots.sort_by(|a, b| {
                (&a.pilot_uid, &a.time_slot).cmp(&(&b.pilot_uid, &b.time_slot))
            });
            events.extend(slots.into_iter().map(|slot| Event::AvailabilityAdded { slot }));
            events.extend(
                guard
                    .bookings
                    .iter()
                    .map(|booking| Event::BookingAdded { booking: booking.clone() }),
            );
        }

        let mut emails: Vec<EmailRequest> = self.outbox.iter().map(|e| e.value().clone()).collect();
        emails.sort_by_key(|r| r.id);
        events.extend(emails.into_iter().map(|request| Event::EmailQueued { request }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
