use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::day_capacity;
use super::{Engine, EngineError, MOVE_RETRIES};

impl Engine {
    pub fn booking_date(&self, id: Ulid) -> Result<NaiveDate, EngineError> {
        self.booking_dates
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        for _ in 0..MOVE_RETRIES {
            let date = self.booking_date(id)?;
            let Some(day) = self.get_day(date) else {
                continue;
            };
            let guard = day.read().await;
            if let Some(booking) = guard.booking(id) {
                return Ok(booking.clone());
            }
        }
        Err(EngineError::NotFound(id))
    }

    /// Copy of a day's availability and bookings. Unknown days are empty.
    pub async fn day_snapshot(&self, date: NaiveDate) -> DayState {
        match self.get_day(date) {
            Some(day) => day.read().await.clone(),
            None => DayState::new(date),
        }
    }

    /// Pilot directory ordered by display name, then uid.
    pub fn list_pilots(&self) -> Vec<Pilot> {
        let mut pilots: Vec<Pilot> = self.pilots.iter().map(|e| e.value().clone()).collect();
        pilots.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.uid.cmp(&b.uid))
        });
        pilots
    }

    pub fn pilot(&self, uid: &str) -> Option<Pilot> {
        self.pilots.get(uid).map(|e| e.value().clone())
    }

    pub fn email(&self, id: Ulid) -> Result<EmailRequest, EngineError> {
        self.outbox
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Outbox entries the mail sender has not reported on yet, oldest first.
    pub fn pending_emails(&self) -> Vec<EmailRequest> {
        let mut pending: Vec<EmailRequest> = self
            .outbox
            .iter()
            .filter(|e| e.value().status == EmailStatus::Pending)
            .map(|e| e.value().clone())
            .collect();
        pending.sort_by_key(|r| r.id);
        pending
    }

    /// Capacity of every time slot of `date` under the engine's schedule.
    pub async fn capacity(&self, date: NaiveDate) -> Vec<SlotCapacity> {
        let day = self.day_snapshot(date).await;
        day_capacity(&day, &self.list_pilots(), self.schedule.slots_for(date))
    }

    pub fn booking_count(&self) -> usize {
        self.booking_dates.len()
    }

    pub fn day_count(&self) -> usize {
        self.days.len()
    }
}
