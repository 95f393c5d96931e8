//! The document store the booking core runs against.
//!
//! Reads return snapshots; writes are last-write-wins per field; changes are
//! pushed to subscribers per [`Topic`]. Nothing here locks a slot across
//! clients: two writers that both passed a capacity check can both succeed.

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::*;
use crate::patch::BookingPatch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(Ulid),
    /// The store refused the write (bounds, duplicates).
    Rejected(String),
    /// Transient backing-store failure; the write did not happen.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::Rejected(msg) => write!(f, "rejected: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait Store: Send + Sync {
    async fn booking(&self, id: Ulid) -> Result<Booking, StoreError>;

    /// Availability records and bookings of one day.
    async fn day(&self, date: NaiveDate) -> Result<DayState, StoreError>;

    async fn pilots(&self) -> Result<Vec<Pilot>, StoreError>;

    async fn add_booking(&self, booking: Booking) -> Result<(), StoreError>;

    /// Apply a sparse update, returning the stored result.
    async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, StoreError>;

    async fn enqueue_email(&self, request: EmailRequest) -> Result<(), StoreError>;

    async fn email(&self, id: Ulid) -> Result<EmailRequest, StoreError>;

    /// Delivery outcome, written by the external mail sender.
    async fn mark_email(&self, id: Ulid, status: EmailStatus) -> Result<(), StoreError>;

    /// Changes published after this call. Slow receivers may lag and must refetch.
    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event>;

    async fn is_available(
        &self,
        pilot_uid: &str,
        date: NaiveDate,
        time_slot: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.day(date).await?.is_available(pilot_uid, time_slot))
    }

    /// Bookings of a day that match `predicate`.
    async fn query_bookings(
        &self,
        date: NaiveDate,
        predicate: &(dyn for<'b> Fn(&'b Booking) -> bool + Sync),
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .day(date)
            .await?
            .bookings
            .into_iter()
            .filter(|b| predicate(b))
            .collect())
    }
}
