use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::*;
use crate::patch::BookingPatch;
use crate::store::{Store, StoreError};

use super::{Engine, EngineError};

impl From<EngineError> for StoreError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(id) => StoreError::NotFound(id),
            EngineError::WalError(msg) => StoreError::Unavailable(msg),
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

#[async_trait]
impl Store for Engine {
    async fn booking(&self, id: Ulid) -> Result<Booking, StoreError> {
        Ok(self.get_booking(id).await?)
    }

    async fn day(&self, date: NaiveDate) -> Result<DayState, StoreError> {
        Ok(self.day_snapshot(date).await)
    }

    async fn pilots(&self) -> Result<Vec<Pilot>, StoreError> {
        Ok(self.list_pilots())
    }

    async fn add_booking(&self, booking: Booking) -> Result<(), StoreError> {
        Ok(Engine::add_booking(self, booking).await?)
    }

    async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, StoreError> {
        Ok(Engine::update_booking(self, id, patch).await?)
    }

    async fn enqueue_email(&self, request: EmailRequest) -> Result<(), StoreError> {
        Ok(Engine::enqueue_email(self, request).await?)
    }

    async fn email(&self, id: Ulid) -> Result<EmailRequest, StoreError> {
        Ok(Engine::email(self, id)?)
    }

    async fn mark_email(&self, id: Ulid, status: EmailStatus) -> Result<(), StoreError> {
        Ok(self.set_email_status(id, status).await?)
    }

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.notify.subscribe(topic)
    }
}
