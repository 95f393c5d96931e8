use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open range of grid columns `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Columns {
    pub start: u32,
    pub len: u32,
}

impl Columns {
    pub fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.len)
    }

    pub fn overlaps(&self, other: &Columns) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    pub fn contains(&self, column: u32) -> bool {
        self.start <= column && column < self.end()
    }

    pub fn iter(&self) -> std::ops::Range<u32> {
        self.start..self.end()
    }
}

/// A tandem pilot. Availability is keyed by `uid`, seat assignment by `display_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pilot {
    pub uid: String,
    pub display_name: String,
    pub female_pilot: bool,
}

/// A pilot is available at `(date, time_slot)` iff this record exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub pilot_uid: String,
    pub date: NaiveDate,
    pub time_slot: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Unconfirmed,
    Confirmed,
    Pending,
    Cancelled,
    #[serde(rename = "no show")]
    NoShow,
    Deleted,
}

impl BookingStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfirmed => "unconfirmed",
            Self::Confirmed => "confirmed",
            Self::Pending => "pending",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no show",
            Self::Deleted => "deleted",
        }
    }

    /// Cancelled and deleted bookings release their seats.
    pub const fn holds_seats(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Deleted)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Ticket,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PilotPayment {
    pub pilot_name: String,
    pub amount: Option<i64>,
    pub payment_method: Option<PaymentMethod>,
    pub receipt_files: Vec<String>,
}

impl PilotPayment {
    /// Entry for a newly assigned pilot: nothing paid yet.
    pub fn unset(pilot_name: impl Into<String>) -> Self {
        Self {
            pilot_name: pilot_name.into(),
            amount: None,
            payment_method: None,
            receipt_files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommissionStatus {
    #[default]
    Unpaid,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryAction {
    Created,
    Updated,
    StatusChanged,
    Rescheduled,
    Resized,
    PilotsAssigned,
    PaymentsUpdated,
    Deleted,
    Restored,
    ConfirmationRequested,
}

/// Append-only audit line on a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub user_name: String,
    pub timestamp: NaiveDateTime,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub date: NaiveDate,
    /// Ordinal into the day's time-slot list.
    pub time_index: u32,
    /// Leftmost occupied grid column.
    pub pilot_index: u32,
    /// Also the span: number of contiguous columns occupied.
    pub number_of_people: u32,
    /// One entry per seat; `""` is an unfilled seat.
    pub assigned_pilots: Vec<String>,
    pub booking_status: BookingStatus,
    pub pilot_payments: Vec<PilotPayment>,
    pub female_pilots_required: u32,
    pub commission: Option<i64>,
    pub commission_status: CommissionStatus,
    pub flight_type: String,
    pub customer_name: String,
    pub phone: String,
    pub email: String,
    pub notes: String,
    pub booking_source: String,
    pub created_by: String,
    pub history: Vec<HistoryEntry>,
}

impl Booking {
    pub fn columns(&self) -> Columns {
        Columns::new(self.pilot_index, self.number_of_people)
    }

    pub fn holds_seats(&self) -> bool {
        self.booking_status.holds_seats()
    }

    pub fn is_at(&self, date: NaiveDate, time_index: u32) -> bool {
        self.date == date && self.time_index == time_index
    }

    /// Names of the pilots actually assigned, in seat order.
    pub fn named_pilots(&self) -> impl Iterator<Item = &str> {
        self.assigned_pilots
            .iter()
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

/// Fields supplied by a staff or public submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub date: NaiveDate,
    pub time_index: u32,
    pub number_of_people: u32,
    pub female_pilots_required: u32,
    pub commission: Option<i64>,
    pub flight_type: String,
    pub customer_name: String,
    pub phone: String,
    pub email: String,
    pub notes: String,
    /// Defaults by role when `None`.
    pub booking_source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailKind {
    BookingConfirmation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailStatus {
    Pending,
    Sent,
    Failed(String),
}

/// Outbound queue record consumed by the external mail sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRequest {
    pub id: Ulid,
    pub kind: EmailKind,
    pub to: String,
    pub booking_id: Ulid,
    pub customer_name: String,
    pub date: NaiveDate,
    pub time: String,
    pub number_of_people: u32,
    pub status: EmailStatus,
}

/// The store change records, flat with no nesting. This is the WAL record format
/// and the payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PilotUpserted { pilot: Pilot },
    PilotRemoved { uid: String },
    AvailabilityAdded { slot: AvailabilitySlot },
    AvailabilityRemoved { slot: AvailabilitySlot },
    BookingAdded { booking: Booking },
    /// Full post-image; `previous_date` differs from `booking.date` on a move.
    BookingUpdated { booking: Booking, previous_date: NaiveDate },
    EmailQueued { request: EmailRequest },
    EmailStatusChanged { id: Ulid, status: EmailStatus },
}

impl Event {
    /// Topics a change is published on.
    pub fn topics(&self) -> Vec<Topic> {
        match self {
            Event::PilotUpserted { .. } | Event::PilotRemoved { .. } => vec![Topic::Roster],
            Event::AvailabilityAdded { slot } | Event::AvailabilityRemoved { slot } => {
                vec![Topic::Day(slot.date)]
            }
            Event::BookingAdded { booking } => vec![Topic::Day(booking.date)],
            Event::BookingUpdated { booking, previous_date } => {
                if *previous_date == booking.date {
                    vec![Topic::Day(booking.date)]
                } else {
                    vec![Topic::Day(*previous_date), Topic::Day(booking.date)]
                }
            }
            Event::EmailQueued { .. } | Event::EmailStatusChanged { .. } => vec![Topic::Outbox],
        }
    }
}

/// Subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Day(NaiveDate),
    Roster,
    Outbox,
}

/// Everything the store knows about one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayState {
    pub date: NaiveDate,
    /// Pilot uid → time slots that pilot flies this day.
    pub availability: HashMap<String, BTreeSet<String>>,
    /// Sorted by `(time_index, pilot_index)`.
    pub bookings: Vec<Booking>,
}

impl DayState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            availability: HashMap::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by `(time_index, pilot_index)`.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.time_index, booking.pilot_index);
        let pos = self
            .bookings
            .binary_search_by_key(&key, |b| (b.time_index, b.pilot_index))
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings at one time slot, via binary search on the sort key.
    pub fn at_slot(&self, time_index: u32) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.time_index < time_index);
        let hi = self.bookings.partition_point(|b| b.time_index <= time_index);
        &self.bookings[lo..hi]
    }

    pub fn add_availability(&mut self, pilot_uid: &str, time_slot: &str) -> bool {
        self.availability
            .entry(pilot_uid.to_string())
            .or_default()
            .insert(time_slot.to_string())
    }

    pub fn remove_availability(&mut self, pilot_uid: &str, time_slot: &str) -> bool {
        let Some(slots) = self.availability.get_mut(pilot_uid) else {
            return false;
        };
        let removed = slots.remove(time_slot);
        if slots.is_empty() {
            self.availability.remove(pilot_uid);
        }
        removed
    }

    pub fn is_available(&self, pilot_uid: &str, time_slot: &str) -> bool {
        self.availability
            .get(pilot_uid)
            .is_some_and(|slots| slots.contains(time_slot))
    }

    /// Available at any time slot of this day.
    pub fn flies_today(&self, pilot_uid: &str) -> bool {
        self.availability.contains_key(pilot_uid)
    }

    /// Apply a store change to this day. Changes for other days are ignored,
    /// except that a booking moving away is removed.
    pub fn absorb(&mut self, event: &Event) {
        match event {
            Event::AvailabilityAdded { slot } if slot.date == self.date => {
                self.add_availability(&slot.pilot_uid, &slot.time_slot);
            }
            Event::AvailabilityRemoved { slot } if slot.date == self.date => {
                self.remove_availability(&slot.pilot_uid, &slot.time_slot);
            }
            Event::BookingAdded { booking } if booking.date == self.date => {
                self.remove_booking(booking.id);
                self.insert_booking(booking.clone());
            }
            Event::BookingUpdated { booking, previous_date } => {
                if *previous_date == self.date || booking.date == self.date {
                    self.remove_booking(booking.id);
                }
                if booking.date == self.date {
                    self.insert_booking(booking.clone());
                }
            }
            _ => {}
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Capacity figures for one time slot of a day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCapacity {
    pub time_index: u32,
    pub time: String,
    pub pilots: u32,
    pub booked: u32,
    pub available: u32,
    pub female_available: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 14).unwrap()
    }

    #[test]
    fn columns_basics() {
        let c = Columns::new(2, 3);
        assert_eq!(c.end(), 5);
        assert!(c.contains(2));
        assert!(c.contains(4));
        assert!(!c.contains(5)); // half-open
        assert_eq!(c.iter().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn columns_overlap() {
        let a = Columns::new(0, 2);
        let b = Columns::new(1, 2);
        let c = Columns::new(2, 2);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn zero_width_overlaps_nothing() {
        let empty = Columns::new(1, 0);
        assert!(!empty.overlaps(&Columns::new(0, 3)));
    }

    #[test]
    fn status_seat_holding() {
        assert!(BookingStatus::Unconfirmed.holds_seats());
        assert!(BookingStatus::NoShow.holds_seats());
        assert!(!BookingStatus::Cancelled.holds_seats());
        assert!(!BookingStatus::Deleted.holds_seats());
        assert_eq!(BookingStatus::NoShow.to_string(), "no show");
    }

    #[test]
    fn status_serializes_with_space() {
        let json = serde_json::to_string(&BookingStatus::NoShow).unwrap();
        assert_eq!(json, "\"no show\"");
    }

    #[test]
    fn moved_booking_publishes_on_both_days() {
        let booking = crate::lifecycle::tests::booking_fixture(date(), 0, 2);
        let event = Event::BookingUpdated {
            previous_date: date().pred_opt().unwrap(),
            booking,
        };
        assert_eq!(
            event.topics(),
            vec![Topic::Day(date().pred_opt().unwrap()), Topic::Day(date())]
        );
    }

    #[test]
    fn day_bookings_sorted_by_slot_then_column() {
        use crate::lifecycle::tests::booking_fixture;
        let mut day = DayState::new(date());
        let mut a = booking_fixture(date(), 2, 1);
        a.pilot_index = 3;
        let mut b = booking_fixture(date(), 0, 2);
        b.pilot_index = 1;
        let c = booking_fixture(date(), 2, 1);
        day.insert_booking(a.clone());
        day.insert_booking(b.clone());
        day.insert_booking(c.clone());

        let order: Vec<Ulid> = day.bookings.iter().map(|b| b.id).collect();
        assert_eq!(order, vec![b.id, c.id, a.id]);
        assert_eq!(day.at_slot(2).len(), 2);
        assert_eq!(day.at_slot(1).len(), 0);
        assert_eq!(day.at_slot(0)[0].id, b.id);
    }

    #[test]
    fn availability_add_remove() {
        let mut day = DayState::new(date());
        assert!(day.add_availability("p1", "09:30"));
        assert!(!day.add_availability("p1", "09:30")); // already present
        assert!(day.is_available("p1", "09:30"));
        assert!(!day.is_available("p1", "11:00"));
        assert!(day.flies_today("p1"));
        assert!(day.remove_availability("p1", "09:30"));
        assert!(!day.flies_today("p1"));
        assert!(!day.remove_availability("p1", "09:30"));
    }

    #[test]
    fn absorb_moves_booking_between_days() {
        use crate::lifecycle::tests::booking_fixture;
        let tomorrow = date().succ_opt().unwrap();
        let mut today_state = DayState::new(date());
        let mut tomorrow_state = DayState::new(tomorrow);

        let booking = booking_fixture(date(), 0, 1);
        today_state.absorb(&Event::BookingAdded { booking: booking.clone() });
        tomorrow_state.absorb(&Event::BookingAdded { booking: booking.clone() });
        assert_eq!(today_state.bookings.len(), 1);
        assert!(tomorrow_state.bookings.is_empty());

        let mut moved = booking.clone();
        moved.date = tomorrow;
        let event = Event::BookingUpdated {
            booking: moved,
            previous_date: date(),
        };
        today_state.absorb(&event);
        tomorrow_state.absorb(&event);
        assert!(today_state.bookings.is_empty());
        assert_eq!(tomorrow_state.bookings.len(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AvailabilityAdded {
            slot: AvailabilitySlot {
                pilot_uid: "p1".into(),
                date: date(),
                time_slot: "09:30".into(),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
