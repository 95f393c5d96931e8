use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::*;

/// Sparse update for a booking: only the fields that changed are `Some`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPatch {
    pub date: Option<NaiveDate>,
    pub time_index: Option<u32>,
    pub pilot_index: Option<u32>,
    pub number_of_people: Option<u32>,
    pub assigned_pilots: Option<Vec<String>>,
    pub booking_status: Option<BookingStatus>,
    pub pilot_payments: Option<Vec<PilotPayment>>,
    pub female_pilots_required: Option<u32>,
    pub commission: Option<Option<i64>>,
    pub commission_status: Option<CommissionStatus>,
    pub flight_type: Option<String>,
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub booking_source: Option<String>,
    pub history: Option<Vec<HistoryEntry>>,
}

fn changed<T: PartialEq + Clone>(before: &T, after: &T) -> Option<T> {
    (before != after).then(|| after.clone())
}

impl BookingPatch {
    /// Field-by-field value comparison of `draft` against the last persisted snapshot.
    pub fn diff(persisted: &Booking, draft: &Booking) -> Self {
        Self {
            date: changed(&persisted.date, &draft.date),
            time_index: changed(&persisted.time_index, &draft.time_index),
            pilot_index: changed(&persisted.pilot_index, &draft.pilot_index),
            number_of_people: changed(&persisted.number_of_people, &draft.number_of_people),
            assigned_pilots: changed(&persisted.assigned_pilots, &draft.assigned_pilots),
            booking_status: changed(&persisted.booking_status, &draft.booking_status),
            pilot_payments: changed(&persisted.pilot_payments, &draft.pilot_payments),
            female_pilots_required: changed(
                &persisted.female_pilots_required,
                &draft.female_pilots_required,
            ),
            commission: changed(&persisted.commission, &draft.commission),
            commission_status: changed(&persisted.commission_status, &draft.commission_status),
            flight_type: changed(&persisted.flight_type, &draft.flight_type),
            customer_name: changed(&persisted.customer_name, &draft.customer_name),
            phone: changed(&persisted.phone, &draft.phone),
            email: changed(&persisted.email, &draft.email),
            notes: changed(&persisted.notes, &draft.notes),
            booking_source: changed(&persisted.booking_source, &draft.booking_source),
            history: changed(&persisted.history, &draft.history),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, booking: &mut Booking) {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = &self.$field {
                    booking.$field = v.clone();
                })*
            };
        }
        set!(
            date,
            time_index,
            pilot_index,
            number_of_people,
            assigned_pilots,
            booking_status,
            pilot_payments,
            female_pilots_required,
            commission,
            commission_status,
            flight_type,
            customer_name,
            phone,
            email,
            notes,
            booking_source,
            history,
        );
    }
}
