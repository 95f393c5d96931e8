//! Booking status transitions and the edits whose side effects keep a booking's
//! seats, pilot assignments and payments consistent.
//!
//! Everything here works on a booking value (usually an edit draft) and never
//! touches the store. Seat invariant kept by every function:
//! `assigned_pilots.len() == number_of_people`.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::error::DeskError;
use crate::limits::*;
use crate::model::*;
use crate::roles::{Actor, Permissions};

/// Answer required when a booking becomes a no-show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoShowDecision {
    /// Assigned pilots keep their flight, booked as a ticket compensation.
    PayPilots,
    /// Pilots are released and nothing is paid.
    DontPay,
}

// ── Permission gates ─────────────────────────────────────────────

/// Non-admins may edit until `grace` after the end of the booking's day.
pub fn edit_deadline(date: NaiveDate, grace: Duration) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::days(1) + grace
}

pub fn check_edit(
    who: &dyn Permissions,
    booking: &Booking,
    now: NaiveDateTime,
    grace: Duration,
) -> Result<(), DeskError> {
    if who.is_privileged() {
        return Ok(());
    }
    if !who.can_edit_booking(&booking.created_by) {
        return Err(DeskError::PermissionDenied("role cannot edit this booking"));
    }
    if now > edit_deadline(booking.date, grace) {
        return Err(DeskError::PermissionDenied("booking is past its edit window"));
    }
    Ok(())
}

/// Status graph: `unconfirmed` is entry-only, `deleted` only leads back to `pending`,
/// every other pair of statuses is reachable.
pub fn check_transition(from: BookingStatus, to: BookingStatus) -> Result<(), DeskError> {
    use BookingStatus::*;
    let allowed = match (from, to) {
        (a, b) if a == b => true,
        (Deleted, Pending) => true,
        (Deleted, Unconfirmed | Confirmed | Cancelled | NoShow) => false,
        (_, Deleted) => true,
        (_, Unconfirmed) => false,
        (
            Unconfirmed | Confirmed | Pending | Cancelled | NoShow,
            Confirmed | Pending | Cancelled | NoShow,
        ) => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(DeskError::InvalidTransition { from, to })
    }
}

pub fn check_status_change(
    who: &dyn Permissions,
    booking: &Booking,
    to: BookingStatus,
    now: NaiveDateTime,
    grace: Duration,
) -> Result<(), DeskError> {
    check_edit(who, booking, now, grace)?;
    let from = booking.booking_status;
    check_transition(from, to)?;
    let deleting = to == BookingStatus::Deleted || from == BookingStatus::Deleted;
    if deleting && from != to && !who.can_delete_booking(&booking.created_by) {
        return Err(DeskError::PermissionDenied("role cannot delete or restore this booking"));
    }
    Ok(())
}

// ── Transitions ──────────────────────────────────────────────────

/// Move a booking to `to`, applying the side effects due right away.
/// Releasing a cancelled booking's pilots is left to [`release_if_cancelled`].
pub fn change_status(
    booking: &mut Booking,
    to: BookingStatus,
    decision: Option<NoShowDecision>,
    user: &str,
    now: NaiveDateTime,
) -> Result<(), DeskError> {
    let from = booking.booking_status;
    check_transition(from, to)?;
    if from == to {
        return Ok(());
    }
    if to == BookingStatus::NoShow {
        let decision = decision.ok_or(DeskError::NoShowDecisionRequired)?;
        apply_no_show(booking, decision);
    }
    booking.booking_status = to;
    let action = match (from, to) {
        (_, BookingStatus::Deleted) => HistoryAction::Deleted,
        (BookingStatus::Deleted, _) => HistoryAction::Restored,
        _ => HistoryAction::StatusChanged,
    };
    record(booking, action, user, now, format!("{from} -> {to}"));
    Ok(())
}

pub fn apply_no_show(booking: &mut Booking, decision: NoShowDecision) {
    match decision {
        NoShowDecision::PayPilots => {
            let payments: Vec<PilotPayment> = booking
                .named_pilots()
                .map(|name| {
                    let receipts = booking
                        .pilot_payments
                        .iter()
                        .find(|p| p.pilot_name == name)
                        .map(|p| p.receipt_files.clone())
                        .unwrap_or_default();
                    PilotPayment {
                        pilot_name: name.to_string(),
                        amount: Some(NO_SHOW_COMPENSATION),
                        payment_method: Some(PaymentMethod::Ticket),
                        receipt_files: receipts,
                    }
                })
                .collect();
            booking.pilot_payments = payments;
        }
        NoShowDecision::DontPay => clear_pilots(booking),
    }
}

/// Session-close side effect: a booking that is still cancelled gives back its pilots.
pub fn release_if_cancelled(booking: &mut Booking) -> bool {
    if booking.booking_status != BookingStatus::Cancelled {
        return false;
    }
    let already_clear =
        booking.named_pilots().next().is_none() && booking.pilot_payments.is_empty();
    clear_pilots(booking);
    !already_clear
}

fn clear_pilots(booking: &mut Booking) {
    booking.assigned_pilots = vec![String::new(); booking.number_of_people as usize];
    booking.pilot_payments.clear();
}

// ── Field edits with side effects ────────────────────────────────

/// Moving to another day or time drops assignments: nobody reserved the new slot
/// for those pilots. Returns whether anything moved.
pub fn reschedule(
    booking: &mut Booking,
    date: NaiveDate,
    time_index: u32,
    user: &str,
    now: NaiveDateTime,
) -> bool {
    if booking.is_at(date, time_index) {
        return false;
    }
    let details = format!(
        "{} #{} -> {} #{}",
        booking.date, booking.time_index, date, time_index
    );
    booking.date = date;
    booking.time_index = time_index;
    clear_pilots(booking);
    record(booking, HistoryAction::Rescheduled, user, now, details);
    true
}

/// Shrinking truncates from the end, growing pads with empty seats; existing
/// seats keep their order.
pub fn resize(
    booking: &mut Booking,
    number_of_people: u32,
    user: &str,
    now: NaiveDateTime,
) -> Result<(), DeskError> {
    validate_headcount(number_of_people)?;
    if booking.number_of_people == number_of_people {
        return Ok(());
    }
    let details = format!("{} -> {}", booking.number_of_people, number_of_people);
    booking.number_of_people = number_of_people;
    booking
        .assigned_pilots
        .resize(number_of_people as usize, String::new());
    sync_payments(booking);
    record(booking, HistoryAction::Resized, user, now, details);
    Ok(())
}

pub fn validate_headcount(number_of_people: u32) -> Result<(), DeskError> {
    if number_of_people == 0 {
        return Err(DeskError::Invalid("a booking needs at least one person".into()));
    }
    if number_of_people > MAX_PEOPLE_PER_BOOKING {
        return Err(DeskError::Invalid(format!(
            "at most {MAX_PEOPLE_PER_BOOKING} people per booking"
        )));
    }
    Ok(())
}

/// Put `pilot` (a display name, `""` to clear) on seat `seat`.
pub fn assign_pilot(
    booking: &mut Booking,
    seat: usize,
    pilot: &str,
    user: &str,
    now: NaiveDateTime,
) -> Result<(), DeskError> {
    if seat >= booking.assigned_pilots.len() {
        return Err(DeskError::Invalid(format!("no seat {seat}")));
    }
    if booking.assigned_pilots[seat] == pilot {
        return Ok(());
    }
    if !pilot.is_empty()
        && booking
            .assigned_pilots
            .iter()
            .enumerate()
            .any(|(i, name)| i != seat && name == pilot)
    {
        return Err(DeskError::Invalid(format!("{pilot} already flies this booking")));
    }
    booking.assigned_pilots[seat] = pilot.to_string();
    sync_payments(booking);
    let details = if pilot.is_empty() {
        format!("seat {seat} cleared")
    } else {
        format!("seat {seat}: {pilot}")
    };
    record(booking, HistoryAction::PilotsAssigned, user, now, details);
    Ok(())
}

pub fn set_payment(
    booking: &mut Booking,
    pilot: &str,
    amount: Option<i64>,
    method: Option<PaymentMethod>,
    user: &str,
    now: NaiveDateTime,
) -> Result<(), DeskError> {
    let entry = booking
        .pilot_payments
        .iter_mut()
        .find(|p| p.pilot_name == pilot)
        .ok_or_else(|| DeskError::Invalid(format!("{pilot} is not assigned to this booking")))?;
    entry.amount = amount;
    entry.payment_method = method;
    record(booking, HistoryAction::PaymentsUpdated, user, now, pilot.to_string());
    Ok(())
}

/// One payment entry per assigned pilot, in seat order: stale entries go,
/// newcomers get an unset entry.
pub fn sync_payments(booking: &mut Booking) {
    let mut previous = std::mem::take(&mut booking.pilot_payments);
    let synced: Vec<PilotPayment> = booking
        .named_pilots()
        .map(|name| match previous.iter().position(|p| p.pilot_name == name) {
            Some(pos) => previous.swap_remove(pos),
            None => PilotPayment::unset(name),
        })
        .collect();
    booking.pilot_payments = synced;
}

/// Append a history entry. Past `MAX_HISTORY_ENTRIES` the oldest entries after
/// the creation record are dropped.
pub fn record(
    booking: &mut Booking,
    action: HistoryAction,
    user: &str,
    now: NaiveDateTime,
    details: impl Into<String>,
) {
    booking.history.push(HistoryEntry {
        action,
        user_name: user.to_string(),
        timestamp: now,
        details: details.into(),
    });
    let excess = booking.history.len().saturating_sub(MAX_HISTORY_ENTRIES);
    if excess > 0 {
        booking.history.drain(1..1 + excess);
    }
}

/// A fresh, unconfirmed booking with every seat unfilled.
pub fn new_booking(
    id: Ulid,
    input: NewBooking,
    actor: &Actor,
    now: NaiveDateTime,
    pilot_index: u32,
) -> Booking {
    let source = input
        .booking_source
        .unwrap_or_else(|| actor.default_booking_source());
    let mut booking = Booking {
        id,
        date: input.date,
        time_index: input.time_index,
        pilot_index,
        number_of_people: input.number_of_people,
        assigned_pilots: vec![String::new(); input.number_of_people as usize],
        booking_status: BookingStatus::Unconfirmed,
        pilot_payments: Vec::new(),
        female_pilots_required: input.female_pilots_required,
        commission: input.commission,
        commission_status: CommissionStatus::Unpaid,
        flight_type: input.flight_type,
        customer_name: input.customer_name,
        phone: input.phone,
        email: input.email,
        notes: input.notes,
        booking_source: source,
        created_by: actor.user_id.clone(),
        history: Vec::new(),
    };
    let details = format!("{} people", booking.number_of_people);
    record(&mut booking, HistoryAction::Created, &actor.user_name, now, details);
    booking
}

/// Seat count, assignment list and payment entries agree.
pub fn is_consistent(booking: &Booking) -> bool {
    booking.assigned_pilots.len() == booking.number_of_people as usize
        && booking
            .pilot_payments
            .iter()
            .all(|p| booking.named_pilots().any(|name| name == p.pilot_name))
}
