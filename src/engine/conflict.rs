use std::collections::BTreeSet;

use ulid::Ulid;

use crate::model::*;

use super::availability::RosterEntry;

/// Where a booking lands on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Every column of the span has a free, available pilot behind it.
    Fits(u32),
    /// Starts on the leftmost free available column; part of the span runs onto
    /// columns without a free pilot, but onto no other booking.
    Spills(u32),
    /// No clear run anywhere: starts on the leftmost free available column
    /// and shares columns with another booking.
    Overlaps(u32),
    /// Overbooking: one column past the right-most occupied column.
    Expanded(u32),
}

impl Placement {
    pub fn column(&self) -> u32 {
        match self {
            Placement::Fits(c)
            | Placement::Spills(c)
            | Placement::Overlaps(c)
            | Placement::Expanded(c) => *c,
        }
    }

    pub fn is_expansion(&self) -> bool {
        matches!(self, Placement::Expanded(_))
    }
}

/// Columns claimed by seat-holding bookings at the slot, minus the excluded one.
pub fn occupied_columns(day: &DayState, time_index: u32, exclude: Option<Ulid>) -> BTreeSet<u32> {
    day.at_slot(time_index)
        .iter()
        .filter(|b| b.holds_seats() && Some(b.id) != exclude)
        .flat_map(|b| b.columns().iter())
        .collect()
}

/// Columns whose backing pilot flies `time_slot`.
pub fn available_columns(day: &DayState, roster: &[RosterEntry], time_slot: &str) -> BTreeSet<u32> {
    roster
        .iter()
        .enumerate()
        .filter(|(_, p)| day.is_available(&p.uid, time_slot))
        .map(|(i, _)| i as u32)
        .collect()
}

/// Leftmost landing column for a booking of `span` seats.
///
/// Candidates are available and unoccupied columns, scanned left to right, so
/// the result depends only on state and never on iteration order. Any
/// candidate at all yields a placement; with none left, only a privileged
/// caller gets one, past the occupied maximum.
pub fn place(
    day: &DayState,
    roster: &[RosterEntry],
    time_slot: &str,
    time_index: u32,
    span: u32,
    exclude: Option<Ulid>,
    privileged: bool,
) -> Option<Placement> {
    let occupied = occupied_columns(day, time_index, exclude);
    let candidates: BTreeSet<u32> = available_columns(day, roster, time_slot)
        .difference(&occupied)
        .copied()
        .collect();

    let fits = |start: u32| Columns::new(start, span).iter().all(|c| candidates.contains(&c));
    if let Some(&start) = candidates.iter().find(|&&c| fits(c)) {
        return Some(Placement::Fits(start));
    }

    let clear = |start: u32| Columns::new(start, span).iter().all(|c| !occupied.contains(&c));
    if let Some(&start) = candidates.iter().find(|&&c| clear(c)) {
        return Some(Placement::Spills(start));
    }

    if let Some(&first) = candidates.first() {
        return Some(Placement::Overlaps(first));
    }

    if privileged {
        let next = occupied.last().map_or(0, |&max| max.saturating_add(1));
        return Some(Placement::Expanded(next));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::availability::day_roster;
    use crate::lifecycle::tests::booking_fixture;
    use chrono::NaiveDate;

    const SLOT: &str = "09:00";

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 14).unwrap()
    }

    fn pilots(n: usize) -> Vec<Pilot> {
        (0..n)
            .map(|i| Pilot {
                uid: format!("uid{i}"),
                display_name: format!("Pilot {i}"),
                female_pilot: false,
            })
            .collect()
    }

    /// Day where pilots `0..n` fly SLOT; returns the state and its roster.
    fn setup(n: usize) -> (DayState, Vec<RosterEntry>) {
        let ps = pilots(n);
        let mut ds = DayState::new(day());
        for p in &ps {
            ds.add_availability(&p.uid, SLOT);
        }
        let roster = day_roster(&ds, &ps);
        (ds, roster)
    }

    fn booked_at(column: u32, span: u32) -> Booking {
        let mut b = booking_fixture(day(), 0, span);
        b.pilot_index = column;
        b
    }

    #[test]
    fn empty_grid_places_at_zero() {
        let (ds, roster) = setup(3);
        assert_eq!(place(&ds, &roster, SLOT, 0, 2, None, false), Some(Placement::Fits(0)));
    }

    #[test]
    fn leftmost_gap_wins() {
        let (mut ds, roster) = setup(5);
        ds.insert_booking(booked_at(0, 1));
        ds.insert_booking(booked_at(3, 1));
        assert_eq!(place(&ds, &roster, SLOT, 0, 1, None, false), Some(Placement::Fits(1)));
        assert_eq!(place(&ds, &roster, SLOT, 0, 2, None, false), Some(Placement::Fits(1)));
    }

    #[test]
    fn skips_gap_too_narrow_for_span() {
        let (mut ds, roster) = setup(6);
        ds.insert_booking(booked_at(0, 1));
        ds.insert_booking(booked_at(2, 1));
        assert_eq!(place(&ds, &roster, SLOT, 0, 2, None, false), Some(Placement::Fits(3)));
    }

    #[test]
    fn unavailable_pilot_column_is_skipped() {
        let (mut ds, roster) = setup(3);
        ds.remove_availability("uid0", SLOT);
        ds.add_availability("uid0", "10:15"); // still on today's roster
        let roster_now = day_roster(&ds, &pilots(3));
        assert_eq!(roster_now.len(), roster.len());
        assert_eq!(place(&ds, &roster_now, SLOT, 0, 1, None, false), Some(Placement::Fits(1)));
    }

    #[test]
    fn spill_when_no_contiguous_run() {
        let (mut ds, roster) = setup(3);
        ds.insert_booking(booked_at(0, 2));
        // One free pilot at column 2; two seats run onto column 3.
        assert_eq!(place(&ds, &roster, SLOT, 0, 2, None, true), Some(Placement::Spills(2)));
    }

    #[test]
    fn scattered_gaps_still_place_leftmost() {
        let (mut ds, roster) = setup(4);
        ds.insert_booking(booked_at(1, 1));
        ds.insert_booking(booked_at(3, 1));
        // Columns 0 and 2 are free but no two-wide run is clear.
        assert_eq!(place(&ds, &roster, SLOT, 0, 2, None, false), Some(Placement::Overlaps(0)));
        assert_eq!(place(&ds, &roster, SLOT, 0, 2, None, true), Some(Placement::Overlaps(0)));
    }

    #[test]
    fn full_grid_refused_without_privilege() {
        let (mut ds, roster) = setup(2);
        ds.insert_booking(booked_at(0, 2));
        assert_eq!(place(&ds, &roster, SLOT, 0, 1, None, false), None);
    }

    #[test]
    fn full_grid_expands_for_admin() {
        let (mut ds, roster) = setup(2);
        ds.insert_booking(booked_at(0, 2));
        assert_eq!(place(&ds, &roster, SLOT, 0, 2, None, true), Some(Placement::Expanded(2)));
    }

    #[test]
    fn expansion_goes_past_occupied_maximum() {
        let (mut ds, roster) = setup(2);
        ds.insert_booking(booked_at(0, 2));
        ds.insert_booking(booked_at(2, 3)); // earlier overbooking
        assert_eq!(place(&ds, &roster, SLOT, 0, 1, None, true), Some(Placement::Expanded(5)));
    }

    #[test]
    fn excluded_booking_frees_its_columns() {
        let (mut ds, roster) = setup(2);
        let own = booked_at(0, 2);
        let own_id = own.id;
        ds.insert_booking(own);
        assert_eq!(
            place(&ds, &roster, SLOT, 0, 2, Some(own_id), false),
            Some(Placement::Fits(0))
        );
    }

    #[test]
    fn cancelled_booking_does_not_occupy() {
        let (mut ds, roster) = setup(2);
        let mut gone = booked_at(0, 2);
        gone.booking_status = BookingStatus::Cancelled;
        ds.insert_booking(gone);
        assert_eq!(place(&ds, &roster, SLOT, 0, 2, None, false), Some(Placement::Fits(0)));
    }

    #[test]
    fn placement_is_deterministic() {
        let (mut ds, roster) = setup(8);
        ds.insert_booking(booked_at(1, 2));
        ds.insert_booking(booked_at(5, 1));
        let first = place(&ds, &roster, SLOT, 0, 2, None, false);
        let second = place(&ds, &roster, SLOT, 0, 2, None, false);
        assert_eq!(first, second);
        assert_eq!(first, Some(Placement::Fits(3)));
    }

    #[test]
    fn no_pilots_admin_starts_at_zero() {
        let ds = DayState::new(day());
        assert_eq!(place(&ds, &[], SLOT, 0, 1, None, true), Some(Placement::Expanded(0)));
        assert_eq!(place(&ds, &[], SLOT, 0, 1, None, false), None);
    }
}
