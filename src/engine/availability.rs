use std::collections::{HashMap, HashSet};

use ulid::Ulid;

use crate::model::*;

// ── Availability index ───────────────────────────────────────────

/// A grid column's backing pilot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub uid: String,
    pub display_name: String,
    pub female_pilot: bool,
}

/// Grid columns for a day: every pilot with at least one availability record
/// that day, ordered by display name then uid. Column `i` is `roster[i]`.
/// A uid missing from the directory is shown under its uid.
pub fn day_roster(day: &DayState, pilots: &[Pilot]) -> Vec<RosterEntry> {
    let directory: HashMap<&str, &Pilot> = pilots.iter().map(|p| (p.uid.as_str(), p)).collect();
    let mut roster: Vec<RosterEntry> = day
        .availability
        .keys()
        .map(|uid| match directory.get(uid.as_str()) {
            Some(p) => RosterEntry {
                uid: uid.clone(),
                display_name: p.display_name.clone(),
                female_pilot: p.female_pilot,
            },
            None => RosterEntry {
                uid: uid.clone(),
                display_name: uid.clone(),
                female_pilot: false,
            },
        })
        .collect();
    roster.sort_by(|a, b| {
        a.display_name
            .cmp(&b.display_name)
            .then_with(|| a.uid.cmp(&b.uid))
    });
    roster
}

/// Seat-holding bookings at a slot, minus the excluded one.
fn counted<'a>(
    day: &'a DayState,
    time_index: u32,
    exclude: Option<Ulid>,
) -> impl Iterator<Item = &'a Booking> {
    day.at_slot(time_index)
        .iter()
        .filter(move |b| b.holds_seats() && Some(b.id) != exclude)
}

// ── Capacity calculator ──────────────────────────────────────────

/// Pooled seats left at a slot: pilots available at `time_slot` minus seats
/// reserved by other live bookings at `time_index`. Never negative.
pub fn available_slots(
    day: &DayState,
    time_slot: &str,
    time_index: u32,
    exclude: Option<Ulid>,
) -> u32 {
    let total = day
        .availability
        .values()
        .filter(|slots| slots.contains(time_slot))
        .count() as u32;
    let booked: u32 = counted(day, time_index, exclude)
        .map(|b| b.number_of_people)
        .sum();
    total.saturating_sub(booked)
}

/// Female pilots available at the slot minus the distinct female pilots named
/// on a booking there, whether or not they fly that slot. Counts people, not
/// seats.
pub fn available_female_slots(
    day: &DayState,
    pilots: &[Pilot],
    time_slot: &str,
    time_index: u32,
    exclude: Option<Ulid>,
) -> u32 {
    let available = pilots
        .iter()
        .filter(|p| p.female_pilot && day.is_available(&p.uid, time_slot))
        .count() as u32;
    let names: HashSet<&str> = pilots
        .iter()
        .filter(|p| p.female_pilot)
        .map(|p| p.display_name.as_str())
        .collect();
    let assigned: HashSet<&str> = counted(day, time_index, exclude)
        .flat_map(|b| b.named_pilots())
        .filter(|name| names.contains(name))
        .collect();
    available.saturating_sub(assigned.len() as u32)
}

/// Capacity for every slot of the day in one pass over availability and bookings.
pub fn day_capacity(day: &DayState, pilots: &[Pilot], slots: &[String]) -> Vec<SlotCapacity> {
    let n = slots.len();
    let slot_pos: HashMap<&str, usize> = slots
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    let directory: HashMap<&str, &Pilot> = pilots.iter().map(|p| (p.uid.as_str(), p)).collect();
    let female_names: HashSet<&str> = pilots
        .iter()
        .filter(|p| p.female_pilot)
        .map(|p| p.display_name.as_str())
        .collect();

    let mut pilot_count = vec![0u32; n];
    let mut female_count = vec![0u32; n];
    for (uid, flown) in &day.availability {
        let is_female = directory.get(uid.as_str()).is_some_and(|p| p.female_pilot);
        for slot in flown {
            if let Some(&i) = slot_pos.get(slot.as_str()) {
                pilot_count[i] += 1;
                if is_female {
                    female_count[i] += 1;
                }
            }
        }
    }

    let mut booked = vec![0u32; n];
    let mut female_assigned: Vec<HashSet<&str>> = vec![HashSet::new(); n];
    for b in day.bookings.iter().filter(|b| b.holds_seats()) {
        let i = b.time_index as usize;
        if i >= n {
            continue;
        }
        booked[i] += b.number_of_people;
        female_assigned[i].extend(b.named_pilots().filter(|name| female_names.contains(name)));
    }

    slots
        .iter()
        .enumerate()
        .map(|(i, time)| SlotCapacity {
            time_index: i as u32,
            time: time.clone(),
            pilots: pilot_count[i],
            booked: booked[i],
            available: pilot_count[i].saturating_sub(booked[i]),
            female_available: female_count[i].saturating_sub(female_assigned[i].len() as u32),
        })
        .collect()
}
