//! Input bounds enforced at the store and desk boundaries.

pub const MAX_PEOPLE_PER_BOOKING: u32 = 30;
pub const MAX_BOOKINGS_PER_DAY: usize = 2_000;
pub const MAX_PILOTS: usize = 1_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4_096;
pub const MAX_HISTORY_ENTRIES: usize = 1_000;
pub const MAX_TIME_SLOT_LEN: usize = 16;
/// Grid columns a booking may reach, overbooking expansion included.
pub const MAX_GRID_COLUMNS: u32 = 100_000;

/// Amount booked for each assigned pilot when a no-show is still paid.
pub const NO_SHOW_COMPENSATION: i64 = -103;
