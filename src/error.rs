use ulid::Ulid;

use crate::model::BookingStatus;
use crate::store::StoreError;

/// Everything a booking operation can be refused with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeskError {
    /// Requested headcount exceeds the seats left at the target slot.
    CapacityExceeded { requested: u32, available: u32 },
    /// Enough seats when the editor looked (`seen`), not any more at save time.
    StaleAvailability { requested: u32, available: u32, seen: u32 },
    PermissionDenied(&'static str),
    StoreUnavailable(String),
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    /// Marking a booking "no show" needs the pay / don't-pay answer.
    NoShowDecisionRequired,
    EditSessionActive,
    NoEditSession,
    NotFound(Ulid),
    Invalid(String),
}

impl std::fmt::Display for DeskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeskError::CapacityExceeded { requested, available } => {
                write!(f, "capacity exceeded: {requested} requested, {available} available")
            }
            DeskError::StaleAvailability { requested, available, seen } => write!(
                f,
                "availability changed: {requested} requested, {available} available now ({seen} when opened)"
            ),
            DeskError::PermissionDenied(why) => write!(f, "permission denied: {why}"),
            DeskError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
            DeskError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            DeskError::NoShowDecisionRequired => {
                write!(f, "no show requires a decision on paying assigned pilots")
            }
            DeskError::EditSessionActive => write!(f, "an edit session is already open"),
            DeskError::NoEditSession => write!(f, "no edit session is open"),
            DeskError::NotFound(id) => write!(f, "booking not found: {id}"),
            DeskError::Invalid(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for DeskError {}

impl From<StoreError> for DeskError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => DeskError::NotFound(id),
            StoreError::Rejected(msg) => DeskError::Invalid(msg),
            StoreError::Unavailable(msg) => DeskError::StoreUnavailable(msg),
        }
    }
}
