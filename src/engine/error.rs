use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    UnknownPilot(String),
    /// Time index or time slot not on the day's schedule.
    InvalidTimeSlot(String),
    /// The record contradicts itself (e.g. seat list vs headcount).
    Invalid(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::UnknownPilot(uid) => write!(f, "unknown pilot: {uid}"),
            EngineError::InvalidTimeSlot(what) => write!(f, "invalid time slot: {what}"),
            EngineError::Invalid(msg) => write!(f, "invalid record: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
