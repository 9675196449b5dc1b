use ulid::Ulid;

use crate::model::{SizeClass, Span};

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before touching storage.
    Validation,
    /// An id did not resolve. No retry.
    NotFound,
    /// Expected negative outcome: no window, ineligible kennel, lost race.
    Conflict,
    /// Persistence failed. Caller decides whether to retry.
    Storage,
}

#[derive(Debug)]
pub enum EngineError {
    InvalidRange { start: String, end: String },
    Invalid(&'static str),
    LimitExceeded(&'static str),
    KennelNotFound(Ulid),
    DogNotFound(Ulid),
    OwnerNotFound(Ulid),
    BookingNotFound(Ulid),
    EmailNotFound(String),
    AlreadyExists(Ulid),
    EmailTaken(String),
    NoAvailableWindow { kennel_id: Ulid, stay: Span },
    SizeMismatch { kennel: SizeClass, dog: SizeClass },
    UnsocialNotAllowed(Ulid),
    WindowOverlap(Ulid),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidRange { .. }
            | EngineError::Invalid(_)
            | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::KennelNotFound(_)
            | EngineError::DogNotFound(_)
            | EngineError::OwnerNotFound(_)
            | EngineError::BookingNotFound(_)
            | EngineError::EmailNotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_)
            | EngineError::EmailTaken(_)
            | EngineError::NoAvailableWindow { .. }
            | EngineError::SizeMismatch { .. }
            | EngineError::UnsocialNotAllowed(_)
            | EngineError::WindowOverlap(_) => ErrorKind::Conflict,
            EngineError::WalError(_) => ErrorKind::Storage,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid date range: check-in {start} must be before check-out {end}")
            }
            EngineError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::KennelNotFound(id) => write!(f, "kennel not found: {id}"),
            EngineError::DogNotFound(id) => write!(f, "dog not found: {id}"),
            EngineError::OwnerNotFound(id) => write!(f, "owner not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::EmailNotFound(email) => write!(f, "no account with email {email}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::EmailTaken(email) => {
                write!(f, "account with email {email} already exists")
            }
            EngineError::NoAvailableWindow { kennel_id, stay } => {
                write!(f, "kennel {kennel_id} has no free window covering {stay}")
            }
            EngineError::SizeMismatch { kennel, dog } => {
                write!(f, "{kennel} kennel is too small for a {dog} dog")
            }
            EngineError::UnsocialNotAllowed(id) => {
                write!(f, "kennel {id} does not accept unsocial dogs")
            }
            EngineError::WindowOverlap(id) => {
                write!(f, "availability window overlaps existing interval {id}")
            }
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
