use thiserror::Error;
use ulid::Ulid;

use crate::model::ReservationStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("reservation not found: {0}")]
    NotFound(Ulid),
    #[error("reservation already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("slot overlaps reservation {0}")]
    Conflict(Ulid),
    #[error("reservation {id} is {actual}, expected {expected}")]
    StatusConflict {
        id: Ulid,
        expected: ReservationStatus,
        actual: ReservationStatus,
    },
    #[error("reservation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("court {court_id} already has {limit} upcoming reservations")]
    CourtFull { court_id: String, limit: usize },
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("WAL writer unavailable: {0}")]
    Unavailable(&'static str),
}

impl StoreError {
    /// I/O failures may clear up on their own; everything else is a verdict.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Wal(_))
    }
}
