use crate::limits::*;
use crate::model::*;

use super::StoreError;

pub(crate) fn validate_span(span: &Span) -> Result<(), StoreError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(StoreError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(StoreError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_candidate(candidate: &Reservation) -> Result<(), StoreError> {
    if candidate.span.start >= candidate.span.end {
        return Err(StoreError::LimitExceeded("empty span"));
    }
    validate_span(&candidate.span)?;
    if candidate.court_id.is_empty() || candidate.court_id.len() > MAX_ID_LEN {
        return Err(StoreError::LimitExceeded("court id length"));
    }
    if candidate.user_id.is_empty() || candidate.user_id.len() > MAX_ID_LEN {
        return Err(StoreError::LimitExceeded("user id length"));
    }
    Ok(())
}

/// Decide whether `span` is free on this court at `now`.
///
/// A live held or confirmed reservation in the way is a `Conflict`. Holds that
/// have lapsed but are still recorded as held do not block; their ids are
/// returned so the caller can expire them in the same critical section.
pub(crate) fn lapsed_blockers(
    court: &CourtState,
    span: &Span,
    now: Ms,
) -> Result<Vec<ReservationId>, StoreError> {
    let mut lapsed = Vec::new();
    for r in court.blocking(span) {
        if r.is_hold_lapsed(now) {
            lapsed.push(r.id);
        } else {
            return Err(StoreError::Conflict(r.id));
        }
    }
    Ok(lapsed)
}

/// Live reservations on this court that have not ended by `now`.
pub(crate) fn upcoming_occupied(court: &CourtState, now: Ms) -> usize {
    // Anything starting a full span-width ago has already ended.
    let from = court
        .reservations
        .partition_point(|r| r.span.start <= now - MAX_SPAN_DURATION_MS);
    court.reservations[from..]
        .iter()
        .filter(|r| r.span.end > now && r.occupies_slot(now))
        .count()
}
