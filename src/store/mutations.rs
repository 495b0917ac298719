use tokio::sync::oneshot;
use tracing::info;

use crate::model::*;

use super::overlap::{lapsed_blockers, upcoming_occupied, validate_candidate};
use super::{ReservationStore, StoreError, WalCommand};

impl ReservationStore {
    /// Persist `candidate` as a new hold unless a live reservation overlaps it.
    ///
    /// Runs entirely under the court's write lock. Lapsed holds in the way are
    /// expired first, in the same critical section, so two active reservations
    /// on a court never overlap in persisted state.
    pub async fn insert_if_no_overlap(
        &self,
        mut candidate: Reservation,
        now: Ms,
    ) -> Result<Reservation, StoreError> {
        validate_candidate(&candidate)?;
        candidate.status = ReservationStatus::Held;

        let _gate = self.compaction_gate.read().await;
        if self.by_id.contains_key(&candidate.id) {
            return Err(StoreError::AlreadyExists(candidate.id));
        }
        let court = self.court_or_create(&candidate.court_id);
        let mut guard = court.write().await;
        if upcoming_occupied(&guard, now) >= self.court_limit {
            return Err(StoreError::CourtFull {
                court_id: candidate.court_id.clone(),
                limit: self.court_limit,
            });
        }

        for id in lapsed_blockers(&guard, &candidate.span, now)? {
            let event = Event::StatusChanged {
                id,
                court_id: candidate.court_id.clone(),
                from: ReservationStatus::Held,
                to: ReservationStatus::Expired,
                at: now,
                clear_hold_expiry: true,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL, "by" => "insert").increment(1);
            info!(reservation = %id, court = %candidate.court_id, "expired lapsed hold blocking a new one");
        }

        let event = Event::ReservationRecorded {
            reservation: candidate.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(candidate)
    }

    /// Atomically move `id` from `expected` to `new`.
    ///
    /// Fails with `StatusConflict` when the current status is not `expected`
    /// (someone else won the race) and with `InvalidTransition` when the move
    /// is not an edge of the lifecycle graph.
    pub async fn compare_and_set_status(
        &self,
        id: ReservationId,
        expected: ReservationStatus,
        new: ReservationStatus,
        clear_hold_expiry: bool,
        at: Ms,
    ) -> Result<Reservation, StoreError> {
        let _gate = self.compaction_gate.read().await;
        let court = self.court_for(&id)?;
        let mut guard = court.write().await;

        let current = guard.get(&id).ok_or(StoreError::NotFound(id))?;
        if current.status != expected {
            return Err(StoreError::StatusConflict {
                id,
                expected,
                actual: current.status,
            });
        }
        if !expected.can_transition_to(new) {
            return Err(StoreError::InvalidTransition {
                id,
                from: expected,
                to: new,
            });
        }

        let event = Event::StatusChanged {
            id,
            court_id: guard.court_id.clone(),
            from: expected,
            to: new,
            at,
            clear_hold_expiry,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    /// Rewrite the WAL as one record per reservation in its current state.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let _gate = self.compaction_gate.write().await;

        let courts: Vec<_> = self.courts.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for court in courts {
            let guard = court.read().await;
            events.extend(guard.reservations.iter().map(|r| Event::ReservationRecorded {
                reservation: r.clone(),
            }));
        }
        let written = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("writer shut down"))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("writer dropped response"))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        Ok(written)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
