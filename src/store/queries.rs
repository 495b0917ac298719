use crate::model::*;

use super::ReservationStore;

impl ReservationStore {
    pub async fn get(&self, id: &ReservationId) -> Option<Reservation> {
        let court = self.court_for(id).ok()?;
        let guard = court.read().await;
        guard.get(id).cloned()
    }

    /// Held or confirmed reservations on `court_id` intersecting `span`.
    /// Lapsed holds are included; callers that care apply `occupies_slot`.
    pub async fn find_overlapping(&self, court_id: &str, span: &Span) -> Vec<Reservation> {
        let Some(court) = self.court(court_id) else {
            return Vec::new();
        };
        let guard = court.read().await;
        guard.blocking(span).cloned().collect()
    }

    /// Reservations still recorded as held whose expiry is at or before `now`.
    pub async fn find_expired_holds(&self, now: Ms) -> Vec<Reservation> {
        let courts: Vec<_> = self.courts.iter().map(|e| e.value().clone()).collect();
        let mut expired = Vec::new();
        for court in courts {
            let guard = court.read().await;
            expired.extend(guard.reservations.iter().filter(|r| r.is_hold_lapsed(now)).cloned());
        }
        expired
    }

    /// Every reservation owned by `user_id`, earliest start first.
    pub async fn list_for_user(&self, user_id: &str) -> Vec<Reservation> {
        let ids = self
            .by_user
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(r) = self.get(&id).await {
                out.push(r);
            }
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        out
    }

    pub fn reservation_count(&self) -> usize {
        self.by_id.len()
    }
}
