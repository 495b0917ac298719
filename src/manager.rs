//! Reservation lifecycle: hold, confirm, cancel, and the derived-expiry rules
//! that make those safe to call whether or not the sweeper has run.
//!
//! ```text
//! HELD ──confirm──▶ CONFIRMED ──cancel──▶ CANCELLED
//!   │ ╲
//!   │  ╲──cancel──▶ CANCELLED
//!   ╰──expire────▶ EXPIRED
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::catalog::{CatalogError, CourtCatalog, PricingEngine};
use crate::clock::Clock;
use crate::limits::{MAX_CAS_ATTEMPTS, MAX_ID_LEN, MAX_PLAYERS, MAX_REASON_LEN};
use crate::model::*;
use crate::observability::{BOOKING_OPERATIONS_TOTAL, HOLDS_EXPIRED_TOTAL};
use crate::store::{ReservationStore, StoreError, validate_span};

pub const DEFAULT_HOLD_TTL_MS: Ms = 15 * MINUTE_MS;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BookingError {
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
    #[error("invalid players count: {0}")]
    InvalidPlayers(String),
    #[error("invalid request: {0}")]
    InvalidArgument(String),
    #[error("court {0} not found")]
    CourtNotFound(CourtId),
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),
    #[error("{requested} players exceeds court maximum of {max}")]
    CapacityExceeded { requested: u32, max: u32 },
    #[error("no price rule covers court {0} for the requested interval")]
    NoApplicableRule(CourtId),
    #[error("slot is already reserved")]
    SlotUnavailable,
    #[error("court {0} is fully booked ahead")]
    CourtFull(CourtId),
    #[error("reservation belongs to another user")]
    Forbidden,
    #[error("hold {0} has expired")]
    HoldExpired(ReservationId),
    #[error("reservation {id} is {status}")]
    InvalidState {
        id: ReservationId,
        status: ReservationStatus,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Stable, client-facing error code.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::InvalidInterval(_) => "InvalidInterval",
            BookingError::InvalidPlayers(_) => "InvalidPlayers",
            BookingError::InvalidArgument(_) => "BadRequest",
            BookingError::CourtNotFound(_) | BookingError::ReservationNotFound(_) => "NotFound",
            BookingError::CapacityExceeded { .. } => "CapacityExceeded",
            BookingError::NoApplicableRule(_) => "NoApplicableRule",
            BookingError::SlotUnavailable => "SlotUnavailable",
            BookingError::CourtFull(_) => "CourtFull",
            BookingError::Forbidden => "Forbidden",
            BookingError::HoldExpired(_) => "HoldExpired",
            BookingError::InvalidState { .. } => "InvalidState",
            BookingError::Internal(_) => "Internal",
        }
    }
}

fn internal(op: &str, e: impl std::fmt::Display) -> BookingError {
    error!(op, error = %e, "store failure");
    BookingError::Internal(e.to_string())
}

fn record<T>(op: &'static str, result: &Result<T, BookingError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    metrics::counter!(BOOKING_OPERATIONS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
}

fn validate_user(user_id: &str) -> Result<(), BookingError> {
    if user_id.is_empty() || user_id.len() > MAX_ID_LEN {
        return Err(BookingError::InvalidArgument("userId must be 1-128 characters".into()));
    }
    Ok(())
}

fn interval(start: Ms, end: Ms) -> Result<Span, BookingError> {
    let span = Span::checked(start, end)
        .ok_or_else(|| BookingError::InvalidInterval("start must be before end".into()))?;
    validate_span(&span).map_err(|e| BookingError::InvalidInterval(e.to_string()))?;
    Ok(span)
}

#[derive(Debug, Clone, PartialEq)]
pub struct HoldRequest {
    pub court_id: CourtId,
    pub user_id: UserId,
    pub start: Ms,
    pub end: Ms,
    pub players_count: u32,
}

pub struct ReservationManager {
    store: Arc<ReservationStore>,
    catalog: Arc<dyn CourtCatalog>,
    pricing: Arc<dyn PricingEngine>,
    clock: Arc<dyn Clock>,
    hold_ttl: Ms,
}

impl ReservationManager {
    pub fn new(
        store: Arc<ReservationStore>,
        catalog: Arc<dyn CourtCatalog>,
        pricing: Arc<dyn PricingEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            pricing,
            clock,
            hold_ttl: DEFAULT_HOLD_TTL_MS,
        }
    }

    pub fn with_hold_ttl(mut self, ttl: Ms) -> Self {
        self.hold_ttl = ttl;
        self
    }

    pub fn hold_ttl(&self) -> Ms {
        self.hold_ttl
    }

    /// Place a time-limited hold on a court. Exactly one reservation is
    /// persisted on success, none on failure.
    pub async fn create_hold(&self, req: HoldRequest) -> Result<Reservation, BookingError> {
        let result = self.create_hold_inner(req).await;
        record("hold", &result);
        result
    }

    async fn create_hold_inner(&self, req: HoldRequest) -> Result<Reservation, BookingError> {
        validate_user(&req.user_id)?;
        let now = self.clock.now_ms();
        let span = interval(req.start, req.end)?;
        if span.start <= now {
            return Err(BookingError::InvalidInterval("start must be in the future".into()));
        }
        if req.players_count == 0 || req.players_count > MAX_PLAYERS {
            return Err(BookingError::InvalidPlayers(format!(
                "playersCount must be between 1 and {MAX_PLAYERS}"
            )));
        }

        let court = self
            .catalog
            .get_court(&req.court_id)
            .await
            .ok_or_else(|| BookingError::CourtNotFound(req.court_id.clone()))?;
        if req.players_count > court.max_players {
            return Err(BookingError::CapacityExceeded {
                requested: req.players_count,
                max: court.max_players,
            });
        }

        let price_total = match self.pricing.quote(&req.court_id, &span).await {
            Ok(price) => price,
            Err(CatalogError::NoApplicableRule { court_id }) => {
                return Err(BookingError::NoApplicableRule(court_id));
            }
            Err(e) => return Err(internal("hold", e)),
        };

        let candidate = Reservation {
            id: Ulid::new(),
            user_id: req.user_id,
            court_id: req.court_id,
            span,
            players_count: req.players_count,
            price_total,
            status: ReservationStatus::Held,
            created_at: now,
            hold_expires_at: Some(now.saturating_add(self.hold_ttl)),
        };

        match self.store.insert_if_no_overlap(candidate, now).await {
            Ok(r) => {
                info!(reservation = %r.id, court = %r.court_id, user = %r.user_id, "hold placed");
                Ok(r)
            }
            Err(StoreError::Conflict(blocker)) => {
                debug!(%blocker, "slot unavailable");
                Err(BookingError::SlotUnavailable)
            }
            Err(StoreError::CourtFull { court_id, limit }) => {
                info!(court = %court_id, limit, "court has no room for more upcoming reservations");
                Err(BookingError::CourtFull(court_id))
            }
            Err(StoreError::LimitExceeded(what)) => Err(BookingError::InvalidArgument(what.into())),
            Err(e) => Err(internal("hold", e)),
        }
    }

    /// Turn a live hold into a confirmed reservation. Price is not recomputed.
    pub async fn confirm(&self, id: ReservationId, user_id: &str) -> Result<Reservation, BookingError> {
        let result = self.confirm_inner(id, user_id).await;
        record("confirm", &result);
        result
    }

    async fn confirm_inner(&self, id: ReservationId, user_id: &str) -> Result<Reservation, BookingError> {
        let r = self.owned(id, user_id).await?;
        let now = self.clock.now_ms();
        if r.is_hold_lapsed(now) {
            self.expire_lapsed(id, now, "confirm").await;
            return Err(BookingError::HoldExpired(id));
        }
        if r.status != ReservationStatus::Held {
            return Err(BookingError::InvalidState { id, status: r.status });
        }

        match self
            .store
            .compare_and_set_status(id, ReservationStatus::Held, ReservationStatus::Confirmed, true, now)
            .await
        {
            Ok(confirmed) => {
                info!(reservation = %id, "reservation confirmed");
                Ok(confirmed)
            }
            Err(StoreError::StatusConflict { actual, .. }) => {
                Err(BookingError::InvalidState { id, status: actual })
            }
            Err(e) => Err(internal("confirm", e)),
        }
    }

    /// Cancel a held or confirmed reservation. Lost races are retried against
    /// the fresh status a bounded number of times.
    pub async fn cancel(
        &self,
        id: ReservationId,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<Reservation, BookingError> {
        let result = self.cancel_inner(id, user_id, reason).await;
        record("cancel", &result);
        result
    }

    async fn cancel_inner(
        &self,
        id: ReservationId,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<Reservation, BookingError> {
        if reason.is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(BookingError::InvalidArgument(format!(
                "reason exceeds {MAX_REASON_LEN} bytes"
            )));
        }

        let mut last_seen = ReservationStatus::Held;
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let r = self.owned(id, user_id).await?;
            let now = self.clock.now_ms();
            if r.is_hold_lapsed(now) {
                self.expire_lapsed(id, now, "cancel").await;
                return Err(BookingError::InvalidState {
                    id,
                    status: ReservationStatus::Expired,
                });
            }
            if r.status.is_terminal() {
                return Err(BookingError::InvalidState { id, status: r.status });
            }

            match self
                .store
                .compare_and_set_status(id, r.status, ReservationStatus::Cancelled, true, now)
                .await
            {
                Ok(cancelled) => {
                    info!(reservation = %id, from = %r.status, reason = reason.unwrap_or(""), "reservation cancelled");
                    return Ok(cancelled);
                }
                Err(StoreError::StatusConflict { actual, .. }) => {
                    debug!(reservation = %id, attempt, %actual, "cancel lost a race, re-reading");
                    last_seen = actual;
                }
                Err(e) => return Err(internal("cancel", e)),
            }
        }
        Err(BookingError::InvalidState { id, status: last_seen })
    }

    /// True when no live hold or confirmed reservation intersects the interval.
    /// Lapsed holds count as free even before they are recorded as expired.
    pub async fn is_court_available(&self, court_id: &str, start: Ms, end: Ms) -> Result<bool, BookingError> {
        let span = interval(start, end)?;
        let now = self.clock.now_ms();
        let blockers = self.store.find_overlapping(court_id, &span).await;
        Ok(!blockers.iter().any(|r| r.occupies_slot(now)))
    }

    /// A single reservation, visible only to its owner.
    pub async fn get(&self, id: ReservationId, user_id: &str) -> Result<Reservation, BookingError> {
        self.owned(id, user_id).await
    }

    pub async fn reservations_for_user(&self, user_id: &str) -> Result<Vec<Reservation>, BookingError> {
        validate_user(user_id)?;
        Ok(self.store.list_for_user(user_id).await)
    }

    async fn owned(&self, id: ReservationId, user_id: &str) -> Result<Reservation, BookingError> {
        let r = self
            .store
            .get(&id)
            .await
            .ok_or(BookingError::ReservationNotFound(id))?;
        if r.user_id != user_id {
            return Err(BookingError::Forbidden);
        }
        Ok(r)
    }

    /// Record a lapsed hold as expired. Losing the race to another writer is fine.
    async fn expire_lapsed(&self, id: ReservationId, now: Ms, by: &'static str) {
        match self
            .store
            .compare_and_set_status(id, ReservationStatus::Held, ReservationStatus::Expired, true, now)
            .await
        {
            Ok(_) => {
                metrics::counter!(HOLDS_EXPIRED_TOTAL, "by" => by).increment(1);
                info!(reservation = %id, by, "lapsed hold expired");
            }
            Err(e) => debug!(reservation = %id, error = %e, "lapsed hold already moved"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::catalog::{CatalogSeed, CourtInfo, InMemoryCatalog, PriceRule};
    use crate::clock::ManualClock;

    const NOW: Ms = 1_800_000_000_000;
    const TEN: Ms = NOW + DAY_MS; // a slot tomorrow, treated as "10:00"

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("courtbook_test_manager");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn catalog() -> Arc<InMemoryCatalog> {
        let courts = ["C1", "C2"]
            .into_iter()
            .map(|id| CourtInfo {
                id: id.into(),
                venue_id: "V1".into(),
                name: id.into(),
                max_players: 4,
                active: true,
            })
            .collect();
        let price_rules = (0..7)
            .map(|day| PriceRule {
                court_id: "C1".into(),
                day_of_week: day,
                start: "00:00".into(),
                end: "24:00".into(),
                price_per_hour: "20.00".parse().unwrap(),
                currency: "USD".into(),
            })
            .collect();
        Arc::new(InMemoryCatalog::from_seed(CatalogSeed { courts, price_rules }).unwrap())
    }

    fn setup(name: &str) -> (ReservationManager, Arc<ManualClock>, Arc<ReservationStore>) {
        let store = Arc::new(ReservationStore::open(test_wal_path(name)).unwrap());
        let clock = Arc::new(ManualClock::new(NOW));
        let catalog = catalog();
        let manager = ReservationManager::new(store.clone(), catalog.clone(), catalog, clock.clone());
        (manager, clock, store)
    }

    fn req(court: &str, user: &str, start: Ms, end: Ms) -> HoldRequest {
        HoldRequest {
            court_id: court.into(),
            user_id: user.into(),
            start,
            end,
            players_count: 2,
        }
    }

    #[tokio::test]
    async fn booking_scenario() {
        let (m, _, _) = setup("scenario.wal");

        let hold = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();
        assert_eq!(hold.status, ReservationStatus::Held);
        assert_eq!(hold.hold_expires_at, Some(hold.created_at + 15 * MINUTE_MS));
        assert_eq!(hold.price_total, Money::new("20.00".parse().unwrap(), "USD"));

        let half_past = TEN + 30 * MINUTE_MS;
        assert_eq!(
            m.create_hold(req("C1", "U2", half_past, half_past + HOUR_MS)).await,
            Err(BookingError::SlotUnavailable)
        );

        let confirmed = m.confirm(hold.id, "U1").await.unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);
        assert_eq!(confirmed.hold_expires_at, None);
        assert_eq!(confirmed.price_total, hold.price_total);

        assert_eq!(
            m.create_hold(req("C1", "U2", half_past, half_past + HOUR_MS)).await,
            Err(BookingError::SlotUnavailable)
        );
    }

    #[tokio::test]
    async fn back_to_back_holds_allowed() {
        let (m, _, _) = setup("back_to_back.wal");
        m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();
        m.create_hold(req("C1", "U2", TEN + HOUR_MS, TEN + 2 * HOUR_MS)).await.unwrap();
    }

    #[tokio::test]
    async fn hold_validation() {
        let (m, _, _) = setup("hold_validation.wal");
        assert!(matches!(
            m.create_hold(req("C1", "U1", TEN + HOUR_MS, TEN)).await,
            Err(BookingError::InvalidInterval(_))
        ));
        assert!(matches!(
            m.create_hold(req("C1", "U1", TEN, TEN)).await,
            Err(BookingError::InvalidInterval(_))
        ));
        assert!(matches!(
            m.create_hold(req("C1", "U1", NOW - HOUR_MS, NOW + HOUR_MS)).await,
            Err(BookingError::InvalidInterval(_))
        ));
        assert!(matches!(
            m.create_hold(req("C1", "U1", TEN, TEN + 2 * DAY_MS)).await,
            Err(BookingError::InvalidInterval(_))
        ));

        let mut zero = req("C1", "U1", TEN, TEN + HOUR_MS);
        zero.players_count = 0;
        assert!(matches!(m.create_hold(zero).await, Err(BookingError::InvalidPlayers(_))));

        let mut crowd = req("C1", "U1", TEN, TEN + HOUR_MS);
        crowd.players_count = 5;
        assert_eq!(
            m.create_hold(crowd).await,
            Err(BookingError::CapacityExceeded { requested: 5, max: 4 })
        );

        assert_eq!(
            m.create_hold(req("C9", "U1", TEN, TEN + HOUR_MS)).await,
            Err(BookingError::CourtNotFound("C9".into()))
        );
        assert_eq!(
            m.create_hold(req("C2", "U1", TEN, TEN + HOUR_MS)).await,
            Err(BookingError::NoApplicableRule("C2".into()))
        );
        assert!(matches!(
            m.create_hold(req("C1", "", TEN, TEN + HOUR_MS)).await,
            Err(BookingError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn ownership_enforced_in_every_state() {
        let (m, _, _) = setup("ownership.wal");
        let hold = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();
        assert_eq!(m.confirm(hold.id, "U2").await, Err(BookingError::Forbidden));
        assert_eq!(m.cancel(hold.id, "U2", None).await, Err(BookingError::Forbidden));
        assert_eq!(m.get(hold.id, "U2").await, Err(BookingError::Forbidden));

        m.cancel(hold.id, "U1", None).await.unwrap();
        assert_eq!(m.confirm(hold.id, "U2").await, Err(BookingError::Forbidden));
        assert_eq!(m.cancel(hold.id, "U2", None).await, Err(BookingError::Forbidden));
    }

    #[tokio::test]
    async fn unknown_reservation_not_found() {
        let (m, _, _) = setup("unknown.wal");
        let id = Ulid::new();
        assert_eq!(m.confirm(id, "U1").await, Err(BookingError::ReservationNotFound(id)));
        assert_eq!(m.cancel(id, "U1", None).await, Err(BookingError::ReservationNotFound(id)));
    }

    #[tokio::test]
    async fn lapsed_hold_cannot_be_confirmed() {
        let (m, clock, store) = setup("lapsed_confirm.wal");
        let hold = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();
        clock.advance(15 * MINUTE_MS);

        assert_eq!(m.confirm(hold.id, "U1").await, Err(BookingError::HoldExpired(hold.id)));
        let stored = store.get(&hold.id).await.unwrap();
        assert_eq!(stored.status, ReservationStatus::Expired);
        assert_eq!(stored.hold_expires_at, None);

        assert_eq!(
            m.confirm(hold.id, "U1").await,
            Err(BookingError::InvalidState {
                id: hold.id,
                status: ReservationStatus::Expired
            })
        );
    }

    #[tokio::test]
    async fn hold_confirmed_just_before_expiry() {
        let (m, clock, _) = setup("just_in_time.wal");
        let hold = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();
        clock.advance(15 * MINUTE_MS - 1);
        assert!(m.confirm(hold.id, "U1").await.is_ok());
    }

    #[tokio::test]
    async fn terminal_states_stick() {
        let (m, _, _) = setup("terminal.wal");
        let hold = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();

        let cancelled = m.cancel(hold.id, "U1", Some("rain")).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(cancelled.hold_expires_at, None);

        let cancelled_state = Err(BookingError::InvalidState {
            id: hold.id,
            status: ReservationStatus::Cancelled,
        });
        assert_eq!(m.cancel(hold.id, "U1", None).await, cancelled_state);
        assert_eq!(m.confirm(hold.id, "U1").await, cancelled_state);
    }

    #[tokio::test]
    async fn confirmed_reservation_can_be_cancelled_and_frees_slot() {
        let (m, _, _) = setup("cancel_confirmed.wal");
        let hold = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();
        m.confirm(hold.id, "U1").await.unwrap();
        let cancelled = m.cancel(hold.id, "U1", None).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);

        assert!(m.is_court_available("C1", TEN, TEN + HOUR_MS).await.unwrap());
        m.create_hold(req("C1", "U2", TEN, TEN + HOUR_MS)).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_of_lapsed_hold_reports_expired() {
        let (m, clock, store) = setup("cancel_lapsed.wal");
        let hold = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();
        clock.advance(20 * MINUTE_MS);
        assert_eq!(
            m.cancel(hold.id, "U1", None).await,
            Err(BookingError::InvalidState {
                id: hold.id,
                status: ReservationStatus::Expired
            })
        );
        assert_eq!(store.get(&hold.id).await.unwrap().status, ReservationStatus::Expired);
    }

    #[tokio::test]
    async fn availability_ignores_lapsed_holds() {
        let (m, clock, _) = setup("availability.wal");
        assert!(m.is_court_available("C1", TEN, TEN + HOUR_MS).await.unwrap());
        m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();

        assert!(!m.is_court_available("C1", TEN + 30 * MINUTE_MS, TEN + 90 * MINUTE_MS).await.unwrap());
        assert!(m.is_court_available("C1", TEN + HOUR_MS, TEN + 2 * HOUR_MS).await.unwrap());
        assert!(m.is_court_available("C2", TEN, TEN + HOUR_MS).await.unwrap());

        clock.advance(15 * MINUTE_MS);
        assert!(m.is_court_available("C1", TEN, TEN + HOUR_MS).await.unwrap());
        // And a new hold takes the slot without waiting for the sweeper.
        m.create_hold(req("C1", "U2", TEN, TEN + HOUR_MS)).await.unwrap();

        assert!(matches!(
            m.is_court_available("C1", TEN, TEN).await,
            Err(BookingError::InvalidInterval(_))
        ));
    }

    #[tokio::test]
    async fn custom_hold_ttl() {
        let (m, _, _) = setup("custom_ttl.wal");
        let m = m.with_hold_ttl(5 * MINUTE_MS);
        let hold = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();
        assert_eq!(hold.hold_expires_at, Some(NOW + 5 * MINUTE_MS));

        let m = m.with_hold_ttl(Ms::MAX);
        let hold = m.create_hold(req("C1", "U1", TEN + HOUR_MS, TEN + 2 * HOUR_MS)).await.unwrap();
        assert_eq!(hold.hold_expires_at, Some(Ms::MAX));
    }

    #[tokio::test]
    async fn wal_failure_is_internal_and_changes_nothing() {
        let (m, _, store) = setup("wal_failure.wal");

        // Enough failures to outlast the store's retries.
        store.fail_next_wal_commits(3);
        let err = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap_err();
        assert!(matches!(err, BookingError::Internal(_)));
        assert_eq!(
            crate::http::ApiError::from(err).status(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(m.reservations_for_user("U1").await.unwrap().is_empty());

        let hold = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();
        store.fail_next_wal_commits(3);
        assert!(matches!(m.confirm(hold.id, "U1").await, Err(BookingError::Internal(_))));
        assert_eq!(m.get(hold.id, "U1").await.unwrap().status, ReservationStatus::Held);
    }

    #[tokio::test]
    async fn full_court_is_reported_as_such() {
        let store = Arc::new(
            ReservationStore::open(test_wal_path("court_full.wal"))
                .unwrap()
                .with_court_limit(1),
        );
        let catalog = catalog();
        let m = ReservationManager::new(store, catalog.clone(), catalog, Arc::new(ManualClock::new(NOW)));

        m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();
        assert_eq!(
            m.create_hold(req("C1", "U2", TEN + 2 * HOUR_MS, TEN + 3 * HOUR_MS)).await,
            Err(BookingError::CourtFull("C1".into()))
        );
    }

    #[tokio::test]
    async fn reservations_listed_for_owner() {
        let (m, _, _) = setup("listing.wal");
        let late = m.create_hold(req("C1", "U1", TEN + 3 * HOUR_MS, TEN + 4 * HOUR_MS)).await.unwrap();
        let early = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();
        m.create_hold(req("C1", "U2", TEN + HOUR_MS, TEN + 2 * HOUR_MS)).await.unwrap();

        let mine: Vec<_> = m.reservations_for_user("U1").await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(mine, vec![early.id, late.id]);
        assert_eq!(m.get(late.id, "U1").await.unwrap().id, late.id);
        assert!(m.reservations_for_user("U3").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_holds_on_one_slot() {
        let (m, _, _) = setup("concurrent_holds.wal");
        let m = Arc::new(m);
        let mut handles = Vec::new();
        for i in 0..24 {
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                let shift = (i % 3) * 20 * MINUTE_MS;
                m.create_hold(req("C1", &format!("U{i}"), TEN + shift, TEN + HOUR_MS + shift))
                    .await
            }));
        }
        let mut won = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => won += 1,
                Err(BookingError::SlotUnavailable) => {}
                Err(e) => panic!("unexpected: {e}"),
            }
        }
        assert_eq!(won, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn confirm_and_cancel_race_has_one_winner() {
        let (m, _, store) = setup("confirm_cancel_race.wal");
        let m = Arc::new(m);
        let hold = m.create_hold(req("C1", "U1", TEN, TEN + HOUR_MS)).await.unwrap();

        let (a, b) = tokio::join!(
            {
                let m = m.clone();
                tokio::spawn(async move { m.confirm(hold.id, "U1").await })
            },
            {
                let m = m.clone();
                tokio::spawn(async move { m.cancel(hold.id, "U1", None).await })
            }
        );
        let confirmed = a.unwrap();
        let cancelled = b.unwrap();
        // Cancel may legitimately follow a confirm, so the final state is
        // CANCELLED unless confirm lost outright to cancel.
        let final_status = store.get(&hold.id).await.unwrap().status;
        match (&confirmed, &cancelled) {
            (Ok(_), Ok(_)) => assert_eq!(final_status, ReservationStatus::Cancelled),
            (Err(BookingError::InvalidState { .. }), Ok(_)) => {
                assert_eq!(final_status, ReservationStatus::Cancelled)
            }
            other => panic!("unexpected outcomes: {other:?}"),
        }
    }
}
