use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC; the only time type below the HTTP layer.
pub type Ms = i64;

pub type CourtId = String;
pub type UserId = String;
pub type ReservationId = Ulid;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Length of the intersection with `other`, zero when disjoint.
    pub fn overlap_ms(&self, other: &Span) -> Ms {
        (self.end.min(other.end) - self.start.max(other.start)).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Held,
    Confirmed,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Held => "HELD",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Held and confirmed reservations occupy their slot.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Held | Self::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    /// The lifecycle graph. Nothing leads back to `Held`; terminal states have no exits.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (*self, next),
            (Held, Confirmed) | (Held, Cancelled) | (Held, Expired) | (Confirmed, Cancelled)
        )
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub court_id: CourtId,
    pub span: Span,
    pub players_count: u32,
    /// Quoted once when the hold is placed; never re-priced.
    pub price_total: Money,
    pub status: ReservationStatus,
    pub created_at: Ms,
    /// Present iff `status == Held`.
    pub hold_expires_at: Option<Ms>,
}

impl Reservation {
    /// A held reservation whose expiry has passed, whether or not the sweeper has recorded it.
    pub fn is_hold_lapsed(&self, now: Ms) -> bool {
        self.status == ReservationStatus::Held
            && self.hold_expires_at.is_some_and(|exp| exp <= now)
    }

    /// Blocking status and not a lapsed hold.
    pub fn occupies_slot(&self, now: Ms) -> bool {
        self.status.is_blocking() && !self.is_hold_lapsed(now)
    }
}

/// All reservations ever placed on one court, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct CourtState {
    pub court_id: CourtId,
    pub reservations: Vec<Reservation>,
}

impl CourtState {
    pub fn new(court_id: CourtId) -> Self {
        Self {
            court_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &ReservationId) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations of any status whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// Blocking (held or confirmed) reservations overlapping the query window.
    pub fn blocking(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query).filter(|r| r.status.is_blocking())
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A new hold, or a snapshot row written by compaction.
    ReservationRecorded { reservation: Reservation },
    StatusChanged {
        id: ReservationId,
        court_id: CourtId,
        from: ReservationStatus,
        to: ReservationStatus,
        at: Ms,
        clear_hold_expiry: bool,
    },
}

impl Event {
    pub fn court_id(&self) -> &str {
        match self {
            Event::ReservationRecorded { reservation } => &reservation.court_id,
            Event::StatusChanged { court_id, .. } => court_id,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn span_overlap_is_half_open() {
        let ten = 10 * HOUR_MS;
        let a = Span::new(ten, ten + HOUR_MS);
        let adjacent = Span::new(ten + HOUR_MS, ten + 2 * HOUR_MS);
        let shifted = Span::new(ten + 30 * MINUTE_MS, ten + 90 * MINUTE_MS);
        let outer = Span::new(ten, ten + 2 * HOUR_MS);
        assert!(!a.overlaps(&adjacent));
        assert!(!adjacent.overlaps(&a));
        assert!(a.overlaps(&shifted));
        assert!(outer.overlaps(&shifted)); // containment
        assert!(shifted.overlaps(&outer));
    }

    #[test]
    fn span_checked_rejects_empty_and_inverted() {
        assert!(Span::checked(100, 100).is_none());
        assert!(Span::checked(200, 100).is_none());
        assert_eq!(Span::checked(100, 200), Some(Span::new(100, 200)));
    }

    #[test]
    fn overlap_ms_clamps() {
        let a = Span::new(0, 100);
        assert_eq!(a.overlap_ms(&Span::new(50, 150)), 50);
        assert_eq!(a.overlap_ms(&Span::new(100, 150)), 0);
        assert_eq!(a.overlap_ms(&Span::new(10, 20)), 10);
    }

    #[test]
    fn transition_table() {
        use ReservationStatus::*;
        assert!(Held.can_transition_to(Confirmed));
        assert!(Held.can_transition_to(Cancelled));
        assert!(Held.can_transition_to(Expired));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Confirmed.can_transition_to(Expired));
        assert!(!Confirmed.can_transition_to(Held));
        for terminal in [Cancelled, Expired] {
            for next in [Held, Confirmed, Cancelled, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn lapsed_hold_stops_occupying() {
        let r = reservation("C1", "U1", 1000, 2000);
        let exp = r.hold_expires_at.unwrap();
        assert!(r.occupies_slot(exp - 1));
        assert!(!r.occupies_slot(exp));
        let confirmed = with_status(r, ReservationStatus::Confirmed);
        assert!(confirmed.occupies_slot(Ms::MAX));
    }

    #[test]
    fn court_state_keeps_start_order() {
        let mut cs = CourtState::new("C1".into());
        cs.insert(reservation("C1", "U1", 300, 400));
        cs.insert(reservation("C1", "U1", 100, 200));
        cs.insert(reservation("C1", "U1", 200, 300));
        let starts: Vec<Ms> = cs.reservations.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_adjacent_and_future() {
        let mut cs = CourtState::new("C1".into());
        cs.insert(reservation("C1", "U1", 100, 200));
        cs.insert(reservation("C1", "U1", 450, 600));
        cs.insert(reservation("C1", "U1", 1000, 1100));
        let hits: Vec<_> = cs.overlapping(&Span::new(200, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn blocking_ignores_terminal_reservations() {
        let mut cs = CourtState::new("C1".into());
        cs.insert(with_status(reservation("C1", "U1", 100, 200), ReservationStatus::Cancelled));
        cs.insert(with_status(reservation("C1", "U1", 100, 200), ReservationStatus::Expired));
        cs.insert(with_status(reservation("C1", "U1", 150, 250), ReservationStatus::Confirmed));
        let hits: Vec<_> = cs.blocking(&Span::new(0, 1000)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].status, ReservationStatus::Confirmed);
    }

    #[test]
    fn event_bincode_roundtrip() {
        let event = Event::ReservationRecorded {
            reservation: reservation("C1", "U1", 100, 200),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
