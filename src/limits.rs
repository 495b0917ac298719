//! Hard input limits. Anything beyond these is rejected before it touches the store.

use crate::model::{DAY_MS, Ms};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single reservation may not exceed one day.
pub const MAX_SPAN_DURATION_MS: Ms = DAY_MS;

pub const MAX_ID_LEN: usize = 128;
/// Held or confirmed reservations per court that have not ended yet.
pub const MAX_RESERVATIONS_PER_COURT: usize = 100_000;
pub const MAX_PLAYERS: u32 = 1_000;
pub const MAX_REASON_LEN: usize = 1_024;

/// Attempts `cancel` makes when its compare-and-set keeps losing races.
pub const MAX_CAS_ATTEMPTS: usize = 3;
