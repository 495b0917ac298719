use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::model::*;
use crate::observability::{HOLDS_EXPIRED_TOTAL, SWEEP_DURATION_SECONDS, WAL_COMPACTIONS_TOTAL};
use crate::store::{ReservationStore, StoreError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    /// Moved out of HELD by someone else between the scan and the CAS.
    pub skipped: usize,
    pub failed: usize,
}

/// Expire every hold whose deadline is at or before `now`.
pub async fn sweep_once(store: &ReservationStore, now: Ms) -> SweepReport {
    let due = store.find_expired_holds(now).await;
    expire_batch(store, &due, now).await
}

/// One failing record never stops the rest of the batch.
async fn expire_batch(store: &ReservationStore, due: &[Reservation], now: Ms) -> SweepReport {
    let mut report = SweepReport::default();
    for r in due {
        match store
            .compare_and_set_status(r.id, ReservationStatus::Held, ReservationStatus::Expired, true, now)
            .await
        {
            Ok(_) => {
                report.expired += 1;
                metrics::counter!(HOLDS_EXPIRED_TOTAL, "by" => "sweeper").increment(1);
                info!(reservation = %r.id, court = %r.court_id, "expired hold");
            }
            Err(StoreError::StatusConflict { actual, .. }) => {
                report.skipped += 1;
                debug!(reservation = %r.id, %actual, "sweeper skip, already moved");
            }
            Err(e) => {
                report.failed += 1;
                warn!(reservation = %r.id, error = %e, "sweeper failed to expire hold");
            }
        }
    }
    report
}

/// Background task that periodically converges lapsed holds to EXPIRED.
/// Cancellation is checked between sweeps, so a running batch always completes.
pub async fn run_sweeper(
    store: Arc<ReservationStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let started = Instant::now();
        let report = sweep_once(&store, clock.now_ms()).await;
        metrics::histogram!(SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if report != SweepReport::default() {
            info!(
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "sweep finished"
            );
        }
    }
    info!("sweeper stopped");
}

/// Background task that compacts the WAL once it has taken `threshold` appends.
pub async fn run_compactor(
    store: Arc<ReservationStore>,
    threshold: u64,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(kept) => {
                metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
                info!(appends, kept, "WAL compacted");
            }
            Err(e) => warn!(error = %e, "WAL compaction failed"),
        }
    }
    info!("compactor stopped");
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rust_decimal::Decimal;
    use ulid::Ulid;

    use super::*;
    use crate::clock::ManualClock;

    const NOW: Ms = 1_800_000_000_000;
    const TTL: Ms = 15 * MINUTE_MS;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("courtbook_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn hold(court: &str, start: Ms, expires_at: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            user_id: "U1".into(),
            court_id: court.into(),
            span: Span::new(start, start + HOUR_MS),
            players_count: 2,
            price_total: Money::new(Decimal::new(2000, 2), "USD"),
            status: ReservationStatus::Held,
            created_at: NOW,
            hold_expires_at: Some(expires_at),
        }
    }

    async fn wait_for(mut check: impl AsyncFnMut() -> bool) {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn sweep_expires_only_lapsed_holds() {
        let store = ReservationStore::open(test_wal_path("sweep_lapsed.wal")).unwrap();
        let lapsed = hold("C1", NOW + DAY_MS, NOW + TTL);
        let live = hold("C2", NOW + DAY_MS, NOW + 2 * TTL);
        let confirmed = hold("C3", NOW + DAY_MS, NOW + TTL);
        for r in [&lapsed, &live, &confirmed] {
            store.insert_if_no_overlap(r.clone(), NOW).await.unwrap();
        }
        store
            .compare_and_set_status(confirmed.id, ReservationStatus::Held, ReservationStatus::Confirmed, true, NOW)
            .await
            .unwrap();

        let report = sweep_once(&store, NOW + TTL).await;
        assert_eq!(report, SweepReport { expired: 1, skipped: 0, failed: 0 });

        let swept = store.get(&lapsed.id).await.unwrap();
        assert_eq!(swept.status, ReservationStatus::Expired);
        assert_eq!(swept.hold_expires_at, None);
        assert_eq!(store.get(&live.id).await.unwrap().status, ReservationStatus::Held);
        assert_eq!(store.get(&confirmed.id).await.unwrap().status, ReservationStatus::Confirmed);

        assert_eq!(sweep_once(&store, NOW + TTL).await, SweepReport::default());
    }

    #[tokio::test]
    async fn stale_snapshot_entries_are_skipped_not_failed() {
        let store = ReservationStore::open(test_wal_path("sweep_stale.wal")).unwrap();
        let a = hold("C1", NOW + DAY_MS, NOW + TTL);
        let b = hold("C2", NOW + DAY_MS, NOW + TTL);
        for r in [&a, &b] {
            store.insert_if_no_overlap(r.clone(), NOW).await.unwrap();
        }
        let due = store.find_expired_holds(NOW + TTL).await;
        assert_eq!(due.len(), 2);

        // The owner cancels `a` after the scan but before the sweeper reaches it.
        store
            .compare_and_set_status(a.id, ReservationStatus::Held, ReservationStatus::Cancelled, true, NOW + TTL)
            .await
            .unwrap();

        let report = expire_batch(&store, &due, NOW + TTL).await;
        assert_eq!(report, SweepReport { expired: 1, skipped: 1, failed: 0 });
        assert_eq!(store.get(&a.id).await.unwrap().status, ReservationStatus::Cancelled);
        assert_eq!(store.get(&b.id).await.unwrap().status, ReservationStatus::Expired);
    }

    #[tokio::test]
    async fn missing_record_counts_as_failure_and_batch_continues() {
        let store = ReservationStore::open(test_wal_path("sweep_missing.wal")).unwrap();
        let real = hold("C1", NOW + DAY_MS, NOW + TTL);
        store.insert_if_no_overlap(real.clone(), NOW).await.unwrap();
        let ghost = hold("C9", NOW + DAY_MS, NOW + TTL);

        let report = expire_batch(&store, &[ghost, real.clone()], NOW + TTL).await;
        assert_eq!(report, SweepReport { expired: 1, skipped: 0, failed: 1 });
        assert_eq!(store.get(&real.id).await.unwrap().status, ReservationStatus::Expired);
    }

    #[tokio::test]
    async fn sweeper_task_converges_and_stops() {
        let store = Arc::new(ReservationStore::open(test_wal_path("sweep_task.wal")).unwrap());
        let clock = Arc::new(ManualClock::new(NOW));
        let r = hold("C1", NOW + DAY_MS, NOW + TTL);
        store.insert_if_no_overlap(r.clone(), NOW).await.unwrap();

        let token = CancellationToken::new();
        let task = tokio::spawn(run_sweeper(
            store.clone(),
            clock.clone(),
            Duration::from_millis(10),
            token.clone(),
        ));

        clock.advance(TTL);
        wait_for(async || store.get(&r.id).await.unwrap().status == ReservationStatus::Expired).await;

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("sweeper should stop on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn compactor_runs_past_threshold() {
        let path = test_wal_path("compactor.wal");
        let store = Arc::new(ReservationStore::open(path.clone()).unwrap());
        for i in 0..4 {
            let r = hold("C1", NOW + DAY_MS + i * HOUR_MS, NOW + TTL);
            store.insert_if_no_overlap(r, NOW).await.unwrap();
        }
        assert_eq!(store.wal_appends_since_compact().await, 4);

        let token = CancellationToken::new();
        let task = tokio::spawn(run_compactor(
            store.clone(),
            3,
            Duration::from_millis(10),
            token.clone(),
        ));
        wait_for(async || store.wal_appends_since_compact().await == 0).await;
        token.cancel();
        task.await.unwrap();

        drop(store);
        let reopened = ReservationStore::open(path).unwrap();
        assert_eq!(reopened.reservation_count(), 4);
    }
}
