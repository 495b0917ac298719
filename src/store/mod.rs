//! Reservation store: per-court state behind `RwLock`s, made durable by a group-commit WAL.
//!
//! All writes go through [`ReservationStore::insert_if_no_overlap`] and
//! [`ReservationStore::compare_and_set_status`]. Both append to the WAL and
//! apply in memory while holding the court's write lock, so the overlap check
//! and the write are indivisible for that court.

mod error;
mod mutations;
mod overlap;
mod queries;

pub use error::StoreError;
pub(crate) use overlap::validate_span;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::limits::MAX_RESERVATIONS_PER_COURT;
use crate::model::*;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::wal::Wal;

pub type SharedCourtState = Arc<RwLock<CourtState>>;

type Ack = oneshot::Sender<io::Result<()>>;

enum WalCommand {
    Append { event: Event, response: Ack },
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the WAL. Appends that queue up while a flush is running are committed
/// together with a single fsync; control commands flush pending appends first.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<(Event, Ack)> = Vec::new();
    while let Some(first) = rx.recv().await {
        let mut next = Some(first);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { event, response } => {
                    batch.push((event, response));
                    next = rx.try_recv().ok();
                }
                control => {
                    commit_batch(&mut wal, &mut batch);
                    handle_control(&mut wal, control);
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, Ack)>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // The batch is all-or-nothing: one unencodable event fails every caller in it.
    let result = match result {
        Ok(()) => wal.commit(),
        Err(e) => {
            wal.discard_pending();
            Err(e)
        }
    };

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let _ = tx.send(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Apply an event to the court it belongs to. The caller holds the court's write lock.
/// A reservation already known by id is not recorded twice.
fn apply_event(
    court: &mut CourtState,
    event: &Event,
    by_id: &DashMap<ReservationId, CourtId>,
    by_user: &DashMap<UserId, Vec<ReservationId>>,
) {
    match event {
        Event::ReservationRecorded { reservation } => {
            if by_id.contains_key(&reservation.id) {
                tracing::warn!(reservation = %reservation.id, "duplicate reservation record ignored");
                return;
            }
            by_id.insert(reservation.id, reservation.court_id.clone());
            by_user
                .entry(reservation.user_id.clone())
                .or_default()
                .push(reservation.id);
            court.insert(reservation.clone());
        }
        Event::StatusChanged {
            id,
            to,
            clear_hold_expiry,
            ..
        } => {
            if let Some(r) = court.get_mut(id) {
                r.status = *to;
                if *clear_hold_expiry {
                    r.hold_expires_at = None;
                }
            }
        }
    }
}

pub struct ReservationStore {
    courts: DashMap<CourtId, SharedCourtState>,
    /// Reservation id → court id.
    by_id: DashMap<ReservationId, CourtId>,
    by_user: DashMap<UserId, Vec<ReservationId>>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared; compaction takes it exclusively so no append
    /// can slip between the snapshot and the log swap.
    compaction_gate: RwLock<()>,
    retry: RetryPolicy,
    court_limit: usize,
    #[cfg(test)]
    wal_faults: Arc<std::sync::atomic::AtomicUsize>,
}

impl ReservationStore {
    /// Replay the WAL at `wal_path` and start its writer task. Must run inside a Tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        Self::open_with_retry(wal_path, RetryPolicy::default())
    }

    pub fn open_with_retry(wal_path: PathBuf, retry: RetryPolicy) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;
        #[cfg(test)]
        let wal_faults = wal.fault_handle();
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let by_id = DashMap::new();
        let by_user = DashMap::new();
        let mut courts: HashMap<CourtId, CourtState> = HashMap::new();
        for event in &events {
            let court_id = event.court_id().to_string();
            let court = courts
                .entry(court_id.clone())
                .or_insert_with(|| CourtState::new(court_id));
            apply_event(court, event, &by_id, &by_user);
        }
        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            courts = courts.len(),
            "reservation store opened"
        );

        Ok(Self {
            courts: courts
                .into_iter()
                .map(|(id, cs)| (id, Arc::new(RwLock::new(cs))))
                .collect(),
            by_id,
            by_user,
            wal_tx,
            compaction_gate: RwLock::new(()),
            retry,
            court_limit: MAX_RESERVATIONS_PER_COURT,
            #[cfg(test)]
            wal_faults,
        })
    }

    /// Cap on live, unfinished reservations per court.
    pub fn with_court_limit(mut self, limit: usize) -> Self {
        self.court_limit = limit;
        self
    }

    async fn send_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("writer shut down"))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("writer dropped response"))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Durable append, retried with backoff on I/O failure.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        retry_with_backoff(
            &self.retry,
            "wal_append",
            || self.send_append(event),
            StoreError::is_transient,
        )
        .await
    }

    /// WAL-append then apply. Nothing changes in memory unless the append is durable.
    async fn persist_and_apply(
        &self,
        court: &mut CourtState,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_event(court, event, &self.by_id, &self.by_user);
        Ok(())
    }

    /// Fail the next `n` WAL commits midway through their write.
    #[cfg(test)]
    pub(crate) fn fail_next_wal_commits(&self, n: usize) {
        self.wal_faults.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    fn court(&self, court_id: &str) -> Option<SharedCourtState> {
        self.courts.get(court_id).map(|e| e.value().clone())
    }

    fn court_or_create(&self, court_id: &str) -> SharedCourtState {
        if let Some(court) = self.court(court_id) {
            return court;
        }
        self.courts
            .entry(court_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(CourtState::new(court_id.to_string()))))
            .value()
            .clone()
    }

    fn court_for(&self, id: &ReservationId) -> Result<SharedCourtState, StoreError> {
        let court_id = self
            .by_id
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(*id))?;
        self.court(&court_id).ok_or(StoreError::NotFound(*id))
    }
}
