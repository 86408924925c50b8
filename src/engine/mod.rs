mod admission;
mod error;
mod lifecycle;
mod queries;
mod store;

pub use admission::{find_conflict, validate, Admitted, Candidate};
pub use error::{EngineError, Rejection, ValidationError};
pub use lifecycle::AUTO_REJECT_REASON;
pub use store::{DaySheet, ReservationStore, SharedDaySheet};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::directory::Directory;
use crate::model::*;
use crate::notify::{NotificationRequest, NotificationSink};
use crate::observability::{NOTIFY_FAILURES_TOTAL, WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::registry::ResourceRegistry;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the shared outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    info!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<Pending>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = flush_batch(wal, &batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so partial bytes do not leak into the next batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// The engine's external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn ResourceRegistry>,
    pub directory: Arc<dyn Directory>,
    pub sink: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

/// Reservation conflict-resolution engine.
///
/// Every mutation holds the commit gate shared and its day partition's write lock
/// across validation, WAL append and in-memory apply. Compaction holds the gate
/// exclusively, so its snapshot always matches what the log contains.
pub struct Engine {
    store: ReservationStore,
    wal_tx: mpsc::Sender<WalCommand>,
    commit_gate: RwLock<()>,
    registry: Arc<dyn ResourceRegistry>,
    directory: Arc<dyn Directory>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must run inside a
    /// tokio runtime.
    pub fn new(wal_path: PathBuf, collaborators: Collaborators) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let store = ReservationStore::from_events(&events);
        info!(
            "replayed {} events ({} reservations) from {}",
            events.len(),
            store.len(),
            wal_path.display()
        );

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let Collaborators { registry, directory, sink, clock } = collaborators;
        Ok(Self {
            store,
            wal_tx,
            commit_gate: RwLock::new(()),
            registry,
            directory,
            sink,
            clock,
        })
    }

    pub fn registry(&self) -> &dyn ResourceRegistry {
        self.registry.as_ref()
    }

    pub fn reservation_count(&self) -> usize {
        self.store.len()
    }

    async fn wal_request<T>(&self, cmd: WalCommand, rx: oneshot::Receiver<T>) -> Result<T, EngineError> {
        self.wal_tx.send(cmd).await.map_err(|_| {
            error!("WAL writer shut down");
            EngineError::Storage("WAL writer shut down".into())
        })?;
        rx.await.map_err(|_| {
            error!("WAL writer dropped response");
            EngineError::Storage("WAL writer dropped response".into())
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        let cmd = WalCommand::Append { event: event.clone(), response: tx };
        self.wal_request(cmd, rx).await?.map_err(|e| {
            error!("WAL append for {} failed: {e}", event.key());
            EngineError::Storage(e.to_string())
        })
    }

    /// WAL append, then apply. Memory is untouched if the append fails.
    pub(super) async fn persist_and_apply(&self, sheet: &mut DaySheet, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(sheet, event);
        Ok(())
    }

    /// Lookup reservation → day partition, acquire its write lock.
    pub(super) async fn resolve_write(&self, id: &Ulid) -> Result<OwnedRwLockWriteGuard<DaySheet>, EngineError> {
        let key = self.store.key_of(id).ok_or(EngineError::NotFound("reservation", *id))?;
        let sheet = self.store.sheet(&key).ok_or(EngineError::NotFound("reservation", *id))?;
        Ok(sheet.write_owned().await)
    }

    /// Best-effort delivery, called after locks are released. Failures are logged
    /// and counted; the transition that produced them stands.
    pub(super) async fn deliver(&self, requests: Vec<NotificationRequest>) {
        for request in requests {
            let recipient = request.recipient.clone();
            if let Err(e) = self.sink.notify(request).await {
                warn!("notification to {recipient} failed: {e}");
                metrics::counter!(NOTIFY_FAILURES_TOTAL).increment(1);
            }
        }
    }

    /// Rewrite the WAL as one snapshot event per reservation.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.store.snapshot().await;
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::Compact { events, response: tx }, rx)
            .await?
            .map_err(|e| {
                error!("WAL compaction failed: {e}");
                EngineError::Storage(e.to_string())
            })?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::AppendsSinceCompact { response: tx }, rx)
            .await
            .unwrap_or(0)
    }
}
