mod availability;
mod eligibility;
mod error;
mod mutations;
mod queries;
mod rules;
mod store;

pub use availability::order_and_page;
pub use error::{EngineError, ErrorKind};
pub use store::{BookingStore, SharedItemState};

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::info;

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

use store::event_item_id;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// every append already queued when the first one arrives shares its fsync.
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
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so buffered bytes of a failed batch
    // never leak into the next one.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub struct Engine {
    pub store: BookingStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn Clock>,
    /// Serializes user/item creation so uniqueness checks and their writes don't interleave.
    pub(super) directory_lock: Mutex<()>,
}

impl Engine {
    /// Replay the WAL at `wal_path`, start the writer task, and compact the log
    /// if replay found more than `compact_threshold` events.
    pub async fn open(
        wal_path: &Path,
        clock: Arc<dyn Clock>,
        compact_threshold: u64,
    ) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: BookingStore::new(),
            wal_tx,
            clock,
            directory_lock: Mutex::new(()),
        };

        // We're the sole owner of every item lock here, so try_write never contends.
        for event in &events {
            match event_item_id(event) {
                Some(item_id) => {
                    let Some(st) = engine.store.item(&item_id) else {
                        tracing::warn!("replay: event for unknown item {item_id}, skipped");
                        continue;
                    };
                    let mut guard = st
                        .try_write()
                        .map_err(|_| io::Error::other("replay: contended item state"))?;
                    engine.store.apply_to_item(&mut guard, event);
                }
                None => engine.store.apply_directory_event(event),
            }
        }
        info!("replayed {} events from {}", events.len(), wal_path.display());

        if events.len() as u64 > compact_threshold {
            engine
                .compact_wal()
                .await
                .map_err(|e| io::Error::other(e.to_string()))?;
        }

        Ok(engine)
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply for an item-scoped event. Caller holds the item's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        st: &mut ItemState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_to_item(st, event);
        Ok(())
    }

    /// WAL-append + apply for a directory event. Caller holds `directory_lock`.
    pub(super) async fn persist_directory(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_directory_event(event);
        Ok(())
    }

    /// Lookup booking → item, get the item's state, acquire its write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &ulid::Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ItemState>, EngineError> {
        let item_id = self
            .store
            .item_for_booking(booking_id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;
        let st = self
            .store
            .item(&item_id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;
        Ok(st.write_owned().await)
    }
}
