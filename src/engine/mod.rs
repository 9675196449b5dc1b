mod availability;
mod booking;
mod error;
mod mutations;
mod queries;
mod selector;
mod store;
mod validate;

pub use availability::{check_eligibility, first_overlap, free_subrange, free_window, is_available, overlaps};
pub use booking::{apply_replacement, plan_booking, split_window, Replacement};
pub use error::{EngineError, ErrorKind};
pub use selector::{find_available, rank_kennels};
pub use store::Store;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use store::event_kennel_id;

pub type SharedKennelState = Arc<RwLock<KennelState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
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
        WalCommand::Append { event, response } => {
            // Not routed here by the writer loop; commit it on its own.
            commit_batch(wal, &mut vec![(event, response)]);
        }
    }
}

/// The kennel booking engine.
///
/// Every mutation is appended to the WAL before it becomes visible. Writers
/// on the same kennel serialize on that kennel's `RwLock`; kennels are
/// independent of each other.
pub struct Engine {
    pub(super) store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes owner, dog and kennel registration so uniqueness checks
    /// and the WAL append happen as one step.
    pub(super) registry: Mutex<()>,
    /// Mutations hold a read guard from before their kennel lock until the
    /// event is applied. Compaction takes the write guard so its snapshot
    /// never misses an appended event.
    pub(super) commit_gate: RwLock<()>,
    /// Appends since the last compaction that trigger an automatic one.
    /// Zero disables automatic compaction.
    pub(super) compact_threshold: u64,
}

impl Engine {
    pub fn new(wal_path: PathBuf, compact_threshold: u64) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Store::new();
        // Kennels are rebuilt unshared first and published once replay is done.
        let mut kennels: HashMap<Ulid, KennelState> = HashMap::new();
        let mut order: Vec<Ulid> = Vec::new();
        for event in events {
            match event {
                Event::OwnerCreated { owner } => store.insert_owner(owner),
                Event::DogAdded { dog } => store.insert_dog(dog),
                Event::KennelRegistered {
                    id,
                    host_id,
                    name,
                    price,
                    size,
                    has_toys,
                    allow_unsocial,
                    registered_at,
                } => {
                    let ks = KennelState::new(id, host_id, name, price, size, has_toys, allow_unsocial, registered_at);
                    if kennels.insert(id, ks).is_none() {
                        order.push(id);
                    }
                }
                other => {
                    if let Some(kennel_id) = event_kennel_id(&other)
                        && let Some(ks) = kennels.get_mut(&kennel_id)
                    {
                        store.apply_schedule_event(ks, &other);
                    }
                }
            }
        }
        for id in order {
            if let Some(ks) = kennels.remove(&id) {
                store.insert_kennel(ks);
            }
        }

        tracing::debug!(
            owners = store.owner_count(),
            dogs = store.dog_count(),
            kennels = store.kennel_count(),
            "replayed WAL {}",
            wal_path.display()
        );

        Ok(Self {
            store,
            wal_tx,
            registry: Mutex::new(()),
            commit_gate: RwLock::new(()),
            compact_threshold,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn get_kennel(&self, id: &Ulid) -> Option<SharedKennelState> {
        self.store.get_kennel(id)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// WAL-append then apply to a kennel the caller holds the write lock on.
    pub(super) async fn persist_and_apply(&self, ks: &mut KennelState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_schedule_event(ks, event);
        Ok(())
    }

    /// WAL-append a registry event. Caller holds the registry lock and the
    /// commit gate; the caller inserts the new record afterwards.
    pub(super) async fn persist_registration(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await
    }

    /// The dog, provided it exists and belongs to `owner_id`.
    pub(super) fn resolve_dog(&self, owner_id: Ulid, dog_id: Ulid) -> Result<Dog, EngineError> {
        if self.store.get_owner(&owner_id).is_none() {
            return Err(EngineError::OwnerNotFound(owner_id));
        }
        match self.store.get_dog(&dog_id) {
            Some(dog) if dog.owner_id == owner_id => Ok(dog),
            _ => Err(EngineError::DogNotFound(dog_id)),
        }
    }
}
