//! Background write queue
//!
//! Mutations submitted by the viewer return immediately and are applied on a
//! runtime owned by the queue. Jobs flow through a single dispatcher task
//! into one lane per document key:
//!
//! ```text
//! submit() ──► dispatcher ──► lane "a_pdf_10" ──► spawn_blocking(store.upsert)
//!                         └─► lane "b_pdf_99" ──► spawn_blocking(store.delete)
//! ```
//!
//! A lane runs one job at a time, so jobs for a key are applied in
//! submission order while different keys proceed concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{EventBus, StoreEvent};
use crate::models::AnnotationRecord;
use crate::storage::StorageResult;
use crate::store::{lock_key, RecordStore};

/// A mutation waiting to be applied
#[derive(Debug, Clone)]
pub enum WriteJob {
    Upsert {
        key: String,
        record: AnnotationRecord,
        display_name: String,
    },
    Delete {
        key: String,
        id: Uuid,
    },
}

impl WriteJob {
    pub fn key(&self) -> &str {
        match self {
            WriteJob::Upsert { key, .. } | WriteJob::Delete { key, .. } => key,
        }
    }

    fn apply(self, store: &RecordStore) -> StorageResult<()> {
        match self {
            WriteJob::Upsert {
                key,
                record,
                display_name,
            } => store.upsert(&key, record, &display_name),
            WriteJob::Delete { key, id } => store.delete(&key, id).map(|_| ()),
        }
    }
}

/// Count of submitted jobs that have not finished
#[derive(Debug, Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn begin(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let _idle = self
            .idle
            .wait_while(count, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn get(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fire-and-forget executor for store mutations
pub struct WriteQueue {
    runtime: Option<Runtime>,
    tx: mpsc::UnboundedSender<WriteJob>,
    pending: Arc<Pending>,
}

impl WriteQueue {
    /// Start a queue applying jobs to `store` with `workers` threads
    pub fn start(
        store: Arc<RecordStore>,
        events: EventBus,
        workers: usize,
    ) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .max_blocking_threads(workers)
            .thread_name("marginalia-writer")
            .enable_all()
            .build()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending::default());

        runtime.spawn(dispatch(rx, store, events, Arc::clone(&pending)));
        debug!("Write queue started with {} workers", workers);

        Ok(Self {
            runtime: Some(runtime),
            tx,
            pending,
        })
    }

    /// Queue a job; never blocks on I/O
    pub fn submit(&self, job: WriteJob) {
        self.pending.begin();
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job) {
            self.pending.finish();
            warn!("Write queue is closed; dropping job for {:?}", job.key());
        }
    }

    /// Block until every submitted job has been applied
    pub fn flush(&self) {
        self.pending.wait_idle();
    }

    /// Jobs submitted but not yet finished
    pub fn pending(&self) -> usize {
        self.pending.get()
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        self.flush();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Route jobs to their key's lane, creating lanes on first use
async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
    store: Arc<RecordStore>,
    events: EventBus,
    pending: Arc<Pending>,
) {
    // Keyed like the store's locks: keys sharing a file share a lane
    let mut lanes: HashMap<String, mpsc::UnboundedSender<WriteJob>> = HashMap::new();

    while let Some(job) = rx.recv().await {
        let lane = lanes.entry(lock_key(job.key())).or_insert_with(|| {
            spawn_lane(Arc::clone(&store), events.clone(), Arc::clone(&pending))
        });

        if let Err(mpsc::error::SendError(job)) = lane.send(job) {
            warn!("Write lane for {:?} has stopped", job.key());
            pending.finish();
        }
    }
}

/// Apply one key's jobs strictly one after another
fn spawn_lane(
    store: Arc<RecordStore>,
    events: EventBus,
    pending: Arc<Pending>,
) -> mpsc::UnboundedSender<WriteJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let key = job.key().to_string();
            let store = Arc::clone(&store);

            match tokio::task::spawn_blocking(move || job.apply(&store)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Annotation write for {:?} failed: {}", key, e);
                    events.emit(StoreEvent::WriteFailed {
                        key,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Annotation write for {:?} panicked: {}", key, e);
                    events.emit(StoreEvent::WriteFailed {
                        key,
                        error: e.to_string(),
                    });
                }
            }
            pending.finish();
        }
    });

    tx
}
