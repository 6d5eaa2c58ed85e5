use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bson::{Document, doc};
use mongodb::Database;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Session-final writes outrank periodic checkpoints: a finalization enqueued
/// moments after a periodic save is still serviced first.
pub const PRIORITY_FINAL: u8 = 10;
pub const PRIORITY_PERIODIC: u8 = 1;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

const MAX_CONCURRENCY: usize = 3;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Upsert,
    Update,
}

/// One durable write. For `Upsert`, `insert` holds the create-only columns
/// and `update` the streaming columns; keys present in both are taken from
/// `update`.
#[derive(Debug, Clone)]
pub struct WriteOp {
    pub id: String,
    pub kind: WriteKind,
    pub collection: String,
    pub filter: Document,
    pub insert: Document,
    pub update: Document,
    pub priority: u8,
    pub max_retries: u32,
}

struct QueuedOp {
    op: WriteOp,
    seq: u64,
    retries: u32,
    ready_at: Option<Instant>,
}

impl PartialEq for QueuedOp {
    fn eq(&self, other: &Self) -> bool {
        self.op.priority == other.op.priority && self.seq == other.seq
    }
}

impl Eq for QueuedOp {}

impl PartialOrd for QueuedOp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedOp {
    // Max-heap: higher priority first, ties FIFO by enqueue sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        self.op
            .priority
            .cmp(&other.op.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedOp>,
    next_seq: u64,
}

/// In-process priority queue decoupling the audio path from persistence.
///
/// A dispatcher polls every 100 ms and launches up to three concurrent
/// workers; each op id is in flight at most once. Transient datastore errors
/// retry with exponential backoff; anything else is logged and dropped, so
/// the audio path never blocks on persistence.
pub struct DbWriteQueue {
    db: Database,
    state: Mutex<QueueState>,
    in_flight: Mutex<HashSet<String>>,
}

impl DbWriteQueue {
    pub fn new(db: Database) -> Arc<Self> {
        let queue = Arc::new(Self {
            db,
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            in_flight: Mutex::new(HashSet::new()),
        });

        let weak = Arc::downgrade(&queue);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(POLL_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let Some(queue) = weak.upgrade() else { break };
                queue.dispatch_ready().await;
            }
            debug!("write queue dispatcher exiting");
        });

        queue
    }

    pub async fn enqueue(&self, op: WriteOp) {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        debug!(id = %op.id, priority = op.priority, "write op enqueued");
        state.heap.push(QueuedOp {
            op,
            seq,
            retries: 0,
            ready_at: None,
        });
    }

    /// Blocks until both the queue and the in-flight set are empty. Called
    /// on graceful shutdown.
    pub async fn flush(&self) {
        loop {
            {
                // Lock order: state before in_flight, everywhere.
                let state = self.state.lock().await;
                let in_flight = self.in_flight.lock().await;
                if state.heap.is_empty() && in_flight.is_empty() {
                    return;
                }
            }
            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }
    }

    async fn dispatch_ready(self: Arc<Self>) {
        let mut state = self.state.lock().await;
        let mut in_flight = self.in_flight.lock().await;
        let now = Instant::now();
        let mut deferred = Vec::new();

        while in_flight.len() < MAX_CONCURRENCY {
            let Some(queued) = state.heap.pop() else { break };

            let waiting_for_backoff = queued.ready_at.is_some_and(|t| t > now);
            if waiting_for_backoff || in_flight.contains(&queued.op.id) {
                deferred.push(queued);
                continue;
            }

            in_flight.insert(queued.op.id.clone());
            tokio::spawn(Arc::clone(&self).run_op(queued));
        }

        for queued in deferred {
            state.heap.push(queued);
        }
    }

    async fn run_op(self: Arc<Self>, mut queued: QueuedOp) {
        let id = queued.op.id.clone();

        match self.execute(&queued.op).await {
            Ok(()) => {
                debug!(%id, "write op completed");
                self.finish(&id, None).await;
            }
            Err(e) => {
                let message = e.to_string();
                if is_transient(&message) && queued.retries < queued.op.max_retries {
                    queued.retries += 1;
                    let backoff = Duration::from_millis(1000u64 << (queued.retries - 1));
                    warn!(
                        %id,
                        attempt = queued.retries,
                        backoff_ms = backoff.as_millis() as u64,
                        %message,
                        "transient write failure, retrying"
                    );
                    queued.ready_at = Some(Instant::now() + backoff);
                    self.finish(&id, Some(queued)).await;
                } else {
                    error!(%id, retries = queued.retries, %message, "dropping write op");
                    self.finish(&id, None).await;
                }
            }
        }
    }

    /// Requeues (if retrying) and clears the in-flight entry in one critical
    /// section so `flush` never observes the op in neither place.
    async fn finish(&self, id: &str, requeue: Option<QueuedOp>) {
        let mut state = self.state.lock().await;
        let mut in_flight = self.in_flight.lock().await;
        if let Some(queued) = requeue {
            state.heap.push(queued);
        }
        in_flight.remove(id);
    }

    async fn execute(&self, op: &WriteOp) -> Result<(), mongodb::error::Error> {
        let collection = self.db.collection::<Document>(&op.collection);
        match op.kind {
            WriteKind::Create => {
                collection.insert_one(op.insert.clone()).await?;
            }
            WriteKind::Update => {
                collection
                    .update_one(op.filter.clone(), doc! { "$set": op.update.clone() })
                    .await?;
            }
            WriteKind::Upsert => {
                collection
                    .update_one(op.filter.clone(), build_upsert_update(&op.insert, &op.update))
                    .upsert(true)
                    .await?;
            }
        }
        Ok(())
    }
}

fn build_upsert_update(insert: &Document, update: &Document) -> Document {
    let mut set_on_insert = Document::new();
    for (key, value) in insert.iter() {
        // The primary key comes from the filter on insert
        if key == "_id" || update.contains_key(key) {
            continue;
        }
        set_on_insert.insert(key, value.clone());
    }

    let mut combined = doc! { "$set": update.clone() };
    if !set_on_insert.is_empty() {
        combined.insert("$setOnInsert", set_on_insert);
    }
    combined
}

fn is_transient(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    [
        "connection refused",
        "connection reset",
        "failed to lookup",
        "dns error",
        "timed out",
        "timeout",
        "deadlock",
    ]
    .iter()
    .any(|needle| m.contains(needle))
}
