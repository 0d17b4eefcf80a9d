//! Queued writer: batches aircraft snapshots and positions to the store on
//! a timer, off the ingest path.
//!
//! - `push()` never blocks. Before `start()` (and after `stop()`) items are
//!   dropped; once started the queue is unbounded.
//! - Each tick drains at most `batch_size` items, writes them one by one,
//!   and publishes a [`BatchWritten`] summary. A failed item is logged and
//!   skipped.
//! - `stop()` discards anything still queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::TimeDelta;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sbs_core::{AircraftNotification, Subscriber, SubscriberError};

use crate::error::StoreError;
use crate::store::{AircraftFilter, AircraftRecord, AircraftStore, PositionRecord};
use crate::timer::Ticker;

/// Times a position is re-queued waiting for its aircraft row before it is
/// dropped.
pub const MAX_POSITION_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteItem {
    Aircraft(AircraftRecord),
    Position { record: PositionRecord, attempts: u32 },
}

impl WriteItem {
    pub fn position(record: PositionRecord) -> Self {
        WriteItem::Position {
            record,
            attempts: 0,
        }
    }
}

/// Summary of one flush.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchWritten {
    pub initial_queue_size: usize,
    pub final_queue_size: usize,
    pub written: usize,
    pub requeued: usize,
    pub failed: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub interval: Duration,
    pub batch_size: usize,
    /// An unlocked row older than this (relative to a new snapshot) is
    /// closed and a fresh row started.
    pub time_to_lock: Duration,
}

enum Outcome {
    Written,
    Requeued,
    Dropped,
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

pub struct QueuedWriter {
    store: Arc<dyn AircraftStore>,
    settings: WriterSettings,
    time_to_lock: TimeDelta,
    queue: Mutex<VecDeque<WriteItem>>,
    started: AtomicBool,
    dropped: AtomicU64,
    batches: broadcast::Sender<BatchWritten>,
}

impl QueuedWriter {
    pub fn new(store: Arc<dyn AircraftStore>, settings: WriterSettings) -> Self {
        let (batches, _) = broadcast::channel(64);
        let time_to_lock = TimeDelta::from_std(settings.time_to_lock).unwrap_or(TimeDelta::MAX);
        QueuedWriter {
            store,
            settings,
            time_to_lock,
            queue: Mutex::new(VecDeque::new()),
            started: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            batches,
        }
    }

    pub fn settings(&self) -> &WriterSettings {
        &self.settings
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<WriteItem>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe_batches(&self) -> broadcast::Receiver<BatchWritten> {
        self.batches.subscribe()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn queue_len(&self) -> usize {
        self.queue().len()
    }

    /// Items dropped because the writer was not started.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Enqueue an item. Returns `false` (and drops it) if not started.
    pub fn push(&self, item: WriteItem) -> bool {
        if !self.is_started() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.queue().push_back(item);
        true
    }

    /// Begin accepting items. Every unlocked row already in the store is
    /// queued (ahead of anything pushed meanwhile) to be written back locked.
    /// If the store cannot list them the writer stays stopped.
    pub async fn start(&self) -> Result<usize, StoreError> {
        let open = self.store.list_aircraft(AircraftFilter::unlocked()).await?;
        let count = open.len();
        {
            let mut queue = self.queue();
            for mut row in open.into_iter().rev() {
                row.locked = true;
                queue.push_front(WriteItem::Aircraft(row));
            }
        }
        self.started.store(true, Ordering::Release);
        info!(relocked = count, "writer started");
        Ok(count)
    }

    /// Stop accepting items and discard the queue.
    pub fn stop(&self) {
        self.started.store(false, Ordering::Release);
        let discarded = {
            let mut queue = self.queue();
            let n = queue.len();
            queue.clear();
            n
        };
        if discarded > 0 {
            warn!(discarded, "writer stopped with unflushed items");
        } else {
            info!("writer stopped");
        }
    }

    /// Drain and write up to `batch_size` items.
    pub async fn flush_batch(&self) -> BatchWritten {
        let started = Instant::now();
        let (initial_queue_size, batch) = {
            let mut queue = self.queue();
            let initial = queue.len();
            let n = self.settings.batch_size.min(initial);
            (initial, queue.drain(..n).collect::<Vec<_>>())
        };

        let mut written = 0;
        let mut requeued = 0;
        let mut failed = 0;
        for item in batch {
            match self.write_item(item).await {
                Ok(Outcome::Written) => written += 1,
                Ok(Outcome::Requeued) => requeued += 1,
                Ok(Outcome::Dropped) => failed += 1,
                Err(e) => {
                    failed += 1;
                    warn!(error = %e, "write failed, skipping item");
                }
            }
        }

        let summary = BatchWritten {
            initial_queue_size,
            final_queue_size: self.queue_len(),
            written,
            requeued,
            failed,
            duration: started.elapsed(),
        };
        debug!(
            initial = summary.initial_queue_size,
            remaining = summary.final_queue_size,
            written,
            failed,
            elapsed_ms = summary.duration.as_millis() as u64,
            "batch written"
        );
        let _ = self.batches.send(summary.clone());
        summary
    }

    async fn write_item(&self, item: WriteItem) -> Result<Outcome, StoreError> {
        match item {
            WriteItem::Aircraft(record) => {
                self.write_aircraft(record).await?;
                Ok(Outcome::Written)
            }
            WriteItem::Position { record, attempts } => self.write_position(record, attempts).await,
        }
    }

    async fn write_aircraft(&self, mut record: AircraftRecord) -> Result<(), StoreError> {
        // Rows relocked by start() already carry their id.
        if record.id.is_some() {
            self.store.write_aircraft(record).await?;
            return Ok(());
        }

        let open = self
            .store
            .get_aircraft(AircraftFilter::unlocked_for(&record.address))
            .await?;

        if let Some(mut row) = open {
            if record.last_seen - row.last_seen >= self.time_to_lock {
                debug!(address = %record.address, id = ?row.id, "closing old row");
                row.locked = true;
                self.store.write_aircraft(row).await?;
                record.id = None;
            } else {
                record.id = row.id;
                record.first_seen = record.first_seen.min(row.first_seen);
            }
        }

        self.store.write_aircraft(record).await?;
        Ok(())
    }

    async fn write_position(&self, mut record: PositionRecord, attempts: u32) -> Result<Outcome, StoreError> {
        let aircraft = self
            .store
            .get_aircraft(AircraftFilter::for_address(&record.address))
            .await?;

        match aircraft.and_then(|a| a.id) {
            Some(id) => {
                record.aircraft_id = Some(id);
                self.store.write_position(record).await?;
                Ok(Outcome::Written)
            }
            None if attempts + 1 < MAX_POSITION_ATTEMPTS => {
                let requeued = self.push(WriteItem::Position {
                    record,
                    attempts: attempts + 1,
                });
                Ok(if requeued { Outcome::Requeued } else { Outcome::Dropped })
            }
            None => {
                warn!(address = %record.address, "no aircraft row for position, dropping");
                Ok(Outcome::Dropped)
            }
        }
    }

    /// Start, then flush on every tick until cancelled. Stops (discarding
    /// the queue) on the way out.
    pub async fn run<T: Ticker>(
        self: Arc<Self>,
        mut ticker: T,
        token: CancellationToken,
    ) -> Result<(), StoreError> {
        if let Err(e) = self.start().await {
            warn!(error = %e, "writer failed to start");
            self.stop();
            return Err(e);
        }
        ticker.start();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    ticker.stop();
                    self.flush_batch().await;
                    ticker.start();
                }
            }
        }
        ticker.stop();
        self.stop();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tracker bridge
// ---------------------------------------------------------------------------

/// Queues a snapshot for every lifecycle event, plus the position when the
/// event carries a new fix.
pub struct WriterSubscriber {
    writer: Arc<QueuedWriter>,
}

impl WriterSubscriber {
    pub fn new(writer: Arc<QueuedWriter>) -> Self {
        WriterSubscriber { writer }
    }
}

impl Subscriber for WriterSubscriber {
    fn name(&self) -> &str {
        "writer"
    }

    fn notify(&self, n: &AircraftNotification) -> Result<(), SubscriberError> {
        self.writer
            .push(WriteItem::Aircraft(AircraftRecord::from(&n.aircraft)));
        if n.has_new_position() {
            if let Some(position) = PositionRecord::from_aircraft(&n.aircraft) {
                self.writer.push(WriteItem::position(position));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
