//! The long-running loops behind `sbs track`: ingest (reader lines into the
//! tracker) and sweep (staleness eviction on a timer).

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sbs_core::Tracker;

use crate::timer::Ticker;

/// Receipt time for ingested lines. Feed timestamps are local wall-clock.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Feed every published line into the tracker until cancelled or the
/// reader goes away. Returns the number of lines ingested.
pub async fn run_ingest<C>(
    tracker: Arc<Tracker>,
    mut lines: broadcast::Receiver<String>,
    token: CancellationToken,
    clock: C,
) -> u64
where
    C: Fn() -> NaiveDateTime + Send,
{
    let mut ingested = 0u64;
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.recv() => line,
        };
        match line {
            Ok(line) => {
                tracker.ingest_line(&line, clock());
                ingested += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "ingest fell behind the reader, lines skipped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!(ingested, "ingest loop stopped");
    ingested
}

/// Sweep stale aircraft on every tick. The ticker is stopped while a sweep
/// runs so sweeps never overlap.
pub async fn run_sweep<T, C>(tracker: Arc<Tracker>, mut ticker: T, token: CancellationToken, clock: C)
where
    T: Ticker,
    C: Fn() -> NaiveDateTime + Send,
{
    ticker.start();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                ticker.stop();
                let evicted = tracker.sweep(clock());
                if evicted > 0 {
                    info!(evicted, remaining = tracker.len(), "swept stale aircraft");
                }
                ticker.start();
            }
        }
    }
    ticker.stop();
    debug!("sweep loop stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
