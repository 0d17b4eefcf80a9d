//! Tick sources for the sweep and persistence loops.
//!
//! Loops own a [`Ticker`] and await `tick()`. A stopped ticker never
//! resolves, so a loop selecting on it only wakes for cancellation.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[async_trait]
pub trait Ticker: Send {
    fn start(&mut self);

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Resolve at the next tick. Pending forever while stopped.
    async fn tick(&mut self);
}

// ---------------------------------------------------------------------------
// Wall-clock interval
// ---------------------------------------------------------------------------

/// Fires every `period`, first tick one period after `start()`.
pub struct IntervalTicker {
    period: Duration,
    interval: Option<Interval>,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        IntervalTicker {
            period,
            interval: None,
        }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    fn start(&mut self) {
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    fn stop(&mut self) {
        self.interval = None;
    }

    fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Manual ticker
// ---------------------------------------------------------------------------

/// Ticks only when its [`ManualTrigger`] fires. Triggers sent while stopped
/// are held until the ticker is started again.
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
    running: bool,
}

#[derive(Clone)]
pub struct ManualTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTrigger {
    pub fn fire(&self) {
        let _ = self.tx.send(());
    }
}

impl ManualTicker {
    pub fn new() -> (Self, ManualTrigger) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ManualTicker { rx, running: false }, ManualTrigger { tx })
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn tick(&mut self) {
        if self.running && self.rx.recv().await.is_some() {
            return;
        }
        std::future::pending::<()>().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticks_after_period() {
        let mut ticker = IntervalTicker::new(Duration::from_secs(5));
        ticker.start();
        let started = Instant::now();
        ticker.tick().await;
        assert!(started.elapsed() >= Duration::from_secs(5));
        ticker.tick().await;
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_interval_never_ticks() {
        let mut ticker = IntervalTicker::new(Duration::from_millis(10));
        assert!(!ticker.is_running());
        let waited = tokio::time::timeout(Duration::from_secs(1), ticker.tick()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_manual_ticker() {
        let (mut ticker, trigger) = ManualTicker::new();
        trigger.fire();

        // Held while stopped
        let waited = tokio::time::timeout(Duration::from_millis(20), ticker.tick()).await;
        assert!(waited.is_err());

        ticker.start();
        tokio::time::timeout(Duration::from_secs(1), ticker.tick())
            .await
            .unwrap();
    }
}
