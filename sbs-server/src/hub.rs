//! Hub bridge: forwards lifecycle events to a remote HTTP endpoint.
//!
//! The subscriber half runs on the ingest/sweep thread and only does a
//! `try_send` into a bounded channel. The publisher task POSTs each event
//! as JSON, every request bounded by a timeout and abandoned on
//! cancellation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sbs_core::types::icao_to_string;
use sbs_core::{AircraftNotification, Subscriber, SubscriberError};

/// JSON body posted for one event.
pub fn payload(n: &AircraftNotification) -> Value {
    let ac = &n.aircraft;
    json!({
        "event_type": n.notification_type,
        "address": icao_to_string(&ac.address),
        "callsign": ac.callsign,
        "squawk": ac.squawk,
        "altitude": ac.altitude,
        "ground_speed": ac.ground_speed,
        "track": ac.track,
        "latitude": ac.latitude,
        "longitude": ac.longitude,
        "vertical_rate": ac.vertical_rate,
        "behaviour": ac.behaviour,
        "distance_nm": ac.distance_nm,
        "previous_position": n.previous_position,
        "last_seen": ac.last_seen,
    })
}

#[derive(Debug, Default)]
pub struct HubCounters {
    pub queued: AtomicU64,
    pub dropped: AtomicU64,
    pub sent: AtomicU64,
    pub failed: AtomicU64,
}

// ---------------------------------------------------------------------------
// Subscriber half
// ---------------------------------------------------------------------------

pub struct HubBridge {
    tx: mpsc::Sender<Value>,
    counters: Arc<HubCounters>,
}

impl HubBridge {
    /// Create the bridge and the publisher that drains it.
    pub fn new(url: &str, timeout: Duration, capacity: usize) -> (Self, HubPublisher) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(HubCounters::default());
        let bridge = HubBridge {
            tx,
            counters: Arc::clone(&counters),
        };
        let publisher = HubPublisher {
            url: url.to_string(),
            timeout,
            client: reqwest::Client::new(),
            rx,
            counters,
        };
        (bridge, publisher)
    }

    pub fn counters(&self) -> Arc<HubCounters> {
        Arc::clone(&self.counters)
    }
}

impl Subscriber for HubBridge {
    fn name(&self) -> &str {
        "hub"
    }

    fn notify(&self, n: &AircraftNotification) -> Result<(), SubscriberError> {
        match self.tx.try_send(payload(n)) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(address = %icao_to_string(&n.aircraft.address), "hub queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return Err("hub publisher has stopped".into());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Publisher half
// ---------------------------------------------------------------------------

pub struct HubPublisher {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
    rx: mpsc::Receiver<Value>,
    counters: Arc<HubCounters>,
}

impl HubPublisher {
    /// POST queued events until cancelled.
    pub async fn run(mut self, token: CancellationToken) {
        info!(url = %self.url, "hub publisher started");
        loop {
            let body = tokio::select! {
                _ = token.cancelled() => break,
                body = self.rx.recv() => match body {
                    Some(body) => body,
                    None => break,
                },
            };

            let request = self.client.post(&self.url).timeout(self.timeout).json(&body).send();
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = request => result,
            };
            match result.and_then(|r| r.error_for_status()) {
                Ok(_) => {
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "hub POST failed");
                }
            }
        }
        debug!(
            sent = self.counters.sent.load(Ordering::Relaxed),
            failed = self.counters.failed.load(Ordering::Relaxed),
            "hub publisher stopped"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::NaiveDateTime;
    use sbs_core::{NotificationType, TrackedAircraft};

    fn notification(kind: NotificationType) -> AircraftNotification {
        let seen = NaiveDateTime::parse_from_str("2023-08-23 12:07:27", "%Y-%m-%d %H:%M:%S").unwrap();
        let mut aircraft = TrackedAircraft::new([0x39, 0x65, 0xA3], seen);
        aircraft.altitude = Some(18025);
        aircraft.callsign = Some("EZY42".into());
        AircraftNotification {
            aircraft,
            previous_position: None,
            notification_type: kind,
        }
    }

    #[test]
    fn test_payload_fields() {
        let body = payload(&notification(NotificationType::Added));
        assert_eq!(body["address"], "3965A3");
        assert_eq!(body["event_type"], "Added");
        assert_eq!(body["altitude"], 18025);
        assert_eq!(body["callsign"], "EZY42");
        assert!(body["latitude"].is_null());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (bridge, _publisher) = HubBridge::new("http://127.0.0.1:9/hub", Duration::from_millis(100), 2);
        for _ in 0..5 {
            bridge.notify(&notification(NotificationType::Updated)).unwrap();
        }
        let counters = bridge.counters();
        assert_eq!(counters.queued.load(Ordering::Relaxed), 2);
        assert_eq!(counters.dropped.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_closed_publisher_reports_error() {
        let (bridge, publisher) = HubBridge::new("http://127.0.0.1:9/hub", Duration::from_millis(100), 2);
        drop(publisher);
        assert!(bridge.notify(&notification(NotificationType::Added)).is_err());
    }

    #[tokio::test]
    async fn test_publisher_posts_events() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Value>();
        let app = Router::new().route(
            "/hub",
            post(move |Json(body): Json<Value>| {
                let seen_tx = seen_tx.clone();
                async move {
                    let _ = seen_tx.send(body);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let (bridge, publisher) = HubBridge::new(&format!("http://{addr}/hub"), Duration::from_secs(2), 16);
        let token = CancellationToken::new();
        let task = tokio::spawn(publisher.run(token.clone()));

        bridge.notify(&notification(NotificationType::Added)).unwrap();
        bridge.notify(&notification(NotificationType::Removed)).unwrap();

        let first = seen_rx.recv().await.unwrap();
        let second = seen_rx.recv().await.unwrap();
        assert_eq!(first["event_type"], "Added");
        assert_eq!(second["event_type"], "Removed");

        let counters = bridge.counters();
        while counters.sent.load(Ordering::Relaxed) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        task.await.unwrap();
        assert_eq!(counters.failed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_unreachable_hub_counts_failure() {
        // Nothing listens on the bound-then-dropped port
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (bridge, publisher) =
            HubBridge::new(&format!("http://127.0.0.1:{port}/hub"), Duration::from_millis(200), 4);
        let token = CancellationToken::new();
        bridge.notify(&notification(NotificationType::Added)).unwrap();
        drop(bridge);

        // Channel closes once the bridge is gone, ending the publisher
        let counters = {
            let counters = Arc::clone(&publisher.counters);
            publisher.run(token).await;
            counters
        };
        assert_eq!(counters.failed.load(Ordering::Relaxed), 1);
    }
}
