//! Lifecycle notifications and ordered, synchronous fan-out to subscribers.
//!
//! Subscribers run on the thread that made the transition, in registration
//! order. A subscriber that errors or panics is logged and skipped; the rest
//! of the dispatch still runs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::warn;

use crate::aircraft::{Position, TrackedAircraft};
use crate::types::icao_to_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NotificationType {
    Added,
    Updated,
    Removed,
}

/// One lifecycle event with a snapshot of the aircraft after the transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftNotification {
    pub aircraft: TrackedAircraft,
    /// Fix held before this update. Only set on `Updated`.
    pub previous_position: Option<Position>,
    pub notification_type: NotificationType,
}

impl AircraftNotification {
    /// Whether this event reports a fix not seen by consumers before.
    pub fn has_new_position(&self) -> bool {
        let Some(current) = self.aircraft.position() else {
            return false;
        };
        match self.notification_type {
            NotificationType::Added => true,
            NotificationType::Updated => self.previous_position.is_none_or(|p| {
                p.latitude != current.latitude || p.longitude != current.longitude
            }),
            NotificationType::Removed => false,
        }
    }
}

/// Error a subscriber may report. Logged by the notifier, never propagated.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// A consumer of lifecycle events.
///
/// Called while the tracker holds its transition lock: implementations may
/// read the tracker but must not call back into ingest or sweep, and must
/// not block.
pub trait Subscriber: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn notify(&self, notification: &AircraftNotification) -> Result<(), SubscriberError>;
}

/// Ordered list of subscribers.
#[derive(Default)]
pub struct Notifier {
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver to every subscriber in registration order. Returns how many
    /// subscribers accepted the event.
    pub fn dispatch(&self, notification: &AircraftNotification) -> usize {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        for subscriber in &subscribers {
            match catch_unwind(AssertUnwindSafe(|| subscriber.notify(notification))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(
                    subscriber = subscriber.name(),
                    address = %icao_to_string(&notification.aircraft.address),
                    error = %e,
                    "subscriber failed"
                ),
                Err(_) => warn!(
                    subscriber = subscriber.name(),
                    address = %icao_to_string(&notification.aircraft.address),
                    "subscriber panicked"
                ),
            }
        }
        delivered
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Built-in subscribers
// ---------------------------------------------------------------------------

/// Logs Added/Removed at info and Updated at debug.
pub struct LogSubscriber;

impl Subscriber for LogSubscriber {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, n: &AircraftNotification) -> Result<(), SubscriberError> {
        let ac = &n.aircraft;
        let address = icao_to_string(&ac.address);
        match n.notification_type {
            NotificationType::Added | NotificationType::Removed => tracing::info!(
                event = ?n.notification_type,
                address = %address,
                callsign = ac.callsign.as_deref().unwrap_or("-"),
                altitude = ?ac.altitude,
                behaviour = %ac.behaviour,
                "aircraft {:?}",
                n.notification_type
            ),
            NotificationType::Updated => tracing::debug!(
                address = %address,
                altitude = ?ac.altitude,
                distance_nm = ?ac.distance_nm,
                behaviour = %ac.behaviour,
                "aircraft updated"
            ),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Subscriber for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn notify(&self, n: &AircraftNotification) -> Result<(), SubscriberError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{:?}", self.name, n.notification_type));
            Ok(())
        }
    }

    struct Failing;

    impl Subscriber for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn notify(&self, _: &AircraftNotification) -> Result<(), SubscriberError> {
            Err("store offline".into())
        }
    }

    struct Panicking;

    impl Subscriber for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn notify(&self, _: &AircraftNotification) -> Result<(), SubscriberError> {
            panic!("boom")
        }
    }

    fn notification(kind: NotificationType) -> AircraftNotification {
        let seen = NaiveDateTime::parse_from_str("2024-03-01 09:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        AircraftNotification {
            aircraft: TrackedAircraft::new([0x40, 0x7D, 0xCD], seen),
            previous_position: None,
            notification_type: kind,
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Subscriber> {
        Arc::new(Recorder {
            name: name.into(),
            log: Arc::clone(log),
        })
    }

    #[test]
    fn test_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = Notifier::new();
        notifier.subscribe(recorder("a", &log));
        notifier.subscribe(recorder("b", &log));

        assert_eq!(notifier.dispatch(&notification(NotificationType::Added)), 2);
        notifier.dispatch(&notification(NotificationType::Removed));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:Added", "b:Added", "a:Removed", "b:Removed"]
        );
    }

    #[test]
    fn test_failures_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let notifier = Notifier::new();
        notifier.subscribe(Arc::new(Failing));
        notifier.subscribe(Arc::new(Panicking));
        notifier.subscribe(recorder("last", &log));

        let delivered = notifier.dispatch(&notification(NotificationType::Updated));
        assert_eq!(delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["last:Updated"]);
    }

    #[test]
    fn test_has_new_position() {
        let mut n = notification(NotificationType::Added);
        assert!(!n.has_new_position());

        n.aircraft.latitude = Some(53.0);
        n.aircraft.longitude = Some(-2.0);
        assert!(n.has_new_position());

        // First fix arriving on an update
        n.notification_type = NotificationType::Updated;
        assert!(n.has_new_position());

        n.previous_position = Some(Position {
            latitude: 53.0,
            longitude: -2.0,
            altitude: None,
        });
        assert!(!n.has_new_position());

        n.previous_position = Some(Position {
            latitude: 52.9,
            longitude: -2.0,
            altitude: None,
        });
        assert!(n.has_new_position());
    }

    #[test]
    fn test_log_subscriber_accepts_everything() {
        let notifier = Notifier::new();
        notifier.subscribe(Arc::new(LogSubscriber));
        assert_eq!(notifier.dispatch(&notification(NotificationType::Added)), 1);
    }
}
