//! sbs-core: BaseStation message codec and aircraft tracking library.
//!
//! No async, no sockets. This crate holds the codec, the behaviour
//! classifier, tracking rules, and the lifecycle tracker; `sbs-server` owns
//! the feed connection, timers, and persistence.

pub mod aircraft;
pub mod behaviour;
pub mod codec;
pub mod config;
pub mod notify;
pub mod rules;
pub mod tracker;
pub mod types;

// Re-export commonly used types at crate root
pub use aircraft::{AltitudeHistory, Position, TrackedAircraft, TrackingStatus, MAX_HISTORY};
pub use behaviour::{classify, Behaviour};
pub use codec::{decode, encode};
pub use notify::{AircraftNotification, NotificationType, Notifier, Subscriber, SubscriberError};
pub use rules::{qualifies, BehaviourMask, TrackingProfile, TrackingRule};
pub use tracker::{Tracker, TrackerSettings, TrackerStats};
pub use types::*;
