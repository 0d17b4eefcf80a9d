//! Per-aircraft state held in the tracking table.

use std::collections::VecDeque;

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;

use crate::behaviour::{classify, Behaviour};
use crate::types::{serialize_icao, Icao, Message};

/// Altitude samples retained per aircraft.
pub const MAX_HISTORY: usize = 50;

// ---------------------------------------------------------------------------
// Lifecycle status
// ---------------------------------------------------------------------------

/// Lifecycle of one appearance of an aircraft. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum TrackingStatus {
    /// Created, not yet surfaced to consumers.
    New,
    /// Qualified at least once and visible to consumers.
    Tracked,
    /// Silent past the staleness timeout, pending eviction.
    Stale,
    /// Evicted from the table.
    Removed,
}

// ---------------------------------------------------------------------------
// Altitude history
// ---------------------------------------------------------------------------

/// Bounded, chronological altitude window (oldest first).
///
/// The ring is kept contiguous after every push so `as_slice` can borrow
/// it without copying.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AltitudeHistory {
    samples: VecDeque<i32>,
}

impl Clone for AltitudeHistory {
    fn clone(&self) -> Self {
        let mut samples = self.samples.clone();
        samples.make_contiguous();
        AltitudeHistory { samples }
    }
}

impl AltitudeHistory {
    pub fn push(&mut self, altitude: i32) {
        if self.samples.len() == MAX_HISTORY {
            self.samples.pop_front();
        }
        self.samples.push_back(altitude);
        self.samples.make_contiguous();
    }

    pub fn as_slice(&self) -> &[i32] {
        let (front, back) = self.samples.as_slices();
        debug_assert!(back.is_empty());
        front
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A reported position, carried on notifications as the previous fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<i32>,
}

// ---------------------------------------------------------------------------
// Tracked aircraft
// ---------------------------------------------------------------------------

/// Live state for one radio address.
///
/// `Clone` deep-copies the altitude history, so a clone is a safe snapshot
/// to hand to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedAircraft {
    #[serde(serialize_with = "serialize_icao")]
    pub address: Icao,
    pub callsign: Option<String>,
    pub squawk: Option<String>,

    // Kinematics
    pub altitude: Option<i32>,
    pub ground_speed: Option<f64>,
    pub track: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub vertical_rate: Option<i32>,

    // Flags
    pub alert: Option<bool>,
    pub emergency: Option<bool>,
    pub spi: Option<bool>,
    pub is_on_ground: Option<bool>,

    // Derived
    pub altitude_history: AltitudeHistory,
    pub behaviour: Behaviour,
    /// Nautical miles from the receiver, when both positions are known.
    pub distance_nm: Option<f64>,

    // Metadata
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub message_count: u64,
    pub status: TrackingStatus,
}

impl TrackedAircraft {
    pub fn new(address: Icao, seen: NaiveDateTime) -> Self {
        TrackedAircraft {
            address,
            callsign: None,
            squawk: None,
            altitude: None,
            ground_speed: None,
            track: None,
            latitude: None,
            longitude: None,
            vertical_rate: None,
            alert: None,
            emergency: None,
            spi: None,
            is_on_ground: None,
            altitude_history: AltitudeHistory::default(),
            behaviour: Behaviour::Unknown,
            distance_nm: None,
            first_seen: seen,
            last_seen: seen,
            message_count: 0,
            status: TrackingStatus::New,
        }
    }

    /// Merge the fields present in `msg`; absent fields keep their value.
    ///
    /// Appends the altitude (if reported) to the history and reclassifies.
    pub fn apply(&mut self, msg: &Message, received: NaiveDateTime) {
        fn merge<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        merge(&mut self.callsign, &msg.callsign);
        merge(&mut self.squawk, &msg.squawk);
        merge(&mut self.altitude, &msg.altitude);
        merge(&mut self.ground_speed, &msg.ground_speed);
        merge(&mut self.track, &msg.track);
        merge(&mut self.latitude, &msg.latitude);
        merge(&mut self.longitude, &msg.longitude);
        merge(&mut self.vertical_rate, &msg.vertical_rate);
        merge(&mut self.alert, &msg.alert);
        merge(&mut self.emergency, &msg.emergency);
        merge(&mut self.spi, &msg.spi);
        merge(&mut self.is_on_ground, &msg.is_on_ground);

        if let Some(alt) = msg.altitude {
            self.altitude_history.push(alt);
        }
        self.behaviour = classify(self.altitude_history.as_slice(), self.vertical_rate);

        self.message_count += 1;
        self.last_seen = self.last_seen.max(received);
    }

    pub fn position(&self) -> Option<Position> {
        Some(Position {
            latitude: self.latitude?,
            longitude: self.longitude?,
            altitude: self.altitude,
        })
    }

    pub fn age(&self, now: NaiveDateTime) -> TimeDelta {
        now - self.last_seen
    }

    pub fn is_stale(&self, now: NaiveDateTime, timeout: TimeDelta) -> bool {
        self.age(now) > timeout
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    fn t0() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2023-08-23 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_history_caps_at_fifty() {
        let mut history = AltitudeHistory::default();
        for alt in 0..75 {
            history.push(alt * 100);
        }
        assert_eq!(history.len(), MAX_HISTORY);
        let expected: Vec<i32> = (25..75).map(|a| a * 100).collect();
        assert_eq!(history.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_history_window_slides_in_order() {
        let mut history = AltitudeHistory::default();
        for alt in 0..(MAX_HISTORY as i32 * 4 + 7) {
            history.push(alt);
            let len = history.len() as i32;
            let expected: Vec<i32> = (alt + 1 - len..=alt).collect();
            assert_eq!(history.as_slice(), expected.as_slice());
        }

        let copy = history.clone();
        assert_eq!(copy, history);
        assert_eq!(copy.as_slice(), history.as_slice());
        assert_eq!(
            serde_json::to_value(&copy).unwrap().as_array().unwrap().len(),
            MAX_HISTORY
        );
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut ac = TrackedAircraft::new([0x39, 0x65, 0xA3], t0());
        let squawk = decode(
            "MSG,6,1,1,3965A3,1,2023/08/23,12:07:27.932,2023/08/23,12:07:28.006,,,,,,,,6303,0,0,0,",
        )
        .unwrap();
        let alt = decode(
            "MSG,5,1,1,3965A3,1,2023/08/23,12:07:29.100,2023/08/23,12:07:29.180,,32000,,,,,,,0,,0,",
        )
        .unwrap();

        ac.apply(&squawk, t0());
        ac.apply(&alt, t0() + TimeDelta::seconds(1));

        assert_eq!(ac.squawk.as_deref(), Some("6303"));
        assert_eq!(ac.altitude, Some(32000));
        assert_eq!(ac.altitude_history.as_slice(), &[32000]);
        assert_eq!(ac.message_count, 2);
        assert_eq!(ac.last_seen, t0() + TimeDelta::seconds(1));
    }

    #[test]
    fn test_last_seen_never_moves_back() {
        let mut ac = TrackedAircraft::new([0x40, 0x7D, 0xCD], t0());
        let msg = decode(
            "MSG,7,1,1,407DCD,1,2023/08/23,12:12:35.113,2023/08/23,12:12:35.191,,18025,,,,,,,,,,",
        )
        .unwrap();
        ac.apply(&msg, t0() + TimeDelta::seconds(10));
        ac.apply(&msg, t0() + TimeDelta::seconds(5));
        assert_eq!(ac.last_seen, t0() + TimeDelta::seconds(10));
        assert!(ac.first_seen <= ac.last_seen);
    }

    #[test]
    fn test_staleness() {
        let ac = TrackedAircraft::new([1, 2, 3], t0());
        let timeout = TimeDelta::seconds(60);
        assert!(!ac.is_stale(t0() + TimeDelta::seconds(60), timeout));
        assert!(ac.is_stale(t0() + TimeDelta::seconds(61), timeout));
    }

    #[test]
    fn test_status_order() {
        assert!(TrackingStatus::New < TrackingStatus::Tracked);
        assert!(TrackingStatus::Tracked < TrackingStatus::Stale);
        assert!(TrackingStatus::Stale < TrackingStatus::Removed);
    }
}
