//! Aircraft lifecycle state machine over the shared address-keyed table.
//!
//! No I/O. The caller feeds decoded messages through `ingest()` and calls
//! `sweep()` on its own cadence; lifecycle events go out through the
//! [`Notifier`] on the calling thread.
//!
//! Lifecycle per appearance: New → Tracked → Stale → Removed. An address
//! seen again after removal starts a fresh entry.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

use crate::aircraft::{TrackedAircraft, TrackingStatus};
use crate::codec;
use crate::notify::{AircraftNotification, NotificationType, Notifier};
use crate::rules::{self, haversine_nm, TrackingRule};
use crate::types::{icao_to_string, Icao, Message, MessageType};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Silence after which a surfaced aircraft is marked Stale.
    pub stale_timeout: Duration,
    /// Further silence after `stale_timeout` before the entry is evicted.
    /// Zero evicts in the same sweep that finds it stale.
    pub removal_grace: Duration,
    /// How often the owner should call `sweep()`.
    pub sweep_interval: Duration,
    /// Receiver location used for `distance_nm`.
    pub receiver: Option<(f64, f64)>,
    pub rules: Vec<TrackingRule>,
    pub excluded_addresses: HashSet<Icao>,
    pub excluded_callsigns: HashSet<String>,
}

impl TrackerSettings {
    pub fn new(stale_timeout: Duration, sweep_interval: Duration) -> Self {
        TrackerSettings {
            stale_timeout,
            removal_grace: Duration::ZERO,
            sweep_interval,
            receiver: None,
            rules: Vec::new(),
            excluded_addresses: HashSet::new(),
            excluded_callsigns: HashSet::new(),
        }
    }
}

/// Counters exposed for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub lines: u64,
    pub messages: u64,
    pub decode_failures: u64,
    pub ignored: u64,
    pub added: u64,
    pub removed: u64,
    pub aircraft: usize,
    pub tracked: usize,
    pub stale: usize,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Sole writer of the aircraft table.
///
/// Every transition and its dispatch run under one short-lived transition
/// lock, so events for an address reach subscribers in the order the
/// transitions happened. Readers use `snapshot()`/`get()`, which copy out
/// without taking that lock.
pub struct Tracker {
    aircraft: DashMap<Icao, TrackedAircraft>,
    settings: TrackerSettings,
    stale_timeout: TimeDelta,
    evict_after: TimeDelta,
    notifier: Notifier,
    transitions: Mutex<()>,

    lines: AtomicU64,
    messages: AtomicU64,
    decode_failures: AtomicU64,
    ignored: AtomicU64,
    added: AtomicU64,
    removed: AtomicU64,
}

impl Tracker {
    pub fn new(settings: TrackerSettings, notifier: Notifier) -> Self {
        let stale_timeout = TimeDelta::from_std(settings.stale_timeout).unwrap_or(TimeDelta::MAX);
        let evict_after = TimeDelta::from_std(settings.removal_grace)
            .ok()
            .and_then(|grace| stale_timeout.checked_add(&grace))
            .unwrap_or(TimeDelta::MAX);
        Tracker {
            aircraft: DashMap::new(),
            settings,
            stale_timeout,
            evict_after,
            notifier,
            transitions: Mutex::new(()),
            lines: AtomicU64::new(0),
            messages: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            added: AtomicU64::new(0),
            removed: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode a raw line and ingest it. Undecodable lines are counted,
    /// logged at debug, and dropped.
    pub fn ingest_line(&self, line: &str, received: NaiveDateTime) -> Option<NotificationType> {
        self.lines.fetch_add(1, Ordering::Relaxed);
        match codec::decode(line) {
            Ok(msg) => self.ingest(&msg, received),
            Err(e) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, line, "dropping undecodable line");
                None
            }
        }
    }

    /// Apply one decoded message. Returns the event emitted, if any.
    pub fn ingest(&self, msg: &Message, received: NaiveDateTime) -> Option<NotificationType> {
        self.messages.fetch_add(1, Ordering::Relaxed);
        if msg.message_type != MessageType::Msg
            || self.settings.excluded_addresses.contains(&msg.address)
        {
            self.ignored.fetch_add(1, Ordering::Relaxed);
            trace!(address = %icao_to_string(&msg.address), kind = %msg.message_type, "ignored");
            return None;
        }

        let _order = self.lock_transitions();
        let notification = {
            let mut entry = self
                .aircraft
                .entry(msg.address)
                .or_insert_with(|| TrackedAircraft::new(msg.address, received));
            let ac = entry.value_mut();

            let previous_position = ac.position();
            ac.apply(msg, received);
            if ac.status == TrackingStatus::Stale {
                debug!(address = %icao_to_string(&msg.address), "stale aircraft heard again");
                ac.status = TrackingStatus::Tracked;
            }
            ac.distance_nm = self
                .settings
                .receiver
                .zip(ac.latitude.zip(ac.longitude))
                .map(|((rx_lat, rx_lon), (lat, lon))| haversine_nm(rx_lat, rx_lon, lat, lon));

            if !self.qualifies(ac) {
                None
            } else if ac.status == TrackingStatus::Tracked {
                Some(AircraftNotification {
                    aircraft: ac.clone(),
                    previous_position,
                    notification_type: NotificationType::Updated,
                })
            } else {
                ac.status = TrackingStatus::Tracked;
                Some(AircraftNotification {
                    aircraft: ac.clone(),
                    previous_position: None,
                    notification_type: NotificationType::Added,
                })
            }
        };

        let notification = notification?;
        if notification.notification_type == NotificationType::Added {
            self.added.fetch_add(1, Ordering::Relaxed);
        }
        self.notifier.dispatch(&notification);
        Some(notification.notification_type)
    }

    fn qualifies(&self, ac: &TrackedAircraft) -> bool {
        let excluded = ac
            .callsign
            .as_ref()
            .is_some_and(|c| self.settings.excluded_callsigns.contains(c));
        !excluded && rules::qualifies(ac, &self.settings.rules)
    }

    /// Age out silent aircraft.
    ///
    /// A Tracked aircraft silent past the staleness timeout is marked Stale.
    /// Once the removal grace has also run out the entry is evicted:
    /// surfaced entries emit exactly one `Removed`, entries that never
    /// qualified leave silently. Returns the number evicted.
    pub fn sweep(&self, now: NaiveDateTime) -> usize {
        let timeout = self.stale_timeout;
        let evict_after = self.evict_after;
        let candidates: Vec<Icao> = self
            .aircraft
            .iter()
            .filter(|entry| entry.value().is_stale(now, timeout))
            .map(|entry| *entry.key())
            .collect();

        let mut evicted = 0;
        for address in candidates {
            let _order = self.lock_transitions();
            // Re-check under the shard lock: an ingest may have revived it.
            if let Some((_, ac)) = self
                .aircraft
                .remove_if(&address, |_, ac| ac.is_stale(now, evict_after))
            {
                evicted += 1;
                self.finish_removal(ac);
                continue;
            }

            if let Some(mut ac) = self.aircraft.get_mut(&address) {
                if ac.status == TrackingStatus::Tracked && ac.is_stale(now, timeout) {
                    ac.status = TrackingStatus::Stale;
                    debug!(address = %icao_to_string(&address), "aircraft stale");
                }
            }
        }
        evicted
    }

    fn finish_removal(&self, mut ac: TrackedAircraft) {
        let surfaced = matches!(ac.status, TrackingStatus::Tracked | TrackingStatus::Stale);
        ac.status = TrackingStatus::Removed;

        if surfaced {
            self.removed.fetch_add(1, Ordering::Relaxed);
            self.notifier.dispatch(&AircraftNotification {
                aircraft: ac,
                previous_position: None,
                notification_type: NotificationType::Removed,
            });
        } else {
            debug!(address = %icao_to_string(&ac.address), "evicted unsurfaced aircraft");
        }
    }

    /// Point-in-time copy of every entry, including unsurfaced ones.
    pub fn snapshot(&self) -> Vec<TrackedAircraft> {
        self.aircraft.iter().map(|e| e.value().clone()).collect()
    }

    /// Copy of the surfaced aircraft (Tracked or Stale), most recently seen
    /// first.
    pub fn get_active(&self) -> Vec<TrackedAircraft> {
        let mut active: Vec<TrackedAircraft> = self
            .aircraft
            .iter()
            .filter(|e| {
                matches!(e.value().status, TrackingStatus::Tracked | TrackingStatus::Stale)
            })
            .map(|e| e.value().clone())
            .collect();
        active.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        active
    }

    pub fn get(&self, address: &Icao) -> Option<TrackedAircraft> {
        self.aircraft.get(address).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    pub fn stats(&self) -> TrackerStats {
        let (mut tracked, mut stale) = (0, 0);
        for entry in self.aircraft.iter() {
            match entry.value().status {
                TrackingStatus::Tracked => tracked += 1,
                TrackingStatus::Stale => stale += 1,
                _ => {}
            }
        }
        TrackerStats {
            lines: self.lines.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            added: self.added.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            aircraft: self.aircraft.len(),
            tracked,
            stale,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
