//! Tracking rules: geofence, altitude band, and behaviour mask.
//!
//! Distances are nautical miles throughout, computed with the haversine
//! great-circle formula.

use std::fmt;
use std::ops::BitOr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::aircraft::TrackedAircraft;
use crate::behaviour::Behaviour;
use crate::types::Result;

/// Earth radius in nautical miles.
const EARTH_RADIUS_NM: f64 = 3440.065;

/// Great-circle distance between two points in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_NM * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

// ---------------------------------------------------------------------------
// Behaviour mask
// ---------------------------------------------------------------------------

/// One named bit of a [`BehaviourMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskFlag {
    Any,
    Ascending,
    Descending,
}

/// Combinable set of behaviours a rule accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<MaskFlag>", into = "Vec<MaskFlag>")]
pub struct BehaviourMask(u8);

impl BehaviourMask {
    pub const NONE: BehaviourMask = BehaviourMask(0);
    pub const ANY: BehaviourMask = BehaviourMask(0b001);
    pub const ASCENDING: BehaviourMask = BehaviourMask(0b010);
    pub const DESCENDING: BehaviourMask = BehaviourMask(0b100);

    pub fn contains(self, other: BehaviourMask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn matches(self, behaviour: Behaviour) -> bool {
        if self.contains(Self::ANY) {
            return true;
        }
        match behaviour {
            Behaviour::Climbing => self.contains(Self::ASCENDING),
            Behaviour::Descending => self.contains(Self::DESCENDING),
            Behaviour::Unknown | Behaviour::LevelFlight => false,
        }
    }

    pub fn flags(self) -> Vec<MaskFlag> {
        [
            (Self::ANY, MaskFlag::Any),
            (Self::ASCENDING, MaskFlag::Ascending),
            (Self::DESCENDING, MaskFlag::Descending),
        ]
        .into_iter()
        .filter(|(bit, _)| self.contains(*bit))
        .map(|(_, flag)| flag)
        .collect()
    }
}

impl Default for BehaviourMask {
    fn default() -> Self {
        Self::ANY
    }
}

impl BitOr for BehaviourMask {
    type Output = BehaviourMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        BehaviourMask(self.0 | rhs.0)
    }
}

impl From<MaskFlag> for BehaviourMask {
    fn from(flag: MaskFlag) -> Self {
        match flag {
            MaskFlag::Any => Self::ANY,
            MaskFlag::Ascending => Self::ASCENDING,
            MaskFlag::Descending => Self::DESCENDING,
        }
    }
}

impl From<Vec<MaskFlag>> for BehaviourMask {
    fn from(flags: Vec<MaskFlag>) -> Self {
        flags.into_iter().map(BehaviourMask::from).fold(Self::NONE, |a, b| a | b)
    }
}

impl From<BehaviourMask> for Vec<MaskFlag> {
    fn from(mask: BehaviourMask) -> Self {
        mask.flags()
    }
}

impl fmt::Display for BehaviourMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .flags()
            .into_iter()
            .map(|flag| match flag {
                MaskFlag::Any => "any",
                MaskFlag::Ascending => "ascending",
                MaskFlag::Descending => "descending",
            })
            .collect();
        f.write_str(&names.join(","))
    }
}

/// Parses `"any"`, `"ascending"`, `"ascending,descending"` (case-insensitive).
impl FromStr for BehaviourMask {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.split([',', '|'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Self::NONE, |mask, part| {
                let bit = match part.to_ascii_lowercase().as_str() {
                    "any" => Self::ANY,
                    "ascending" | "climbing" => Self::ASCENDING,
                    "descending" => Self::DESCENDING,
                    other => return Err(format!("unknown behaviour flag: {other}")),
                };
                Ok(mask | bit)
            })
    }
}

// ---------------------------------------------------------------------------
// Tracking rule
// ---------------------------------------------------------------------------

/// One geofence/altitude/behaviour rule. Unset bounds are open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRule {
    pub receiver_latitude: f64,
    pub receiver_longitude: f64,
    #[serde(default)]
    pub minimum_distance: Option<f64>,
    #[serde(default)]
    pub maximum_distance: Option<f64>,
    #[serde(default)]
    pub minimum_altitude: Option<i32>,
    #[serde(default)]
    pub maximum_altitude: Option<i32>,
    #[serde(default)]
    pub behaviours: BehaviourMask,
}

impl TrackingRule {
    /// A rule with no bounds that accepts every behaviour.
    pub fn anywhere(receiver_latitude: f64, receiver_longitude: f64) -> Self {
        TrackingRule {
            receiver_latitude,
            receiver_longitude,
            minimum_distance: None,
            maximum_distance: None,
            minimum_altitude: None,
            maximum_altitude: None,
            behaviours: BehaviourMask::ANY,
        }
    }

    fn has_distance_bounds(&self) -> bool {
        self.minimum_distance.is_some() || self.maximum_distance.is_some()
    }

    fn has_altitude_bounds(&self) -> bool {
        self.minimum_altitude.is_some() || self.maximum_altitude.is_some()
    }

    /// Distance (nm) from this rule's receiver to the aircraft, if it has a fix.
    pub fn distance_to(&self, aircraft: &TrackedAircraft) -> Option<f64> {
        let (lat, lon) = (aircraft.latitude?, aircraft.longitude?);
        Some(haversine_nm(
            self.receiver_latitude,
            self.receiver_longitude,
            lat,
            lon,
        ))
    }

    /// Whether the aircraft satisfies every bound of this rule.
    ///
    /// A bound that is set cannot be satisfied by an unknown value.
    pub fn matches(&self, aircraft: &TrackedAircraft) -> bool {
        if self.has_distance_bounds() {
            let Some(distance) = self.distance_to(aircraft) else {
                return false;
            };
            if !within(distance, self.minimum_distance, self.maximum_distance) {
                return false;
            }
        }

        if self.has_altitude_bounds() {
            let Some(altitude) = aircraft.altitude else {
                return false;
            };
            if !within(altitude, self.minimum_altitude, self.maximum_altitude) {
                return false;
            }
        }

        self.behaviours.matches(aircraft.behaviour)
    }
}

fn within<T: PartialOrd>(value: T, min: Option<T>, max: Option<T>) -> bool {
    min.is_none_or(|m| value >= m) && max.is_none_or(|m| value <= m)
}

/// Whether the aircraft satisfies at least one rule. No rules admits everything.
pub fn qualifies(aircraft: &TrackedAircraft, rules: &[TrackingRule]) -> bool {
    rules.is_empty() || rules.iter().any(|rule| rule.matches(aircraft))
}

// ---------------------------------------------------------------------------
// Tracking profile
// ---------------------------------------------------------------------------

/// A named set of tracking rules, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rules: Vec<TrackingRule>,
}

impl TrackingProfile {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
