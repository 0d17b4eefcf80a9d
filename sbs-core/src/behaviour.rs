//! Flight behaviour classification from the retained altitude window.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Net altitude change (feet) across the window needed to call a trend.
pub const TREND_THRESHOLD_FT: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Behaviour {
    #[default]
    Unknown,
    LevelFlight,
    Climbing,
    Descending,
}

impl Behaviour {
    pub fn as_str(&self) -> &'static str {
        match self {
            Behaviour::Unknown => "Unknown",
            Behaviour::LevelFlight => "LevelFlight",
            Behaviour::Climbing => "Climbing",
            Behaviour::Descending => "Descending",
        }
    }
}

impl fmt::Display for Behaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Behaviour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(Behaviour::Unknown),
            "LevelFlight" => Ok(Behaviour::LevelFlight),
            "Climbing" => Ok(Behaviour::Climbing),
            "Descending" => Ok(Behaviour::Descending),
            other => Err(format!("unknown behaviour: {other}")),
        }
    }
}

/// Classify an altitude history (oldest first) and the latest vertical rate.
///
/// The trend is the change between the oldest and newest retained sample.
/// A reported vertical rate of the opposite sign vetoes the trend.
pub fn classify(history: &[i32], vertical_rate: Option<i32>) -> Behaviour {
    let (Some(first), Some(last)) = (history.first(), history.last()) else {
        return Behaviour::Unknown;
    };
    if history.len() < 2 {
        return Behaviour::Unknown;
    }

    let trend = last - first;
    let rate = vertical_rate.unwrap_or(0);

    if trend > TREND_THRESHOLD_FT && rate >= 0 {
        Behaviour::Climbing
    } else if trend < -TREND_THRESHOLD_FT && rate <= 0 {
        Behaviour::Descending
    } else {
        Behaviour::LevelFlight
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
