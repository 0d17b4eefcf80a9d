//! Configuration file management for sbs-tracker.
//!
//! Reads/writes `~/.sbs-tracker/config.yaml` with feed endpoint, tracking
//! timeouts and receiver location, writer cadence, database path,
//! dashboard address, and hub URL.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rules::{TrackingProfile, TrackingRule};
use crate::tracker::TrackerSettings;
use crate::types::{icao_from_hex, Result, SbsError};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub feed: FeedConfig,
    pub tracking: TrackingConfig,
    pub writer: WriterConfig,
    pub database: DatabaseConfig,
    pub dashboard: DashboardConfig,
    pub hub: HubConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub stale_timeout_ms: u64,
    /// Time a stale aircraft is kept before eviction.
    pub removal_grace_ms: u64,
    pub sweep_interval_ms: u64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Path to a JSON tracking profile.
    pub profile: Option<String>,
    pub excluded_addresses: Vec<String>,
    pub excluded_callsigns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriterConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub batch_size: usize,
    pub time_to_lock_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    pub url: Option<String>,
    pub timeout_ms: u64,
    pub capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed: FeedConfig {
                host: "127.0.0.1".into(),
                port: 30003,
                connect_timeout_ms: 10_000,
                read_timeout_ms: 60_000,
            },
            tracking: TrackingConfig {
                stale_timeout_ms: 60_000,
                removal_grace_ms: 0,
                sweep_interval_ms: 5_000,
                lat: None,
                lon: None,
                profile: None,
                excluded_addresses: Vec::new(),
                excluded_callsigns: Vec::new(),
            },
            writer: WriterConfig {
                enabled: true,
                interval_ms: 30_000,
                batch_size: 20_000,
                time_to_lock_ms: 900_000,
            },
            database: DatabaseConfig {
                path: "data/sbs.db".into(),
            },
            dashboard: DashboardConfig {
                enabled: false,
                host: "127.0.0.1".into(),
                port: 8080,
            },
            hub: HubConfig {
                url: None,
                timeout_ms: 2_000,
                capacity: 1_024,
            },
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Build tracker settings, loading the tracking profile if one is set.
    pub fn tracker_settings(&self) -> Result<TrackerSettings> {
        let t = &self.tracking;
        let mut settings = TrackerSettings::new(
            Duration::from_millis(t.stale_timeout_ms),
            Duration::from_millis(t.sweep_interval_ms),
        );
        settings.removal_grace = Duration::from_millis(t.removal_grace_ms);
        settings.receiver = t.lat.zip(t.lon);
        settings.rules = self.tracking_rules()?;
        settings.excluded_addresses = t
            .excluded_addresses
            .iter()
            .map(|hex| {
                icao_from_hex(hex)
                    .ok_or_else(|| SbsError::Config(format!("bad excluded address: {hex}")))
            })
            .collect::<Result<HashSet<_>>>()?;
        settings.excluded_callsigns = t.excluded_callsigns.iter().cloned().collect();
        Ok(settings)
    }

    fn tracking_rules(&self) -> Result<Vec<TrackingRule>> {
        match &self.tracking.profile {
            Some(path) => Ok(TrackingProfile::load(Path::new(path))?.rules),
            None => Ok(Vec::new()),
        }
    }
}

/// Get the config directory path (`~/.sbs-tracker/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".sbs-tracker")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `path`.
///
/// Returns default config if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

/// Save config to `path`, creating parent directories.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| SbsError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| SbsError::Config(e.to_string()))
}

/// Parse simple YAML-like config text.
pub fn parse_config(text: &str) -> Result<Config> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for (lineno, line) in text.lines().enumerate() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');
        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();
        let bad = |what: &str| SbsError::Config(format!("line {}: bad {what}: {val}", lineno + 1));

        if !is_indented {
            if val.is_empty() {
                current_section = Some(key.to_string());
            } else {
                current_section = None;
                if key == "log_level" {
                    if let Some(v) = parse_string_value(val) {
                        config.log_level = v;
                    }
                }
            }
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };
        match (section, key) {
            ("feed", "host") => set_string(&mut config.feed.host, val),
            ("feed", "port") => config.feed.port = val.parse().map_err(|_| bad("port"))?,
            ("feed", "connect_timeout_ms") => {
                config.feed.connect_timeout_ms = val.parse().map_err(|_| bad(key))?
            }
            ("feed", "read_timeout_ms") => {
                config.feed.read_timeout_ms = val.parse().map_err(|_| bad(key))?
            }

            ("tracking", "stale_timeout_ms") => {
                config.tracking.stale_timeout_ms = val.parse().map_err(|_| bad(key))?
            }
            ("tracking", "removal_grace_ms") => {
                config.tracking.removal_grace_ms = val.parse().map_err(|_| bad(key))?
            }
            ("tracking", "sweep_interval_ms") => {
                config.tracking.sweep_interval_ms = val.parse().map_err(|_| bad(key))?
            }
            ("tracking", "lat") => config.tracking.lat = parse_float_value(val),
            ("tracking", "lon") => config.tracking.lon = parse_float_value(val),
            ("tracking", "profile") => config.tracking.profile = parse_string_value(val),
            ("tracking", "excluded_addresses") => {
                config.tracking.excluded_addresses = parse_list_value(val)
                    .into_iter()
                    .map(|s| s.to_ascii_uppercase())
                    .collect()
            }
            ("tracking", "excluded_callsigns") => {
                config.tracking.excluded_callsigns = parse_list_value(val)
            }

            ("writer", "enabled") => config.writer.enabled = parse_bool_value(val).ok_or_else(|| bad(key))?,
            ("writer", "interval_ms") => config.writer.interval_ms = val.parse().map_err(|_| bad(key))?,
            ("writer", "batch_size") => config.writer.batch_size = val.parse().map_err(|_| bad(key))?,
            ("writer", "time_to_lock_ms") => {
                config.writer.time_to_lock_ms = val.parse().map_err(|_| bad(key))?
            }

            ("database", "path") => set_string(&mut config.database.path, val),

            ("dashboard", "enabled") => {
                config.dashboard.enabled = parse_bool_value(val).ok_or_else(|| bad(key))?
            }
            ("dashboard", "host") => set_string(&mut config.dashboard.host, val),
            ("dashboard", "port") => config.dashboard.port = val.parse().map_err(|_| bad("port"))?,

            ("hub", "url") => config.hub.url = parse_string_value(val),
            ("hub", "timeout_ms") => config.hub.timeout_ms = val.parse().map_err(|_| bad(key))?,
            ("hub", "capacity") => config.hub.capacity = val.parse().map_err(|_| bad(key))?,

            _ => {}
        }
    }

    Ok(config)
}

fn set_string(slot: &mut String, val: &str) {
    if let Some(v) = parse_string_value(val) {
        *slot = v;
    }
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok()
}

fn parse_bool_value(val: &str) -> Option<bool> {
    match val {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `[a, b]` or `a, b`.
fn parse_list_value(val: &str) -> Vec<String> {
    let inner = val.trim_start_matches('[').trim_end_matches(']');
    inner
        .split(',')
        .filter_map(|item| parse_string_value(item.trim()))
        .collect()
}

fn format_list(items: &[String]) -> String {
    format!("[{}]", items.join(", "))
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let opt_f64 = |v: Option<f64>| v.map_or("null".to_string(), |v| v.to_string());
    let opt_str = |v: &Option<String>| v.as_ref().map_or("null".to_string(), |v| format!("\"{v}\""));

    let mut lines = vec!["# sbs-tracker configuration".to_string(), String::new()];

    lines.push("feed:".into());
    lines.push(format!("  host: \"{}\"", config.feed.host));
    lines.push(format!("  port: {}", config.feed.port));
    lines.push(format!("  connect_timeout_ms: {}", config.feed.connect_timeout_ms));
    lines.push(format!("  read_timeout_ms: {}", config.feed.read_timeout_ms));
    lines.push(String::new());

    lines.push("tracking:".into());
    lines.push(format!("  stale_timeout_ms: {}", config.tracking.stale_timeout_ms));
    lines.push(format!("  removal_grace_ms: {}", config.tracking.removal_grace_ms));
    lines.push(format!("  sweep_interval_ms: {}", config.tracking.sweep_interval_ms));
    lines.push(format!("  lat: {}", opt_f64(config.tracking.lat)));
    lines.push(format!("  lon: {}", opt_f64(config.tracking.lon)));
    lines.push(format!("  profile: {}", opt_str(&config.tracking.profile)));
    lines.push(format!(
        "  excluded_addresses: {}",
        format_list(&config.tracking.excluded_addresses)
    ));
    lines.push(format!(
        "  excluded_callsigns: {}",
        format_list(&config.tracking.excluded_callsigns)
    ));
    lines.push(String::new());

    lines.push("writer:".into());
    lines.push(format!("  enabled: {}", config.writer.enabled));
    lines.push(format!("  interval_ms: {}", config.writer.interval_ms));
    lines.push(format!("  batch_size: {}", config.writer.batch_size));
    lines.push(format!("  time_to_lock_ms: {}", config.writer.time_to_lock_ms));
    lines.push(String::new());

    lines.push("database:".into());
    lines.push(format!("  path: \"{}\"", config.database.path));
    lines.push(String::new());

    lines.push("dashboard:".into());
    lines.push(format!("  enabled: {}", config.dashboard.enabled));
    lines.push(format!("  host: \"{}\"", config.dashboard.host));
    lines.push(format!("  port: {}", config.dashboard.port));
    lines.push(String::new());

    lines.push("hub:".into());
    lines.push(format!("  url: {}", opt_str(&config.hub.url)));
    lines.push(format!("  timeout_ms: {}", config.hub.timeout_ms));
    lines.push(format!("  capacity: {}", config.hub.capacity));
    lines.push(String::new());

    lines.push(format!("log_level: \"{}\"", config.log_level));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.feed.port, 30003);
        assert_eq!(config.writer.batch_size, 20_000);
        assert!(config.hub.url.is_none());
        assert!(!config.dashboard.enabled);
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
feed:
  host: "radar.local"
  port: 30103
  read_timeout_ms: 15000

tracking:
  stale_timeout_ms: 120000
  removal_grace_ms: 30000
  sweep_interval_ms: 2000
  lat: 53.3537
  lon: -2.275
  excluded_addresses: [3965a3, 407DCD]
  excluded_callsigns: TEST01, "CAL1"

writer:
  enabled: false
  batch_size: 500

database:
  path: "/tmp/test.db"

dashboard:
  enabled: yes
  port: 9090

hub:
  url: "https://example.com/hub"

log_level: debug
"#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.feed.host, "radar.local");
        assert_eq!(config.feed.port, 30103);
        assert_eq!(config.feed.read_timeout_ms, 15_000);
        assert_eq!(config.feed.connect_timeout_ms, 10_000);
        assert_eq!(config.tracking.stale_timeout_ms, 120_000);
        assert_eq!(config.tracking.removal_grace_ms, 30_000);
        assert_eq!(config.tracking.lat, Some(53.3537));
        assert_eq!(config.tracking.excluded_addresses, vec!["3965A3", "407DCD"]);
        assert_eq!(config.tracking.excluded_callsigns, vec!["TEST01", "CAL1"]);
        assert!(!config.writer.enabled);
        assert_eq!(config.writer.batch_size, 500);
        assert_eq!(config.database.path, "/tmp/test.db");
        assert!(config.dashboard.enabled);
        assert_eq!(config.dashboard.port, 9090);
        assert_eq!(config.hub.url, Some("https://example.com/hub".into()));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_parse_config_null_values() {
        let text = r#"
tracking:
  lat: null
  lon: ~
  profile: null

hub:
  url: null
"#;
        let config = parse_config(text).unwrap();
        assert!(config.tracking.lat.is_none());
        assert!(config.tracking.lon.is_none());
        assert!(config.tracking.profile.is_none());
        assert!(config.hub.url.is_none());
    }

    #[test]
    fn test_parse_config_rejects_bad_numbers() {
        assert!(parse_config("feed:\n  port: lots\n").is_err());
        assert!(parse_config("writer:\n  enabled: maybe\n").is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.tracking.lat = Some(35.5);
        config.tracking.lon = Some(-82.5);
        config.tracking.excluded_callsigns = vec!["TEST01".into()];
        config.hub.url = Some("https://example.com".into());
        config.dashboard.enabled = true;

        let parsed = parse_config(&serialize_config(&config)).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        assert_eq!(load_config(&path).unwrap(), Config::default());

        let mut config = Config::default();
        config.feed.port = 40003;
        save_config(&config, &path).unwrap();
        assert_eq!(load_config(&path).unwrap().feed.port, 40003);
    }

    #[test]
    fn test_tracker_settings() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile.json");
        std::fs::write(
            &profile,
            r#"{"name": "local", "rules": [{"receiver_latitude": 53.0, "receiver_longitude": -2.0, "maximum_distance": 40}]}"#,
        )
        .unwrap();

        let mut config = Config::default();
        config.tracking.lat = Some(53.0);
        config.tracking.lon = Some(-2.0);
        config.tracking.profile = Some(profile.to_string_lossy().into_owned());
        config.tracking.excluded_addresses = vec!["3965A3".into()];

        let settings = config.tracker_settings().unwrap();
        assert_eq!(settings.stale_timeout, Duration::from_secs(60));
        assert_eq!(settings.removal_grace, Duration::ZERO);
        assert_eq!(settings.sweep_interval, Duration::from_secs(5));
        assert_eq!(settings.receiver, Some((53.0, -2.0)));
        assert_eq!(settings.rules.len(), 1);
        assert!(settings.excluded_addresses.contains(&[0x39, 0x65, 0xA3]));

        config.tracking.excluded_addresses = vec!["nope".into()];
        assert!(config.tracker_settings().is_err());
    }
}
