//! Persistent store for aircraft snapshots and positions.
//!
//! The writer depends only on the [`AircraftStore`] contract; [`SqliteStore`]
//! is the bundled implementation (WAL mode, two tables).

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use sbs_core::types::icao_to_string;
use sbs_core::{Behaviour, TrackedAircraft};

use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS aircraft (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL,
    callsign TEXT,
    squawk TEXT,
    altitude INTEGER,
    ground_speed REAL,
    track REAL,
    latitude REAL,
    longitude REAL,
    distance_nm REAL,
    vertical_rate INTEGER,
    behaviour TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    messages INTEGER NOT NULL DEFAULT 0,
    locked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS positions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    aircraft_id INTEGER NOT NULL REFERENCES aircraft(id),
    altitude INTEGER,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    distance_nm REAL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_aircraft_address ON aircraft(address, locked);
CREATE INDEX IF NOT EXISTS idx_positions_aircraft ON positions(aircraft_id);
"#;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Persisted form of an aircraft snapshot. `id` is `None` until written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AircraftRecord {
    pub id: Option<i64>,
    pub address: String,
    pub callsign: Option<String>,
    pub squawk: Option<String>,
    pub altitude: Option<i32>,
    pub ground_speed: Option<f64>,
    pub track: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub distance_nm: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub behaviour: Behaviour,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub messages: u64,
    pub locked: bool,
}

impl From<&TrackedAircraft> for AircraftRecord {
    fn from(ac: &TrackedAircraft) -> Self {
        AircraftRecord {
            id: None,
            address: icao_to_string(&ac.address),
            callsign: ac.callsign.clone(),
            squawk: ac.squawk.clone(),
            altitude: ac.altitude,
            ground_speed: ac.ground_speed,
            track: ac.track,
            latitude: ac.latitude,
            longitude: ac.longitude,
            distance_nm: ac.distance_nm,
            vertical_rate: ac.vertical_rate,
            behaviour: ac.behaviour,
            first_seen: ac.first_seen,
            last_seen: ac.last_seen,
            messages: ac.message_count,
            locked: false,
        }
    }
}

/// One position fix. `address` resolves `aircraft_id` when it isn't known
/// yet at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRecord {
    pub id: Option<i64>,
    pub aircraft_id: Option<i64>,
    pub address: String,
    pub altitude: Option<i32>,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_nm: Option<f64>,
    pub timestamp: NaiveDateTime,
}

impl PositionRecord {
    /// Current fix of the aircraft, if it has one.
    pub fn from_aircraft(ac: &TrackedAircraft) -> Option<Self> {
        let position = ac.position()?;
        Some(PositionRecord {
            id: None,
            aircraft_id: None,
            address: icao_to_string(&ac.address),
            altitude: position.altitude,
            latitude: position.latitude,
            longitude: position.longitude,
            distance_nm: ac.distance_nm,
            timestamp: ac.last_seen,
        })
    }
}

/// Selection for aircraft queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AircraftFilter {
    pub address: Option<String>,
    pub locked: Option<bool>,
}

impl AircraftFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn unlocked() -> Self {
        AircraftFilter {
            address: None,
            locked: Some(false),
        }
    }

    pub fn for_address(address: &str) -> Self {
        AircraftFilter {
            address: Some(address.to_string()),
            locked: None,
        }
    }

    pub fn unlocked_for(address: &str) -> Self {
        AircraftFilter {
            address: Some(address.to_string()),
            locked: Some(false),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub aircraft: i64,
    pub locked: i64,
    pub positions: i64,
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AircraftStore: Send + Sync {
    /// Insert when `id` is `None`, otherwise update. Returns the row with its id.
    async fn write_aircraft(&self, record: AircraftRecord) -> Result<AircraftRecord, StoreError>;

    /// Most recently inserted row matching the filter.
    async fn get_aircraft(&self, filter: AircraftFilter) -> Result<Option<AircraftRecord>, StoreError>;

    /// All matching rows, oldest first.
    async fn list_aircraft(&self, filter: AircraftFilter) -> Result<Vec<AircraftRecord>, StoreError>;

    /// Insert a position. `aircraft_id` must be set.
    async fn write_position(&self, record: PositionRecord) -> Result<PositionRecord, StoreError>;

    async fn list_positions(&self, aircraft_id: i64) -> Result<Vec<PositionRecord>, StoreError>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// SQLite-backed store. Calls run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await?
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count = |sql: &str| conn.query_row(sql, [], |r| r.get::<_, i64>(0));
        Ok(StoreStats {
            aircraft: count("SELECT COUNT(*) FROM aircraft")?,
            locked: count("SELECT COUNT(*) FROM aircraft WHERE locked = 1")?,
            positions: count("SELECT COUNT(*) FROM positions")?,
        })
    }
}

const AIRCRAFT_COLUMNS: &str = "id, address, callsign, squawk, altitude, ground_speed, track, \
     latitude, longitude, distance_nm, vertical_rate, behaviour, first_seen, last_seen, \
     messages, locked";

const AIRCRAFT_WHERE: &str = "WHERE (?1 IS NULL OR address = ?1) AND (?2 IS NULL OR locked = ?2)";

fn aircraft_from_row(r: &Row<'_>) -> rusqlite::Result<AircraftRecord> {
    let behaviour: String = r.get(11)?;
    Ok(AircraftRecord {
        id: r.get(0)?,
        address: r.get(1)?,
        callsign: r.get(2)?,
        squawk: r.get(3)?,
        altitude: r.get(4)?,
        ground_speed: r.get(5)?,
        track: r.get(6)?,
        latitude: r.get(7)?,
        longitude: r.get(8)?,
        distance_nm: r.get(9)?,
        vertical_rate: r.get(10)?,
        behaviour: behaviour
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(11, Type::Text, e.into()))?,
        first_seen: r.get(12)?,
        last_seen: r.get(13)?,
        messages: r.get::<_, i64>(14)?.max(0) as u64,
        locked: r.get::<_, i64>(15)? != 0,
    })
}

fn position_from_row(r: &Row<'_>) -> rusqlite::Result<PositionRecord> {
    Ok(PositionRecord {
        id: r.get(0)?,
        aircraft_id: r.get(1)?,
        address: r.get(2)?,
        altitude: r.get(3)?,
        latitude: r.get(4)?,
        longitude: r.get(5)?,
        distance_nm: r.get(6)?,
        timestamp: r.get(7)?,
    })
}

#[async_trait]
impl AircraftStore for SqliteStore {
    async fn write_aircraft(&self, mut record: AircraftRecord) -> Result<AircraftRecord, StoreError> {
        self.with_conn(move |conn| {
            let messages = i64::try_from(record.messages).map_err(|_| StoreError::InvalidValue {
                column: "messages",
                value: record.messages.to_string(),
            })?;
            let values = params![
                record.address,
                record.callsign,
                record.squawk,
                record.altitude,
                record.ground_speed,
                record.track,
                record.latitude,
                record.longitude,
                record.distance_nm,
                record.vertical_rate,
                record.behaviour.as_str(),
                record.first_seen,
                record.last_seen,
                messages,
                record.locked,
                record.id,
            ];
            match record.id {
                Some(_) => {
                    conn.execute(
                        "UPDATE aircraft SET address = ?1, callsign = ?2, squawk = ?3, altitude = ?4,
                             ground_speed = ?5, track = ?6, latitude = ?7, longitude = ?8,
                             distance_nm = ?9, vertical_rate = ?10, behaviour = ?11,
                             first_seen = ?12, last_seen = ?13, messages = ?14, locked = ?15
                         WHERE id = ?16",
                        values,
                    )?;
                }
                None => {
                    conn.execute(
                        "INSERT INTO aircraft (address, callsign, squawk, altitude, ground_speed,
                             track, latitude, longitude, distance_nm, vertical_rate, behaviour,
                             first_seen, last_seen, messages, locked)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                        &values[..15],
                    )?;
                    record.id = Some(conn.last_insert_rowid());
                }
            }
            Ok(record)
        })
        .await
    }

    async fn get_aircraft(&self, filter: AircraftFilter) -> Result<Option<AircraftRecord>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {AIRCRAFT_COLUMNS} FROM aircraft {AIRCRAFT_WHERE} ORDER BY id DESC LIMIT 1");
            Ok(conn
                .query_row(&sql, params![filter.address, filter.locked], aircraft_from_row)
                .optional()?)
        })
        .await
    }

    async fn list_aircraft(&self, filter: AircraftFilter) -> Result<Vec<AircraftRecord>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {AIRCRAFT_COLUMNS} FROM aircraft {AIRCRAFT_WHERE} ORDER BY id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![filter.address, filter.locked], aircraft_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn write_position(&self, mut record: PositionRecord) -> Result<PositionRecord, StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO positions (aircraft_id, altitude, latitude, longitude, distance_nm, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.aircraft_id,
                    record.altitude,
                    record.latitude,
                    record.longitude,
                    record.distance_nm,
                    record.timestamp,
                ],
            )?;
            record.id = Some(conn.last_insert_rowid());
            Ok(record)
        })
        .await
    }

    async fn list_positions(&self, aircraft_id: i64) -> Result<Vec<PositionRecord>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.aircraft_id, a.address, p.altitude, p.latitude, p.longitude,
                        p.distance_nm, p.timestamp
                 FROM positions p JOIN aircraft a ON a.id = p.aircraft_id
                 WHERE p.aircraft_id = ?1 ORDER BY p.id",
            )?;
            let rows = stmt
                .query_map(params![aircraft_id], position_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn test_store() -> SqliteStore {
        SqliteStore::open_memory().unwrap()
    }

    fn record(address: &str, last_seen_secs: i64) -> AircraftRecord {
        let t0 = NaiveDateTime::parse_from_str("2023-08-23 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        AircraftRecord {
            id: None,
            address: address.into(),
            callsign: Some("BAW123".into()),
            squawk: None,
            altitude: Some(32000),
            ground_speed: Some(441.5),
            track: None,
            latitude: Some(53.1),
            longitude: Some(-2.4),
            distance_nm: Some(15.25),
            vertical_rate: Some(0),
            behaviour: Behaviour::LevelFlight,
            first_seen: t0,
            last_seen: t0 + TimeDelta::seconds(last_seen_secs),
            messages: 12,
            locked: false,
        }
    }

    #[tokio::test]
    async fn test_insert_then_update() {
        let store = test_store();
        let written = store.write_aircraft(record("3965A3", 0)).await.unwrap();
        let id = written.id.unwrap();

        let mut changed = written.clone();
        changed.altitude = Some(33000);
        changed.locked = true;
        let updated = store.write_aircraft(changed).await.unwrap();
        assert_eq!(updated.id, Some(id));

        let rows = store.list_aircraft(AircraftFilter::all()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].altitude, Some(33000));
        assert!(rows[0].locked);
        assert_eq!(rows[0].behaviour, Behaviour::LevelFlight);
        assert_eq!(rows[0].last_seen, written.last_seen);
    }

    #[tokio::test]
    async fn test_filters() {
        let store = test_store();
        let mut old = record("3965A3", 0);
        old.locked = true;
        store.write_aircraft(old).await.unwrap();
        let open = store.write_aircraft(record("3965A3", 60)).await.unwrap();
        store.write_aircraft(record("407DCD", 0)).await.unwrap();

        let found = store
            .get_aircraft(AircraftFilter::unlocked_for("3965A3"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, open.id);

        assert_eq!(
            store.list_aircraft(AircraftFilter::unlocked()).await.unwrap().len(),
            2
        );
        assert_eq!(
            store
                .list_aircraft(AircraftFilter::for_address("3965A3"))
                .await
                .unwrap()
                .len(),
            2
        );
        assert!(store
            .get_aircraft(AircraftFilter::for_address("A8E8A0"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_positions() {
        let store = test_store();
        let ac = store.write_aircraft(record("4CA2C5", 0)).await.unwrap();
        let t = ac.last_seen;
        for i in 0..3 {
            store
                .write_position(PositionRecord {
                    id: None,
                    aircraft_id: ac.id,
                    address: ac.address.clone(),
                    altitude: Some(9000 + i * 100),
                    latitude: 53.0 + i as f64 * 0.01,
                    longitude: -2.0,
                    distance_nm: None,
                    timestamp: t,
                })
                .await
                .unwrap();
        }
        let positions = store.list_positions(ac.id.unwrap()).await.unwrap();
        assert_eq!(positions.len(), 3);
        assert_eq!(positions[2].altitude, Some(9200));
        assert_eq!(positions[0].address, "4CA2C5");

        let stats = store.stats().unwrap();
        assert_eq!(stats, StoreStats { aircraft: 1, locked: 0, positions: 3 });
    }

    #[tokio::test]
    async fn test_position_requires_aircraft() {
        let store = test_store();
        let orphan = PositionRecord {
            id: None,
            aircraft_id: Some(999),
            address: "4CA2C5".into(),
            altitude: None,
            latitude: 53.0,
            longitude: -2.0,
            distance_nm: None,
            timestamp: record("4CA2C5", 0).last_seen,
        };
        assert!(store.write_position(orphan).await.is_err());
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("sbs.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteStore::open(path).unwrap();
            store.write_aircraft(record("3965A3", 0)).await.unwrap();
        }
        let reopened = SqliteStore::open(path).unwrap();
        assert_eq!(reopened.stats().unwrap().aircraft, 1);
    }

    #[test]
    fn test_open_reports_unusable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("sbs.db");

        let err = SqliteStore::open(path.to_str().unwrap()).err().unwrap();
        assert!(matches!(err, StoreError::Io(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_record_from_aircraft() {
        let seen = NaiveDateTime::parse_from_str("2023-08-23 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let mut ac = TrackedAircraft::new([0x39, 0x65, 0xA3], seen);
        let rec = AircraftRecord::from(&ac);
        assert_eq!(rec.address, "3965A3");
        assert!(rec.id.is_none());
        assert!(PositionRecord::from_aircraft(&ac).is_none());

        ac.latitude = Some(53.0);
        ac.longitude = Some(-2.0);
        let pos = PositionRecord::from_aircraft(&ac).unwrap();
        assert_eq!(pos.address, "3965A3");
        assert_eq!(pos.timestamp, seen);
    }
}
