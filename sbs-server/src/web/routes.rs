//! REST API route handlers.
//!
//! Everything is served from the live tracker's in-memory table.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use sbs_core::types::icao_from_hex;

use crate::web::AppState;

#[derive(Deserialize)]
pub struct AircraftParams {
    /// Include entries that have not qualified yet.
    all: Option<bool>,
}

// ---------------------------------------------------------------------------
// Aircraft endpoints
// ---------------------------------------------------------------------------

/// GET /api/aircraft: surfaced aircraft, most recently seen first.
pub async fn api_aircraft(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AircraftParams>,
) -> impl IntoResponse {
    let aircraft = if params.all == Some(true) {
        let mut all = state.tracker.snapshot();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        all
    } else {
        state.tracker.get_active()
    };
    Json(aircraft)
}

/// GET /api/aircraft/:address: one aircraft by hex address.
pub async fn api_aircraft_detail(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let Some(icao) = icao_from_hex(&address) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("invalid address: {address}")})),
        )
            .into_response();
    };

    match state.tracker.get(&icao) {
        Some(ac) => Json(ac).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Aircraft not found"})),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// GET /api/stats: tracker counters plus writer queue depth.
pub async fn api_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let writer = state.writer.as_ref().map(|w| {
        json!({
            "started": w.is_started(),
            "queue": w.queue_len(),
            "dropped": w.dropped(),
        })
    });
    Json(json!({
        "tracker": state.tracker.stats(),
        "writer": writer,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use chrono::NaiveDateTime;
    use serde_json::Value;
    use tower::ServiceExt;

    use sbs_core::{Notifier, Tracker, TrackerSettings};

    use crate::store::SqliteStore;
    use crate::writer::{QueuedWriter, WriterSettings};

    const LINES: [&str; 2] = [
        "MSG,5,1,1,3965A3,1,2023/08/23,12:07:27.929,2023/08/23,12:07:27.932,,18025,,,,,,,0,,0,",
        "MSG,3,1,1,407DCD,1,2023/08/23,12:07:28.001,2023/08/23,12:07:28.010,,32000,,,53.1,-2.4,,,0,0,0,0",
    ];

    fn test_state(with_writer: bool) -> Arc<AppState> {
        let settings = TrackerSettings::new(Duration::from_secs(60), Duration::from_secs(5));
        let tracker = Arc::new(Tracker::new(settings, Notifier::new()));
        let now = NaiveDateTime::parse_from_str("2023-08-23 12:07:30", "%Y-%m-%d %H:%M:%S").unwrap();
        for (i, line) in LINES.iter().enumerate() {
            tracker.ingest_line(line, now + chrono::TimeDelta::seconds(i as i64));
        }
        let writer = with_writer.then(|| {
            let store = SqliteStore::open_memory().unwrap();
            Arc::new(QueuedWriter::new(
                Arc::new(store),
                WriterSettings {
                    interval: Duration::from_secs(30),
                    batch_size: 100,
                    time_to_lock: Duration::from_secs(900),
                },
            ))
        });
        Arc::new(AppState { tracker, writer })
    }

    async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        let response = crate::web::build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        assert_eq!(response.headers()["cache-control"], "no-store");
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_api_aircraft() {
        let (status, json) = get(test_state(false), "/api/aircraft").await;
        assert_eq!(status, StatusCode::OK);
        let list = json.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["address"], "407DCD");
        assert_eq!(list[1]["altitude"], 18025);
    }

    #[tokio::test]
    async fn test_api_aircraft_all() {
        let (status, json) = get(test_state(false), "/api/aircraft?all=true").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_api_aircraft_detail() {
        let (status, json) = get(test_state(false), "/api/aircraft/407dcd").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["address"], "407DCD");
        assert_eq!(json["latitude"], 53.1);
        assert_eq!(json["status"], "Tracked");
    }

    #[tokio::test]
    async fn test_api_aircraft_not_found() {
        let (status, _) = get(test_state(false), "/api/aircraft/FFFFFF").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_api_aircraft_bad_address() {
        let (status, json) = get(test_state(false), "/api/aircraft/XYZ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("XYZ"));
    }

    #[tokio::test]
    async fn test_api_stats() {
        let (status, json) = get(test_state(true), "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["tracker"]["lines"], 2);
        assert_eq!(json["tracker"]["tracked"], 2);
        assert_eq!(json["writer"]["started"], false);
        assert_eq!(json["writer"]["queue"], 0);

        let (_, json) = get(test_state(false), "/api/stats").await;
        assert!(json["writer"].is_null());
    }
}
