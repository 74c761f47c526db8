//! REST Surface
//!
//! Small JSON API over the fleet and the trail store: open/close trails,
//! ingest position samples, read trail and operation statistics.
//!
//! Callers authenticate with an opaque bearer token from the external
//! session provider; the server checks for its presence only and never
//! interprets its contents.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio_graceful_shutdown::SubsystemHandle;

use swathe_core::sample::GeoSample;
use swathe_core::trail::TrailRecord;
use swathe_core::types::{OperationId, TrailId, VehicleId};
use swathe_core::vehicle::{all_profiles, profile, VehicleKind};

use crate::fleet::Fleet;
use crate::store::{StoreError, TrailStore};
use crate::TrackerError;

#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<Fleet>,
    pub store: Arc<dyn TrailStore>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing session token")]
    Unauthorized,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("store unavailable: {0}")]
    Store(StoreError),
    #[error("internal error")]
    Internal,
}

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        match e {
            TrackerError::Conflict { .. } => ApiError::Conflict(e.to_string()),
            TrackerError::NoActiveTrail(_) => ApiError::NotFound(e.to_string()),
            TrackerError::Store(inner) => ApiError::Store(inner),
            _ => ApiError::Internal,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownTrail(id) => ApiError::NotFound(format!("unknown trail {}", id)),
            other => ApiError::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// The session token is opaque: present or not, never parsed.
fn require_session(headers: &HeaderMap) -> Result<(), ApiError> {
    match headers.get(axum::http::header::AUTHORIZATION) {
        Some(value) if !value.is_empty() => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTrailRequest {
    pub operation: OperationId,
    pub swath_width_m: Option<f64>,
    pub kind: Option<String>,
}

impl OpenTrailRequest {
    fn swath_width(&self) -> Result<f64, ApiError> {
        if let Some(width) = self.swath_width_m {
            if !width.is_finite() || width <= 0.0 {
                return Err(ApiError::BadRequest(format!(
                    "invalid swath width {}",
                    width
                )));
            }
            return Ok(width);
        }
        let kind = match self.kind.as_deref() {
            Some(s) => VehicleKind::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown vehicle kind '{}'", s)))?,
            None => VehicleKind::Tractor,
        };
        Ok(profile(kind).default_swath_m)
    }
}

/// Trail record as served by the API, with hectare conversions and ISO
/// 8601 timestamps.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailResponse {
    pub id: TrailId,
    pub vehicle: VehicleId,
    pub operation: OperationId,
    pub state: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub swath_width_m: f64,
    pub distance_m: f64,
    pub covered_ha: f64,
    pub overlap_ha: f64,
    pub overlap_percent: f64,
}

fn iso(ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

impl From<TrailRecord> for TrailResponse {
    fn from(record: TrailRecord) -> Self {
        TrailResponse {
            id: record.id,
            vehicle: record.vehicle,
            operation: record.operation,
            state: record.state.to_string(),
            started_at: iso(record.started_at),
            ended_at: record.ended_at.map(iso),
            swath_width_m: record.swath_width_m,
            distance_m: record.stats.distance_m,
            covered_ha: record.stats.covered_ha(),
            overlap_ha: record.stats.overlap_ha(),
            overlap_percent: record.stats.overlap_fraction * 100.0,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/vehicles/profiles", get(vehicle_profiles))
        .route(
            "/v1/vehicles/{vehicle}/trail",
            post(open_trail).delete(close_trail),
        )
        .route("/v1/vehicles/{vehicle}/samples", post(ingest_samples))
        .route("/v1/trails/{trail}", get(get_trail))
        .route("/v1/operations/{operation}/trails", get(operation_trails))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "activeTrails": state.fleet.active_count(),
    }))
}

async fn vehicle_profiles() -> Json<serde_json::Value> {
    Json(json!({ "profiles": all_profiles() }))
}

async fn open_trail(
    State(state): State<AppState>,
    Path(vehicle): Path<String>,
    headers: HeaderMap,
    Json(body): Json<OpenTrailRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_session(&headers)?;
    let width = body.swath_width()?;
    state
        .fleet
        .open_trail(VehicleId(vehicle), body.operation, width)?;
    // The store acknowledgment is asynchronous; the trail is Opening now
    Ok((StatusCode::ACCEPTED, Json(json!({ "state": "opening" }))))
}

async fn close_trail(
    State(state): State<AppState>,
    Path(vehicle): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_session(&headers)?;
    state.fleet.close_trail(&VehicleId(vehicle))?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "state": "closing" }))))
}

async fn ingest_samples(
    State(state): State<AppState>,
    Path(vehicle): Path<String>,
    headers: HeaderMap,
    Json(samples): Json<Vec<GeoSample>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_session(&headers)?;
    let vehicle = VehicleId(vehicle);
    let accepted = samples.len();
    for sample in samples {
        state.fleet.route_sample(&vehicle, sample)?;
    }
    Ok(Json(json!({ "accepted": accepted })))
}

async fn get_trail(
    State(state): State<AppState>,
    Path(trail): Path<String>,
) -> Result<Json<TrailResponse>, ApiError> {
    let record = state.store.get_trail(&TrailId(trail)).await?;
    Ok(Json(record.into()))
}

async fn operation_trails(
    State(state): State<AppState>,
    Path(operation): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let records = state.store.operation_trails(&OperationId(operation)).await?;
    let trails: Vec<TrailResponse> = records.into_iter().map(Into::into).collect();
    Ok(Json(json!({ "trails": trails })))
}

/// Subsystem body: serve the API until shutdown.
pub async fn run(
    state: AppState,
    listen: String,
    subsys: SubsystemHandle,
) -> Result<(), TrackerError> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    log::info!("web: listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { subsys.on_shutdown_requested().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::store::MemoryTrailStore;
    use crate::sync::SyncView;
    use std::time::Duration;
    use swathe_core::projection::METERS_PER_DEGREE_LATITUDE;

    fn test_state() -> AppState {
        let store = Arc::new(MemoryTrailStore::new());
        let config = SessionConfig {
            commit_interval: Duration::from_millis(30),
            backoff_initial: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
            ..SessionConfig::default()
        };
        AppState {
            fleet: Fleet::new(config, store.clone(), SyncView::default()),
            store,
        }
    }

    fn auth_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer opaque-token".parse().unwrap(),
        );
        headers
    }

    fn open_request(operation: &str) -> OpenTrailRequest {
        OpenTrailRequest {
            operation: OperationId::from(operation),
            swath_width_m: Some(10.0),
            kind: None,
        }
    }

    fn make_sample(t: u64, meters: f64) -> GeoSample {
        GeoSample {
            timestamp: t,
            latitude: 52.0 + meters / METERS_PER_DEGREE_LATITUDE,
            longitude: 5.0,
            heading: 0.0,
            speed: 5.0,
        }
    }

    #[tokio::test]
    async fn test_open_requires_token() {
        let state = test_state();
        let result = open_trail(
            State(state),
            Path("v-1".to_string()),
            HeaderMap::new(),
            Json(open_request("op-1")),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_open_close_flow() {
        let state = test_state();

        let (status, _) = open_trail(
            State(state.clone()),
            Path("v-1".to_string()),
            auth_headers(),
            Json(open_request("op-1")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        // Second open conflicts
        let result = open_trail(
            State(state.clone()),
            Path("v-1".to_string()),
            auth_headers(),
            Json(open_request("op-1")),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Conflict(_))));

        ingest_samples(
            State(state.clone()),
            Path("v-1".to_string()),
            auth_headers(),
            Json(vec![make_sample(1000, 0.0), make_sample(2000, 50.0)]),
        )
        .await
        .unwrap();

        let (status, _) = close_trail(
            State(state.clone()),
            Path("v-1".to_string()),
            auth_headers(),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let trail = get_trail(State(state.clone()), Path("trail-1".to_string()))
            .await
            .unwrap();
        assert_eq!(trail.0.state, "closed");
        assert!((trail.0.distance_m - 50.0).abs() < 0.5);
        assert!(trail.0.ended_at.is_some());

        let listing = operation_trails(State(state), Path("op-1".to_string()))
            .await
            .unwrap();
        assert_eq!(listing.0["trails"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_without_trail_is_not_found() {
        let state = test_state();
        let result = ingest_samples(
            State(state),
            Path("ghost".to_string()),
            auth_headers(),
            Json(vec![make_sample(1000, 0.0)]),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_bad_swath_width_rejected() {
        let state = test_state();
        let mut body = open_request("op-1");
        body.swath_width_m = Some(-1.0);
        let result = open_trail(
            State(state),
            Path("v-1".to_string()),
            auth_headers(),
            Json(body),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_unknown_trail_is_not_found() {
        let state = test_state();
        let result = get_trail(State(state), Path("nope".to_string())).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_profiles_listing() {
        let response = vehicle_profiles().await;
        let profiles = response.0["profiles"].as_array().unwrap();
        assert_eq!(profiles.len(), all_profiles().len());
        assert!(profiles.iter().any(|p| p["kind"] == "sprayer"));
    }
}
