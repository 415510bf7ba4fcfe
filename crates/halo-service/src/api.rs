//! REST API endpoints for the halo-service.
//!
//! Commands from the presentation layer map onto engine operations:
//!
//! | Route | Operation |
//! |---|---|
//! | `POST /api/scan/start` | open a scan session, optional `{ "deviceType": "gun" }` |
//! | `POST /api/scan/stop` | close the scan session |
//! | `GET /api/scan/devices` | candidates seen this session |
//! | `POST /api/devices/pair` | pair `{ id, role, ssid, password }` |
//! | `DELETE /api/devices/{id}` | remove the pairing record |
//! | `POST /api/devices/{id}/forget-network` | best-effort credential wipe |
//! | `GET /api/devices` | enriched paired-device list |
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Engine
//! errors map to 4xx/5xx by kind: unknown peripheral is 404, radio or
//! protocol failures are 502, timeouts 504, an unpowered adapter 503.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use halo_core::{
    DeviceKind, DeviceRecord, EnrichedDevice, ForgetOutcome, NetworkCredentials, PairingRequest,
    ScanStart, ScannedCandidate,
};
use halo_types::merge_candidates;

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        // Scan session
        .route("/api/scan/start", post(start_scan))
        .route("/api/scan/stop", post(stop_scan))
        .route("/api/scan/devices", get(scanned_devices))
        // Paired devices
        .route("/api/devices", get(paired_devices))
        .route("/api/devices/pair", post(pair_device))
        .route("/api/devices/{id}", delete(unpair_device))
        .route("/api/devices/{id}/forget-network", post(forget_network))
}

// ==========================================================================
// Health
// ==========================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub uptime_seconds: u64,
    pub scan: ScanHealth,
    pub paired_devices: usize,
    pub connected_devices: usize,
}

#[derive(Debug, Serialize)]
pub struct ScanHealth {
    pub scanning: bool,
    /// Waiting for the adapter to power on.
    pub deferred: bool,
    pub candidates: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, AppError> {
    let scan = state.engine.scan_status().await;
    let devices = state.engine.paired_devices().await?;
    let connected = devices.iter().filter(|d| d.is_connected).count();

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        uptime_seconds: state.uptime_seconds(),
        scan: ScanHealth {
            scanning: scan.scanning,
            deferred: scan.deferred,
            candidates: scan.candidates,
        },
        paired_devices: devices.len(),
        connected_devices: connected,
    }))
}

// ==========================================================================
// Scan session
// ==========================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanRequest {
    #[serde(default)]
    pub device_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub status: &'static str,
}

async fn start_scan(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ScanResponse>, AppError> {
    let request: StartScanRequest = if body.is_empty() {
        StartScanRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("invalid request body: {}", e)))?
    };
    let hint = request
        .device_type
        .as_deref()
        .map(str::parse::<DeviceKind>)
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let status = match state.engine.start_scan(hint).await? {
        ScanStart::Started => "started",
        ScanStart::Deferred => "deferred",
    };
    Ok(Json(ScanResponse { status }))
}

async fn stop_scan(State(state): State<Arc<AppState>>) -> Result<Json<ScanResponse>, AppError> {
    state.engine.stop_scan().await?;
    Ok(Json(ScanResponse { status: "stopped" }))
}

/// Scan candidates, merged with the network registry when one is configured.
async fn scanned_devices(State(state): State<Arc<AppState>>) -> Json<Vec<ScannedCandidate>> {
    let local = state.engine.scanned_devices().await;
    let Some(registry) = &state.registry else {
        return Json(local);
    };
    match registry.discoverable_devices().await {
        Ok(remote) => Json(merge_candidates(&local, &remote)),
        Err(e) => {
            warn!("Registry unavailable, returning local candidates only: {}", e);
            Json(local)
        }
    }
}

// ==========================================================================
// Paired devices
// ==========================================================================

async fn paired_devices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<EnrichedDevice>>, AppError> {
    Ok(Json(state.engine.paired_devices().await?))
}

/// Request body for `POST /api/devices/pair`.
#[derive(Deserialize)]
pub struct PairDeviceRequest {
    pub id: String,
    pub role: String,
    pub ssid: String,
    pub password: String,
}

impl std::fmt::Debug for PairDeviceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairDeviceRequest")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl PairDeviceRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::BadRequest("id cannot be empty".to_string()));
        }
        if self.role.trim().is_empty() {
            return Err(AppError::BadRequest("role cannot be empty".to_string()));
        }
        if self.role == halo_types::UNPAIRED_ROLE {
            return Err(AppError::BadRequest(format!(
                "role '{}' is reserved",
                halo_types::UNPAIRED_ROLE
            )));
        }
        Ok(())
    }
}

async fn pair_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PairDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceRecord>), AppError> {
    request.validate()?;
    let PairDeviceRequest {
        id,
        role,
        ssid,
        password,
    } = request;

    let record = state
        .engine
        .pair(PairingRequest::new(id, role, NetworkCredentials::new(ssid, password)))
        .await?;

    if let Some(registry) = state.registry.clone() {
        let registered = record.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.register_pairing(&registered).await {
                warn!(device_id = %registered.id, "Registry pairing registration failed: {}", e);
            }
        });
    }

    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Serialize)]
pub struct UnpairResponse {
    pub removed: bool,
}

async fn unpair_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UnpairResponse>, AppError> {
    let removed = state.engine.unpair(&id).await?;
    Ok(Json(UnpairResponse { removed }))
}

#[derive(Debug, Serialize)]
pub struct ForgetNetworkResponse {
    pub outcome: &'static str,
}

/// Always 200; an unreachable device is logged, not reported as an error.
async fn forget_network(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<ForgetNetworkResponse> {
    let outcome = match state.engine.forget_network(&id).await {
        ForgetOutcome::Sent => "sent",
        ForgetOutcome::Unreachable => "unreachable",
        ForgetOutcome::Failed => "failed",
    };
    info!(device_id = %id, outcome, "Forget-network request handled");
    Json(ForgetNetworkResponse { outcome })
}

// ==========================================================================
// Errors
// ==========================================================================

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Engine(halo_core::Error),
}

impl From<halo_core::Error> for AppError {
    fn from(e: halo_core::Error) -> Self {
        AppError::Engine(e)
    }
}

impl From<halo_store::Error> for AppError {
    fn from(e: halo_store::Error) -> Self {
        AppError::Engine(e.into())
    }
}

fn engine_status(e: &halo_core::Error) -> StatusCode {
    use halo_core::Error;
    match e {
        Error::PeripheralNotFound(_) => StatusCode::NOT_FOUND,
        Error::AdapterNotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        e if e.is_protocol() || e.is_io() || e.is_connection() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Engine(e) => (engine_status(&e), e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    use halo_core::{EngineConfig, MockAdapter, ReconciliationEngine};
    use halo_store::Store;

    use crate::config::Config;

    fn create_test_state() -> (Arc<AppState>, Arc<MockAdapter>) {
        let adapter = Arc::new(MockAdapter::new());
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let engine =
            ReconciliationEngine::new(adapter.clone(), store, EngineConfig::default()).unwrap();
        (AppState::new(engine, Config::default(), None), adapter)
    }

    async fn response_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _) = create_test_state();
        let response = router()
            .with_state(state)
            .oneshot(empty("GET", "/api/health"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
        assert_eq!(json["paired_devices"], 0);
        assert_eq!(json["scan"]["scanning"], false);
    }

    #[tokio::test]
    async fn test_list_devices_empty() {
        let (state, _) = create_test_state();
        let response = router()
            .with_state(state)
            .oneshot(empty("GET", "/api/devices"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_scan_start_and_stop() {
        let (state, adapter) = create_test_state();
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(empty("POST", "/api/scan/start"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["status"], "started");
        assert_eq!(adapter.scan_starts(), 1);

        let response = app
            .oneshot(empty("POST", "/api/scan/stop"))
            .await
            .unwrap();
        assert_eq!(response_json(response).await["status"], "stopped");
    }

    #[tokio::test]
    async fn test_scan_start_with_hint() {
        let (state, _) = create_test_state();
        let response = router()
            .with_state(state)
            .oneshot(post_json(
                "/api/scan/start",
                serde_json::json!({ "deviceType": "gun" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_scan_start_unknown_type() {
        let (state, _) = create_test_state();
        let response = router()
            .with_state(state)
            .oneshot(post_json(
                "/api/scan/start",
                serde_json::json!({ "deviceType": "helmet" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_scan_deferred_when_adapter_off() {
        let (state, adapter) = create_test_state();
        adapter.set_powered(false);
        let response = router()
            .with_state(state)
            .oneshot(empty("POST", "/api/scan/start"))
            .await
            .unwrap();
        assert_eq!(response_json(response).await["status"], "deferred");
    }

    #[tokio::test]
    async fn test_scanned_devices() {
        let (state, adapter) = create_test_state();
        adapter.add_peripheral("abc", "HALO Gun-1", -60);
        state.engine.start_scan(None).await.unwrap();
        state
            .engine
            .handle_discovery(halo_core::Advertisement {
                id: "abc".to_string(),
                name: Some("HALO Gun-1".to_string()),
                address: String::new(),
                rssi: Some(-60),
            })
            .await;

        let response = router()
            .with_state(state)
            .oneshot(empty("GET", "/api/scan/devices"))
            .await
            .unwrap();
        let json = response_json(response).await;
        assert_eq!(json[0]["id"], "abc");
        assert_eq!(json[0]["type"], "gun");
        assert_eq!(json[0]["role"], "unpaired");
    }

    #[tokio::test]
    async fn test_pair_then_list() {
        let (state, adapter) = create_test_state();
        adapter.add_peripheral("abc123", "HALO Shoe-42", -58);
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/devices/pair",
                serde_json::json!({ "id": "abc123", "role": "L", "ssid": "NET", "password": "pw" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = response_json(response).await;
        assert_eq!(json["role"], "L");
        assert_eq!(json["type"], "shoe");

        let response = app
            .oneshot(empty("GET", "/api/devices"))
            .await
            .unwrap();
        let json = response_json(response).await;
        assert_eq!(json[0]["id"], "abc123");
        assert_eq!(json[0]["isConnected"], true);
    }

    #[tokio::test]
    async fn test_pair_unknown_device() {
        let (state, _) = create_test_state();
        let response = router()
            .with_state(state)
            .oneshot(post_json(
                "/api/devices/pair",
                serde_json::json!({ "id": "ghost", "role": "L", "ssid": "NET", "password": "pw" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pair_rejects_reserved_role() {
        let (state, _) = create_test_state();
        let response = router()
            .with_state(state)
            .oneshot(post_json(
                "/api/devices/pair",
                serde_json::json!({ "id": "abc", "role": "unpaired", "ssid": "NET", "password": "pw" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_pair_write_failure_is_bad_gateway() {
        let (state, adapter) = create_test_state();
        adapter.add_peripheral("abc", "HALO Shoe-1", -58);
        adapter.fail_write("abc", halo_core::uuids::NETWORK_SECRET);

        let response = router()
            .with_state(state)
            .oneshot(post_json(
                "/api/devices/pair",
                serde_json::json!({ "id": "abc", "role": "L", "ssid": "NET", "password": "pw" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_unpair_device() {
        let (state, adapter) = create_test_state();
        adapter.add_peripheral("abc", "HALO Shoe-1", -58);
        state
            .engine
            .pair(PairingRequest::new("abc", "L", NetworkCredentials::new("NET", "pw")))
            .await
            .unwrap();
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(empty("DELETE", "/api/devices/abc"))
            .await
            .unwrap();
        assert_eq!(response_json(response).await["removed"], true);

        let response = app
            .oneshot(empty("DELETE", "/api/devices/abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["removed"], false);
    }

    #[tokio::test]
    async fn test_forget_network_unreachable_is_ok() {
        let (state, adapter) = create_test_state();
        let response = router()
            .with_state(state)
            .oneshot(empty("POST", "/api/devices/id-missing/forget-network"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["outcome"], "unreachable");
        assert!(adapter.writes().is_empty());
    }

    #[test]
    fn test_pair_request_debug_redacts_password() {
        let request: PairDeviceRequest = serde_json::from_value(serde_json::json!({
            "id": "abc", "role": "L", "ssid": "NET", "password": "hunter2"
        }))
        .unwrap();
        let debug = format!("{:?}", request);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_engine_error_status_mapping() {
        use halo_core::Error;
        assert_eq!(
            engine_status(&Error::PeripheralNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            engine_status(&Error::AdapterNotReady("off".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            engine_status(&Error::connection_failed("x", "refused")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(engine_status(&Error::Cancelled), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_app_error_body() {
        let response = AppError::BadRequest("id cannot be empty".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response =
            AppError::from(halo_core::Error::PeripheralNotFound("ghost".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
