use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::jwt_auth::{auth, ErrorResponse, JwtConfig, UserId};
use crate::models::location::{LocationRecord, PositionReport, Snapshot};
use crate::registry::Registry;

pub struct AppState {
    pub registry: Arc<Registry>,
    pub drivers: HashMap<String, String>,
    pub jwt: JwtConfig,
}

impl AppState {
    pub fn new(config: &ServerConfig, registry: Arc<Registry>) -> Self {
        Self {
            registry,
            drivers: config.drivers.clone(),
            jwt: JwtConfig::new(config.jwt_secret.clone(), config.jwt_maxage),
        }
    }
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub fn app(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/update_location", post(update_location))
        .route("/get_my_location", get(get_my_location))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth))
        .route("/login", post(login))
        .route("/get_locations", get(get_locations));

    if let Some(dir) = static_dir {
        router = router.nest_service("/static", ServeDir::new(dir));
    }

    router
        // logging so we can see whats going on
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let invalid = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                status: "error",
                message: "Invalid credentials".to_string(),
            }),
        )
    };

    let Ok(Json(request)) = payload else {
        return Err(invalid());
    };
    let (Some(username), Some(password)) = (request.username, request.password) else {
        return Err(invalid());
    };

    if state.drivers.get(&username) != Some(&password) {
        warn!("Failed login for {}", username);
        return Err(invalid());
    }

    let token = state.jwt.issue(&username).map_err(|e| {
        error!("Unable to sign token: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                status: "error",
                message: "Unable to create session".to_string(),
            }),
        )
    })?;

    info!("Driver {} logged in", username);
    Ok(Json(json!({
        "status": "success",
        "message": "Login successful",
        "token": token,
        "redirect": "/driver",
    })))
}

/// A coordinate as sent by clients: a JSON number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Coordinate {
    Number(f64),
    Text(String),
}

impl Coordinate {
    fn value(&self) -> Option<f64> {
        match self {
            Coordinate::Number(n) => Some(*n),
            Coordinate::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateLocationRequest {
    lat: Option<Coordinate>,
    lng: Option<Coordinate>,
    accuracy: Option<Coordinate>,
}

impl UpdateLocationRequest {
    fn into_report(self) -> Result<PositionReport, ApiError> {
        let (Some(lat), Some(lng)) = (self.lat, self.lng) else {
            return Err(api_error(StatusCode::BAD_REQUEST, "lat and lng required"));
        };
        let accuracy = match self.accuracy {
            Some(accuracy) => accuracy.value(),
            None => Some(0.0),
        };
        match (lat.value(), lng.value(), accuracy) {
            (Some(lat), Some(lng), Some(accuracy)) => Ok(PositionReport::new(lat, lng, accuracy)),
            _ => Err(api_error(StatusCode::BAD_REQUEST, "invalid lat/lng")),
        }
    }
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Extension(UserId(driver_id)): Extension<UserId>,
    payload: Result<Json<UpdateLocationRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        debug!("Bad location payload from {}: {}", driver_id, e);
        api_error(StatusCode::BAD_REQUEST, "invalid json")
    })?;
    let report = request.into_report()?;

    let record = LocationRecord::stamped(&driver_id, report, Local::now());
    let timestamp = record.timestamp.clone();
    state.registry.upsert(&driver_id, record).map_err(|e| {
        warn!("Rejected location from {}: {}", driver_id, e);
        api_error(StatusCode::BAD_REQUEST, e.to_string())
    })?;

    debug!("Location of {} updated to {}, {}", driver_id, report.lat, report.lng);
    Ok(Json(json!({ "status": "ok", "timestamp": timestamp })))
}

async fn get_locations(State(state): State<Arc<AppState>>) -> Result<Json<Snapshot>, ApiError> {
    state
        .registry
        .snapshot()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no locations yet"))
}

async fn get_my_location(
    State(state): State<Arc<AppState>>,
    Extension(UserId(driver_id)): Extension<UserId>,
) -> Result<Json<LocationRecord>, ApiError> {
    state
        .registry
        .get(&driver_id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no location yet"))
}
