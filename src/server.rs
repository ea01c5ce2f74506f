//! HTTP API and realtime WebSocket endpoint.
//!
//! Routes
//! - `GET /api/health`, `GET /api/floors`, `GET /api/devices`
//! - `PUT /api/devices/{id}/coords` with body `{x, y}`
//! - WebSocket upgrade on `/` and `/ws` (server-to-client events only)
//!
//! Document I/O is blocking and runs on tokio's blocking pool.

use crate::config::Config;
use crate::db::store::{DocumentStore, StoreError};
use crate::models::map::{CoordsUpdateResponse, Device, ErrorBody, Floor, HealthResponse};
use crate::services::coords::{self, UpdateError};
use crate::services::realtime::{self, Hub};
use crate::utils::epoch_millis;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use http::StatusCode;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub hub: Arc<Hub>,
}

impl AppState {
    pub fn new(store: DocumentStore) -> Self {
        AppState {
            store: Arc::new(store),
            hub: Arc::new(Hub::new()),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (ApiError::BadRequest(message) | ApiError::NotFound(message) | ApiError::Internal(message)) = self;
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        error!("Document store failure: {}", value);
        ApiError::Internal("Internal server error".to_string())
    }
}

impl From<UpdateError> for ApiError {
    fn from(value: UpdateError) -> Self {
        match value {
            UpdateError::InvalidCoords => ApiError::BadRequest(value.to_string()),
            UpdateError::DeviceNotFound(_) => ApiError::NotFound(value.to_string()),
            UpdateError::Store(e) => e.into(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health_handler))
        .route("/api/floors", get(floors_handler))
        .route("/api/devices", get(devices_handler))
        .route("/api/devices/{id}/coords", put(put_coords_handler))
        .with_state(state)
}

/// Bind the configured address and serve until the process exits.
pub async fn serve(cfg: &Config, state: AppState) -> Result<(), String> {
    let listener = TcpListener::bind((cfg.bind_addr, cfg.port))
        .await
        .map_err(|e| format!("bind {}:{} failed: {}", cfg.bind_addr, cfg.port, e))?;
    info!("Device map running at {}", cfg.local_url());
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| format!("server error: {}", e))
}

async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))?
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        ts: epoch_millis(),
    })
}

pub async fn floors_handler(State(state): State<AppState>) -> Result<Json<Vec<Floor>>, ApiError> {
    debug!("GET /api/floors");
    let store = state.store.clone();
    let doc = blocking(move || Ok(store.load_floors()?)).await?;
    Ok(Json(doc.floors))
}

pub async fn devices_handler(State(state): State<AppState>) -> Result<Json<Vec<Device>>, ApiError> {
    debug!("GET /api/devices");
    let store = state.store.clone();
    let doc = blocking(move || Ok(store.load_devices()?)).await?;
    Ok(Json(doc.devices))
}

/// Validate, clamp, persist, then fan the updated device out to every realtime client.
pub async fn put_coords_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<CoordsUpdateResponse>, ApiError> {
    debug!("PUT /api/devices/{}/coords", id);
    // A body that is not JSON carries no usable x/y.
    let payload = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    let coords = coords::parse_coords(&payload)?;

    let store = state.store.clone();
    let hub = state.hub.clone();
    let device = blocking(move || {
        // Published under the store's write lock so frames follow the order of writes.
        let device = coords::apply_coords(&store, &id, coords, |saved| {
            let delivered = hub.broadcast(&realtime::coords_updated_event(saved.clone()));
            debug!("Coordinates for {} pushed to {} client(s)", id, delivered);
        })?;
        Ok(device)
    })
    .await?;
    Ok(Json(CoordsUpdateResponse { ok: true, device }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (client_id, mut outbound) = hub.connect(&realtime::hello_event());
    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });
    // Inbound frames are not part of the protocol; read only to notice the close.
    let mut reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Realtime client {} read error: {}", client_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
    hub.disconnect(client_id);
}
