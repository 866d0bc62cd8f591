//! HTTP handlers
//!
//! The signaling surface is deliberately small: one-shot `/offer` exchange,
//! the adb-backed device listing, and a health probe. The static UI served
//! next to these is a collaborator, not part of the pipeline.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::adb;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::webrtc::open_subscriber;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
pub struct OfferQuery {
    /// Target device serial.
    pub device: String,
}

/// POST /offer?device=<serial> — one-shot SDP exchange.
///
/// The body is a JSON session description; the response is the answer with
/// all ICE candidates gathered.
pub async fn offer(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OfferQuery>,
    body: String,
) -> Result<Json<RTCSessionDescription>> {
    let offer: RTCSessionDescription = serde_json::from_str(&body)
        .map_err(|e| AppError::SignalingInvalid(format!("bad SDP offer: {e}")))?;
    if offer.sdp.trim().is_empty() {
        return Err(AppError::SignalingInvalid("empty SDP".to_string()));
    }

    info!(device = %query.device, "offer received");
    let answer = open_subscriber(&state, &query.device, offer).await?;
    Ok(Json(answer))
}

/// One row of the device listing.
#[derive(Serialize)]
pub struct DeviceEntry {
    pub ip: String,
    pub state: String,
    pub connected: bool,
    #[serde(rename = "videoW", skip_serializing_if = "Option::is_none")]
    pub video_w: Option<u16>,
    #[serde(rename = "videoH", skip_serializing_if = "Option::is_none")]
    pub video_h: Option<u16>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceEntry>,
    pub count: usize,
}

/// GET /devices — adb listing merged with live session state.
pub async fn list_devices(State(state): State<Arc<AppState>>) -> Result<Json<DevicesResponse>> {
    let adb_devices = adb::list_devices(&state.adb).await?;

    let mut devices = Vec::with_capacity(adb_devices.len());
    for info in adb_devices {
        let entry = match state.devices.get(&info.serial).await {
            Some(session) => {
                let (width, height) = session.dimensions().await;
                DeviceEntry {
                    ip: info.serial,
                    state: info.state,
                    connected: true,
                    video_w: Some(width),
                    video_h: Some(height),
                    created_at: Some(session.created_at.to_rfc3339()),
                }
            }
            None => DeviceEntry {
                ip: info.serial,
                state: info.state,
                connected: false,
                video_w: None,
                video_h: None,
                created_at: None,
            },
        };
        devices.push(entry);
    }

    Ok(Json(DevicesResponse {
        count: devices.len(),
        devices,
    }))
}
