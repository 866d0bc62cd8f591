//! Browser subscriber session
//!
//! One subscriber per peer connection: the connection itself, the outbound
//! H.264 track, and the RTP packetizer state that is unique per subscriber
//! (SSRC and sequence numbers differ, timestamps and AU segmentation are
//! identical across subscribers of a device).

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

use super::packetizer::H264Packetizer;

pub struct Subscriber {
    pub id: String,
    pub device_serial: String,
    pub created_at: DateTime<Utc>,
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticRTP>,
    packetizer: Mutex<H264Packetizer>,
}

impl Subscriber {
    pub fn new(
        device_serial: &str,
        pc: Arc<RTCPeerConnection>,
        track: Arc<TrackLocalStaticRTP>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            device_serial: device_serial.to_string(),
            created_at: Utc::now(),
            pc,
            track,
            packetizer: Mutex::new(H264Packetizer::new()),
        }
    }

    async fn write_batch(&self, nalus: &[Bytes], rtp_ts: u32, close_access_unit: bool) {
        let packets = {
            let mut packetizer = self.packetizer.lock().await;
            packetizer.packetize_batch(nalus, rtp_ts, close_access_unit)
        };
        for packet in &packets {
            if let Err(e) = self.track.write_rtp(packet).await {
                debug!(subscriber = %self.id, "rtp write failed: {e}");
            }
        }
    }

    /// Deliver a full access unit; its final packet closes the AU.
    pub async fn send_access_unit(&self, nalus: &[Bytes], rtp_ts: u32) {
        self.write_batch(nalus, rtp_ts, true).await;
    }

    /// Deliver parameter sets ahead of an access unit; no marker.
    pub async fn send_parameter_sets(&self, nalus: &[Bytes], rtp_ts: u32) {
        self.write_batch(nalus, rtp_ts, false).await;
    }

    /// Tear down the peer connection.
    pub async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!(subscriber = %self.id, "peer connection close failed: {e}");
        }
    }
}
