//! Per-device session state
//!
//! A [`DeviceSession`] owns everything one attached device needs: the
//! control writer, the SPS/PPS cache, the PTS to RTP timestamp base, the
//! keyframe gate flags and the bounded queue feeding the RTP fan-out. All
//! mutable stream state lives behind device-scoped locks; nothing here is
//! global.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::control::writer::DeviceControlWriter;
use crate::stats::DeviceStats;
use crate::stream::StreamBatch;

/// Demuxer-owned stream state, guarded by the session lock.
#[derive(Debug)]
pub struct StreamState {
    /// Last SPS bytes seen, owned copy.
    pub last_sps: Option<Bytes>,
    /// Last PPS bytes seen, owned copy.
    pub last_pps: Option<Bytes>,
    /// PTS of the first frame; anchor for the RTP timestamp mapping.
    pub pts0: u64,
    /// RTP timestamp assigned to the first frame (0 by convention).
    pub rtp_ts0: u32,
    pub have_pts0: bool,
    /// Keyframe gate: deliveries are held until the next IDR.
    pub need_keyframe: bool,
    /// Non-IDR AUs seen while the gate is closed.
    pub frames_since_request: u32,
    /// Access unit sequence counter.
    pub au_seq: u64,
    /// Current picture width, from the codec header or the last SPS.
    pub width: u16,
    /// Current picture height.
    pub height: u16,
    /// Set once flag bits were spotted in a PTS, to log only once.
    pub pts_flags_seen: bool,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            last_sps: None,
            last_pps: None,
            pts0: 0,
            rtp_ts0: 0,
            have_pts0: false,
            // The gate starts closed: nothing is delivered before the first
            // clean SPS+PPS+IDR boundary.
            need_keyframe: true,
            frames_since_request: 0,
            au_seq: 0,
            width: 0,
            height: 0,
            pts_flags_seen: false,
        }
    }
}

/// One attached device.
pub struct DeviceSession {
    pub serial: String,
    pub created_at: DateTime<Utc>,
    pub control: Arc<DeviceControlWriter>,
    pub stats: Arc<DeviceStats>,
    pub state: RwLock<StreamState>,
    name: RwLock<String>,
    frame_tx: Mutex<Option<mpsc::Sender<StreamBatch>>>,
    last_control_read: Mutex<Instant>,
    shutdown_tx: broadcast::Sender<()>,
}

impl DeviceSession {
    pub fn new(
        serial: String,
        control: Arc<DeviceControlWriter>,
        stats: Arc<DeviceStats>,
        frame_tx: mpsc::Sender<StreamBatch>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            serial,
            created_at: Utc::now(),
            control,
            stats,
            state: RwLock::new(StreamState::default()),
            name: RwLock::new(String::new()),
            frame_tx: Mutex::new(Some(frame_tx)),
            last_control_read: Mutex::new(Instant::now()),
            shutdown_tx,
        }
    }

    /// Record the device name and initial geometry from the stream header.
    pub async fn apply_stream_header(&self, name: &str, width: u16, height: u16) {
        *self.name.write().await = name.to_string();
        let mut state = self.state.write().await;
        state.width = width;
        state.height = height;
    }

    pub async fn name(&self) -> String {
        self.name.read().await.clone()
    }

    pub async fn dimensions(&self) -> (u16, u16) {
        let state = self.state.read().await;
        (state.width, state.height)
    }

    /// Hand a batch to the RTP sender without ever blocking the demuxer.
    ///
    /// Queue full means the WebRTC side cannot keep up; the newest batch is
    /// dropped and counted so latency stays bounded.
    pub async fn push_batch(&self, batch: StreamBatch) {
        let guard = self.frame_tx.lock().await;
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(batch) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(batch)) => {
                self.stats.record_dropped_frame();
                debug!(
                    device = %self.serial,
                    rtp_ts = batch.rtp_ts(),
                    "rtp queue full, dropping batch"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Arm the keyframe gate; the next delivered AU will be an IDR.
    pub async fn mark_keyframe_needed(&self) {
        self.state.write().await.need_keyframe = true;
    }

    /// Ask the agent for a fresh keyframe over the control channel.
    pub async fn request_keyframe(&self) {
        if let Err(e) = self.control.request_keyframe().await {
            warn!(device = %self.serial, "keyframe request failed: {e}");
        }
    }

    /// RTCP PLI/FIR arrived for this device.
    pub async fn on_keyframe_feedback(&self, kind: &str) {
        self.mark_keyframe_needed().await;
        self.stats.record_pli();
        info!(device = %self.serial, kind, "keyframe feedback received");
        self.request_keyframe().await;
    }

    /// Mark the control channel as alive.
    pub async fn touch_control_read(&self) {
        *self.last_control_read.lock().await = Instant::now();
    }

    /// How long since the device last wrote anything back.
    pub async fn control_read_age(&self) -> Duration {
        self.last_control_read.lock().await.elapsed()
    }

    pub fn shutdown_rx(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Tear the session down: stop the auxiliary tasks and close the RTP
    /// queue so the sender drains out.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.frame_tx.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::writer::ControlWriter;
    use crate::stream::RTP_QUEUE_CAPACITY;
    use tokio::net::{TcpListener, TcpStream};

    async fn test_session() -> (Arc<DeviceSession>, mpsc::Receiver<StreamBatch>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        let (peer, _) = accepted.unwrap();
        let stream = connected.unwrap();
        let (_read, write) = stream.into_split();

        let stats = Arc::new(DeviceStats::default());
        let control = Arc::new(ControlWriter::new(write, stats.clone()));
        let (tx, rx) = mpsc::channel(RTP_QUEUE_CAPACITY);
        let session = Arc::new(DeviceSession::new("test-serial".into(), control, stats, tx));
        (session, rx, peer)
    }

    fn batch(ts: u32) -> StreamBatch {
        StreamBatch::access_unit(vec![Bytes::from_static(&[0x41, 0x00])], ts)
    }

    #[tokio::test]
    async fn test_push_batch_drops_newest_when_full() {
        let (session, mut rx, _peer) = test_session().await;

        for ts in 0..RTP_QUEUE_CAPACITY as u32 {
            session.push_batch(batch(ts)).await;
        }
        assert_eq!(session.stats.frames_dropped(), 0);

        // Queue is full and nothing is draining: the newest batch goes away.
        session.push_batch(batch(99)).await;
        assert_eq!(session.stats.frames_dropped(), 1);

        // The queued batches are the oldest ones, order preserved.
        for expected in 0..RTP_QUEUE_CAPACITY as u32 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.rtp_ts(), expected);
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_queue() {
        let (session, mut rx, _peer) = test_session().await;
        session.push_batch(batch(1)).await;
        session.shutdown().await;
        // Pushing after shutdown is a quiet no-op.
        session.push_batch(batch(2)).await;
        assert_eq!(rx.recv().await.unwrap().rtp_ts(), 1);
        assert!(rx.recv().await.is_none());
        assert_eq!(session.stats.frames_dropped(), 0);
    }
}
