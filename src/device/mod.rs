//! Device attachment lifecycle
//!
//! [`attach_device`] runs a device from adb bootstrap to teardown: reverse
//! tunnel, agent push and launch, the two call-back sockets, the task fleet
//! (RTP sender, control reader, control health), then the demux loop until
//! the stream ends. Teardown cascades: the RTP queue closes so the sender
//! drains out, auxiliary tasks stop, and every subscriber of the device is
//! deregistered and closed.

pub mod manager;
pub mod session;

pub use manager::DeviceManager;
pub use session::{DeviceSession, StreamState};

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::adb::{self, AgentConnection};
use crate::control::writer::ControlWriter;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::stats::DeviceStats;
use crate::stream::{self, RTP_QUEUE_CAPACITY};
use crate::{control, webrtc};

/// Attach one device and run its pipeline to completion.
///
/// Setup failures (`LinkSetup`) are returned to the caller; a stream that
/// ran and then ended is a normal `Ok(())` exit.
pub async fn attach_device(state: Arc<AppState>, serial: String) -> Result<()> {
    let agent_port = state.allocate_agent_port();
    info!(device = %serial, agent_port, "attaching device");

    let device = adb::Device::new(state.adb.clone(), &serial, agent_port).await?;
    device.reverse().await?;
    device.push_agent().await?;
    let AgentConnection { mut video, control } = device.start_agent().await?;

    let header = stream::demux::read_stream_header(&mut video).await?;
    info!(
        device = %serial,
        name = %header.device_name,
        codec = header.codec_id,
        width = header.width,
        height = header.height,
        "agent stream header"
    );

    let (control_read, control_write) = control.into_split();
    let stats = Arc::new(DeviceStats::default());
    let writer = Arc::new(ControlWriter::new(control_write, stats.clone()));
    let (frame_tx, frame_rx) = mpsc::channel(RTP_QUEUE_CAPACITY);

    let session = Arc::new(DeviceSession::new(
        serial.clone(),
        writer,
        stats,
        frame_tx,
    ));
    session
        .apply_stream_header(
            &header.device_name,
            header.width as u16,
            header.height as u16,
        )
        .await;
    state.devices.add(session.clone()).await;

    tokio::spawn(webrtc::fanout::run(
        state.subscribers.clone(),
        serial.clone(),
        frame_rx,
    ));
    tokio::spawn(control::reader::run(session.clone(), control_read));
    tokio::spawn(control::reader::run_health(session.clone()));

    let result = stream::demux::run(session.clone(), video).await;

    session.shutdown().await;
    state.devices.remove(&serial).await;
    let orphans = state.subscribers.remove_device(&serial).await;
    let orphan_count = orphans.len();
    for subscriber in orphans {
        subscriber.close().await;
    }
    info!(
        device = %serial,
        subscribers_closed = orphan_count,
        "device detached"
    );

    match result {
        // The stream ending is the device's normal way out.
        Err(AppError::StreamRead(_)) | Ok(()) => Ok(()),
        Err(e) => Err(e),
    }
}
