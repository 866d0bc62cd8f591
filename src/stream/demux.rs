//! Stream demuxer and keyframe gate
//!
//! Reads the agent's framing off the video socket: a 64-byte NUL-padded
//! device name, a 12-byte codec header, then `[pts u64 BE][size u32 BE]`
//! records each carrying one Annex-B access unit. Each AU gets an RTP
//! timestamp derived from its PTS and runs through the per-device keyframe
//! gate before being queued for fan-out.
//!
//! Gate behavior: while a keyframe is needed, cached SPS/PPS are re-emitted
//! at every AU's timestamp and non-IDR AUs are dropped; the first AU with an
//! IDR reopens the gate. A changed SPS refreshes the cached dimensions,
//! closes the gate and asks the agent for a fresh keyframe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::annexb::{self, NAL_TYPE_IDR, NAL_TYPE_PPS, NAL_TYPE_SPS};
use super::{rtp_ts_from_pts, sps, StreamBatch, PTS_FLAG_MASK};
use crate::device::DeviceSession;
use crate::error::{AppError, Result};

/// Meta read slower than this is worth a warning.
const WARN_FRAME_META_OVER: Duration = Duration::from_millis(20);
/// Frame body read slower than this is worth a warning.
const WARN_FRAME_READ_OVER: Duration = Duration::from_millis(50);
/// Emit a throughput summary every this many frames.
const STATS_LOG_EVERY: u64 = 100;
/// Re-ask the agent for a keyframe every this many gated AUs.
const KEYFRAME_REASK_EVERY: u32 = 30;

/// Fixed-size prelude of the agent video stream.
#[derive(Debug, Clone)]
pub struct StreamHeader {
    pub device_name: String,
    pub codec_id: u32,
    pub width: u32,
    pub height: u32,
}

/// Read the device-name block and the codec header.
///
/// Failing here means the link never became usable, hence `LinkSetup`.
pub async fn read_stream_header(video: &mut TcpStream) -> Result<StreamHeader> {
    let mut name_buf = [0u8; 64];
    video
        .read_exact(&mut name_buf)
        .await
        .map_err(|e| AppError::LinkSetup(format!("read device name: {e}")))?;
    let device_name = String::from_utf8_lossy(&name_buf)
        .trim_end_matches('\0')
        .to_string();

    let mut header = [0u8; 12];
    video
        .read_exact(&mut header)
        .await
        .map_err(|e| AppError::LinkSetup(format!("read codec header: {e}")))?;
    let mut buf = &header[..];
    let codec_id = buf.get_u32();
    let width = buf.get_u32();
    let height = buf.get_u32();

    Ok(StreamHeader {
        device_name,
        codec_id,
        width,
        height,
    })
}

/// Read one `[pts][size][frame]` record.
async fn read_record(video: &mut TcpStream, session: &DeviceSession) -> Result<(u64, Bytes)> {
    let mut meta = [0u8; 12];
    let meta_started = Instant::now();
    video
        .read_exact(&mut meta)
        .await
        .map_err(|e| AppError::StreamRead(format!("read frame meta: {e}")))?;
    let meta_elapsed = meta_started.elapsed();
    if meta_elapsed > WARN_FRAME_META_OVER {
        warn!(device = %session.serial, ?meta_elapsed, "slow frame meta read");
    }

    let mut buf = &meta[..];
    let pts = buf.get_u64();
    let size = buf.get_u32();

    let mut frame = vec![0u8; size as usize];
    let read_started = Instant::now();
    video
        .read_exact(&mut frame)
        .await
        .map_err(|e| AppError::StreamRead(format!("read frame body ({size} bytes): {e}")))?;
    let read_elapsed = read_started.elapsed();
    if read_elapsed > WARN_FRAME_READ_OVER {
        warn!(device = %session.serial, ?read_elapsed, size, "slow frame body read");
    }

    Ok((pts, Bytes::from(frame)))
}

/// Device stream loop. Returns when the socket ends, errors, or the session
/// shuts down; the caller runs the teardown cascade either way.
pub async fn run(session: Arc<DeviceSession>, mut video: TcpStream) -> Result<()> {
    let mut shutdown = session.shutdown_rx();
    let started = Instant::now();
    let mut frame_count: u64 = 0;
    let mut total_bytes: u64 = 0;

    loop {
        let record = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!(device = %session.serial, "demuxer stopping on shutdown");
                return Ok(());
            }
            record = read_record(&mut video, &session) => record,
        };
        let (pts, frame) = match record {
            Ok(record) => record,
            Err(e) => {
                info!(device = %session.serial, "video stream ended: {e}");
                return Err(e);
            }
        };

        process_access_unit(&session, pts, &frame).await;

        frame_count += 1;
        total_bytes += frame.len() as u64;
        session.stats.record_frame(frame.len() as u64);

        if frame_count % STATS_LOG_EVERY == 0 {
            let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
            let rate_mib = total_bytes as f64 / elapsed / (1024.0 * 1024.0);
            info!(
                device = %session.serial,
                frames = frame_count,
                rate_mib_s = rate_mib,
                pli = session.stats.pli_count(),
                dropped = session.stats.frames_dropped(),
                "stream stats"
            );
        }
    }
}

/// Classify one AU, maintain the SPS/PPS cache and run the keyframe gate.
async fn process_access_unit(session: &Arc<DeviceSession>, pts: u64, frame: &Bytes) {
    let nalus: Vec<Bytes> = annexb::nal_ranges(frame)
        .into_iter()
        .map(|range| frame.slice(range))
        .collect();

    let mut idr_in_au = false;
    let mut got_new_sps = false;
    let (mut sps_count, mut pps_count, mut idr_count, mut other_count) = (0u64, 0u64, 0u64, 0u64);

    let cur_ts = {
        let mut state = session.state.write().await;

        if !state.have_pts0 {
            state.pts0 = pts;
            state.rtp_ts0 = 0;
            state.have_pts0 = true;
        }
        if pts & PTS_FLAG_MASK != 0 && !state.pts_flags_seen {
            state.pts_flags_seen = true;
            warn!(
                device = %session.serial,
                "PTS {pts:#018x} carries flag bits; contract assumes raw microseconds, passing through"
            );
        }
        let cur_ts = state.rtp_ts0.wrapping_add(rtp_ts_from_pts(pts, state.pts0));

        for nalu in &nalus {
            match annexb::nal_type(nalu) {
                NAL_TYPE_SPS => {
                    sps_count += 1;
                    if state.last_sps.as_deref() != Some(&nalu[..]) {
                        if let Some((width, height)) = sps::parse_sps_dimensions(nalu) {
                            state.width = width;
                            state.height = height;
                            // The first SPS establishes the baseline; only a
                            // later, differing one is a change event.
                            got_new_sps = state.last_sps.is_some();
                            info!(
                                device = %session.serial,
                                width, height,
                                changed = got_new_sps,
                                "SPS parsed, dimensions updated"
                            );
                        }
                        state.last_sps = Some(Bytes::copy_from_slice(nalu));
                    }
                }
                NAL_TYPE_PPS => {
                    pps_count += 1;
                    if state.last_pps.as_deref() != Some(&nalu[..]) {
                        debug!(device = %session.serial, len = nalu.len(), "new PPS");
                        state.last_pps = Some(Bytes::copy_from_slice(nalu));
                    }
                }
                NAL_TYPE_IDR => {
                    idr_count += 1;
                    idr_in_au = true;
                }
                _ => other_count += 1,
            }
        }
        cur_ts
    };
    session
        .stats
        .record_nalus(sps_count, pps_count, idr_count, other_count);

    let mut wait_keyframe = { session.state.read().await.need_keyframe };

    if got_new_sps {
        // Resolution switch: put the new parameter sets on the wire at this
        // AU's timestamp and restart from a clean keyframe.
        let (sps, pps) = cached_parameter_sets(session).await;
        if let Some(sps) = sps {
            session
                .push_batch(StreamBatch::parameter_sets(vec![sps], cur_ts))
                .await;
        }
        if let Some(pps) = pps {
            session
                .push_batch(StreamBatch::parameter_sets(vec![pps], cur_ts))
                .await;
        }
        session.mark_keyframe_needed().await;
        wait_keyframe = true;
        session.request_keyframe().await;
    }

    if wait_keyframe {
        let (sps, pps) = cached_parameter_sets(session).await;
        match (sps, pps) {
            (Some(sps), Some(pps)) => {
                session
                    .push_batch(StreamBatch::parameter_sets(vec![sps, pps], cur_ts))
                    .await;
            }
            _ => session.request_keyframe().await,
        }

        let waited = {
            let mut state = session.state.write().await;
            state.frames_since_request += 1;
            state.frames_since_request
        };
        if waited % KEYFRAME_REASK_EVERY == 0 {
            info!(
                device = %session.serial,
                waited,
                "still waiting for IDR, re-requesting keyframe"
            );
            session.request_keyframe().await;
        }

        if !idr_in_au {
            bump_au_seq(session).await;
            return;
        }

        {
            let mut state = session.state.write().await;
            state.need_keyframe = false;
            state.frames_since_request = 0;
        }
        info!(device = %session.serial, "IDR received, resuming delivery");
        session
            .push_batch(StreamBatch::access_unit(nalus, cur_ts))
            .await;
    } else {
        session
            .push_batch(StreamBatch::access_unit(nalus, cur_ts))
            .await;
    }

    bump_au_seq(session).await;
}

async fn cached_parameter_sets(session: &DeviceSession) -> (Option<Bytes>, Option<Bytes>) {
    let state = session.state.read().await;
    (state.last_sps.clone(), state.last_pps.clone())
}

async fn bump_au_seq(session: &DeviceSession) {
    session.state.write().await.au_seq += 1;
}
