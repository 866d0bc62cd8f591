//! Per-device counters
//!
//! Every device session carries one [`DeviceStats`] instance shared by the
//! demuxer, the control channel and the RTCP readers. The counters are plain
//! atomics so any task can bump them without taking a lock.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for a single device pipeline
#[derive(Debug, Default)]
pub struct DeviceStats {
    frames_read: AtomicU64,
    bytes_read: AtomicU64,
    frames_dropped: AtomicU64,
    pli_count: AtomicU64,
    keyframe_requests: AtomicU64,
    control_writes_ok: AtomicU64,
    control_writes_err: AtomicU64,
    control_reads_ok: AtomicU64,
    control_reads_err: AtomicU64,
    clipboard_bytes: AtomicU64,
    heartbeats_sent: AtomicU64,
    nalu_sps: AtomicU64,
    nalu_pps: AtomicU64,
    nalu_idr: AtomicU64,
    nalu_other: AtomicU64,
}

/// Point-in-time copy of [`DeviceStats`]
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub frames_read: u64,
    pub bytes_read: u64,
    pub frames_dropped: u64,
    pub pli_count: u64,
    pub keyframe_requests: u64,
    pub control_writes_ok: u64,
    pub control_writes_err: u64,
    pub control_reads_ok: u64,
    pub control_reads_err: u64,
    pub clipboard_bytes: u64,
    pub heartbeats_sent: u64,
}

impl DeviceStats {
    pub fn record_frame(&self, bytes: u64) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_dropped_frame(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pli(&self) {
        self.pli_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keyframe_request(&self) {
        self.keyframe_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_control_write(&self, ok: bool) {
        if ok {
            self.control_writes_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.control_writes_err.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_control_read(&self, ok: bool) {
        if ok {
            self.control_reads_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.control_reads_err.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_clipboard(&self, bytes: u64) {
        self.clipboard_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nalus(&self, sps: u64, pps: u64, idr: u64, other: u64) {
        self.nalu_sps.fetch_add(sps, Ordering::Relaxed);
        self.nalu_pps.fetch_add(pps, Ordering::Relaxed);
        self.nalu_idr.fetch_add(idr, Ordering::Relaxed);
        self.nalu_other.fetch_add(other, Ordering::Relaxed);
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn pli_count(&self) -> u64 {
        self.pli_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            pli_count: self.pli_count.load(Ordering::Relaxed),
            keyframe_requests: self.keyframe_requests.load(Ordering::Relaxed),
            control_writes_ok: self.control_writes_ok.load(Ordering::Relaxed),
            control_writes_err: self.control_writes_err.load(Ordering::Relaxed),
            control_reads_ok: self.control_reads_ok.load(Ordering::Relaxed),
            control_reads_err: self.control_reads_err.load(Ordering::Relaxed),
            clipboard_bytes: self.clipboard_bytes.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
        }
    }
}
