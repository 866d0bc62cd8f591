//! Device stream pipeline
//!
//! Turns the agent's length-framed H.264 elementary stream into RTP-ready
//! batches: Annex-B parsing, SPS dimension recovery, PTS to 90 kHz timestamp
//! mapping and the keyframe gate that holds delivery until a clean decoder
//! entry point.

pub mod annexb;
pub mod demux;
pub mod sps;

use bytes::Bytes;

/// Agent PTS unit: microseconds.
pub const PTS_PER_SECOND: u64 = 1_000_000;

/// RTP clock rate for H.264.
pub const RTP_CLOCK_RATE: u64 = 90_000;

/// Some agent builds encode flags into the top two bits of the PTS. The
/// contract assumed here is raw microseconds; when these bits show up they
/// are logged once as a detection point and passed through unchanged.
pub const PTS_FLAG_MASK: u64 = 0b11 << 62;

/// Bounded per-device queue capacity between the demuxer and the RTP
/// fan-out. Kept very small so a slow subscriber costs fluency, not latency.
pub const RTP_QUEUE_CAPACITY: usize = 3;

/// One unit of work handed from the demuxer to the RTP sender.
#[derive(Debug, Clone)]
pub enum StreamBatch {
    /// A full access unit; the last RTP packet of the last NALU closes it
    /// with the marker bit.
    AccessUnit { nalus: Vec<Bytes>, rtp_ts: u32 },
    /// SPS/PPS re-emitted ahead of an access unit; never carries a marker.
    ParameterSets { nalus: Vec<Bytes>, rtp_ts: u32 },
}

impl StreamBatch {
    pub fn access_unit(nalus: Vec<Bytes>, rtp_ts: u32) -> Self {
        Self::AccessUnit { nalus, rtp_ts }
    }

    pub fn parameter_sets(nalus: Vec<Bytes>, rtp_ts: u32) -> Self {
        Self::ParameterSets { nalus, rtp_ts }
    }

    pub fn rtp_ts(&self) -> u32 {
        match self {
            Self::AccessUnit { rtp_ts, .. } | Self::ParameterSets { rtp_ts, .. } => *rtp_ts,
        }
    }
}

/// Map an agent PTS to a 90 kHz RTP timestamp relative to `base`.
///
/// Integer arithmetic end to end; the 32-bit truncation wraps like any RTP
/// timestamp. This preserves the agent's pacing exactly, no re-clocking.
pub fn rtp_ts_from_pts(pts: u64, base: u64) -> u32 {
    let delta = pts.wrapping_sub(base);
    (delta.wrapping_mul(RTP_CLOCK_RATE) / PTS_PER_SECOND) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_ts_from_pts() {
        assert_eq!(rtp_ts_from_pts(1_000_000, 1_000_000), 0);
        // One 30 fps frame later: 33333 us -> 2999 ticks (integer floor).
        assert_eq!(rtp_ts_from_pts(1_033_333, 1_000_000), 2999);
        // One full second -> exactly one clock rate worth of ticks.
        assert_eq!(rtp_ts_from_pts(2_000_000, 1_000_000), 90_000);
    }

    #[test]
    fn test_rtp_ts_truncates_to_32_bits() {
        // Slightly less than 2^32 / 90000 seconds of stream time overflows
        // the 32-bit timestamp and must wrap, not saturate.
        let delta_us = (1u64 << 32) / 90 * 1000 + 1_000_000;
        let full = (delta_us * RTP_CLOCK_RATE) / PTS_PER_SECOND;
        assert!(full > u32::MAX as u64);
        assert_eq!(rtp_ts_from_pts(delta_us, 0), full as u32);
    }

    #[test]
    fn test_rtp_ts_base_wraps() {
        // A PTS below the base wraps through u64 arithmetic instead of
        // panicking. The exact value is meaningless; only the first frame
        // establishes the base in practice.
        let _ = rtp_ts_from_pts(0, 1);
        let _ = rtp_ts_from_pts(0, u64::MAX);
    }
}
