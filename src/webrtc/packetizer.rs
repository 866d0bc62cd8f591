//! H.264 RTP packetization
//!
//! Per-subscriber packetizer built on the rtp crate's `H264Payloader`
//! (packetization-mode=1: single NAL, STAP-A aggregation of parameter sets,
//! FU-A fragmentation above the MTU). The payloader splits bytes; this type
//! owns the RTP identity: SSRC, payload type, the sequence counter, and the
//! per-AU timestamp and marker stamping.
//!
//! Timestamp policy: every packet of one access unit carries the same
//! timestamp, as do parameter sets re-emitted ahead of it. Marker policy:
//! only the last packet of the last NALU of an access unit sets the marker
//! bit; parameter-set batches never do.

use bytes::Bytes;
use rtp::codecs::h264::H264Payloader;
use rtp::packetizer::Payloader;
use tracing::warn;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;

use crate::error::AppError;

/// Conservative MTU leaving room for transport overhead.
pub const RTP_MTU: usize = 1200;

/// H.264 RTP clock rate per RFC 6184.
pub const H264_CLOCK_RATE: u32 = 90_000;

/// Dynamic payload type negotiated for H.264.
pub const H264_PAYLOAD_TYPE: u8 = 96;

/// RTP packetizer state for one outbound track.
pub struct H264Packetizer {
    payloader: H264Payloader,
    ssrc: u32,
    sequence: u16,
    payload_type: u8,
    mtu: usize,
}

impl Default for H264Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Packetizer {
    pub fn new() -> Self {
        Self {
            payloader: H264Payloader::default(),
            ssrc: rand::random(),
            sequence: rand::random(),
            payload_type: H264_PAYLOAD_TYPE,
            mtu: RTP_MTU,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn next_packet(&mut self, payload: Bytes, timestamp: u32, marker: bool) -> Packet {
        let header = Header {
            version: 2,
            marker,
            payload_type: self.payload_type,
            sequence_number: self.sequence,
            timestamp,
            ssrc: self.ssrc,
            ..Default::default()
        };
        self.sequence = self.sequence.wrapping_add(1);
        Packet { header, payload }
    }

    /// Packetize a batch of NAL units sharing one timestamp.
    ///
    /// With `close_access_unit` set, the last packet produced for the last
    /// NALU carries the marker bit; otherwise no packet does. Note that the
    /// payloader holds SPS/PPS back for STAP-A aggregation, so a batch of
    /// only parameter sets may legitimately produce no packets.
    pub fn packetize_batch(
        &mut self,
        nalus: &[Bytes],
        timestamp: u32,
        close_access_unit: bool,
    ) -> Vec<Packet> {
        let mut packets = Vec::new();
        for (i, nalu) in nalus.iter().enumerate() {
            if nalu.is_empty() {
                continue;
            }
            let payloads = match self.payloader.payload(self.mtu, nalu) {
                Ok(payloads) => payloads,
                Err(e) => {
                    // The offending NALU is dropped, the rest of the AU
                    // still goes out.
                    warn!("{}", AppError::StreamParse(format!("h264 payloading: {e}")));
                    continue;
                }
            };
            let count = payloads.len();
            for (j, payload) in payloads.into_iter().enumerate() {
                let marker = close_access_unit && i == nalus.len() - 1 && j == count - 1;
                packets.push(self.next_packet(payload, timestamp, marker));
            }
        }
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nalu(nal_type: u8, len: usize) -> Bytes {
        let mut data = vec![0u8; len];
        data[0] = nal_type & 0x1f;
        Bytes::from(data)
    }

    #[test]
    fn test_single_nal_access_unit() {
        let mut pk = H264Packetizer::new();
        let packets = pk.packetize_batch(&[nalu(5, 100)], 3000, true);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].header.marker);
        assert_eq!(packets[0].header.timestamp, 3000);
        assert_eq!(packets[0].header.payload_type, H264_PAYLOAD_TYPE);
    }

    #[test]
    fn test_fu_a_fragmentation_marks_only_last() {
        let mut pk = H264Packetizer::new();
        let packets = pk.packetize_batch(&[nalu(5, 5000)], 6000, true);
        assert!(packets.len() > 1, "5000 bytes must fragment at mtu 1200");
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.header.timestamp, 6000);
            assert!(packet.payload.len() <= RTP_MTU);
            assert_eq!(packet.header.marker, i == packets.len() - 1);
        }
        // FU-A indicator on every fragment.
        for packet in &packets {
            assert_eq!(packet.payload[0] & 0x1f, 28);
        }
    }

    #[test]
    fn test_multi_nalu_access_unit_has_one_marker() {
        let mut pk = H264Packetizer::new();
        let batch = [nalu(5, 2000), nalu(1, 100), nalu(1, 3000)];
        let packets = pk.packetize_batch(&batch, 9000, true);
        let markers = packets.iter().filter(|p| p.header.marker).count();
        assert_eq!(markers, 1);
        assert!(packets.last().unwrap().header.marker);
    }

    #[test]
    fn test_parameter_set_batch_never_marks() {
        let mut pk = H264Packetizer::new();
        // The payloader withholds SPS/PPS for STAP-A aggregation.
        let sps = nalu(7, 20);
        let pps = nalu(8, 6);
        let packets = pk.packetize_batch(&[sps, pps], 1000, false);
        assert!(packets.iter().all(|p| !p.header.marker));

        // The following slice flushes them as a STAP-A ahead of itself.
        let packets = pk.packetize_batch(&[nalu(5, 50)], 1000, true);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload[0] & 0x1f, 24, "expected STAP-A first");
        assert!(!packets[0].header.marker);
        assert!(packets[1].header.marker);
    }

    #[test]
    fn test_sequence_numbers_increment_across_batches() {
        let mut pk = H264Packetizer::new();
        let first = pk.packetize_batch(&[nalu(1, 100)], 0, true);
        let second = pk.packetize_batch(&[nalu(1, 100)], 3000, true);
        let a = first[0].header.sequence_number;
        let b = second[0].header.sequence_number;
        assert_eq!(b, a.wrapping_add(1));
    }

    #[test]
    fn test_empty_nalus_skipped() {
        let mut pk = H264Packetizer::new();
        let packets = pk.packetize_batch(&[Bytes::new(), nalu(1, 10)], 0, true);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].header.marker);
    }
}
