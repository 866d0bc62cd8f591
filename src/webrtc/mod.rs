//! WebRTC delivery
//!
//! Everything between the device pipeline and the browser: per-subscriber
//! RTP packetization, the subscriber registry, the per-device fan-out task,
//! and the one-shot offer/answer signaling with its RTCP back-channel.
//!
//! ```text
//! Demuxer batches ──> fan-out ──> per-subscriber packetizer ──> RTP track
//!                                                              │
//! Keyframe gate <── RTCP PLI/FIR <─────────────────────────────┘
//! Control socket <── DataChannel pointer events
//! ```

pub mod fanout;
pub mod packetizer;
pub mod registry;
pub mod signaling;
pub mod subscriber;

pub use packetizer::{H264Packetizer, H264_CLOCK_RATE, H264_PAYLOAD_TYPE, RTP_MTU};
pub use registry::SubscriberRegistry;
pub use signaling::open_subscriber;
pub use subscriber::Subscriber;
