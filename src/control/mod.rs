//! Agent control channel
//!
//! The control socket is half-duplex from the host's point of view: the host
//! writes injection and keyframe-request messages, the device writes back
//! the occasional clipboard message. Writes are serialized and deadline
//! bounded so they can never stall the video path; reads feed a liveness
//! timestamp probed by a periodic health task.

pub mod reader;
pub mod writer;

use std::time::Duration;

/// Host to device: inject a touch event (32-byte payload).
pub const CONTROL_MSG_INJECT_TOUCH: u8 = 2;
/// Host to device: ask for the device clipboard.
pub const CONTROL_MSG_GET_CLIPBOARD: u8 = 8;
/// Host to device: reset the video encoder, forcing a keyframe.
pub const CONTROL_MSG_RESET_VIDEO: u8 = 17;

/// Device to host: clipboard content.
pub const DEVICE_MSG_CLIPBOARD: u8 = 0;

/// `copyKey` value meaning "no key press", used for liveness probes.
pub const COPY_KEY_NONE: u8 = 0;

/// Deadline for routine control writes (keyframe requests, heartbeats).
pub const CONTROL_WRITE_TIMEOUT: Duration = Duration::from_millis(50);
/// Deadline for latency-critical touch injection writes.
pub const CRITICAL_WRITE_TIMEOUT: Duration = Duration::from_millis(120);
/// A single write taking longer than this is worth a warning.
pub const WARN_CONTROL_WRITE_OVER: Duration = Duration::from_millis(30);

/// Consecutive write failures after which the device is considered gone.
pub const CONTROL_WRITE_FAILURE_LIMIT: u32 = 5;

/// Health task cadence.
pub const CONTROL_HEALTH_TICK: Duration = Duration::from_secs(5);
/// No read-back for this long triggers a GET_CLIPBOARD liveness probe.
pub const CONTROL_STALE_AFTER: Duration = Duration::from_secs(15);

/// Upper bound on an inbound clipboard payload (1 MiB).
pub const CONTROL_READ_MAX: u32 = 1 << 20;
