//! droidlink - Android screen streaming over WebRTC
//!
//! This crate bridges Android devices running a scrcpy-compatible
//! screen-capture agent to browser clients: per-device H.264 stream
//! pipelines re-packetized into RTP with source timing preserved, and a
//! control plane injecting browser pointer events back into the device.

pub mod adb;
pub mod control;
pub mod device;
pub mod error;
pub mod input;
pub mod state;
pub mod stats;
pub mod stream;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
