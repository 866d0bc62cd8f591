//! Control channel read-back and liveness
//!
//! Parses device-to-host messages. The only framed type today is clipboard
//! (`[type=0][len u32 BE][utf8]`); unknown types carry no length so the
//! reader records them and moves on. A separate health task probes the
//! channel with `GET_CLIPBOARD` when the device has been silent too long,
//! and escalates persistent write failures to device teardown.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, info, warn};

use super::{
    COPY_KEY_NONE, CONTROL_HEALTH_TICK, CONTROL_READ_MAX, CONTROL_STALE_AFTER,
    CONTROL_WRITE_FAILURE_LIMIT, DEVICE_MSG_CLIPBOARD,
};
use crate::device::DeviceSession;
use crate::error::AppError;

/// Longest clipboard prefix echoed into the log.
const CLIPBOARD_LOG_LIMIT: usize = 200;

/// One parsed device-to-host message.
#[derive(Debug)]
pub enum DeviceMessage {
    Clipboard(Vec<u8>),
    /// Clipboard larger than [`CONTROL_READ_MAX`]; payload already discarded.
    Oversized(u32),
    /// Unknown type byte; no framing available, so nothing was consumed.
    Unknown(u8),
}

/// Read a single device message, discarding oversized clipboard payloads.
pub async fn read_device_message<R>(reader: &mut R) -> std::io::Result<DeviceMessage>
where
    R: AsyncRead + Unpin,
{
    let mut msg_type = [0u8; 1];
    reader.read_exact(&mut msg_type).await?;

    match msg_type[0] {
        DEVICE_MSG_CLIPBOARD => {
            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf).await?;
            let len = u32::from_be_bytes(len_buf);
            if len > CONTROL_READ_MAX {
                discard_exact(reader, u64::from(len)).await?;
                return Ok(DeviceMessage::Oversized(len));
            }
            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload).await?;
            Ok(DeviceMessage::Clipboard(payload))
        }
        other => Ok(DeviceMessage::Unknown(other)),
    }
}

/// Read and throw away exactly `len` bytes.
async fn discard_exact<R>(reader: &mut R, len: u64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(chunk.len() as u64) as usize;
        reader.read_exact(&mut chunk[..want]).await?;
        remaining -= want as u64;
    }
    Ok(())
}

/// Control reader task: runs until the socket ends or the session shuts
/// down. Read failure degrades the device but does not tear it down; writes
/// may still go through until the kernel notices.
pub async fn run(session: Arc<DeviceSession>, mut control: OwnedReadHalf) {
    let mut shutdown = session.shutdown_rx();
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            result = read_device_message(&mut control) => match result {
                Ok(message) => message,
                Err(e) => {
                    session.stats.record_control_read(false);
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        info!(device = %session.serial, "control channel EOF");
                    } else {
                        let err = AppError::ControlRead(e.to_string());
                        warn!(device = %session.serial, "{err}");
                    }
                    break;
                }
            },
        };

        match message {
            DeviceMessage::Clipboard(payload) => {
                session.touch_control_read().await;
                session.stats.record_control_read(true);
                session.stats.record_clipboard(payload.len() as u64);
                let text = String::from_utf8_lossy(&payload);
                let shown: String = text.chars().take(CLIPBOARD_LOG_LIMIT).collect();
                info!(
                    device = %session.serial,
                    bytes = payload.len(),
                    "device clipboard: {shown:?}"
                );
            }
            DeviceMessage::Oversized(len) => {
                warn!(
                    device = %session.serial,
                    len,
                    max = CONTROL_READ_MAX,
                    "clipboard too large, discarded"
                );
            }
            DeviceMessage::Unknown(msg_type) => {
                session.touch_control_read().await;
                session.stats.record_control_read(true);
                debug!(device = %session.serial, msg_type, "unknown device message type");
            }
        }
    }
    debug!(device = %session.serial, "control reader stopped");
}

/// Control health task: ticks every [`CONTROL_HEALTH_TICK`], probes a silent
/// channel with `GET_CLIPBOARD` and shuts the device down once writes keep
/// failing.
pub async fn run_health(session: Arc<DeviceSession>) {
    let mut interval = tokio::time::interval(CONTROL_HEALTH_TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut shutdown = session.shutdown_rx();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = interval.tick() => {}
        }

        let failures = session.control.consecutive_failures();
        if failures >= CONTROL_WRITE_FAILURE_LIMIT {
            warn!(
                device = %session.serial,
                failures,
                "control channel wedged, tearing device down"
            );
            session.shutdown().await;
            break;
        }

        let age = session.control_read_age().await;
        if age > CONTROL_STALE_AFTER {
            debug!(device = %session.serial, ?age, "control silent, sending heartbeat");
            if session.control.request_clipboard(COPY_KEY_NONE).await.is_ok() {
                session.stats.record_heartbeat();
            }
        }
    }
    debug!(device = %session.serial, "control health task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn clipboard_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![DEVICE_MSG_CLIPBOARD];
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[tokio::test]
    async fn test_read_clipboard() {
        let frame = clipboard_frame(b"hello");
        let mut cursor = Cursor::new(frame);
        match read_device_message(&mut cursor).await.unwrap() {
            DeviceMessage::Clipboard(payload) => assert_eq!(payload, b"hello"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_clipboard_exactly_at_limit() {
        let payload = vec![0x61u8; CONTROL_READ_MAX as usize];
        let mut cursor = Cursor::new(clipboard_frame(&payload));
        match read_device_message(&mut cursor).await.unwrap() {
            DeviceMessage::Clipboard(got) => assert_eq!(got.len(), CONTROL_READ_MAX as usize),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_clipboard_over_limit_discards_and_continues() {
        let payload = vec![0x61u8; CONTROL_READ_MAX as usize + 1];
        let mut frame = clipboard_frame(&payload);
        // A well-formed message follows the oversized one.
        frame.extend_from_slice(&clipboard_frame(b"next"));
        let mut cursor = Cursor::new(frame);

        match read_device_message(&mut cursor).await.unwrap() {
            DeviceMessage::Oversized(len) => assert_eq!(len, CONTROL_READ_MAX + 1),
            other => panic!("unexpected message: {other:?}"),
        }
        match read_device_message(&mut cursor).await.unwrap() {
            DeviceMessage::Clipboard(got) => assert_eq!(got, b"next"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_unknown_type() {
        let mut cursor = Cursor::new(vec![0x42u8, 0xff, 0xff]);
        match read_device_message(&mut cursor).await.unwrap() {
            DeviceMessage::Unknown(t) => assert_eq!(t, 0x42),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = read_device_message(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_truncated_length_is_error() {
        let mut cursor = Cursor::new(vec![DEVICE_MSG_CLIPBOARD, 0x00, 0x00]);
        assert!(read_device_message(&mut cursor).await.is_err());
    }
}
