//! Deadline-bounded control channel writer
//!
//! The one mutually-exclusive writer for a device's control socket. Every
//! message is written whole under a deadline; a message that misses its
//! deadline is dropped with a [`crate::error::AppError::ControlWrite`], it
//! never blocks the caller for longer than the budget. Consecutive failures
//! are counted so the health task can escalate to device teardown.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::warn;

use super::{
    CONTROL_MSG_GET_CLIPBOARD, CONTROL_MSG_RESET_VIDEO, CONTROL_WRITE_TIMEOUT,
    CRITICAL_WRITE_TIMEOUT, WARN_CONTROL_WRITE_OVER,
};
use crate::error::{AppError, Result};
use crate::stats::DeviceStats;

/// Control writer as used by device sessions.
pub type DeviceControlWriter = ControlWriter<OwnedWriteHalf>;

/// Exclusive, deadline-bounded writer over a control channel.
pub struct ControlWriter<W> {
    io: Mutex<W>,
    stats: Arc<DeviceStats>,
    last_write: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
}

impl<W: AsyncWrite + Unpin + Send> ControlWriter<W> {
    pub fn new(io: W, stats: Arc<DeviceStats>) -> Self {
        Self {
            io: Mutex::new(io),
            stats,
            last_write: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Write the full buffer under the given deadline.
    pub async fn write_full(&self, buf: &[u8], deadline: Duration) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let start = Instant::now();
        let mut io = self.io.lock().await;
        let outcome = tokio::time::timeout(deadline, io.write_all(buf)).await;
        drop(io);

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AppError::ControlWrite(format!(
                "write of {} bytes failed: {e}",
                buf.len()
            ))),
            Err(_) => Err(AppError::ControlWrite(format!(
                "write of {} bytes missed {deadline:?} deadline",
                buf.len()
            ))),
        };

        match &result {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.stats.record_control_write(true);
                *self.last_write.lock().await = Some(Instant::now());
                let elapsed = start.elapsed();
                if elapsed > WARN_CONTROL_WRITE_OVER {
                    warn!(?elapsed, size = buf.len(), "slow control write");
                }
            }
            Err(e) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                self.stats.record_control_write(false);
                warn!("{e}");
            }
        }
        result
    }

    /// Send `RESET_VIDEO` to prompt a fresh keyframe.
    pub async fn request_keyframe(&self) -> Result<()> {
        self.stats.record_keyframe_request();
        self.write_full(&[CONTROL_MSG_RESET_VIDEO], CONTROL_WRITE_TIMEOUT)
            .await
    }

    /// Send `GET_CLIPBOARD`; doubles as the liveness probe.
    pub async fn request_clipboard(&self, copy_key: u8) -> Result<()> {
        self.write_full(&[CONTROL_MSG_GET_CLIPBOARD, copy_key], CONTROL_WRITE_TIMEOUT)
            .await
    }

    /// Write a 32-byte touch injection payload under the critical deadline.
    pub async fn inject_touch(&self, payload: &[u8; 32]) -> Result<()> {
        self.write_full(payload, CRITICAL_WRITE_TIMEOUT).await
    }

    /// Failures since the last successful write.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Timestamp of the last successful write, if any.
    pub async fn last_write(&self) -> Option<Instant> {
        *self.last_write.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_full_plain() {
        let (client, mut server) = tokio::io::duplex(1024);
        let stats = Arc::new(DeviceStats::default());
        let writer = ControlWriter::new(client, stats.clone());

        writer
            .write_full(&[CONTROL_MSG_RESET_VIDEO], CONTROL_WRITE_TIMEOUT)
            .await
            .unwrap();

        let mut buf = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, [CONTROL_MSG_RESET_VIDEO]);
        assert_eq!(writer.consecutive_failures(), 0);
        assert!(writer.last_write().await.is_some());
        assert_eq!(stats.snapshot().control_writes_ok, 1);
    }

    #[tokio::test]
    async fn test_write_full_deadline_expires() {
        // Tiny pipe nobody reads: the second write cannot complete in time.
        let (client, server) = tokio::io::duplex(4);
        let stats = Arc::new(DeviceStats::default());
        let writer = ControlWriter::new(client, stats.clone());

        let start = Instant::now();
        let err = writer
            .write_full(&[0u8; 64], Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ControlWrite(_)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(writer.consecutive_failures(), 1);
        assert_eq!(stats.snapshot().control_writes_err, 1);
        drop(server);
    }

    #[tokio::test]
    async fn test_failure_counter_resets_on_success() {
        let (client, mut server) = tokio::io::duplex(4);
        let stats = Arc::new(DeviceStats::default());
        let writer = ControlWriter::new(client, stats);

        let _ = writer.write_full(&[0u8; 64], Duration::from_millis(10)).await;
        let _ = writer.write_full(&[0u8; 64], Duration::from_millis(10)).await;
        assert_eq!(writer.consecutive_failures(), 2);

        // Drain the pipe so a small write goes through again.
        tokio::spawn(async move {
            let mut sink = Vec::new();
            let _ = tokio::io::AsyncReadExt::read_to_end(&mut server, &mut sink).await;
        });
        writer
            .write_full(&[1, 2], Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(writer.consecutive_failures(), 0);
    }
}
