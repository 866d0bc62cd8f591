//! Per-device RTP sender
//!
//! Drains the device's bounded batch queue and fans each batch out to the
//! current subscriber snapshot. Exits when the demuxer closes the queue,
//! which is the device-ended signal.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::registry::SubscriberRegistry;
use crate::stream::StreamBatch;

pub async fn run(
    registry: Arc<SubscriberRegistry>,
    device_serial: String,
    mut rx: mpsc::Receiver<StreamBatch>,
) {
    debug!(device = %device_serial, "rtp sender started");
    while let Some(batch) = rx.recv().await {
        let subscribers = registry.subscribers_for(&device_serial).await;
        if subscribers.is_empty() {
            continue;
        }
        match &batch {
            StreamBatch::AccessUnit { nalus, rtp_ts } => {
                for subscriber in &subscribers {
                    subscriber.send_access_unit(nalus, *rtp_ts).await;
                }
            }
            StreamBatch::ParameterSets { nalus, rtp_ts } => {
                for subscriber in &subscribers {
                    subscriber.send_parameter_sets(nalus, *rtp_ts).await;
                }
            }
        }
    }
    debug!(device = %device_serial, "rtp sender stopped");
}
