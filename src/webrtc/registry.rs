//! Subscriber registry
//!
//! Thread-safe map of subscriber id to session, with a per-device view for
//! the RTP fan-out. Lookups snapshot into a `Vec` so no lock is held while
//! packets are written.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::subscriber::Subscriber;

#[derive(Default)]
pub struct SubscriberRegistry {
    inner: RwLock<HashMap<String, Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, subscriber: Arc<Subscriber>) {
        self.inner
            .write()
            .await
            .insert(subscriber.id.clone(), subscriber);
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Subscriber>> {
        self.inner.write().await.remove(id)
    }

    /// Snapshot of every subscriber attached to `device_serial`.
    pub async fn subscribers_for(&self, device_serial: &str) -> Vec<Arc<Subscriber>> {
        self.inner
            .read()
            .await
            .values()
            .filter(|s| s.device_serial == device_serial)
            .cloned()
            .collect()
    }

    /// Detach and return every subscriber of a device that went away.
    pub async fn remove_device(&self, device_serial: &str) -> Vec<Arc<Subscriber>> {
        let mut inner = self.inner.write().await;
        let ids: Vec<String> = inner
            .values()
            .filter(|s| s.device_serial == device_serial)
            .map(|s| s.id.clone())
            .collect();
        ids.into_iter().filter_map(|id| inner.remove(&id)).collect()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::api::APIBuilder;
    use webrtc::peer_connection::configuration::RTCConfiguration;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

    use crate::webrtc::packetizer::H264_CLOCK_RATE;

    async fn subscriber(device: &str) -> Arc<Subscriber> {
        let api = APIBuilder::new().build();
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .unwrap(),
        );
        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: "video/H264".to_owned(),
                clock_rate: H264_CLOCK_RATE,
                ..Default::default()
            },
            "video".to_owned(),
            "test".to_owned(),
        ));
        Arc::new(Subscriber::new(device, pc, track))
    }

    #[tokio::test]
    async fn test_per_device_snapshots() {
        let registry = SubscriberRegistry::new();
        let a1 = subscriber("device-a").await;
        let a2 = subscriber("device-a").await;
        let b1 = subscriber("device-b").await;
        registry.add(a1.clone()).await;
        registry.add(a2.clone()).await;
        registry.add(b1.clone()).await;

        assert_eq!(registry.count().await, 3);
        assert_eq!(registry.subscribers_for("device-a").await.len(), 2);
        assert_eq!(registry.subscribers_for("device-b").await.len(), 1);
        assert!(registry.subscribers_for("device-c").await.is_empty());

        let removed = registry.remove(&a1.id).await;
        assert!(removed.is_some());
        assert!(registry.remove(&a1.id).await.is_none());
        assert_eq!(registry.subscribers_for("device-a").await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_device_detaches_all_its_subscribers() {
        let registry = SubscriberRegistry::new();
        registry.add(subscriber("device-a").await).await;
        registry.add(subscriber("device-a").await).await;
        registry.add(subscriber("device-b").await).await;

        let detached = registry.remove_device("device-a").await;
        assert_eq!(detached.len(), 2);
        assert_eq!(registry.count().await, 1);
        assert!(registry.subscribers_for("device-a").await.is_empty());
        assert_eq!(registry.subscribers_for("device-b").await.len(), 1);
    }
}
