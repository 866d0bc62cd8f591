//! Attached device registry

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::session::DeviceSession;

/// Thread-safe map of device serial to live session.
#[derive(Default)]
pub struct DeviceManager {
    inner: RwLock<HashMap<String, Arc<DeviceSession>>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, session: Arc<DeviceSession>) {
        self.inner
            .write()
            .await
            .insert(session.serial.clone(), session);
    }

    pub async fn remove(&self, serial: &str) -> Option<Arc<DeviceSession>> {
        self.inner.write().await.remove(serial)
    }

    pub async fn get(&self, serial: &str) -> Option<Arc<DeviceSession>> {
        self.inner.read().await.get(serial).cloned()
    }

    pub async fn contains(&self, serial: &str) -> bool {
        self.inner.read().await.contains_key(serial)
    }

    pub async fn list(&self) -> Vec<Arc<DeviceSession>> {
        self.inner.read().await.values().cloned().collect()
    }
}
