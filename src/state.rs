use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use crate::adb::AdbOptions;
use crate::device::DeviceManager;
use crate::input::TouchInjector;
use crate::webrtc::SubscriberRegistry;

/// Application-wide state shared across handlers and device pipelines
pub struct AppState {
    /// Adb invocation options
    pub adb: AdbOptions,
    /// Attached device sessions
    pub devices: DeviceManager,
    /// Browser subscriber sessions
    pub subscribers: Arc<SubscriberRegistry>,
    /// Process-wide pointer state
    pub touch: TouchInjector,
    /// Next reverse-tunnel port offset, so concurrent attaches never share
    /// a listener
    next_agent_port: AtomicU16,
}

impl AppState {
    pub fn new(adb: AdbOptions) -> Arc<Self> {
        let base_port = adb.agent_port;
        Arc::new(Self {
            adb,
            devices: DeviceManager::new(),
            subscribers: Arc::new(SubscriberRegistry::new()),
            touch: TouchInjector::new(),
            next_agent_port: AtomicU16::new(base_port),
        })
    }

    /// Hand out a unique local port for the next device's reverse tunnel.
    pub fn allocate_agent_port(&self) -> u16 {
        self.next_agent_port.fetch_add(1, Ordering::Relaxed)
    }
}
