//! Asynchronous state-change notifications.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::device::Address;

/// Notifications buffered per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Why a notification was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Noticed by diffing successive device snapshots.
    MonitoringDetected,
    /// A Bluetooth sink outlived its device.
    DevicePoweredOff,
}

/// Events broadcast to every front-end subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Notification {
    DeviceDisconnected {
        mac_address: Address,
        device_name: String,
        reason: Reason,
    },
    DeviceReconnected {
        mac_address: Address,
        device_name: String,
        reason: Reason,
    },
    OrphanedSinkDetected {
        sink_name: String,
        reason: Reason,
    },
    /// Every wired recovery step failed; audio stays where it was.
    RoutingFailed {
        target: String,
        error: String,
    },
}

/// Fan-out sender for notifications.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Send to all current subscribers. Having none is not an error.
    pub fn emit(&self, notification: Notification) {
        debug!("Broadcasting {:?}", notification);
        let _ = self.tx.send(notification);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
