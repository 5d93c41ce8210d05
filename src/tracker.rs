//! Device state tracking.
//!
//! Builds a [`Snapshot`] of every device the Bluetooth control surface knows
//! about by parsing its enumeration and per-device info text.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, error, warn};

use crate::device::{Address, DeviceKind, DeviceState, Snapshot};
use crate::error::{Result, RouterError};
use crate::traits::BluetoothControl;

/// Capability indicators, checked in priority order.
const CAPABILITY_RULES: &[(&[&str], DeviceKind)] = &[
    (&["Audio Sink", "Audio Source"], DeviceKind::Audio),
    (&["Headset", "A2DP"], DeviceKind::Headset),
    (&["Mouse", "Keyboard"], DeviceKind::Input),
    (&["Phone"], DeviceKind::Phone),
];

/// Classify a device from its free-form capability text.
pub fn classify_capabilities(info: &str) -> DeviceKind {
    CAPABILITY_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| info.contains(n)))
        .map(|(_, kind)| *kind)
        .unwrap_or(DeviceKind::Unknown)
}

/// One entry of the device enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedDevice {
    pub address: Address,
    pub name: String,
}

/// Parse `Device <address> <name>` lines, skipping anything else.
pub fn parse_device_list(output: &str) -> Vec<ListedDevice> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let mut parts = rest.splitn(2, ' ');
            let address = match Address::parse(parts.next()?) {
                Ok(address) => address,
                Err(e) => {
                    debug!("Skipping device line {:?}: {}", line, e);
                    return None;
                }
            };
            let name = parts.next().unwrap_or("").trim().to_string();
            Some(ListedDevice { address, name })
        })
        .collect()
}

/// Properties extracted from per-device info text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub connected: bool,
    pub paired: bool,
    pub trusted: bool,
    pub kind: DeviceKind,
    pub battery: Option<u8>,
}

/// Parse per-device info text. Unknown or malformed lines are ignored.
pub fn parse_device_info(info: &str) -> DeviceInfo {
    let mut parsed = DeviceInfo {
        name: None,
        connected: false,
        paired: false,
        trusted: false,
        kind: classify_capabilities(info),
        battery: None,
    };

    for line in info.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("Name:") {
            parsed.name = Some(name.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Connected:") {
            parsed.connected = value.trim() == "yes";
        } else if let Some(value) = line.strip_prefix("Paired:") {
            parsed.paired = value.trim() == "yes";
        } else if let Some(value) = line.strip_prefix("Trusted:") {
            parsed.trusted = value.trim() == "yes";
        } else if line.starts_with("Battery Percentage") {
            // Battery Percentage: 0x5a (90)
            parsed.battery = line
                .split('(')
                .nth(1)
                .and_then(|s| s.split(')').next())
                .and_then(|s| s.trim().parse().ok());
        }
    }

    parsed
}

/// Builds device snapshots from the Bluetooth control surface.
pub struct DeviceTracker {
    bluetooth: Arc<dyn BluetoothControl>,
}

impl DeviceTracker {
    pub fn new(bluetooth: Arc<dyn BluetoothControl>) -> Self {
        Self { bluetooth }
    }

    /// Take a snapshot, returning an empty one if the control surface fails.
    pub async fn snapshot(&self) -> Snapshot {
        match self.try_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Error getting device states: {}", e);
                Snapshot::default()
            }
        }
    }

    /// Take a snapshot, surfacing control-surface failures.
    ///
    /// Devices that vanish between enumeration and the info query are
    /// skipped; any other query failure fails the whole snapshot.
    pub async fn try_snapshot(&self) -> Result<Snapshot> {
        let listing = self.bluetooth.device_list().await?;
        let now = SystemTime::now();
        let mut devices = Vec::new();

        for listed in parse_device_list(&listing) {
            let info = match self.bluetooth.device_info(&listed.address).await {
                Ok(info) => parse_device_info(&info),
                Err(RouterError::DeviceNotFound(addr)) => {
                    warn!("Device {} disappeared during snapshot", addr);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let name = if listed.name.is_empty() {
                info.name.unwrap_or_default()
            } else {
                listed.name
            };

            devices.push(DeviceState {
                address: listed.address,
                name,
                connected: info.connected,
                paired: info.paired,
                trusted: info.trusted,
                kind: info.kind,
                is_audio: info.kind.is_audio(),
                battery: info.battery,
                last_seen: info.connected.then_some(now),
            });
        }

        debug!("Snapshot holds {} devices", devices.len());
        Ok(Snapshot::new(devices))
    }
}
