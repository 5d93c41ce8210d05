//! Bluetooth device state as seen by the reconciliation engine.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::Serialize;

use crate::error::{Result, RouterError};

/// Bluetooth device address in canonical upper-case colon form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Parse a MAC address string (e.g., "00:11:22:33:44:55").
    ///
    /// Accepts either case; rejects anything that is not six hex octets.
    pub fn parse(addr: &str) -> Result<Self> {
        let addr = addr.trim();
        let octets: Vec<&str> = addr.split(':').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));

        if valid {
            Ok(Self(addr.to_uppercase()))
        } else {
            Err(RouterError::InvalidAddress(addr.to_string()))
        }
    }

    /// The address as it appears inside audio-server sink names
    /// (`AA_BB_CC_DD_EE_FF`).
    pub fn to_sink_fragment(&self) -> String {
        self.0.replace(':', "_")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse device class derived from the capability text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Advertises an audio sink or source role.
    Audio,
    /// Advertises a headset role or A2DP codec profile.
    Headset,
    /// Mouse or keyboard.
    Input,
    Phone,
    Unknown,
}

impl DeviceKind {
    /// Whether routing should treat the device as an audio output candidate.
    pub fn is_audio(self) -> bool {
        matches!(self, DeviceKind::Audio | DeviceKind::Headset)
    }
}

/// One device known to the Bluetooth control surface.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceState {
    #[serde(rename = "mac")]
    pub address: Address,
    /// Human-readable label, possibly empty.
    pub name: String,
    pub connected: bool,
    pub paired: bool,
    pub trusted: bool,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub is_audio: bool,
    /// Battery level in percent, when the device reports one.
    pub battery: Option<u8>,
    /// Set when the device was observed connected. Diagnostics only.
    #[serde(skip)]
    pub last_seen: Option<SystemTime>,
}

impl DeviceState {
    /// Name for log lines and notifications, falling back to the address.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            self.address.as_str()
        } else {
            &self.name
        }
    }
}

/// Immutable view of every known device, keyed by address.
///
/// A new snapshot replaces the previous one wholesale; entries are never
/// patched in place.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    devices: BTreeMap<Address, DeviceState>,
}

impl Snapshot {
    pub fn new(devices: impl IntoIterator<Item = DeviceState>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|d| (d.address.clone(), d))
                .collect(),
        }
    }

    pub fn get(&self, address: &Address) -> Option<&DeviceState> {
        self.devices.get(address)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceState> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// True if any device is both connected and audio-capable.
    pub fn has_active_audio(&self) -> bool {
        self.devices.values().any(|d| d.connected && d.is_audio)
    }
}

#[cfg(test)]
pub(crate) fn test_device(address: &str, name: &str, connected: bool, is_audio: bool) -> DeviceState {
    DeviceState {
        address: Address::parse(address).unwrap(),
        name: name.to_string(),
        connected,
        paired: true,
        trusted: true,
        kind: if is_audio { DeviceKind::Audio } else { DeviceKind::Unknown },
        is_audio,
        battery: None,
        last_seen: None,
    }
}
