//! Front-end operations.
//!
//! These never return `Err`: every outcome, including failures, is a
//! serialisable result with an `error` field.

use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::device::{Address, DeviceState};
use crate::engine::Engine;
use crate::error::{Result, RouterError};
use crate::reconnect;
use crate::tracker::parse_device_info;

/// Result of a discovery scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub success: bool,
    pub devices: Vec<DeviceState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How an explicit connect ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectStatus {
    /// Connected and routed to the device's sink.
    Connected,
    /// Connected, but no sink resolved; routing left alone.
    SinkNotFound,
    Failed,
    Timeout,
}

impl ConnectStatus {
    fn from_error(e: &RouterError) -> Self {
        match e {
            RouterError::Timeout(_) => ConnectStatus::Timeout,
            RouterError::SinkNotFound(_) => ConnectStatus::SinkNotFound,
            _ => ConnectStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectResult {
    pub status: ConnectStatus,
    pub mac_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisconnectResult {
    pub success: bool,
    pub mac_address: String,
    /// Whether audio ended up on the wired output.
    pub wired_restored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything the engine knows about devices and sinks.
#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub all_devices: Vec<DeviceState>,
    pub paired_devices: Vec<DeviceState>,
    pub connected_devices: Vec<DeviceState>,
    pub current_sink: Option<String>,
    pub sinks: Vec<String>,
    pub total_devices: usize,
    pub total_paired: usize,
    pub total_connected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerResult {
    pub started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Engine {
    /// Make the adapter discoverable, run discovery and list what it knows.
    pub async fn scan(&self) -> ScanResult {
        let ctx = self.context();
        let duration = ctx.config.timings.scan_duration;

        let prepared = async {
            ctx.bluetooth.power_on().await?;
            ctx.bluetooth.enable_agent().await?;
            ctx.bluetooth.set_discoverable(true).await?;
            ctx.bluetooth.scan(duration).await
        }
        .await;

        if let Err(e) = prepared {
            error!("Bluetooth scan failed: {}", e);
            return ScanResult {
                success: false,
                devices: Vec::new(),
                error: Some(e.to_string()),
            };
        }

        let snapshot = ctx.tracker.snapshot().await;
        info!("Scan found {} devices", snapshot.len());
        ScanResult {
            success: true,
            devices: snapshot.devices().cloned().collect(),
            error: None,
        }
    }

    /// Pair, trust and connect a device, then route audio to it.
    pub async fn connect(&self, address: &str) -> ConnectResult {
        let mut result = ConnectResult {
            status: ConnectStatus::Failed,
            mac_address: address.to_string(),
            device_name: None,
            sink: None,
            error: None,
        };

        let address = match Address::parse(address) {
            Ok(address) => address,
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        };
        result.mac_address = address.to_string();

        match self.connect_device(&address, &mut result).await {
            Ok(sink) => {
                result.status = ConnectStatus::Connected;
                result.sink = Some(sink);
            }
            Err(e) => {
                warn!("Connect to {} ended with: {}", address, e);
                result.status = ConnectStatus::from_error(&e);
                result.error = Some(e.to_string());
            }
        }
        result
    }

    async fn connect_device(&self, address: &Address, result: &mut ConnectResult) -> Result<String> {
        let ctx = self.context();
        let timings = &ctx.config.timings;

        let info = parse_device_info(&ctx.bluetooth.device_info(address).await?);
        result.device_name = info.name.clone();
        info!("Connecting to {} ({:?})", address, info.name);

        if let Err(e) = ctx.bluetooth.trust(address).await {
            warn!("Could not trust {}: {}", address, e);
        }
        if let Err(e) = ctx.bluetooth.pair(address, timings.pair_timeout).await {
            if !info.paired {
                return Err(e);
            }
            info!("Pairing {} skipped: {}", address, e);
        }
        ctx.bluetooth.connect(address, timings.connect_timeout).await?;

        ctx.router.mark_connected(address).await;
        sleep(timings.settle_delay).await;

        let target = ctx
            .router
            .try_set_bluetooth_default(address, info.name.as_deref())
            .await?;
        Ok(target.sink().to_string())
    }

    /// Disconnect a device and route audio back to wired.
    pub async fn disconnect(&self, address: &str) -> DisconnectResult {
        let ctx = self.context();
        let mut result = DisconnectResult {
            success: false,
            mac_address: address.to_string(),
            wired_restored: false,
            error: None,
        };

        let address = match Address::parse(address) {
            Ok(address) => address,
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        };
        result.mac_address = address.to_string();

        info!("Disconnecting {}", address);
        if let Err(e) = ctx.bluetooth.disconnect(&address).await {
            error!("Failed to disconnect {}: {}", address, e);
            result.error = Some(e.to_string());
            return result;
        }

        ctx.router.mark_disconnected(&address).await;
        sleep(ctx.config.timings.disconnect_settle_delay).await;

        result.success = true;
        result.wired_restored = ctx.router.route_to_wired().await;
        result
    }

    /// Devices grouped by state, plus the audio server's sinks.
    pub async fn list(&self) -> ListResult {
        let ctx = self.context();
        let snapshot = ctx.tracker.snapshot().await;

        let all_devices: Vec<DeviceState> = snapshot.devices().cloned().collect();
        let paired_devices: Vec<DeviceState> = all_devices.iter().filter(|d| d.paired).cloned().collect();
        let connected_devices: Vec<DeviceState> = all_devices.iter().filter(|d| d.connected).cloned().collect();

        let current_sink = ctx.router.current_default().await.unwrap_or_else(|e| {
            warn!("Could not read default sink: {}", e);
            None
        });
        let sinks = ctx.router.list_sinks().await.unwrap_or_else(|e| {
            warn!("Could not list sinks: {}", e);
            Vec::new()
        });

        ListResult {
            total_devices: all_devices.len(),
            total_paired: paired_devices.len(),
            total_connected: connected_devices.len(),
            all_devices,
            paired_devices,
            connected_devices,
            current_sink,
            sinks,
        }
    }

    /// Start an auto-reconnect pass in the background.
    pub async fn trigger_auto_reconnect(&self) -> TriggerResult {
        let ctx = self.context().clone();
        let Some(guard) = ctx.try_claim_reconnect() else {
            warn!("Auto-reconnect requested while one is already running");
            return TriggerResult {
                started: false,
                error: Some(RouterError::ReconnectInProgress.to_string()),
            };
        };

        info!("Auto-reconnect triggered");
        let task = tokio::spawn(async move {
            reconnect::pass(&ctx, guard).await;
        });
        self.track(task).await;

        TriggerResult {
            started: true,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::traits::{AudioServer, BluetoothControl, MockAudioServer, MockBluetoothControl};

    const HDMI: &str = "alsa_output.platform-hdmi-sound.stereo-fallback";
    const SPEAKER: &str = "bluez_sink.AA_BB_CC_DD_EE_FF.a2dp_sink";
    const SPEAKER_INFO: &str = "\tName: JBL Flip 5\n\tPaired: yes\n\tConnected: no\n\tUUID: Audio Sink\n";

    fn engine(bt: MockBluetoothControl, audio: MockAudioServer) -> Engine {
        let bt: Arc<dyn BluetoothControl> = Arc::new(bt);
        let audio: Arc<dyn AudioServer> = Arc::new(audio);
        Engine::new(EngineConfig::default(), bt, audio)
    }

    mod connect {
        use super::*;

        #[tokio::test]
        async fn invalid_address_fails_without_touching_devices() {
            let result = engine(MockBluetoothControl::new(), MockAudioServer::new())
                .connect("not-a-mac")
                .await;
            assert_eq!(result.status, ConnectStatus::Failed);
            assert!(result.error.is_some());
        }

        #[tokio::test(start_paused = true)]
        async fn routes_to_resolved_sink() {
            let mut bt = MockBluetoothControl::new();
            bt.expect_device_info().returning(|_| Ok(SPEAKER_INFO.to_string()));
            bt.expect_trust().returning(|_| Ok(()));
            bt.expect_pair().returning(|_, _| Ok(()));
            bt.expect_connect().times(1).returning(|_, _| Ok(()));

            let mut audio = MockAudioServer::new();
            audio
                .expect_list_sinks()
                .returning(|| Ok(vec![HDMI.to_string(), SPEAKER.to_string()]));
            audio
                .expect_set_default_sink()
                .withf(|sink| sink == SPEAKER)
                .returning(|_| Ok(()));
            audio.expect_list_streams().returning(|| Ok(vec![]));
            audio.expect_default_sink().returning(|| Ok(Some(SPEAKER.to_string())));

            let engine = engine(bt, audio);
            let result = engine.connect("aa:bb:cc:dd:ee:ff").await;
            assert_eq!(result.status, ConnectStatus::Connected);
            assert_eq!(result.mac_address, "AA:BB:CC:DD:EE:FF");
            assert_eq!(result.device_name.as_deref(), Some("JBL Flip 5"));
            assert_eq!(result.sink.as_deref(), Some(SPEAKER));
            assert_eq!(engine.context().router.connected_devices().await.len(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn unresolved_sink_is_reported() {
            let mut bt = MockBluetoothControl::new();
            bt.expect_device_info().returning(|_| Ok(SPEAKER_INFO.to_string()));
            bt.expect_trust().returning(|_| Ok(()));
            bt.expect_pair().returning(|_, _| Ok(()));
            bt.expect_connect().returning(|_, _| Ok(()));

            let mut audio = MockAudioServer::new();
            audio.expect_list_sinks().returning(|| Ok(vec![HDMI.to_string()]));
            audio.expect_set_default_sink().never();

            let result = engine(bt, audio).connect("AA:BB:CC:DD:EE:FF").await;
            assert_eq!(result.status, ConnectStatus::SinkNotFound);
        }

        #[tokio::test]
        async fn connect_timeout_is_reported() {
            let mut bt = MockBluetoothControl::new();
            bt.expect_device_info().returning(|_| Ok(SPEAKER_INFO.to_string()));
            bt.expect_trust().returning(|_| Ok(()));
            bt.expect_pair().returning(|_, _| {
                Err(RouterError::CommandFailed {
                    program: "bluetoothctl",
                    args: "pair AA:BB:CC:DD:EE:FF".to_string(),
                    stderr: "org.bluez.Error.AlreadyExists".to_string(),
                })
            });
            bt.expect_connect()
                .returning(|_, _| Err(RouterError::Timeout("bluetoothctl connect".to_string())));

            let result = engine(bt, MockAudioServer::new())
                .connect("AA:BB:CC:DD:EE:FF")
                .await;
            assert_eq!(result.status, ConnectStatus::Timeout);
        }
    }

    mod disconnect {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn restores_wired_output() {
            let mut bt = MockBluetoothControl::new();
            bt.expect_disconnect().times(1).returning(|_| Ok(()));

            let mut audio = MockAudioServer::new();
            audio
                .expect_list_sinks()
                .returning(|| Ok(vec![SPEAKER.to_string(), HDMI.to_string()]));
            audio
                .expect_set_default_sink()
                .withf(|sink| sink == HDMI)
                .times(1)
                .returning(|_| Ok(()));
            audio.expect_list_streams().returning(|| Ok(vec![]));
            audio.expect_default_sink().returning(|| Ok(Some(HDMI.to_string())));

            let engine = engine(bt, audio);
            let addr = Address::parse("AA:BB:CC:DD:EE:FF").unwrap();
            engine.context().router.mark_connected(&addr).await;

            let result = engine.disconnect("AA:BB:CC:DD:EE:FF").await;
            assert!(result.success);
            assert!(result.wired_restored);
            assert!(engine.context().router.connected_devices().await.is_empty());
        }
    }

    mod list {
        use super::*;

        #[tokio::test]
        async fn groups_devices_and_totals() {
            let mut bt = MockBluetoothControl::new();
            bt.expect_device_list().returning(|| {
                Ok("Device AA:BB:CC:DD:EE:FF Speaker\nDevice 11:22:33:44:55:66 Mouse\n".to_string())
            });
            bt.expect_device_info().returning(|addr| {
                if addr.as_str() == "AA:BB:CC:DD:EE:FF" {
                    Ok("\tPaired: yes\n\tConnected: yes\n\tUUID: Audio Sink\n".to_string())
                } else {
                    Ok("\tPaired: no\n\tConnected: no\n\tMouse\n".to_string())
                }
            });

            let mut audio = MockAudioServer::new();
            audio.expect_default_sink().returning(|| Ok(Some(SPEAKER.to_string())));
            audio
                .expect_list_sinks()
                .returning(|| Ok(vec![HDMI.to_string(), SPEAKER.to_string()]));

            let result = engine(bt, audio).list().await;
            assert_eq!(result.total_devices, 2);
            assert_eq!(result.total_paired, 1);
            assert_eq!(result.total_connected, 1);
            assert_eq!(result.current_sink.as_deref(), Some(SPEAKER));
            assert_eq!(result.sinks.len(), 2);

            let json = serde_json::to_value(&result).unwrap();
            assert_eq!(json["connected_devices"][0]["mac"], "AA:BB:CC:DD:EE:FF");
            assert_eq!(json["connected_devices"][0]["type"], "audio");
        }
    }

    mod trigger {
        use super::*;

        #[tokio::test]
        async fn refuses_while_running() {
            let engine = engine(MockBluetoothControl::new(), MockAudioServer::new());
            let _held = engine.context().try_claim_reconnect().unwrap();

            let result = engine.trigger_auto_reconnect().await;
            assert!(!result.started);
            assert!(result.error.is_some());
        }
    }
}
