//! Routing controller.
//!
//! Makes the audio server's default sink match the engine's routing target:
//! a resolved Bluetooth sink, or the fixed wired output. Every commit sets the
//! default, migrates active streams and reads the default back.
//!
//! Commits are idempotent, so the polling loop and the event monitor may both
//! force the wired default in the same window without coordination.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::device::Address;
use crate::error::{Result, RouterError};
use crate::events::{Notification, Notifier};
use crate::resolver::SinkResolver;
use crate::traits::AudioServer;

/// What the default sink should be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingTarget {
    /// The sink of one connected audio device.
    Bluetooth { address: Address, sink: String },
    /// The fixed wired fallback output.
    Wired { sink: String },
}

impl RoutingTarget {
    pub fn sink(&self) -> &str {
        match self {
            RoutingTarget::Bluetooth { sink, .. } | RoutingTarget::Wired { sink } => sink,
        }
    }
}

impl fmt::Display for RoutingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingTarget::Bluetooth { address, sink } => write!(f, "bluetooth {} ({})", address, sink),
            RoutingTarget::Wired { sink } => write!(f, "wired ({})", sink),
        }
    }
}

/// Commits routing decisions to the audio server.
pub struct RoutingController {
    audio: Arc<dyn AudioServer>,
    resolver: SinkResolver,
    notifier: Notifier,
    wired_marker: String,
    restart_settle_delay: Duration,
    /// Devices the engine believes are connected.
    connected: Mutex<Vec<Address>>,
}

impl RoutingController {
    pub fn new(
        audio: Arc<dyn AudioServer>,
        resolver: SinkResolver,
        notifier: Notifier,
        wired_marker: impl Into<String>,
        restart_settle_delay: Duration,
    ) -> Self {
        Self {
            audio,
            resolver,
            notifier,
            wired_marker: wired_marker.into().to_lowercase(),
            restart_settle_delay,
            connected: Mutex::new(Vec::new()),
        }
    }

    pub fn is_bluetooth_sink(&self, sink: &str) -> bool {
        self.resolver.policy().is_bluetooth_sink(sink)
    }

    /// First sink that is not Bluetooth-backed and carries the wired marker.
    pub fn find_wired_sink<'a>(&self, sinks: &'a [String]) -> Option<&'a String> {
        sinks
            .iter()
            .find(|s| !self.is_bluetooth_sink(s) && s.to_lowercase().contains(&self.wired_marker))
    }

    /// Route audio to the sink of `address`.
    ///
    /// Returns false without touching the default when no sink resolves or
    /// the commit fails.
    pub async fn set_bluetooth_default(&self, address: &Address, name: Option<&str>) -> bool {
        match self.try_set_bluetooth_default(address, name).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Could not route audio to {}: {}", address, e);
                false
            }
        }
    }

    pub async fn try_set_bluetooth_default(&self, address: &Address, name: Option<&str>) -> Result<RoutingTarget> {
        info!("Setting Bluetooth device {} ({:?}) as default sink", address, name);

        let candidate = self.resolver.resolve(address, name).await?;
        self.commit(&candidate.sink_name).await?;

        let target = RoutingTarget::Bluetooth {
            address: address.clone(),
            sink: candidate.sink_name,
        };
        info!("Routed audio to {}", target);
        Ok(target)
    }

    /// Route audio to the wired output. Never picks a Bluetooth sink.
    pub async fn set_wired_default(&self) -> bool {
        match self.try_set_wired_default().await {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to set wired default sink: {}", e);
                false
            }
        }
    }

    pub async fn try_set_wired_default(&self) -> Result<RoutingTarget> {
        info!("Setting default audio sink to wired output");

        let sinks = self.audio.list_sinks().await?;
        let sink = self
            .find_wired_sink(&sinks)
            .ok_or_else(|| {
                error!("Wired sink not found among {:?}", sinks);
                RouterError::NoWiredSink(self.wired_marker.clone())
            })?
            .clone();

        self.commit(&sink).await?;
        info!("Routed audio to wired output {}", sink);
        Ok(RoutingTarget::Wired { sink })
    }

    /// Last-resort wired recovery.
    ///
    /// Re-enumerates and forces the first wired sink; if that fails, restarts
    /// the audio server once and retries the primary wired path.
    pub async fn force_wired_fallback(&self) -> bool {
        warn!("[fallback] Attempting to force wired audio output");

        match self.audio.list_sinks().await {
            Ok(sinks) => match self.find_wired_sink(&sinks) {
                Some(sink) => match self.commit(sink).await {
                    Ok(()) => {
                        info!("[fallback] Forced {} as default", sink);
                        return true;
                    }
                    Err(e) => error!("[fallback] Failed to set {}: {}", sink, e),
                },
                None => error!("[fallback] No wired sink found"),
            },
            Err(e) => error!("[fallback] Failed to list sinks: {}", e),
        }

        warn!("[fallback] Restarting audio server");
        if let Err(e) = self.audio.restart().await {
            error!("[fallback] Audio server restart failed: {}", e);
            return false;
        }
        sleep(self.restart_settle_delay).await;

        self.set_wired_default().await
    }

    /// Primary wired path, escalating to the fallback chain.
    ///
    /// Broadcasts `RoutingFailed` only once every step is exhausted.
    pub async fn route_to_wired(&self) -> bool {
        if self.set_wired_default().await {
            return true;
        }

        warn!("Primary wired routing failed, trying fallback");
        if self.force_wired_fallback().await {
            return true;
        }

        error!("All wired routing methods failed; manual intervention required");
        self.notifier.emit(Notification::RoutingFailed {
            target: "wired".to_string(),
            error: RouterError::NoWiredSink(self.wired_marker.clone()).to_string(),
        });
        false
    }

    pub async fn current_default(&self) -> Result<Option<String>> {
        self.audio.default_sink().await
    }

    pub async fn list_sinks(&self) -> Result<Vec<String>> {
        self.audio.list_sinks().await
    }

    /// Set `sink` as default, migrate streams, and verify.
    async fn commit(&self, sink: &str) -> Result<()> {
        self.audio.set_default_sink(sink).await?;
        self.migrate_streams(sink).await;

        let actual = self.audio.default_sink().await?;
        if actual.as_deref() != Some(sink) {
            return Err(RouterError::VerifyFailed {
                expected: sink.to_string(),
                actual,
            });
        }
        debug!("Verified default sink {}", sink);
        Ok(())
    }

    /// Move every active stream to `sink`. Streams may end mid-move, so
    /// failures are logged rather than propagated.
    async fn migrate_streams(&self, sink: &str) {
        let streams = match self.audio.list_streams().await {
            Ok(streams) => streams,
            Err(e) => {
                warn!("Could not list audio streams: {}", e);
                return;
            }
        };

        for stream in streams {
            match self.audio.move_stream(stream, sink).await {
                Ok(()) => info!("Moved audio stream {} to {}", stream, sink),
                Err(e) => warn!("Could not move audio stream {}: {}", stream, e),
            }
        }
    }

    pub async fn mark_connected(&self, address: &Address) {
        let mut connected = self.connected.lock().await;
        if !connected.contains(address) {
            connected.push(address.clone());
        }
    }

    pub async fn mark_disconnected(&self, address: &Address) {
        self.connected.lock().await.retain(|a| a != address);
    }

    pub async fn connected_devices(&self) -> Vec<Address> {
        self.connected.lock().await.clone()
    }
}
