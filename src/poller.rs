//! Polling reconciliation loop.
//!
//! Diffs successive device snapshots to catch audio devices connecting and
//! disconnecting, then checks the default sink for Bluetooth sinks whose
//! device vanished without a clean disconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::device::{DeviceState, Snapshot};
use crate::engine::EngineContext;
use crate::error::Result;
use crate::events::{Notification, Reason};

/// A connection change of an audio-capable device.
#[derive(Debug, Clone)]
pub enum Transition {
    Disconnected(DeviceState),
    Reconnected(DeviceState),
}

/// Compare two snapshots. Only addresses present in both are considered.
pub fn diff_snapshots(previous: &Snapshot, current: &Snapshot) -> Vec<Transition> {
    current
        .devices()
        .filter(|now| now.is_audio)
        .filter_map(|now| {
            let before = previous.get(&now.address)?;
            match (before.connected, now.connected) {
                (true, false) => Some(Transition::Disconnected(now.clone())),
                (false, true) => Some(Transition::Reconnected(now.clone())),
                _ => None,
            }
        })
        .collect()
}

/// Consecutive-error backoff for the polling loop.
#[derive(Debug, Clone)]
pub struct ErrorBackoff {
    consecutive: u32,
    max_consecutive: u32,
    short: Duration,
    long: Duration,
}

impl ErrorBackoff {
    pub fn new(max_consecutive: u32, short: Duration, long: Duration) -> Self {
        Self {
            consecutive: 0,
            max_consecutive: max_consecutive.max(1),
            short,
            long,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn on_success(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn on_failure(&mut self) -> Duration {
        self.consecutive += 1;
        if self.consecutive >= self.max_consecutive {
            self.consecutive = 0;
            self.long
        } else {
            self.short
        }
    }
}

/// What one polling cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub disconnected: usize,
    pub reconnected: usize,
    pub orphaned_sink: Option<String>,
}

/// Run one reconciliation cycle.
pub async fn run_cycle(ctx: &EngineContext) -> Result<CycleReport> {
    let current = ctx.tracker.try_snapshot().await?;
    let previous = ctx.previous.lock().await.replace(current.clone());
    let mut report = CycleReport::default();

    if let Some(previous) = previous {
        for transition in diff_snapshots(&previous, &current) {
            match transition {
                Transition::Disconnected(device) => {
                    handle_disconnect(ctx, &device).await;
                    report.disconnected += 1;
                }
                Transition::Reconnected(device) => {
                    if handle_reconnect(ctx, &device).await {
                        report.reconnected += 1;
                    }
                }
            }
        }
    }

    // A disconnect handled above already re-routed; don't report it twice.
    if report.disconnected == 0 {
        let sink = ctx.router.current_default().await?;
        let has_active = current.has_active_audio();
        debug!("Current sink: {:?}, has active Bluetooth audio: {}", sink, has_active);

        if let Some(sink) = sink {
            if ctx.router.is_bluetooth_sink(&sink) && !has_active {
                ctx.resolve_orphan(&sink).await;
                report.orphaned_sink = Some(sink);
            }
        }
    }

    Ok(report)
}

async fn handle_disconnect(ctx: &EngineContext, device: &DeviceState) {
    info!(
        "Detected audio device disconnection: {} ({})",
        device.display_name(),
        device.address
    );
    ctx.router.mark_disconnected(&device.address).await;

    if ctx.router.route_to_wired().await {
        info!("Wired output set after {} disconnected", device.address);
    }

    ctx.notifier.emit(Notification::DeviceDisconnected {
        mac_address: device.address.clone(),
        device_name: device.name.clone(),
        reason: Reason::MonitoringDetected,
    });
}

async fn handle_reconnect(ctx: &EngineContext, device: &DeviceState) -> bool {
    info!(
        "Detected audio device reconnection: {} ({})",
        device.display_name(),
        device.address
    );
    ctx.router.mark_connected(&device.address).await;
    sleep(ctx.config.timings.settle_delay).await;

    if !ctx
        .router
        .set_bluetooth_default(&device.address, Some(&device.name))
        .await
    {
        warn!("Could not set {} as default sink", device.display_name());
        return false;
    }

    ctx.notifier.emit(Notification::DeviceReconnected {
        mac_address: device.address.clone(),
        device_name: device.name.clone(),
        reason: Reason::MonitoringDetected,
    });
    true
}

/// Poll until monitoring is disabled.
pub async fn run(ctx: Arc<EngineContext>) {
    let timings = ctx.config.timings.clone();
    info!("Starting continuous Bluetooth monitoring");
    sleep(timings.poll_start_delay).await;

    let mut backoff = ErrorBackoff::new(
        timings.max_consecutive_errors,
        timings.error_backoff,
        timings.long_error_backoff,
    );

    while ctx.is_monitoring() {
        match run_cycle(&ctx).await {
            Ok(_) => {
                backoff.on_success();
                sleep(timings.poll_interval).await;
            }
            Err(e) => {
                let attempt = backoff.consecutive() + 1;
                let wait = backoff.on_failure();
                error!(
                    "Error in continuous monitoring (attempt {}/{}): {}; retrying in {:?}",
                    attempt, timings.max_consecutive_errors, e, wait
                );
                sleep(wait).await;
            }
        }
    }

    info!("Continuous Bluetooth monitoring stopped");
}
