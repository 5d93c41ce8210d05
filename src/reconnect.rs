//! Auto-reconnect workflow.
//!
//! Brings known devices back after a restart: every paired or trusted device
//! that is not connected is trusted, re-paired if needed and connected. Audio
//! routes to the first Bluetooth sink that resolves, or to wired when none do.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::device::{Address, DeviceState};
use crate::engine::{EngineContext, ReconnectGuard};
use crate::error::{Result, RouterError};

/// Outcome of one auto-reconnect pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectReport {
    /// Devices a connection was attempted for.
    pub attempted: usize,
    /// Devices that connected during this pass.
    pub reconnected: Vec<Address>,
    /// Whether a Bluetooth device ended up as the default route.
    pub routed_bluetooth: bool,
}

/// Run one pass. Refuses to start while another pass is running.
pub async fn run(ctx: &Arc<EngineContext>) -> Result<ReconnectReport> {
    let guard = ctx.try_claim_reconnect().ok_or(RouterError::ReconnectInProgress)?;
    Ok(pass(ctx, guard).await)
}

/// Run one pass under an already claimed slot.
pub(crate) async fn pass(ctx: &EngineContext, _guard: ReconnectGuard) -> ReconnectReport {
    let timings = &ctx.config.timings;

    info!("Auto-reconnecting to known devices");
    if let Err(e) = ctx.bluetooth.power_on().await {
        warn!("Could not power on adapter: {}", e);
    }
    sleep(timings.adapter_ready_delay).await;
    if let Err(e) = ctx.bluetooth.enable_agent().await {
        warn!("Could not enable pairing agent: {}", e);
    }

    let snapshot = ctx.tracker.snapshot().await;
    let mut report = ReconnectReport::default();

    for device in snapshot.devices() {
        if device.connected {
            if device.is_audio {
                info!("{} already connected, re-asserting route", device.display_name());
                ctx.router.mark_connected(&device.address).await;
                if ctx
                    .router
                    .set_bluetooth_default(&device.address, Some(&device.name))
                    .await
                {
                    report.routed_bluetooth = true;
                }
            }
            continue;
        }

        if !(device.paired || device.trusted) {
            continue;
        }

        report.attempted += 1;
        match reconnect_device(ctx, device).await {
            Ok(()) => {
                info!("Reconnected {} ({})", device.display_name(), device.address);
                ctx.router.mark_connected(&device.address).await;
                report.reconnected.push(device.address.clone());

                if device.is_audio {
                    sleep(timings.settle_delay).await;
                    if ctx
                        .router
                        .set_bluetooth_default(&device.address, Some(&device.name))
                        .await
                    {
                        report.routed_bluetooth = true;
                    }
                }
            }
            Err(e) => warn!("Failed to reconnect {} ({}): {}", device.display_name(), device.address, e),
        }
    }

    if !report.routed_bluetooth {
        info!("No Bluetooth audio device routed, using wired output");
        ctx.router.route_to_wired().await;
    }

    info!(
        "Auto-reconnect finished: {} attempted, {} reconnected",
        report.attempted,
        report.reconnected.len()
    );
    report
}

async fn reconnect_device(ctx: &EngineContext, device: &DeviceState) -> Result<()> {
    let timings = &ctx.config.timings;
    info!("Attempting to reconnect {} ({})", device.display_name(), device.address);

    ctx.bluetooth.trust(&device.address).await?;
    if !device.paired {
        ctx.bluetooth
            .pair(&device.address, timings.reconnect_pair_timeout)
            .await?;
    }
    ctx.bluetooth
        .connect(&device.address, timings.reconnect_connect_timeout)
        .await
}
