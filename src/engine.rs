//! Engine context and lifecycle.
//!
//! [`EngineContext`] owns everything the loops share: the control surfaces,
//! the tracker, the routing controller, the previous-snapshot cache and the
//! monitoring flag. [`Engine`] spawns and stops the loop tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::device::Snapshot;
use crate::events::{Notification, Notifier, Reason};
use crate::resolver::SinkResolver;
use crate::routing::RoutingController;
use crate::tracker::DeviceTracker;
use crate::traits::{AudioServer, BluetoothControl};
use crate::{event_monitor, poller, reconnect};

/// State shared by the polling loop, the event monitor and auto-reconnect.
pub struct EngineContext {
    pub config: EngineConfig,
    pub bluetooth: Arc<dyn BluetoothControl>,
    pub audio: Arc<dyn AudioServer>,
    pub tracker: DeviceTracker,
    pub router: RoutingController,
    pub notifier: Notifier,
    /// Last snapshot seen by the polling loop.
    pub(crate) previous: Mutex<Option<Snapshot>>,
    monitoring: AtomicBool,
    reconnect_running: AtomicBool,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        bluetooth: Arc<dyn BluetoothControl>,
        audio: Arc<dyn AudioServer>,
    ) -> Self {
        let notifier = Notifier::new();
        let timings = &config.timings;
        let resolver = SinkResolver::new(
            audio.clone(),
            config.policy.clone(),
            timings.resolve_attempts,
            timings.resolve_interval,
        );
        let router = RoutingController::new(
            audio.clone(),
            resolver,
            notifier.clone(),
            config.wired_marker.clone(),
            timings.restart_settle_delay,
        );

        Self {
            tracker: DeviceTracker::new(bluetooth.clone()),
            router,
            notifier,
            bluetooth,
            audio,
            config,
            previous: Mutex::new(None),
            monitoring: AtomicBool::new(true),
            reconnect_running: AtomicBool::new(false),
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    pub fn set_monitoring(&self, enabled: bool) {
        self.monitoring.store(enabled, Ordering::SeqCst);
    }

    /// Claim the single auto-reconnect slot. Released when the guard drops.
    pub(crate) fn try_claim_reconnect(self: &Arc<Self>) -> Option<ReconnectGuard> {
        self.reconnect_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ReconnectGuard { ctx: self.clone() })
    }

    /// Route away from a Bluetooth sink whose device is gone.
    pub async fn resolve_orphan(&self, sink: &str) {
        warn!("Orphaned Bluetooth sink detected: {}", sink);
        if self.router.route_to_wired().await {
            info!("Wired output restored after orphaned sink {}", sink);
        }
        self.notifier.emit(Notification::OrphanedSinkDetected {
            sink_name: sink.to_string(),
            reason: Reason::DevicePoweredOff,
        });
    }
}

/// Marks an auto-reconnect pass as running for as long as it lives.
pub(crate) struct ReconnectGuard {
    ctx: Arc<EngineContext>,
}

impl Drop for ReconnectGuard {
    fn drop(&mut self) {
        self.ctx.reconnect_running.store(false, Ordering::SeqCst);
    }
}

/// The audio-route reconciliation engine.
pub struct Engine {
    ctx: Arc<EngineContext>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        bluetooth: Arc<dyn BluetoothControl>,
        audio: Arc<dyn AudioServer>,
    ) -> Self {
        Self {
            ctx: Arc::new(EngineContext::new(config, bluetooth, audio)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Receive notifications raised from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.ctx.notifier.subscribe()
    }

    /// Route to wired, then spawn the monitoring loops and the delayed
    /// startup auto-reconnect.
    pub async fn start(&self) {
        info!("Initializing audio routing");
        self.ctx.set_monitoring(true);
        self.ctx.router.route_to_wired().await;

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(poller::run(self.ctx.clone())));
        info!("Continuous Bluetooth monitoring started");
        tasks.push(tokio::spawn(event_monitor::run(self.ctx.clone())));
        info!("Audio server event monitoring started");

        if self.ctx.config.auto_reconnect_on_start {
            let ctx = self.ctx.clone();
            tasks.push(tokio::spawn(async move {
                sleep(ctx.config.timings.reconnect_start_delay).await;
                info!("Starting auto-reconnect");
                if let Err(e) = reconnect::run(&ctx).await {
                    error!("Startup auto-reconnect failed: {}", e);
                }
            }));
        }
    }

    /// Keep a background task so shutdown can join it.
    pub(crate) async fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Stop the loops, waiting a bounded time before aborting them.
    pub async fn shutdown(&self) {
        info!("Stopping monitoring");
        self.ctx.set_monitoring(false);

        let deadline = Instant::now() + self.ctx.config.timings.shutdown_timeout;
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for mut task in tasks {
            if timeout_at(deadline, &mut task).await.is_err() {
                warn!("Monitoring task did not stop in time, aborting");
                task.abort();
            }
        }
        info!("Monitoring stopped");
    }
}
