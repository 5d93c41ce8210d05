//! Event-driven orphan detection over the audio server's live event feed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::engine::EngineContext;
use crate::error::Result;

/// Whether an event line concerns a sink or the server itself.
pub fn is_sink_event(line: &str) -> bool {
    let line = line.to_lowercase();
    line.contains("sink") || line.contains("server")
}

/// Allows at most one check per interval.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// Returns true and starts a new window if the previous one has elapsed.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Check the current default sink and recover if it is orphaned.
///
/// Returns the orphaned sink name when one was found.
pub async fn check_default_sink(ctx: &EngineContext) -> Result<Option<String>> {
    let sink = match ctx.router.current_default().await? {
        Some(sink) if ctx.router.is_bluetooth_sink(&sink) => sink,
        _ => return Ok(None),
    };

    let snapshot = ctx.tracker.try_snapshot().await?;
    if snapshot.has_active_audio() {
        debug!("Default sink {} has an active device", sink);
        return Ok(None);
    }

    ctx.resolve_orphan(&sink).await;
    Ok(Some(sink))
}

/// Consume one subscription until it closes or monitoring stops.
async fn watch(ctx: &EngineContext, mut events: mpsc::Receiver<String>, throttle: &mut Throttle) {
    let tick = ctx.config.timings.poll_interval;

    while ctx.is_monitoring() {
        let line = match timeout(tick, events.recv()).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                warn!("Audio server event subscription ended");
                return;
            }
            Err(_) => continue,
        };

        if !is_sink_event(&line) || !throttle.ready() {
            continue;
        }

        debug!("Audio server event: {}", line.trim());
        if let Err(e) = check_default_sink(ctx).await {
            warn!("Sink check after audio server event failed: {}", e);
        }
    }
}

/// Watch the event feed, resubscribing whenever it drops, until monitoring
/// is disabled.
pub async fn run(ctx: Arc<EngineContext>) {
    let timings = ctx.config.timings.clone();
    sleep(timings.event_start_delay).await;
    info!("Starting audio server event monitoring");

    let mut throttle = Throttle::new(timings.event_throttle);

    while ctx.is_monitoring() {
        match ctx.audio.subscribe().await {
            Ok(events) => watch(&ctx, events, &mut throttle).await,
            Err(e) => error!("Audio server event monitoring error: {}", e),
        }

        if ctx.is_monitoring() {
            info!("Resubscribing to audio server events in {:?}", timings.resubscribe_delay);
            sleep(timings.resubscribe_delay).await;
        }
    }

    info!("Audio server event monitoring stopped");
}
