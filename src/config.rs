//! Engine configuration: routing markers and loop timings.

use std::time::Duration;

use crate::resolver::MatchPolicy;

/// Cadences, settling delays, retry counts and command timeouts.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Delay between polling cycles.
    pub poll_interval: Duration,
    /// Delay before the first polling cycle.
    pub poll_start_delay: Duration,
    /// Backoff after a failed polling cycle.
    pub error_backoff: Duration,
    /// Backoff once `max_consecutive_errors` is reached.
    pub long_error_backoff: Duration,
    pub max_consecutive_errors: u32,

    /// Delay before the event monitor first subscribes.
    pub event_start_delay: Duration,
    /// Minimum spacing between event-triggered checks.
    pub event_throttle: Duration,
    /// Wait before resubscribing after the event feed ends.
    pub resubscribe_delay: Duration,

    /// Delay before the startup auto-reconnect pass.
    pub reconnect_start_delay: Duration,
    /// Wait after powering the adapter before reconnecting.
    pub adapter_ready_delay: Duration,

    /// Wait for the audio server to enumerate a fresh Bluetooth sink.
    pub settle_delay: Duration,
    /// Wait after a disconnect before re-routing to wired.
    pub disconnect_settle_delay: Duration,
    /// Wait after restarting the audio server.
    pub restart_settle_delay: Duration,

    /// Sink resolution polls before giving up.
    pub resolve_attempts: u32,
    pub resolve_interval: Duration,

    pub pair_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect_pair_timeout: Duration,
    pub reconnect_connect_timeout: Duration,
    pub scan_duration: Duration,

    /// Bounded wait for loop tasks on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            poll_start_delay: Duration::from_secs(15),
            error_backoff: Duration::from_secs(10),
            long_error_backoff: Duration::from_secs(30),
            max_consecutive_errors: 3,
            event_start_delay: Duration::from_secs(20),
            event_throttle: Duration::from_secs(2),
            resubscribe_delay: Duration::from_secs(10),
            reconnect_start_delay: Duration::from_secs(10),
            adapter_ready_delay: Duration::from_secs(5),
            settle_delay: Duration::from_secs(3),
            disconnect_settle_delay: Duration::from_secs(2),
            restart_settle_delay: Duration::from_secs(3),
            resolve_attempts: 10,
            resolve_interval: Duration::from_secs(2),
            pair_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(20),
            reconnect_pair_timeout: Duration::from_secs(20),
            reconnect_connect_timeout: Duration::from_secs(15),
            scan_duration: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sink scoring thresholds and Bluetooth sink markers.
    pub policy: MatchPolicy,
    /// Substring identifying the fixed wired output sink.
    pub wired_marker: String,
    /// Run one auto-reconnect pass after startup.
    pub auto_reconnect_on_start: bool,
    pub timings: Timings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: MatchPolicy::V1,
            wired_marker: "hdmi".to_string(),
            auto_reconnect_on_start: true,
            timings: Timings::default(),
        }
    }
}
