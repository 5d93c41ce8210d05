//! # bt-audio-router
//!
//! Keeps a headless Linux host's default audio sink pointed at the right
//! output as Bluetooth speakers come and go.
//!
//! The engine watches the Bluetooth control surface and the audio server,
//! routes audio to a connected speaker's sink when one appears, and falls back
//! to the fixed wired output when it disappears, including when a speaker is
//! powered off without a clean disconnect.
//!
//! ## Features
//!
//! - Device snapshots parsed from `bluetoothctl`
//! - Scored sink resolution with retry while the audio server catches up
//! - Verified default-sink commits with active stream migration
//! - Wired fallback chain ending in an audio server restart
//! - Polling and event-driven orphaned-sink detection
//! - Auto-reconnect of paired devices after startup
//! - JSON notifications over a broadcast channel
//!
//! ## Requirements
//!
//! Linux with BlueZ (`bluetoothctl`) and PulseAudio or PipeWire-Pulse
//! (`pactl`).
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bt_audio_router::{Bluetoothctl, Engine, EngineConfig, Pactl};
//!
//! async fn example() {
//!     let engine = Engine::new(
//!         EngineConfig::default(),
//!         Arc::new(Bluetoothctl::new()),
//!         Arc::new(Pactl::new()),
//!     );
//!     let mut events = engine.subscribe();
//!     engine.start().await;
//!
//!     let result = engine.connect("AA:BB:CC:DD:EE:FF").await;
//!     println!("{:?}", result.status);
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

pub mod bluetoothctl;
pub mod commands;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod event_monitor;
pub mod events;
pub mod pactl;
pub mod poller;
mod process;
pub mod reconnect;
pub mod resolver;
pub mod routing;
pub mod tracker;
pub mod traits;

// Re-exports for convenience
pub use bluetoothctl::Bluetoothctl;
pub use commands::{ConnectResult, ConnectStatus, DisconnectResult, ListResult, ScanResult, TriggerResult};
pub use config::{EngineConfig, Timings};
pub use device::{Address, DeviceKind, DeviceState, Snapshot};
pub use engine::{Engine, EngineContext};
pub use error::{Result, RouterError};
pub use events::{Notification, Notifier, Reason};
pub use pactl::Pactl;
pub use resolver::{MatchPolicy, SinkCandidate, SinkResolver};
pub use routing::{RoutingController, RoutingTarget};
pub use tracker::DeviceTracker;
pub use traits::{AudioServer, BluetoothControl};
