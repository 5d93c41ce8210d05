//! Control-surface traits (enables mocking in tests).

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::device::Address;
use crate::error::Result;

/// Bluetooth control surface.
///
/// Enumeration and info calls hand back the surface's own text; parsing is the
/// tracker's job so malformed output can be skipped entry by entry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BluetoothControl: Send + Sync {
    async fn power_on(&self) -> Result<()>;

    /// Register an agent and make it the default.
    async fn enable_agent(&self) -> Result<()>;

    /// Toggle discoverable and pairable together.
    async fn set_discoverable(&self, on: bool) -> Result<()>;

    /// Run discovery for `duration`.
    async fn scan(&self, duration: Duration) -> Result<()>;

    /// One `Device <address> <name>` line per known device.
    async fn device_list(&self) -> Result<String>;

    /// Free-form property and capability text for one device.
    async fn device_info(&self, address: &Address) -> Result<String>;

    async fn pair(&self, address: &Address, limit: Duration) -> Result<()>;

    async fn trust(&self, address: &Address) -> Result<()>;

    async fn connect(&self, address: &Address, limit: Duration) -> Result<()>;

    async fn disconnect(&self, address: &Address) -> Result<()>;
}

/// Audio-server control surface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioServer: Send + Sync {
    /// Names of every sink, in the server's enumeration order.
    async fn list_sinks(&self) -> Result<Vec<String>>;

    /// Current default sink, `None` when the server reports none.
    async fn default_sink(&self) -> Result<Option<String>>;

    async fn set_default_sink(&self, sink: &str) -> Result<()>;

    /// Ids of active playback streams.
    async fn list_streams(&self) -> Result<Vec<u32>>;

    async fn move_stream(&self, stream: u32, sink: &str) -> Result<()>;

    /// Restart the audio server process.
    async fn restart(&self) -> Result<()>;

    /// Subscribe to the live event feed.
    ///
    /// The receiver yields raw event lines and closes when the underlying
    /// subscription ends.
    async fn subscribe(&self) -> Result<mpsc::Receiver<String>>;
}
