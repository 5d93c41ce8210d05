//! Error types for audio-route reconciliation.

use thiserror::Error;

/// Errors raised while talking to the Bluetooth and audio control surfaces.
#[derive(Error, Debug)]
pub enum RouterError {
    /// A control-surface command exited unsuccessfully.
    #[error("{program} {args} failed: {stderr}")]
    CommandFailed {
        program: &'static str,
        args: String,
        stderr: String,
    },

    /// A control-surface command did not finish in time.
    #[error("{0} timed out")]
    Timeout(String),

    /// Not a colon-separated Bluetooth address.
    #[error("Invalid Bluetooth address: {0}")]
    InvalidAddress(String),

    /// Address not known to the Bluetooth control surface.
    #[error("Bluetooth device not found: {0}")]
    DeviceNotFound(String),

    /// No audio sink could be matched to the device.
    #[error("No audio sink found for {0}")]
    SinkNotFound(String),

    /// No non-Bluetooth sink carries the wired-output marker.
    #[error("No wired sink matching '{0}' found")]
    NoWiredSink(String),

    /// The default sink did not read back as the one just set.
    #[error("Default sink is {actual:?}, expected {expected}")]
    VerifyFailed {
        expected: String,
        actual: Option<String>,
    },

    /// An auto-reconnect pass is already in flight.
    #[error("Auto-reconnect already running")]
    ReconnectInProgress,

    /// I/O error spawning or reading a subprocess.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for routing operations.
pub type Result<T> = std::result::Result<T, RouterError>;
