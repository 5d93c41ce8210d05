//! `BluetoothControl` backed by the `bluetoothctl` command-line tool.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use crate::device::Address;
use crate::error::{Result, RouterError};
use crate::process::run;
use crate::traits::BluetoothControl;

const PROGRAM: &str = "bluetoothctl";

/// Timeout for enumeration, info and toggle commands.
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack added on top of a scan window before the command is killed.
const SCAN_GRACE: Duration = Duration::from_secs(5);

/// bluetoothctl over subprocess calls.
#[derive(Debug, Default, Clone)]
pub struct Bluetoothctl;

impl Bluetoothctl {
    pub fn new() -> Self {
        Self
    }

    async fn toggle(&self, args: &[&str]) -> Result<()> {
        run(PROGRAM, args, QUERY_TIMEOUT).await?.check(PROGRAM, args)?;
        Ok(())
    }
}

#[async_trait]
impl BluetoothControl for Bluetoothctl {
    async fn power_on(&self) -> Result<()> {
        info!("Powering on Bluetooth adapter");
        self.toggle(&["power", "on"]).await
    }

    async fn enable_agent(&self) -> Result<()> {
        self.toggle(&["agent", "on"]).await?;
        self.toggle(&["default-agent"]).await
    }

    async fn set_discoverable(&self, on: bool) -> Result<()> {
        let state = if on { "on" } else { "off" };
        self.toggle(&["discoverable", state]).await?;
        self.toggle(&["pairable", state]).await
    }

    async fn scan(&self, duration: Duration) -> Result<()> {
        info!("Starting Bluetooth scan for {:?}", duration);

        // Stale discovery sessions make `scan on` fail; this may legitimately
        // report that no scan is running.
        let _ = run(PROGRAM, &["scan", "off"], QUERY_TIMEOUT).await;

        let secs = duration.as_secs().max(1).to_string();
        let args = ["--timeout", secs.as_str(), "scan", "on"];
        run(PROGRAM, &args, duration + SCAN_GRACE).await?.check(PROGRAM, &args)?;

        let _ = run(PROGRAM, &["scan", "off"], QUERY_TIMEOUT).await;
        Ok(())
    }

    async fn device_list(&self) -> Result<String> {
        let args = ["devices"];
        Ok(run(PROGRAM, &args, QUERY_TIMEOUT).await?.check(PROGRAM, &args)?.stdout)
    }

    async fn device_info(&self, address: &Address) -> Result<String> {
        let output = run(PROGRAM, &["info", address.as_str()], QUERY_TIMEOUT).await?;
        if output.stdout.contains("not available") {
            return Err(RouterError::DeviceNotFound(address.to_string()));
        }
        Ok(output.check(PROGRAM, &["info", address.as_str()])?.stdout)
    }

    async fn pair(&self, address: &Address, limit: Duration) -> Result<()> {
        info!("Pairing with Bluetooth device: {}", address);

        let args = ["pair", address.as_str()];
        let output = run(PROGRAM, &args, limit).await?;
        if output.stdout.contains("Pairing successful")
            || output.stdout.contains("AlreadyExists")
            || output.success
        {
            Ok(())
        } else {
            Err(RouterError::CommandFailed {
                program: PROGRAM,
                args: args.join(" "),
                stderr: output.stdout.trim().to_string(),
            })
        }
    }

    async fn trust(&self, address: &Address) -> Result<()> {
        info!("Trusting Bluetooth device: {}", address);
        self.toggle(&["trust", address.as_str()]).await
    }

    async fn connect(&self, address: &Address, limit: Duration) -> Result<()> {
        info!("Connecting to Bluetooth device: {}", address);

        let args = ["connect", address.as_str()];
        let output = run(PROGRAM, &args, limit).await?;
        if output.stdout.contains("Connection successful") || output.success {
            info!("Connected to {}", address);
            Ok(())
        } else {
            error!("Connection failed: {} {}", output.stdout.trim(), output.stderr.trim());
            Err(RouterError::CommandFailed {
                program: PROGRAM,
                args: args.join(" "),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    async fn disconnect(&self, address: &Address) -> Result<()> {
        info!("Disconnecting from Bluetooth device: {}", address);

        let args = ["disconnect", address.as_str()];
        let output = run(PROGRAM, &args, QUERY_TIMEOUT).await?;
        if output.stdout.contains("Successful disconnected") || output.success {
            info!("Disconnected from {}", address);
            Ok(())
        } else {
            Err(RouterError::CommandFailed {
                program: PROGRAM,
                args: args.join(" "),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}
