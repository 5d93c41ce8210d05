//! `AudioServer` backed by `pactl` and the `pulseaudio` daemon binary.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Result, RouterError};
use crate::process::run;
use crate::traits::AudioServer;

const PROGRAM: &str = "pactl";
const DAEMON: &str = "pulseaudio";

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Gap between killing and restarting the daemon.
const RESTART_GAP: Duration = Duration::from_secs(2);

/// Buffered event lines before the reader applies backpressure.
const EVENT_BUFFER: usize = 64;

/// Extract sink names from `pactl list short sinks`.
///
/// Each row is `<index> <name> <module> <sample-spec> <state>`; rows without
/// a name column are skipped.
pub fn parse_short_sinks(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

/// Extract stream ids from `pactl list short sink-inputs`.
pub fn parse_short_streams(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|id| id.parse().ok())
        .collect()
}

/// Forward lines from `reader` until it ends or the receiver goes away.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!("Event receiver dropped, stopping pactl subscribe");
                return;
            }
            next = lines.next_line() => next,
        };

        match next {
            Ok(Some(line)) => {
                if tx.send(line).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                warn!("pactl subscribe exited");
                return;
            }
            Err(e) => {
                warn!("Failed reading pactl subscribe output: {}", e);
                return;
            }
        }
    }
}

/// PulseAudio control over `pactl`.
#[derive(Debug, Default, Clone)]
pub struct Pactl;

impl Pactl {
    pub fn new() -> Self {
        Self
    }

    async fn query(&self, args: &[&str]) -> Result<String> {
        Ok(run(PROGRAM, args, QUERY_TIMEOUT).await?.check(PROGRAM, args)?.stdout)
    }
}

#[async_trait]
impl AudioServer for Pactl {
    async fn list_sinks(&self) -> Result<Vec<String>> {
        let stdout = self.query(&["list", "short", "sinks"]).await?;
        debug!("Available sinks:\n{}", stdout.trim_end());
        Ok(parse_short_sinks(&stdout))
    }

    async fn default_sink(&self) -> Result<Option<String>> {
        let stdout = self.query(&["get-default-sink"]).await?;
        let sink = stdout.trim();
        Ok((!sink.is_empty()).then(|| sink.to_string()))
    }

    async fn set_default_sink(&self, sink: &str) -> Result<()> {
        self.query(&["set-default-sink", sink]).await.map(|_| ())
    }

    async fn list_streams(&self) -> Result<Vec<u32>> {
        let stdout = self.query(&["list", "short", "sink-inputs"]).await?;
        Ok(parse_short_streams(&stdout))
    }

    async fn move_stream(&self, stream: u32, sink: &str) -> Result<()> {
        let id = stream.to_string();
        self.query(&["move-sink-input", id.as_str(), sink]).await.map(|_| ())
    }

    async fn restart(&self) -> Result<()> {
        warn!("Restarting PulseAudio");

        // --kill fails when the daemon is already gone, which is fine here.
        let _ = run(DAEMON, &["--kill"], QUERY_TIMEOUT).await;
        sleep(RESTART_GAP).await;
        run(DAEMON, &["--start"], QUERY_TIMEOUT)
            .await?
            .check(DAEMON, &["--start"])?;

        info!("PulseAudio restarted");
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<String>> {
        let mut child = Command::new(PROGRAM)
            .arg("subscribe")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            RouterError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pactl subscribe has no stdout",
            ))
        })?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            forward_lines(stdout, tx).await;
            // kill_on_drop reaps the subscription process.
            drop(child);
        });

        Ok(rx)
    }
}
