//! bt-audio-router daemon.
//!
//! Runs the reconciliation engine against `bluetoothctl` and `pactl` and
//! prints each notification as a JSON line on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use bt_audio_router::{Bluetoothctl, Engine, EngineConfig, Pactl};

#[derive(Default)]
struct Args {
    debug: bool,
    log_file: Option<PathBuf>,
    wired_marker: Option<String>,
    no_auto_reconnect: bool,
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--debug" | "-d" => {
                args.debug = true;
            }
            "--log-file" | "-l" => {
                if let Some(path) = iter.next() {
                    args.log_file = Some(PathBuf::from(path));
                }
            }
            "--wired-marker" | "-w" => {
                if let Some(marker) = iter.next() {
                    args.wired_marker = Some(marker);
                }
            }
            "--no-auto-reconnect" => {
                args.no_auto_reconnect = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
    }

    args
}

fn print_help() {
    println!("bt-audio-router - Keep the default audio sink on the right Bluetooth or wired output");
    println!();
    println!("Usage: bt-audio-router [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -d, --debug              Enable debug logging");
    println!("  -l, --log-file PATH      Write logs to PATH instead of stderr");
    println!("  -w, --wired-marker TEXT  Substring of the wired output sink (default: hdmi)");
    println!("      --no-auto-reconnect  Skip reconnecting paired devices on startup");
    println!("  -h, --help               Show this help message");
    println!();
    println!("Notifications are written to stdout as one JSON object per line.");
}

fn setup_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let Some(path) = &args.log_file else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(level)
            .init();
        return Ok(None);
    };

    let file = std::fs::File::create(path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_max_level(level)
        .init();

    info!("Logging to {:?}", path);
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    // Setup logging before anything else
    let _guard = setup_logging(&args)?;

    info!("Starting bt-audio-router");

    let mut config = EngineConfig::default();
    if let Some(marker) = args.wired_marker {
        config.wired_marker = marker;
    }
    config.auto_reconnect_on_start = !args.no_auto_reconnect;

    let engine = Engine::new(config, Arc::new(Bluetoothctl::new()), Arc::new(Pactl::new()));
    let mut notifications = engine.subscribe();
    engine.start().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            received = notifications.recv() => match received {
                Ok(notification) => println!("{}", serde_json::to_string(&notification)?),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} notifications", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await;
    info!("bt-audio-router exiting");
    Ok(())
}
