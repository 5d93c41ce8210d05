//! End-to-end reconciliation against in-memory control surfaces.
//!
//! Run with: cargo test --test reconciliation
//!
//! Time is paused, so settling delays and retry spacing complete instantly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use bt_audio_router::{
    event_monitor, poller, reconnect, Address, AudioServer, BluetoothControl, Engine, EngineConfig, Notification,
    Reason, Result, RouterError,
};

const HDMI: &str = "alsa_output.platform-hdmi-sound.stereo-fallback";
const SPEAKER_MAC: &str = "AA:BB:CC:DD:EE:FF";
const SPEAKER_SINK: &str = "bluez_sink.AA_BB_CC_DD_EE_FF.a2dp_sink";

#[derive(Clone)]
struct FakeDevice {
    address: &'static str,
    name: &'static str,
    connected: bool,
    paired: bool,
    audio: bool,
}

fn speaker(connected: bool) -> FakeDevice {
    FakeDevice {
        address: SPEAKER_MAC,
        name: "JBL Flip 5",
        connected,
        paired: true,
        audio: true,
    }
}

/// Bluetooth surface holding a mutable device table.
struct FakeBluetooth {
    devices: Mutex<Vec<FakeDevice>>,
    /// Number of upcoming `device_list` calls that fail.
    failing_queries: AtomicU32,
    connects: AtomicU32,
}

impl FakeBluetooth {
    fn new(devices: Vec<FakeDevice>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            failing_queries: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        })
    }

    fn set_connected(&self, address: &str, connected: bool) {
        for device in self.devices.lock().unwrap().iter_mut() {
            if device.address == address {
                device.connected = connected;
            }
        }
    }

    fn fail_next_queries(&self, count: u32) {
        self.failing_queries.store(count, Ordering::SeqCst);
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

#[async_trait]
impl BluetoothControl for FakeBluetooth {
    async fn power_on(&self) -> Result<()> {
        Ok(())
    }

    async fn enable_agent(&self) -> Result<()> {
        Ok(())
    }

    async fn set_discoverable(&self, _on: bool) -> Result<()> {
        Ok(())
    }

    async fn scan(&self, _duration: Duration) -> Result<()> {
        Ok(())
    }

    async fn device_list(&self) -> Result<String> {
        let failing = self.failing_queries.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_queries.store(failing - 1, Ordering::SeqCst);
            return Err(RouterError::Timeout("bluetoothctl devices".to_string()));
        }

        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .map(|d| format!("Device {} {}\n", d.address, d.name))
            .collect())
    }

    async fn device_info(&self, address: &Address) -> Result<String> {
        let devices = self.devices.lock().unwrap();
        let device = devices
            .iter()
            .find(|d| d.address == address.as_str())
            .ok_or_else(|| RouterError::DeviceNotFound(address.to_string()))?;

        let mut info = format!(
            "Device {}\n\tName: {}\n\tPaired: {}\n\tTrusted: yes\n\tConnected: {}\n",
            device.address,
            device.name,
            yes_no(device.paired),
            yes_no(device.connected)
        );
        if device.audio {
            info.push_str("\tUUID: Audio Sink (0000110b-0000-1000-8000-00805f9b34fb)\n");
        }
        Ok(info)
    }

    async fn pair(&self, _address: &Address, _limit: Duration) -> Result<()> {
        Ok(())
    }

    async fn trust(&self, _address: &Address) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, address: &Address, _limit: Duration) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.set_connected(address.as_str(), true);
        Ok(())
    }

    async fn disconnect(&self, address: &Address) -> Result<()> {
        self.set_connected(address.as_str(), false);
        Ok(())
    }
}

/// Audio server that only accepts sinks it actually lists.
struct FakeAudio {
    sinks: Mutex<Vec<String>>,
    default: Mutex<Option<String>>,
    commits: Mutex<Vec<String>>,
    moves: Mutex<Vec<(u32, String)>>,
    listings: AtomicU32,
    default_reads: AtomicU32,
    restarts: AtomicU32,
    subscriptions: AtomicU32,
    /// Sender side of the current event feed.
    feed: Mutex<Option<mpsc::Sender<String>>>,
}

impl FakeAudio {
    fn new(sinks: &[&str], default: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            sinks: Mutex::new(sinks.iter().map(|s| s.to_string()).collect()),
            default: Mutex::new(default.map(str::to_string)),
            commits: Mutex::new(Vec::new()),
            moves: Mutex::new(Vec::new()),
            listings: AtomicU32::new(0),
            default_reads: AtomicU32::new(0),
            restarts: AtomicU32::new(0),
            subscriptions: AtomicU32::new(0),
            feed: Mutex::new(None),
        })
    }

    fn current(&self) -> Option<String> {
        self.default.lock().unwrap().clone()
    }

    fn force_default(&self, sink: &str) {
        *self.default.lock().unwrap() = Some(sink.to_string());
    }

    fn add_sink(&self, sink: &str) {
        self.sinks.lock().unwrap().push(sink.to_string());
    }

    fn commits(&self) -> Vec<String> {
        self.commits.lock().unwrap().clone()
    }

    fn push_event(&self, line: &str) {
        let feed = self.feed.lock().unwrap();
        let tx = feed.as_ref().expect("no active subscription");
        tx.try_send(line.to_string()).unwrap();
    }

    fn close_feed(&self) {
        self.feed.lock().unwrap().take();
    }
}

#[async_trait]
impl AudioServer for FakeAudio {
    async fn list_sinks(&self) -> Result<Vec<String>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        Ok(self.sinks.lock().unwrap().clone())
    }

    async fn default_sink(&self) -> Result<Option<String>> {
        self.default_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.current())
    }

    async fn set_default_sink(&self, sink: &str) -> Result<()> {
        if !self.sinks.lock().unwrap().iter().any(|s| s == sink) {
            return Err(RouterError::CommandFailed {
                program: "pactl",
                args: format!("set-default-sink {}", sink),
                stderr: "No such entity".to_string(),
            });
        }
        self.commits.lock().unwrap().push(sink.to_string());
        self.force_default(sink);
        Ok(())
    }

    async fn list_streams(&self) -> Result<Vec<u32>> {
        Ok(vec![42])
    }

    async fn move_stream(&self, stream: u32, sink: &str) -> Result<()> {
        self.moves.lock().unwrap().push((stream, sink.to_string()));
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(8);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        *self.feed.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        auto_reconnect_on_start: false,
        ..EngineConfig::default()
    }
}

fn engine(bt: &Arc<FakeBluetooth>, audio: &Arc<FakeAudio>) -> Engine {
    Engine::new(config(), bt.clone(), audio.clone())
}

fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut seen = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        seen.push(notification);
    }
    seen
}

/// Start only the event monitor and wait until it has subscribed.
async fn start_event_monitor(engine: &Engine) -> JoinHandle<()> {
    let ctx = engine.context().clone();
    let delay = ctx.config.timings.event_start_delay;
    let handle = tokio::spawn(event_monitor::run(ctx));
    tokio::time::sleep(delay + Duration::from_millis(100)).await;
    handle
}

async fn stop_event_monitor(engine: &Engine, handle: JoinHandle<()>) {
    engine.context().set_monitoring(false);
    handle.await.unwrap();
}

/// Let spawned tasks drain their queues without crossing a throttle window.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn speaker_address() -> Address {
    Address::parse(SPEAKER_MAC).unwrap()
}

#[tokio::test(start_paused = true)]
async fn reconnected_speaker_becomes_default() {
    let bt = FakeBluetooth::new(vec![speaker(false)]);
    let audio = FakeAudio::new(&[HDMI], Some(HDMI));
    let engine = engine(&bt, &audio);
    let mut events = engine.subscribe();
    let ctx = engine.context();

    poller::run_cycle(ctx).await.unwrap();
    assert!(drain(&mut events).is_empty());

    bt.set_connected(SPEAKER_MAC, true);
    audio.add_sink(SPEAKER_SINK);
    let report = poller::run_cycle(ctx).await.unwrap();

    assert_eq!(report.reconnected, 1);
    assert_eq!(report.orphaned_sink, None);
    assert_eq!(audio.current().as_deref(), Some(SPEAKER_SINK));
    assert!(audio.moves.lock().unwrap().contains(&(42, SPEAKER_SINK.to_string())));
    assert_eq!(ctx.router.connected_devices().await, vec![speaker_address()]);

    let seen = drain(&mut events);
    assert_eq!(
        seen,
        vec![Notification::DeviceReconnected {
            mac_address: speaker_address(),
            device_name: "JBL Flip 5".to_string(),
            reason: Reason::MonitoringDetected,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn orphaned_sink_returns_to_wired() {
    let bt = FakeBluetooth::new(vec![speaker(false)]);
    let audio = FakeAudio::new(&[HDMI, SPEAKER_SINK], Some(SPEAKER_SINK));
    let engine = engine(&bt, &audio);
    let mut events = engine.subscribe();

    let report = poller::run_cycle(engine.context()).await.unwrap();

    assert_eq!(report.orphaned_sink.as_deref(), Some(SPEAKER_SINK));
    assert_eq!(audio.current().as_deref(), Some(HDMI));
    assert_eq!(
        drain(&mut events),
        vec![Notification::OrphanedSinkDetected {
            sink_name: SPEAKER_SINK.to_string(),
            reason: Reason::DevicePoweredOff,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn unresolvable_device_leaves_default_unchanged() {
    let bt = FakeBluetooth::new(vec![speaker(true)]);
    let audio = FakeAudio::new(&[HDMI, "bluez_card.unrelated"], Some(HDMI));
    let engine = engine(&bt, &audio);

    let routed = engine
        .context()
        .router
        .set_bluetooth_default(&speaker_address(), Some("JBL Flip 5"))
        .await;

    assert!(!routed);
    assert_eq!(audio.listings.load(Ordering::SeqCst), 10);
    assert!(audio.commits().is_empty());
    assert_eq!(audio.current().as_deref(), Some(HDMI));
}

#[tokio::test(start_paused = true)]
async fn missing_wired_sink_restarts_audio_server_once() {
    let bt = FakeBluetooth::new(vec![]);
    let audio = FakeAudio::new(&[SPEAKER_SINK], Some(SPEAKER_SINK));
    let engine = engine(&bt, &audio);
    let mut events = engine.subscribe();

    assert!(!engine.context().router.route_to_wired().await);

    assert_eq!(audio.restarts.load(Ordering::SeqCst), 1);
    assert!(audio.commits().is_empty());
    assert!(matches!(
        drain(&mut events).as_slice(),
        [Notification::RoutingFailed { .. }]
    ));
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_not_reported_as_orphan() {
    let bt = FakeBluetooth::new(vec![speaker(true)]);
    let audio = FakeAudio::new(&[HDMI, SPEAKER_SINK], Some(SPEAKER_SINK));
    let engine = engine(&bt, &audio);
    let mut events = engine.subscribe();
    let ctx = engine.context();

    poller::run_cycle(ctx).await.unwrap();
    bt.set_connected(SPEAKER_MAC, false);
    let report = poller::run_cycle(ctx).await.unwrap();

    assert_eq!(report.disconnected, 1);
    assert_eq!(report.orphaned_sink, None);
    assert_eq!(audio.current().as_deref(), Some(HDMI));

    let seen = drain(&mut events);
    assert_eq!(seen.len(), 1);
    assert!(matches!(
        &seen[0],
        Notification::DeviceDisconnected { reason: Reason::MonitoringDetected, .. }
    ));
}

#[tokio::test]
async fn wired_default_is_idempotent() {
    let bt = FakeBluetooth::new(vec![]);
    let audio = FakeAudio::new(&["bluez_sink.hdmi_speaker", HDMI], Some(SPEAKER_SINK));
    let engine = engine(&bt, &audio);
    let router = &engine.context().router;

    assert!(router.set_wired_default().await);
    let once = audio.current();
    assert!(router.set_wired_default().await);

    assert_eq!(audio.current(), once);
    assert_eq!(once.as_deref(), Some(HDMI));
}

#[tokio::test(start_paused = true)]
async fn address_match_wins_among_many_sinks() {
    let bt = FakeBluetooth::new(vec![speaker(true)]);
    let audio = FakeAudio::new(
        &[
            HDMI,
            "bluez_sink.JBL_Flip_5.a2dp_sink",
            "bluez_sink.11_22_33_44_55_66.a2dp_sink",
            SPEAKER_SINK,
        ],
        Some(HDMI),
    );
    let engine = engine(&bt, &audio);

    let target = engine
        .context()
        .router
        .try_set_bluetooth_default(&speaker_address(), Some("JBL Flip 5"))
        .await
        .unwrap();

    assert_eq!(target.sink(), SPEAKER_SINK);
}

#[tokio::test(start_paused = true)]
async fn polling_recovers_after_failed_queries() {
    let bt = FakeBluetooth::new(vec![speaker(false)]);
    let audio = FakeAudio::new(&[HDMI, SPEAKER_SINK], Some(HDMI));
    let engine = engine(&bt, &audio);
    let mut events = engine.subscribe();

    engine.start().await;
    bt.fail_next_queries(5);
    audio.force_default(SPEAKER_SINK);

    tokio::time::sleep(Duration::from_secs(180)).await;

    assert_eq!(audio.current().as_deref(), Some(HDMI));
    assert!(drain(&mut events)
        .iter()
        .any(|n| matches!(n, Notification::OrphanedSinkDetected { .. })));

    engine.shutdown().await;
    assert!(!engine.context().is_monitoring());
}

#[tokio::test(start_paused = true)]
async fn auto_reconnect_routes_paired_speaker() {
    let bt = FakeBluetooth::new(vec![
        speaker(false),
        FakeDevice {
            address: "11:22:33:44:55:66",
            name: "Keyboard",
            connected: false,
            paired: false,
            audio: false,
        },
    ]);
    let audio = FakeAudio::new(&[HDMI, SPEAKER_SINK], Some(HDMI));
    let engine = engine(&bt, &audio);

    let report = reconnect::run(engine.context()).await.unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.reconnected.len(), 2);
    assert_eq!(bt.connects.load(Ordering::SeqCst), 2);
    assert!(report.routed_bluetooth);
    assert_eq!(audio.current().as_deref(), Some(SPEAKER_SINK));
}

#[tokio::test(start_paused = true)]
async fn sink_event_recovers_orphaned_default() {
    let bt = FakeBluetooth::new(vec![speaker(false)]);
    let audio = FakeAudio::new(&[HDMI, SPEAKER_SINK], Some(SPEAKER_SINK));
    let engine = engine(&bt, &audio);
    let mut events = engine.subscribe();

    let monitor = start_event_monitor(&engine).await;
    assert_eq!(audio.subscriptions.load(Ordering::SeqCst), 1);
    assert!(audio.commits().is_empty());

    audio.push_event("Event 'change' on sink #2");
    settle().await;

    assert_eq!(audio.current().as_deref(), Some(HDMI));
    assert_eq!(audio.commits(), vec![HDMI.to_string()]);
    assert_eq!(
        drain(&mut events),
        vec![Notification::OrphanedSinkDetected {
            sink_name: SPEAKER_SINK.to_string(),
            reason: Reason::DevicePoweredOff,
        }]
    );

    stop_event_monitor(&engine, monitor).await;
}

#[tokio::test(start_paused = true)]
async fn event_burst_is_checked_once_per_window() {
    let bt = FakeBluetooth::new(vec![speaker(false)]);
    let audio = FakeAudio::new(&[HDMI], Some(HDMI));
    let engine = engine(&bt, &audio);

    let monitor = start_event_monitor(&engine).await;

    audio.push_event("Event 'new' on client #40");
    settle().await;
    assert_eq!(audio.default_reads.load(Ordering::SeqCst), 0);

    for _ in 0..5 {
        audio.push_event("Event 'change' on sink #1");
    }
    audio.push_event("Event 'change' on server #-1");
    settle().await;
    assert_eq!(audio.default_reads.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    audio.push_event("Event 'change' on sink #1");
    settle().await;
    assert_eq!(audio.default_reads.load(Ordering::SeqCst), 2);

    stop_event_monitor(&engine, monitor).await;
}

#[tokio::test(start_paused = true)]
async fn closed_event_feed_is_resubscribed() {
    let bt = FakeBluetooth::new(vec![]);
    let audio = FakeAudio::new(&[HDMI], Some(HDMI));
    let engine = engine(&bt, &audio);
    let resubscribe = engine.context().config.timings.resubscribe_delay;

    let monitor = start_event_monitor(&engine).await;
    assert_eq!(audio.subscriptions.load(Ordering::SeqCst), 1);

    audio.close_feed();
    tokio::time::sleep(resubscribe - Duration::from_secs(1)).await;
    assert_eq!(audio.subscriptions.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(audio.subscriptions.load(Ordering::SeqCst), 2);

    stop_event_monitor(&engine, monitor).await;
}
