//! Flight software simulator host.
//!
//! Runs the mission loop against the simulated board in real time and
//! bridges the radio link onto TCP: every line a client sends is injected
//! as a received uplink frame, and every downlink transmission (replies,
//! beacons, telemetry) is broadcast to all connected clients. A soft reset
//! requested by the firmware tears the mission down and rebuilds it over
//! the same simulated EEPROM and SD card, exactly like a reboot.

use std::sync::Arc;

use lorasat::config::SatConfig;
use lorasat::hal::sim::SimBus;
use lorasat::hal::MonotonicClock;
use lorasat::mission::Mission;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{error, info, warn};

const TCP_PORT: u16 = 8080;
const TICK_PERIOD_MS: u64 = 10;
const DOWNLINK_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cfg = match std::env::args().nth(1) {
        Some(path) => SatConfig::from_file(std::path::Path::new(&path))?,
        None => SatConfig::default(),
    };

    println!("🛰️  lorasat flight software simulator");
    println!("   satellite id: {}", cfg.sat_id);
    println!("   uplink/downlink bridged on TCP port {}", TCP_PORT);

    let bus = Arc::new(SimBus::new());
    // Bench configuration: the restraint line is already open, so the
    // deployment sequence completes on its first tick.
    bus.set_switch_released(true);

    let mut mission = Mission::new(
        bus.board_with_clock(Arc::new(MonotonicClock::new())),
        cfg.clone(),
    );
    mission.init();
    let mission = Arc::new(Mutex::new(mission));

    let (downlink_tx, _) = broadcast::channel::<String>(DOWNLINK_BUFFER);

    let server_bus = Arc::clone(&bus);
    let server_downlink = downlink_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_tcp_server(server_bus, server_downlink).await {
            error!("TCP server error: {}", e);
        }
    });

    let mut ticker = time::interval(time::Duration::from_millis(TICK_PERIOD_MS));
    loop {
        ticker.tick().await;

        {
            let mut mission_guard = mission.lock().await;
            mission_guard.tick();

            if mission_guard.reset_requested() {
                warn!("soft reset requested, rebooting firmware");
                let mut fresh = Mission::new(
                    bus.board_with_clock(Arc::new(MonotonicClock::new())),
                    cfg.clone(),
                );
                fresh.init();
                *mission_guard = fresh;
            }
        }

        for line in bus.drain_transmitted() {
            info!("📡 downlink: {}", line);
            // Only errors if no client is connected, which is fine.
            let _ = downlink_tx.send(line);
        }
    }
}

async fn run_tcp_server(
    bus: Arc<SimBus>,
    downlink_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", TCP_PORT)).await?;
    info!("ground link listening on port {}", TCP_PORT);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("ground station connected: {}", addr);
                let client_bus = Arc::clone(&bus);
                let client_rx = downlink_tx.subscribe();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_bus, client_rx).await {
                        warn!("client {} error: {}", addr, e);
                    }
                    info!("ground station disconnected: {}", addr);
                });
            }
            Err(e) => error!("accept failed: {}", e),
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    bus: Arc<SimBus>,
    mut downlink_rx: broadcast::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            uplink = lines.next_line() => {
                match uplink? {
                    Some(line) => {
                        let frame = line.trim();
                        if frame.is_empty() {
                            continue;
                        }
                        info!("📨 uplink: {}", frame);
                        bus.inject_uplink(frame);
                    }
                    None => break,
                }
            }
            downlink = downlink_rx.recv() => {
                match downlink {
                    Ok(line) => {
                        writer.write_all(line.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("client lagging, {} downlink lines dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}
