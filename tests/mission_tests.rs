use lorasat::beacon::{BeaconAction, BeaconScheduler};
use lorasat::codec::PermissiveAuthenticator;
use lorasat::config::{
    SatConfig, BEACON_INTERVAL_LOST_MS, BEACON_INTERVAL_NORMAL_MS, BEACON_LOST_THRESHOLD_MS,
    DEPLOY_WAIT_TIME_MS,
};
use lorasat::hal::sim::SimBus;
use lorasat::hal::Clock;
use lorasat::image::base64_encode;
use lorasat::mission::{Mission, MissionState};

const TEST_TAG: &str = "1234567890abcdef";

fn test_config() -> SatConfig {
    SatConfig {
        sat_id: "SAT001".to_string(),
        ..SatConfig::default()
    }
}

/// Fresh mission over a fresh bus, frames accepted by tag shape alone.
fn mission_on(bus: &SimBus) -> Mission {
    let mut mission = Mission::with_authenticator(
        bus.board(),
        test_config(),
        Box::new(PermissiveAuthenticator),
    );
    mission.init();
    mission
}

fn frame(verb: &str, path: &str, data: &str) -> String {
    format!("SAT001-{}&{}@{}#{}", verb, path, data, TEST_TAG)
}

/// Inject one frame and give the loop a tick to answer it.
fn send(bus: &SimBus, mission: &mut Mission, raw: &str) {
    bus.inject_uplink(raw);
    mission.tick();
}

/// Tick with the clock advancing `step_ms` per iteration until `until_ms`.
fn run_until(bus: &SimBus, mission: &mut Mission, until_ms: u64, step_ms: u64) {
    while bus.clock.now_ms() < until_ms {
        mission.tick();
        bus.advance(step_ms);
    }
}

#[test]
fn test_ping_happy_path() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);

    mission.tick(); // Boot -> WaitDeploy
    assert_eq!(mission.state(), MissionState::WaitDeploy);
    assert!(!mission.store().ground_contact());

    send(&bus, &mut mission, "SAT001-Ping&@#1234567890abcdef");

    let tx = bus.transmitted();
    assert!(
        tx.contains(&"PONG|T+00:00:00".to_string()),
        "downlink was: {:?}",
        tx
    );
    assert!(mission.store().ground_contact());
}

#[test]
fn test_first_contact_starts_auto_recording() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    send(&bus, &mut mission, &frame("Ping", "", ""));

    let tx = bus.transmitted();
    assert!(tx.contains(&"OK:ACCEL_RECORDING:60s".to_string()));
    assert!(mission.store().first_accel_done());

    // A later command must not re-trigger the one-shot.
    bus.drain_transmitted();
    send(&bus, &mut mission, &frame("GetState", "", ""));
    let tx = bus.transmitted();
    assert!(!tx.iter().any(|m| m.starts_with("OK:ACCEL_RECORDING")));
}

#[test]
fn test_path_traversal_blocked() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    send(
        &bus,
        &mut mission,
        "SAT001-ReadFile&../etc/passwd@#1234567890abcdef",
    );

    assert_eq!(
        bus.transmitted(),
        vec!["ERR:PATH_TRAVERSAL_BLOCKED".to_string()]
    );
    // Shape-level rejection never counts as contact.
    assert!(!mission.store().ground_contact());
}

#[test]
fn test_missing_delimiter_is_silent() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    send(&bus, &mut mission, "SAT001Ping&@#1234567890abcdef");

    assert!(bus.transmitted().is_empty());
    assert!(!mission.store().ground_contact());
}

#[test]
fn test_auth_failure_answered() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    send(&bus, &mut mission, "SAT001-Ping&@#short");

    assert_eq!(bus.transmitted(), vec!["ERR:AUTH_FAILED".to_string()]);
    assert!(!mission.store().ground_contact());
}

#[test]
fn test_unknown_verb_reported() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    send(&bus, &mut mission, &frame("FlyToMars", "", ""));

    let tx = bus.transmitted();
    assert!(tx.iter().any(|m| m == "ERR:UNKNOWN_CMD:FlyToMars"));
}

#[test]
fn test_get_state_reply_format() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    send(&bus, &mut mission, &frame("GetState", "", ""));

    let tx = bus.transmitted();
    assert!(
        tx.iter().any(|m| m == "STATE:1|BOOTS:1|ANT:PENDING"),
        "downlink was: {:?}",
        tx
    );
}

#[test]
fn test_deployment_completes_and_persists() {
    let bus = SimBus::new();
    bus.set_switch_released(true);
    let mut mission = mission_on(&bus);

    mission.tick();
    assert_eq!(mission.state(), MissionState::WaitDeploy);

    // Sit out the hold-off, then let the deployer find the open switch.
    bus.clock.set(DEPLOY_WAIT_TIME_MS);
    mission.tick();
    assert_eq!(mission.state(), MissionState::Deploying);
    bus.advance(100);
    mission.tick();
    assert_eq!(mission.state(), MissionState::Operational);
    assert!(mission.store().antenna_deployed());
    assert!(bus
        .transmitted()
        .iter()
        .any(|m| m.starts_with("OK:ANTENNA_DEPLOYED|T+")));

    // The next boot restores straight into operations.
    let mut rebooted = mission_on(&bus);
    assert_eq!(rebooted.state(), MissionState::Operational);
    assert_eq!(rebooted.store().boot_count(), 2);
}

#[test]
fn test_operational_entry_emits_beacon_then_telemetry() {
    let bus = SimBus::new();
    bus.set_switch_released(true);
    let mut mission = mission_on(&bus);

    mission.tick();
    bus.clock.set(DEPLOY_WAIT_TIME_MS);
    mission.tick();
    bus.advance(100);
    mission.tick(); // -> Operational
    bus.drain_transmitted();

    bus.advance(100);
    mission.tick(); // first operational tick sends the entry beacon
    let tx = bus.drain_transmitted();
    assert!(
        tx.iter().any(|m| m.starts_with("BEACON:SEARCHING|")),
        "downlink was: {:?}",
        tx
    );

    // One status interval later a telemetry line goes down.
    bus.advance(60_000);
    mission.tick();
    let tx = bus.drain_transmitted();
    let telemetry = tx
        .iter()
        .find(|m| m.contains("|BAT:") && m.contains("|SEU:"))
        .expect("no telemetry line");
    assert!(telemetry.starts_with("T+"));
    assert!(telemetry.contains("IMU:OK,SD:OK,RF:OK"));
}

#[test]
fn test_force_operational_command() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    send(&bus, &mut mission, &frame("ForceOperational", "", ""));

    assert!(bus
        .transmitted()
        .contains(&"OK:FORCED_OPERATIONAL".to_string()));
    assert_eq!(mission.state(), MissionState::Operational);
    assert!(mission.store().antenna_deployed());
}

#[test]
fn test_restart_command_requests_reset() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    send(&bus, &mut mission, &frame("MCURestart", "", ""));

    assert!(bus.transmitted().contains(&"OK:RESTARTING".to_string()));
    assert!(mission.reset_requested());
}

#[test]
fn test_beacons_every_minute_before_contact() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);

    run_until(&bus, &mut mission, 255_000, 1_000);

    let beacons: Vec<String> = bus
        .transmitted()
        .into_iter()
        .filter(|m| m.starts_with("BEACON:SEARCHING|"))
        .collect();
    assert_eq!(beacons.len(), 4, "beacons were: {:?}", beacons);
}

#[test]
fn test_beacon_cadence_follows_contact() {
    // Scheduler-level cadence property over a simulated clock.
    let mut sched = BeaconScheduler::new();

    let mut beacon_times = Vec::new();
    for t in (0..=185_000u64).step_by(1_000) {
        if sched.due(t, false) {
            sched.emit(t, false, t, 1, 4.0);
            beacon_times.push(t);
        }
    }
    assert_eq!(beacon_times, vec![60_000, 120_000, 180_000]);

    // A valid command at t=186s switches to the hourly cadence.
    sched.register_ground_contact(186_000, false);
    let mut next_beacon = None;
    let mut t = 186_000u64;
    while next_beacon.is_none() && t < 186_000 + 2 * BEACON_INTERVAL_NORMAL_MS {
        if sched.due(t, true) {
            sched.emit(t, true, t, 1, 4.0);
            next_beacon = Some(t);
        }
        t += 1_000;
    }
    let next_beacon = next_beacon.expect("no beacon after contact");
    assert!(next_beacon - 180_000 >= BEACON_INTERVAL_NORMAL_MS);

    // A silent day later the cadence tightens to five minutes.
    let lost_epoch = 186_000 + BEACON_LOST_THRESHOLD_MS + 1_000;
    let mut lost_beacons = Vec::new();
    let mut t = lost_epoch;
    while lost_beacons.len() < 3 {
        if sched.due(t, true) {
            sched.emit(t, true, t, 1, 4.0);
            lost_beacons.push(t);
        }
        t += 1_000;
    }
    assert_eq!(lost_beacons[1] - lost_beacons[0], BEACON_INTERVAL_LOST_MS);
    assert_eq!(lost_beacons[2] - lost_beacons[1], BEACON_INTERVAL_LOST_MS);
}

#[test]
fn test_low_battery_skips_beacon_slot() {
    let mut sched = BeaconScheduler::new();
    match sched.emit(60_000, false, 60_000, 1, 3.0) {
        BeaconAction::SkipLowBattery => {}
        BeaconAction::Send(msg) => panic!("sent on low battery: {}", msg),
    }
    assert_eq!(sched.skipped(), 1);
    // The slot was consumed: next beacon only after another full interval.
    assert!(!sched.due(61_000, false));
    assert!(sched.due(120_000, false));
}

#[test]
fn test_image_upload_over_the_link() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    let c0: Vec<u8> = (0u8..128).collect();
    let c1: Vec<u8> = (0..72).map(|i| (200 - i) as u8).collect();

    send(&bus, &mut mission, &frame("ImageStart", "/up.bin", "2:200"));
    send(&bus, &mut mission, &frame("ImageChunk", "0", &base64_encode(&c0)));
    send(&bus, &mut mission, &frame("ImageChunk", "1", &base64_encode(&c1)));
    send(&bus, &mut mission, &frame("ImageEnd", "", ""));

    let tx = bus.transmitted();
    assert!(tx.contains(&"OK:IMG_START:2".to_string()));
    assert!(tx.contains(&"OK:IMG_CHUNK:0/2".to_string()));
    assert!(tx.contains(&"OK:IMG_COMPLETE:/up.bin:200B".to_string()));

    let file = bus.file("/up.bin").unwrap();
    assert_eq!(&file[..128], &c0[..]);
    assert_eq!(&file[128..], &c1[..]);
}

#[test]
fn test_image_dispatcher_guards() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    send(&bus, &mut mission, &frame("ImageStart", "", "2:200"));
    send(&bus, &mut mission, &frame("ImageStart", "/x.bin", "nocolon"));
    send(&bus, &mut mission, &frame("ImageChunk", "0", ""));

    let tx = bus.transmitted();
    assert!(tx.iter().any(|m| m == "ERR:IMG_NO_FILENAME"));
    assert!(tx.iter().any(|m| m == "ERR:IMG_INVALID_PARAMS"));
    assert!(tx.iter().any(|m| m == "ERR:IMG_EMPTY_CHUNK"));
}

#[test]
fn test_file_commands_over_the_link() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    send(&bus, &mut mission, &frame("WriteFile", "/notes.txt", "hello"));
    send(&bus, &mut mission, &frame("ListDir", "/", ""));
    send(&bus, &mut mission, &frame("ReadFile", "/notes.txt", ""));
    send(&bus, &mut mission, &frame("DeleteFile", "/notes.txt", ""));

    let tx = bus.transmitted();
    assert!(tx.contains(&"OK:WRITTEN:5B".to_string()));
    assert!(tx.contains(&"DIR:/".to_string()));
    assert!(tx.contains(&"F:notes.txt,5".to_string()));
    assert!(tx.contains(&"END:DIR".to_string()));
    assert!(tx.contains(&"FILE:/notes.txt,5".to_string()));
    assert!(tx.contains(&"hello".to_string()));
    assert!(tx.contains(&"END:FILE".to_string()));
    assert!(tx.contains(&"OK:DELETED".to_string()));
}

#[test]
fn test_filesystem_commands_fail_fast_without_card() {
    let bus = SimBus::new();
    bus.set_sd_available(false);
    let mut mission = mission_on(&bus);
    mission.tick();

    send(&bus, &mut mission, &frame("ListDir", "/", ""));

    let tx = bus.transmitted();
    assert!(tx.iter().any(|m| m == "ERR:SD_NOT_AVAILABLE"));
}

#[test]
fn test_rad_status_reports_seu_and_scrub_age() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    mission
        .store_mut()
        .inject_mission_state_upset(1, MissionState::Error);
    bus.advance(12_000); // next tick crosses the scrub interval
    mission.tick();
    assert_eq!(mission.store().seu_total(), 1);

    send(&bus, &mut mission, &frame("GetRadStatus", "", ""));
    let tx = bus.transmitted();
    assert!(
        tx.iter().any(|m| m.starts_with("RAD:SEU_TOTAL:1|LAST_SCRUB:")),
        "downlink was: {:?}",
        tx
    );
}

#[test]
fn test_failed_radio_recovery_requests_reset() {
    let bus = SimBus::new();
    bus.set_switch_released(true);
    let mut mission = mission_on(&bus);

    mission.tick();
    bus.clock.set(DEPLOY_WAIT_TIME_MS);
    mission.tick();
    bus.advance(100);
    mission.tick();
    assert_eq!(mission.state(), MissionState::Operational);
    bus.advance(100);
    mission.tick(); // settle into operations
    bus.drain_transmitted();

    // Every configure from here on fails: the reply transmission marks the
    // link sick and the in-tick recovery cannot resurrect it.
    bus.fail_next_configs(1_000);
    bus.advance(100);
    send(&bus, &mut mission, &frame("Ping", "", ""));

    assert!(mission.reset_requested());
}

#[test]
fn test_soak_counters_track_commands() {
    let bus = SimBus::new();
    let mut mission = mission_on(&bus);
    mission.tick();

    send(&bus, &mut mission, &frame("Ping", "", ""));
    send(&bus, &mut mission, &frame("Nonsense", "", ""));

    assert_eq!(mission.soak().commands_ok(), 1);
}
