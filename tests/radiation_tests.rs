use lorasat::hal::sim::SimBus;
use lorasat::mission::MissionState;
use lorasat::radiation::{crc32, RadiationStore, TmrCell};

fn store_on(bus: &SimBus) -> RadiationStore {
    RadiationStore::new(bus.board().nv)
}

#[test]
fn test_crc32_reference_vectors() {
    assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    assert_eq!(crc32(b""), 0x0000_0000);
    assert_eq!(crc32(&[0x00]), 0xD202_EF8D);
    assert_eq!(crc32(b"hello"), 0x3610_A686);
}

#[test]
fn test_tmr_read_survives_single_corruption() {
    // Whichever copy is hit, voting returns the uncorrupted value.
    for copy in 0..3 {
        let mut cell = TmrCell::new(0xDEAD_BEEFu32);
        cell.inject_upset(copy, 0x0BAD_F00D);
        assert_eq!(cell.get(), 0xDEAD_BEEF);
        assert!(cell.scrub());
        assert_eq!(cell.get(), 0xDEAD_BEEF);
        assert!(!cell.is_catastrophic());
    }
}

#[test]
fn test_seu_on_mission_state_scrubs_clean() {
    // Preload {Operational, Operational, Boot}: read votes Operational,
    // scrub repairs the minority copy and counts one correction.
    let bus = SimBus::new();
    let mut store = store_on(&bus);
    store.init(0);
    store.set_mission_state(MissionState::Operational);
    store.inject_mission_state_upset(2, MissionState::Boot);

    assert_eq!(store.mission_state(), MissionState::Operational);

    let corrections = store.scrub_all(5_000);
    assert_eq!(corrections, 1);
    assert_eq!(store.seu_total(), 1);
    assert_eq!(store.mission_state(), MissionState::Operational);

    // A second pass finds nothing left to fix.
    assert_eq!(store.scrub_all(10_000), 0);
    assert_eq!(store.seu_total(), 1);
}

#[test]
fn test_catastrophic_divergence_forces_boot() {
    let bus = SimBus::new();
    let mut store = store_on(&bus);
    store.init(0);
    store.set_mission_state(MissionState::Operational);
    store.inject_mission_state_upset(1, MissionState::Deploying);
    store.inject_mission_state_upset(2, MissionState::Error);

    assert_eq!(store.mission_state(), MissionState::Boot);
    assert_eq!(store.catastrophic_events(), 1);
    // The cell is rewritten, so the next read is clean.
    assert_eq!(store.mission_state(), MissionState::Boot);
    assert_eq!(store.catastrophic_events(), 1);
}

#[test]
fn test_boot_counter_increments_across_restores() {
    let bus = SimBus::new();

    let mut first = store_on(&bus);
    assert!(!first.init(0));
    assert_eq!(first.boot_count(), 1);

    let mut second = store_on(&bus);
    assert!(second.init(0));
    assert_eq!(second.boot_count(), 2);

    let mut third = store_on(&bus);
    assert!(third.init(0));
    assert_eq!(third.boot_count(), 3);
}

#[test]
fn test_checkpoint_restores_deployed_mission() {
    let bus = SimBus::new();

    let mut store = store_on(&bus);
    store.init(7_000);
    store.set_antenna_deployed(true);
    store.set_mission_state(MissionState::Operational);
    store.save_checkpoint();

    let mut restored = store_on(&bus);
    assert!(restored.load_checkpoint());
    assert!(restored.antenna_deployed());
    assert_eq!(restored.mission_state(), MissionState::Operational);
    assert_eq!(restored.boot_count(), 1);
}

#[test]
fn test_checkpoint_without_deployment_restarts_sequence() {
    let bus = SimBus::new();

    let mut store = store_on(&bus);
    store.init(0);
    store.set_mission_state(MissionState::Deploying);
    store.save_checkpoint();

    let mut restored = store_on(&bus);
    assert!(restored.load_checkpoint());
    assert!(!restored.antenna_deployed());
    // Deployment never confirmed, so the sequence restarts from the top.
    assert_eq!(restored.mission_state(), MissionState::Boot);
}

#[test]
fn test_any_bit_flip_invalidates_checkpoint() {
    // Property: flipping any single bit in the magic/data/CRC region makes
    // the next load fail instead of restoring corrupted state.
    for addr in 0..104 {
        let bus = SimBus::new();
        let mut store = store_on(&bus);
        store.init(0);
        store.set_antenna_deployed(true);
        store.save_checkpoint();

        bus.flip_nv_bit(addr, addr as u8 % 8);

        let mut reloaded = store_on(&bus);
        assert!(
            !reloaded.load_checkpoint(),
            "flip at byte {} went undetected",
            addr
        );
    }
}

#[test]
fn test_first_accel_flag_survives_and_skips_crc() {
    let bus = SimBus::new();

    let mut store = store_on(&bus);
    store.init(0);
    assert!(!store.first_accel_done());
    store.mark_first_accel_done();
    assert!(store.first_accel_done());

    // The flag lives outside the CRC window: the checkpoint is still valid
    // and the flag is visible after a restore.
    let mut restored = store_on(&bus);
    assert!(restored.load_checkpoint());
    assert!(restored.first_accel_done());
}

#[test]
fn test_boot_count_tmr_scrub() {
    let bus = SimBus::new();
    let mut store = store_on(&bus);
    store.init(0);
    store.inject_boot_count_upset(0, 4_000_000);

    assert_eq!(store.boot_count(), 1);
    assert_eq!(store.scrub_all(0), 1);
    assert_eq!(store.boot_count(), 1);
}
