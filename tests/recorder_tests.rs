use std::sync::Arc;

use lorasat::hal::sim::SimBus;
use lorasat::hal::{FileStore, Imu};
use lorasat::recorder::{AccelRecorder, RECORDING_SIZE, TOTAL_SAMPLES};
use lorasat::watchdog::WatchdogGate;

struct Rig {
    bus: SimBus,
    fs: Box<dyn FileStore>,
    imu: Box<dyn Imu>,
    wdt: WatchdogGate,
    recorder: AccelRecorder,
}

fn rig() -> Rig {
    let bus = SimBus::new();
    let board = bus.board();
    let wdt = WatchdogGate::new(board.wdt, Arc::clone(&board.clock));
    Rig {
        bus,
        fs: board.fs,
        imu: board.imu,
        wdt,
        recorder: AccelRecorder::new(),
    }
}

#[test]
fn test_full_recording_at_coarse_tick_grain() {
    let mut rig = rig();
    rig.bus.set_accel([1.0, 0.0, 0.0]);

    let reply = rig
        .recorder
        .start(0, rig.fs.as_mut(), true, true, &mut rig.wdt)
        .unwrap();
    assert_eq!(reply, "OK:ACCEL_RECORDING:60s");

    // Drive the loop at 5 ms granularity for one minute.
    let mut messages = Vec::new();
    for now in (0..=60_000u64).step_by(5) {
        if let Some(msg) = rig
            .recorder
            .tick(now, rig.fs.as_mut(), rig.imu.as_mut(), &mut rig.wdt)
        {
            messages.push(msg);
        }
    }

    let completion = messages
        .iter()
        .find(|m| m.starts_with("OK:ACCEL_COMPLETE:"))
        .expect("recording never completed");
    assert_eq!(
        completion,
        &format!("OK:ACCEL_COMPLETE:/accel/rec_0.bin:{}B", RECORDING_SIZE)
    );
    assert!(messages.iter().any(|m| m.starts_with("ACCEL:PROGRESS:")));

    let file = rig.bus.file("/accel/rec_0.bin").expect("no recording file");
    assert_eq!(file.len(), RECORDING_SIZE);
    assert_eq!(file.len(), 21_616);

    // Header: magic, version, rate, count, reserved.
    assert_eq!(&file[0..7], b"ACCEL30");
    assert_eq!(file[7], 1);
    assert_eq!(u16::from_le_bytes([file[8], file[9]]), 30);
    assert_eq!(u16::from_le_bytes([file[10], file[11]]), TOTAL_SAMPLES);
    assert_eq!(&file[12..16], &[0, 0, 0, 0]);

    // Every sample is (1.0, 0.0, 0.0) little-endian.
    let one = 1.0f32.to_le_bytes();
    let zero = 0.0f32.to_le_bytes();
    for (i, sample) in file[16..].chunks(12).enumerate() {
        assert_eq!(&sample[0..4], &one, "sample {} x", i);
        assert_eq!(&sample[4..8], &zero, "sample {} y", i);
        assert_eq!(&sample[8..12], &zero, "sample {} z", i);
    }
    assert_eq!(file[16..].len(), TOTAL_SAMPLES as usize * 12);
}

#[test]
fn test_cancel_leaves_no_file() {
    let mut rig = rig();
    rig.recorder
        .start(0, rig.fs.as_mut(), true, true, &mut rig.wdt)
        .unwrap();
    for now in (0..2_000u64).step_by(5) {
        rig.recorder
            .tick(now, rig.fs.as_mut(), rig.imu.as_mut(), &mut rig.wdt);
    }
    assert!(rig.bus.file("/accel/rec_0.bin").is_some());

    let reply = rig.recorder.cancel(rig.fs.as_mut());
    assert_eq!(reply, Some("OK:ACCEL_CANCELLED".to_string()));
    assert!(rig.bus.file("/accel/rec_0.bin").is_none());
}

#[test]
fn test_start_while_recording_is_busy() {
    let mut rig = rig();
    rig.recorder
        .start(0, rig.fs.as_mut(), true, true, &mut rig.wdt)
        .unwrap();
    let err = rig
        .recorder
        .start(100, rig.fs.as_mut(), true, true, &mut rig.wdt)
        .unwrap_err();
    assert_eq!(err, "ERR:ACCEL_BUSY");
}

#[test]
fn test_preconditions_reported_as_fixed_tags() {
    let mut rig = rig();
    assert_eq!(
        rig.recorder
            .start(0, rig.fs.as_mut(), false, true, &mut rig.wdt)
            .unwrap_err(),
        "ERR:IMU_NOT_AVAILABLE"
    );
    assert_eq!(
        rig.recorder
            .start(0, rig.fs.as_mut(), true, false, &mut rig.wdt)
            .unwrap_err(),
        "ERR:SD_NOT_AVAILABLE"
    );

    rig.bus.set_sd_capacity(10_000);
    assert_eq!(
        rig.recorder
            .start(0, rig.fs.as_mut(), true, true, &mut rig.wdt)
            .unwrap_err(),
        "ERR:SD_FULL"
    );
}

#[test]
fn test_listing_frames_recordings() {
    let mut rig = rig();
    rig.fs.mkdir("/accel").unwrap();
    rig.fs.write("/accel/rec_1.bin", &[0u8; 64]).unwrap();
    rig.fs.write("/accel/rec_2.bin", &[0u8; 128]).unwrap();

    let replies = rig.recorder.list_recordings(rig.fs.as_mut());
    assert_eq!(replies.first().unwrap(), "ACCEL:RECORDINGS");
    assert_eq!(replies.last().unwrap(), "ACCEL:END:2");
    assert!(replies.contains(&"ACCEL:F:rec_1.bin,64".to_string()));
    assert!(replies.contains(&"ACCEL:F:rec_2.bin,128".to_string()));
}
