//! End-to-end ARB uploads through [`ArbManager`] against the simulated 33120A.
//!
//! ## Test Coverage
//!
//! 1. **Empty memory**: exact wire trace of a clean upload
//! 2. **Full memory, target absent**: pre-emptive eviction of the first user ARB
//! 3. **Volatile fallback**: two `+781` copies end on VOLATILE with a notice
//! 4. **Disconnect mid-upload**: transport error, slot released, session closed
//! 5. **Back-to-back uploads**: the second overwrites, nothing left uploading
//! 6. **Edits mid-upload**: a point-count change uploads again, a rename leaves the slot Loaded
//! 7. **Error queue ownership**: stale errors are not blamed on the block, and a
//!    concurrent drain cannot take the copy's `+781`

use fgen_core::config::ArbConfig;
use fgen_core::Immediate;
use fgen_driver_hp33120a::arb::VOLATILE_NOTICE;
use fgen_driver_hp33120a::{
    ArbManager, DriverOptions, Hp33120a, SimulatedInstrument, SlotState,
};
use fgen_visa::Transport;
use parking_lot::Mutex;
use std::f32::consts::TAU;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

const RESOURCE: &str = "GPIB0::10::INSTR";
const WAIT: Duration = Duration::from_secs(10);

struct Rig {
    sim: SimulatedInstrument,
    driver: Arc<Hp33120a>,
    arb: ArbManager,
    log: Arc<Mutex<Vec<String>>>,
}

fn rig(ingest_delay: Duration) -> Rig {
    let sim = SimulatedInstrument::new();
    let driver = Arc::new(Hp33120a::new(
        Box::new(sim.clone()),
        DriverOptions {
            settle_after_connect: Duration::ZERO,
            ingest_delay,
            ..Default::default()
        },
    ));
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    driver.set_log_sink(Some(Arc::new(move |line: &str| {
        sink.lock().push(line.to_string());
    })));
    driver.connect(RESOURCE).expect("connect should succeed");
    sim.clear_wire();

    let arb = ArbManager::new(driver.clone(), Arc::new(Immediate), &ArbConfig::default())
        .expect("ARB manager should start");
    Rig {
        sim,
        driver,
        arb,
        log,
    }
}

fn sine(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (TAU * i as f32 / len as f32).sin())
        .collect()
}

type Completion = (usize, bool, String);

fn upload_and_wait(arb: &ArbManager, slot: usize) -> Completion {
    let (tx, rx) = mpsc::channel();
    arb.upload_slot_async(slot, move |s, ok, msg| {
        let _ = tx.send((s, ok, msg));
    })
    .expect("upload should be accepted");
    rx.recv_timeout(WAIT).expect("completion callback should fire")
}

#[test]
fn upload_into_empty_memory() {
    let rig = rig(Duration::from_millis(1));
    assert_eq!(rig.driver.free_slots().expect("free query"), Some(4));
    assert!(rig.driver.nonvolatile_catalog().expect("catalog").is_empty());
    rig.sim.clear_wire();

    rig.arb.load_samples(0, sine(2048)).expect("load");
    rig.arb.set_point_count(0, 1024).expect("points");
    let (slot, ok, message) = upload_and_wait(&rig.arb, 0);

    assert_eq!(slot, 0);
    assert!(ok, "upload failed: {}", message);
    assert_eq!(message, "Uploaded 1024 points");

    let commands = rig.sim.commands();
    assert_eq!(commands.len(), 4, "{:?}", commands);
    assert!(commands[0].starts_with("DATA VOLATILE,"));
    assert_eq!(commands[0].split(',').count(), 1 + 1024);
    assert_eq!(
        &commands[1..],
        [
            "DATA:COPY MYARB,VOLATILE",
            "FUNCtion:USER MYARB",
            "FUNCtion:SHAPe USER"
        ]
    );

    assert!(rig
        .driver
        .nonvolatile_catalog()
        .expect("catalog")
        .contains(&"MYARB".to_string()));
    assert_eq!(rig.sim.shape(), "USER");
    assert_eq!(rig.sim.selected_arb(), "MYARB");
    assert_eq!(rig.arb.slot_state(0).expect("state"), SlotState::Uploaded);
}

#[test]
fn upload_into_full_memory_evicts_first_user_arb() {
    let rig = rig(Duration::from_millis(1));
    rig.sim.seed_builtins();
    rig.sim.seed_user_arbs(&["ARB_A", "ARB_B", "ARB_C", "ARB_D"]);
    rig.arb.set_slot_name(1, "NEWONE").expect("rename");
    rig.arb.load_samples(1, sine(512)).expect("load");
    rig.arb.set_point_count(1, 256).expect("points");

    let (_, ok, message) = upload_and_wait(&rig.arb, 1);
    assert!(ok, "upload failed: {}", message);

    let commands = rig.sim.commands();
    assert!(commands[0].starts_with("DATA VOLATILE,"));
    assert_eq!(
        &commands[1..],
        [
            "FUNCtion:SHAPe SIN",
            "DATA:DELete ARB_A",
            "DATA:COPY NEWONE,VOLATILE",
            "FUNCtion:USER NEWONE",
            "FUNCtion:SHAPe USER"
        ]
    );
    assert_eq!(
        rig.sim.nonvolatile_names(),
        vec!["ARB_B", "ARB_C", "ARB_D", "NEWONE"]
    );
    assert_eq!(rig.sim.selected_arb(), "NEWONE");
}

#[test]
fn repeated_memory_full_falls_back_to_volatile() {
    let rig = rig(Duration::from_millis(1));
    rig.sim.fail_copies(781, 2);
    rig.arb.load_samples(0, sine(1024)).expect("load");

    let (_, ok, message) = upload_and_wait(&rig.arb, 0);
    assert!(ok, "fallback still counts as success");
    assert!(message.contains("VOLATILE"), "{}", message);
    assert!(message.contains(VOLATILE_NOTICE));
    assert_eq!(rig.sim.selected_arb(), "VOLATILE");
    assert_eq!(rig.sim.shape(), "USER");
    assert_eq!(rig.sim.count_of("DATA:COPY MYARB,VOLATILE"), 2);

    let log = rig.log.lock().clone();
    assert!(log.iter().any(|l| l.contains("VOLATILE memory is lost on power cycle")));
    assert!(log.iter().any(|l| l.starts_with("[DEVICE ERROR] DATA:COPY MYARB")));
}

#[test]
fn disconnect_during_upload_fails_with_transport_error() {
    let rig = rig(Duration::from_millis(200));
    let gate = rig.sim.pause_on("DATA VOLATILE");
    rig.arb.load_samples(2, sine(16_000)).expect("load");
    rig.arb.set_point_count(2, 16_000).expect("points");

    let (tx, rx) = mpsc::channel();
    rig.arb
        .upload_slot_async(2, move |s, ok, msg| {
            let _ = tx.send((s, ok, msg));
        })
        .expect("upload should be accepted");
    assert!(gate.wait_reached(WAIT), "data block never reached the bus");
    assert!(rig.arb.is_uploading(2));

    let driver = rig.driver.clone();
    let disconnector = std::thread::spawn(move || driver.disconnect());
    std::thread::sleep(Duration::from_millis(20));
    gate.release();
    disconnector.join().expect("disconnect thread panicked");

    let (slot, ok, message) = rx.recv_timeout(WAIT).expect("completion callback should fire");
    assert_eq!(slot, 2);
    assert!(!ok);
    assert!(message.contains("session closed during ARB upload"), "{}", message);
    assert!(!rig.arb.is_uploading(2));
    assert_eq!(rig.arb.slot_state(2).expect("state"), SlotState::Loaded);
    assert!(!rig.sim.is_open());
    assert!(!rig.driver.is_connected());
}

#[test]
fn back_to_back_uploads_both_succeed() {
    let rig = rig(Duration::from_millis(1));
    rig.arb.load_samples(3, sine(300)).expect("load");
    rig.arb.set_point_count(3, 100).expect("points");

    let first = upload_and_wait(&rig.arb, 3);
    let second = upload_and_wait(&rig.arb, 3);
    assert!(first.1 && second.1, "{:?} / {:?}", first, second);
    assert!(!rig.arb.is_uploading(3));
    assert_eq!(rig.sim.nonvolatile_names(), vec!["CUSTOM"]);
    assert_eq!(rig.sim.count_of("DATA:COPY CUSTOM,VOLATILE"), 2);
}

#[test]
fn point_count_change_reuploads_from_source() {
    let rig = rig(Duration::from_millis(1));
    let (tx, rx) = mpsc::channel();
    rig.arb
        .set_completion_listener(Some(Arc::new(move |slot: usize, ok: bool, _msg: &str| {
            let _ = tx.send((slot, ok));
        })));
    rig.arb.load_samples(0, sine(4096)).expect("load");
    rig.arb.upload_slot(0).expect("sync upload");
    assert_eq!(rig.sim.volatile_points(), Some(1024));

    rig.arb.set_point_count(0, 2000).expect("points");
    assert_eq!(rx.recv_timeout(WAIT).expect("re-upload completion"), (0, true));
    assert_eq!(rig.sim.volatile_points(), Some(2000));
    assert_eq!(rig.arb.slot_info(0).expect("info").sample_count, 4096);
}

#[test]
fn sync_from_device_follows_the_catalog() {
    let rig = rig(Duration::from_millis(1));
    rig.arb.load_samples(0, sine(64)).expect("load");
    rig.arb.set_point_count(0, 64).expect("points");
    rig.arb.upload_slot(0).expect("upload");

    rig.driver.set_waveform(fgen_driver_hp33120a::Waveform::Sine).expect("shape");
    rig.arb.delete_from_device("MYARB").expect("delete");
    rig.arb.sync_from_device().expect("sync");
    assert_eq!(rig.arb.slot_state(0).expect("state"), SlotState::Loaded);
}

#[test]
fn point_count_change_mid_upload_uploads_again() {
    let rig = rig(Duration::from_millis(1));
    let (tx, rx) = mpsc::channel();
    rig.arb
        .set_completion_listener(Some(Arc::new(move |slot: usize, ok: bool, msg: &str| {
            let _ = tx.send((slot, ok, msg.to_string()));
        })));
    rig.arb.load_samples(0, sine(256)).expect("load");
    rig.arb.set_point_count(0, 64).expect("points");
    rig.arb.upload_slot(0).expect("sync upload");

    let gate = rig.sim.pause_on("DATA VOLATILE");
    rig.arb.set_point_count(0, 100).expect("points");
    assert!(gate.wait_reached(WAIT), "data block never reached the bus");
    assert_eq!(rig.arb.slot_state(0).expect("state"), SlotState::Uploading);
    rig.arb.set_point_count(0, 200).expect("points");
    gate.release();

    let first = rx.recv_timeout(WAIT).expect("re-upload completion");
    assert_eq!(first, (0, true, "Uploaded 100 points".to_string()));
    let second = rx.recv_timeout(WAIT).expect("follow-up completion");
    assert_eq!(second, (0, true, "Uploaded 200 points".to_string()));

    assert_eq!(rig.arb.slot_state(0).expect("state"), SlotState::Uploaded);
    assert_eq!(rig.arb.slot_info(0).expect("info").target_points, 200);
    assert_eq!(rig.sim.volatile_points(), Some(200));
}

#[test]
fn rename_mid_upload_leaves_slot_loaded() {
    let rig = rig(Duration::from_millis(1));
    rig.arb.load_samples(0, sine(256)).expect("load");
    rig.arb.set_point_count(0, 64).expect("points");

    let gate = rig.sim.pause_on("DATA VOLATILE");
    let (tx, rx) = mpsc::channel();
    rig.arb
        .upload_slot_async(0, move |s, ok, msg| {
            let _ = tx.send((s, ok, msg));
        })
        .expect("upload should be accepted");
    assert!(gate.wait_reached(WAIT), "data block never reached the bus");
    rig.arb.set_slot_name(0, "renamed").expect("rename");
    gate.release();

    let (_, ok, message) = rx.recv_timeout(WAIT).expect("completion callback should fire");
    assert!(ok, "upload failed: {}", message);
    assert_eq!(rig.sim.nonvolatile_names(), vec!["MYARB"]);
    assert_eq!(rig.arb.slot_state(0).expect("state"), SlotState::Loaded);

    let (_, ok, message) = upload_and_wait(&rig.arb, 0);
    assert!(ok, "upload failed: {}", message);
    assert_eq!(rig.sim.nonvolatile_names(), vec!["MYARB", "RENAMED"]);
    assert_eq!(rig.arb.slot_state(0).expect("state"), SlotState::Uploaded);
}

#[test]
fn stale_device_error_is_not_blamed_on_the_block() {
    let rig = rig(Duration::from_millis(1));
    rig.sim.inject_error(-113, "Undefined header");
    rig.arb.load_samples(1, sine(128)).expect("load");
    rig.arb.set_point_count(1, 128).expect("points");

    let (_, ok, message) = upload_and_wait(&rig.arb, 1);
    assert!(ok, "upload failed: {}", message);
    assert_eq!(message, "Uploaded 128 points");
    assert_eq!(rig.sim.pending_errors(), 0);
    assert!(rig
        .log
        .lock()
        .iter()
        .any(|l| l == "[DEVICE ERROR] before ARB transfer -> -113,\"Undefined header\""));
}

#[test]
fn concurrent_drain_cannot_take_the_copy_error() {
    let rig = rig(Duration::from_millis(1));
    rig.sim.fail_copies(781, 1);
    rig.arb.load_samples(0, sine(128)).expect("load");
    rig.arb.set_point_count(0, 128).expect("points");

    let gate = rig.sim.pause_on("DATA:COPY");
    let (tx, rx) = mpsc::channel();
    rig.arb
        .upload_slot_async(0, move |s, ok, msg| {
            let _ = tx.send((s, ok, msg));
        })
        .expect("upload should be accepted");
    assert!(gate.wait_reached(WAIT), "copy never reached the bus");

    let driver = rig.driver.clone();
    let drainer = std::thread::spawn(move || driver.drain_errors(8).expect("drain"));
    std::thread::sleep(Duration::from_millis(20));
    gate.release();
    let stolen = drainer.join().expect("drain thread panicked");

    let (_, ok, message) = rx.recv_timeout(WAIT).expect("completion callback should fire");
    assert!(ok, "upload failed: {}", message);
    assert_eq!(message, "Uploaded 128 points");
    assert!(stolen.iter().all(|e| e.code != 781), "{:?}", stolen);
    assert_eq!(rig.sim.count_of("DATA:COPY MYARB,VOLATILE"), 2);
    assert_eq!(rig.sim.selected_arb(), "MYARB");
}
