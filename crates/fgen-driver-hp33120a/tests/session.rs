//! Session discipline against the simulated 33120A.
//!
//! ## Test Coverage
//!
//! 1. **Cold connect**: remote mode, status clear and echoed error-queue replies
//! 2. **Disconnect**: every operation fails and records `last_error`, invalid input included
//! 3. **Reconnect**: a second `connect` opens a fresh session
//! 4. **Reentrancy**: nested transactions from several threads never deadlock
//! 5. **Number formatting**: every outgoing scalar uses a dot decimal

use fgen_driver_hp33120a::sim::SIM_IDN;
use fgen_driver_hp33120a::{
    ConnectionState, DriverOptions, Hp33120a, SimulatedInstrument, Waveform,
};
use fgen_visa::{Transport, VisaTransport};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

const RESOURCE: &str = "GPIB0::10::INSTR";

fn options() -> DriverOptions {
    DriverOptions {
        settle_after_connect: Duration::ZERO,
        ingest_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

fn driver_with_log() -> (SimulatedInstrument, Arc<Hp33120a>, Arc<Mutex<Vec<String>>>) {
    let sim = SimulatedInstrument::new();
    let driver = Arc::new(Hp33120a::new(Box::new(sim.clone()), options()));
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink_lines = lines.clone();
    driver.set_log_sink(Some(Arc::new(move |line: &str| {
        sink_lines.lock().push(line.to_string());
    })));
    (sim, driver, lines)
}

#[test]
#[traced_test]
fn cold_connect_and_identify() {
    let (sim, driver, lines) = driver_with_log();
    assert_eq!(driver.state(), ConnectionState::Loaded);

    driver.connect(RESOURCE).expect("connect should succeed");
    assert_eq!(driver.state(), ConnectionState::Connected);
    assert_eq!(driver.resource(), RESOURCE);

    let idn = driver.query("*IDN?").expect("query should succeed");
    assert!(!idn.is_empty());
    assert_eq!(idn, SIM_IDN);

    let lines = lines.lock().clone();
    assert!(lines.contains(&"SYST:REM -> +0,\"No error\"".to_string()));
    assert!(lines.contains(&"*CLS -> +0,\"No error\"".to_string()));
    assert_eq!(&sim.commands()[..2], ["SYST:REM", "*CLS"]);
    assert!(logs_contain("Connected"));
}

#[test]
fn missing_library_reports_not_loaded() {
    let driver = Hp33120a::new(Box::new(VisaTransport::unavailable()), options());
    assert_eq!(driver.state(), ConnectionState::Unloaded);
    assert!(driver.connect(RESOURCE).is_err());
    assert_eq!(driver.last_error(), "VISA library not loaded.");
    assert!(driver.query_idn().is_err());
}

#[test]
fn failed_open_sets_last_error() {
    let sim = SimulatedInstrument::new();
    sim.set_fail_open(true);
    let driver = Hp33120a::new(Box::new(sim.clone()), options());
    assert!(driver.connect(RESOURCE).is_err());
    assert!(driver.last_error().starts_with("Failed to open device"));
    assert!(!driver.is_connected());
}

#[test]
fn operations_after_disconnect_fail_with_last_error() {
    let (sim, driver, _lines) = driver_with_log();
    driver.connect(RESOURCE).expect("connect should succeed");
    driver.disconnect();
    assert_eq!(driver.state(), ConnectionState::Disconnected);
    assert!(!sim.is_open());
    sim.clear_wire();

    type Op = fn(&Hp33120a) -> bool;
    let ops: [(&str, Op); 10] = [
        ("write", |d| d.write("OUTP ON").is_err()),
        ("write_fast", |d| d.write_fast("FREQ 1.000000").is_err()),
        ("query", |d| d.query("*IDN?").is_err()),
        ("set_frequency", |d| d.set_frequency(440.0).is_err()),
        ("set_waveform", |d| d.set_waveform(Waveform::Square).is_err()),
        ("apply_waveform", |d| {
            d.apply_waveform(Waveform::Sine, 1.0, 1.0, 0.0).is_err()
        }),
        ("catalog", |d| d.waveform_catalog().is_err()),
        ("delete", |d| d.delete_arb("MYARB").is_err()),
        ("download", |d| d.download_arb("MYARB", &[0.5; 8], 8).is_err()),
        ("drain", |d| d.drain_errors(4).is_err()),
    ];

    for (name, op) in ops {
        assert!(op(&driver), "{} should fail after disconnect", name);
        assert!(!driver.last_error().is_empty(), "{} left last_error empty", name);
    }
    assert!(sim.wire().is_empty(), "nothing may reach the bus");
}

#[test]
fn invalid_input_after_disconnect_still_records_last_error() {
    let (sim, driver, _lines) = driver_with_log();

    type Op = fn(&Hp33120a) -> bool;
    let ops: [(&str, Op); 6] = [
        ("set_frequency", |d| d.set_frequency(f64::NAN).is_err()),
        ("set_amplitude", |d| d.set_amplitude(f64::INFINITY).is_err()),
        ("apply_waveform", |d| {
            d.apply_waveform(Waveform::Sine, f64::NAN, 1.0, 0.0).is_err()
        }),
        ("write", |d| d.write("FREQ 1\n*RST").is_err()),
        ("select_user_arb", |d| d.select_user_arb("9LIVES").is_err()),
        ("delete", |d| d.delete_arb("MY ARB").is_err()),
    ];

    for (name, op) in ops {
        // connect clears last_error
        driver.connect(RESOURCE).expect("connect should succeed");
        driver.disconnect();
        assert!(driver.last_error().is_empty());
        sim.clear_wire();

        assert!(op(&driver), "{} should fail after disconnect", name);
        assert_eq!(driver.last_error(), "Device not connected", "{}", name);
        assert!(sim.wire().is_empty(), "{} reached the bus", name);
    }
}

#[test]
fn invalid_input_while_connected_records_last_error() {
    let (sim, driver, _lines) = driver_with_log();
    driver.connect(RESOURCE).expect("connect should succeed");
    sim.clear_wire();

    assert!(driver.set_duty_cycle(f64::NAN).is_err());
    assert!(driver.last_error().contains("duty cycle must be finite"));
    assert!(driver.write_fast("").is_err());
    assert!(driver.last_error().contains("single non-empty line"));
    assert!(sim.wire().is_empty());
}

#[test]
fn reconnect_opens_a_fresh_session() {
    let (sim, driver, _lines) = driver_with_log();
    driver.connect(RESOURCE).expect("first connect");
    driver.disconnect();
    driver.disconnect();
    driver.connect(RESOURCE).expect("second connect");

    assert_eq!(driver.state(), ConnectionState::Connected);
    assert!(sim.is_open());
    assert_eq!(sim.count_of("SYST:REM"), 2);
    assert_eq!(sim.count_of("SYST:LOC"), 1);
    assert!(driver.last_error().is_empty());
}

#[test]
fn connect_twice_closes_the_previous_session() {
    let (sim, driver, _lines) = driver_with_log();
    driver.connect(RESOURCE).expect("first connect");
    driver.connect("GPIB0::12::INSTR").expect("second connect");
    assert_eq!(sim.count_of("SYST:LOC"), 1);
    assert_eq!(driver.resource(), "GPIB0::12::INSTR");
}

#[test]
fn nested_transactions_from_many_threads() {
    let (sim, driver, _lines) = driver_with_log();
    driver.connect(RESOURCE).expect("connect should succeed");
    sim.clear_wire();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let driver = driver.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    driver
                        .transaction(|d| {
                            d.set_frequency(100.0 * f64::from(i + 1))?;
                            d.transaction(|d| d.use_user_arb("EXP_RISE"))
                        })
                        .expect("nested transaction");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    // Each transaction is contiguous on the wire
    let commands = sim.commands();
    assert_eq!(commands.len(), 4 * 25 * 3);
    for chunk in commands.chunks(3) {
        assert!(chunk[0].starts_with("FREQ "));
        assert_eq!(chunk[1], "FUNCtion:USER EXP_RISE");
        assert_eq!(chunk[2], "FUNCtion:SHAPe USER");
    }
}

#[test]
#[traced_test]
fn device_error_is_logged_and_recorded() {
    let (sim, driver, lines) = driver_with_log();
    driver.connect(RESOURCE).expect("connect should succeed");
    sim.inject_error(-221, "Settings conflict");

    let err = driver.write("AM:SOUR BOTH").expect_err("device error expected");
    assert!(err.to_string().contains("Settings conflict"));
    assert_eq!(driver.last_error(), "-221,\"Settings conflict\"");
    assert!(lines
        .lock()
        .contains(&"[DEVICE ERROR] AM:SOUR BOTH -> -221,\"Settings conflict\"".to_string()));
    assert!(logs_contain("Device reported error"));
}

#[test]
fn silent_instrument_does_not_fail_checked_writes() {
    let (sim, driver, _lines) = driver_with_log();
    driver.connect(RESOURCE).expect("connect should succeed");
    sim.set_responsive(false);
    assert!(driver.write("OUTP ON").is_ok());
    assert_eq!(driver.query("*IDN?").expect("query"), "");
}

#[test]
fn phase_at_or_above_360_is_clamped() {
    let (sim, driver, _lines) = driver_with_log();
    driver.connect(RESOURCE).expect("connect should succeed");
    sim.clear_wire();
    driver.set_phase(360.0).expect("phase");
    driver.set_phase(725.5).expect("phase");
    driver.set_phase(-10.0).expect("phase");
    assert_eq!(sim.commands(), vec!["PHAS 359.999", "PHAS 359.999", "PHAS 0.000"]);
}

#[test]
fn scalar_lines_use_dot_decimals() {
    let (sim, driver, _lines) = driver_with_log();
    driver.connect(RESOURCE).expect("connect should succeed");
    sim.clear_wire();

    let values: [f64; 8] = [0.0, 1.5, -2.25, 1e-7, 12_345_678.9, 0.1 + 0.2, 15e6, -0.0];
    for v in values {
        driver.set_frequency(v.abs()).expect("frequency");
        driver.set_amplitude(v).expect("amplitude");
        driver.set_offset(v).expect("offset");
        driver.set_duty_cycle(v).expect("duty");
        driver.set_am_depth(v).expect("am depth");
        driver.set_fm_deviation(v).expect("fm deviation");
        driver.set_sweep_time(v).expect("sweep time");
        driver.set_phase(v).expect("phase");
    }
    driver.set_burst_internal_period(0.003).expect("burst period");

    let header = Regex::new(r"^[A-Za-z:*]+$").expect("regex");
    let number = Regex::new(r"^[-+]?\d+(\.\d+)?$").expect("regex");
    let lines = sim.commands();
    assert!(!lines.is_empty());
    for line in lines {
        assert!(line.is_ascii(), "{}", line);
        let (head, arg) = line.split_once(' ').expect("scalar line has an argument");
        assert!(header.is_match(head), "bad header in {:?}", line);
        assert!(number.is_match(arg), "bad number in {:?}", line);
    }
}
