//! Command pipeline coalescing against the simulated 33120A.
//!
//! ## Test Coverage
//!
//! 1. **Coalesced sweep**: 10 000 posts between wake-ups become one `FREQ` line
//! 2. **Choices coalesce too**: enum and toggle posts share the last-value slots
//! 3. **Realtime producers**: concurrent posts never lose the final value
//! 4. **Automation throttle**: staged values still reach the device

use fgen_driver_hp33120a::{
    AutomationThrottle, CommandPipeline, DriverOptions, Hp33120a, Param, PipelineTiming,
    SimulatedInstrument, Waveform,
};
use std::sync::Arc;
use std::time::Duration;

fn timing() -> PipelineTiming {
    PipelineTiming {
        wake_interval: Duration::from_millis(10),
        error_drain_interval: Duration::from_secs(60),
        shutdown_timeout: Duration::from_secs(1),
    }
}

fn connected() -> (SimulatedInstrument, Arc<Hp33120a>) {
    let sim = SimulatedInstrument::new();
    let driver = Arc::new(Hp33120a::new(
        Box::new(sim.clone()),
        DriverOptions {
            settle_after_connect: Duration::ZERO,
            ..Default::default()
        },
    ));
    driver.connect("GPIB0::10::INSTR").expect("connect should succeed");
    sim.clear_wire();
    (sim, driver)
}

fn settle() {
    std::thread::sleep(Duration::from_millis(100));
}

#[test]
fn ten_thousand_posts_become_one_write() {
    let (sim, driver) = connected();
    let pipeline = CommandPipeline::new(driver, timing());

    for _ in 0..10_000 {
        pipeline.queue_frequency(1000.0);
    }
    pipeline.start().expect("pipeline should start");
    settle();
    pipeline.shutdown();

    assert_eq!(sim.commands(), vec!["FREQ 1000.000000"]);
}

#[test]
fn last_post_wins_per_kind() {
    let (sim, driver) = connected();
    let pipeline = CommandPipeline::new(driver.clone(), timing());
    for hz in [100.0, 200.0, 300.0] {
        pipeline.queue_frequency(hz);
    }
    pipeline.queue_duty_cycle(20.0);
    pipeline.queue_duty_cycle(25.0);
    pipeline.start().expect("pipeline should start");
    settle();
    pipeline.shutdown();

    assert_eq!(sim.count_of("FREQ 300.000000"), 1);
    assert_eq!(sim.count_of("FUNC:SQU:DCYC 25.000000"), 1);
    assert_eq!(sim.commands().len(), 2);
    assert_eq!(driver.shadow().frequency, 300.0);
}

#[test]
fn choice_parameters_coalesce_and_use_checked_writes() {
    let (sim, driver) = connected();
    let pipeline = CommandPipeline::new(driver, timing());
    pipeline.queue_waveform(Waveform::Square);
    pipeline.queue_waveform(Waveform::Triangle);
    pipeline.queue_output_enabled(false);
    pipeline.queue_output_enabled(true);
    pipeline.start().expect("pipeline should start");
    settle();
    pipeline.shutdown();

    assert_eq!(sim.commands(), vec!["FUNCtion:SHAPe TRI", "OUTP ON"]);
    // Checked writes read the error queue
    assert_eq!(sim.count_of("SYST:ERR?"), 2);
}

#[test]
fn concurrent_producers_end_on_a_posted_value() {
    let (sim, driver) = connected();
    let pipeline = Arc::new(CommandPipeline::new(driver, timing()));
    pipeline.start().expect("pipeline should start");

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let pipeline = pipeline.clone();
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    pipeline.queue_amplitude(f64::from(p * 10_000 + i) / 100_000.0);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer panicked");
    }
    pipeline.queue_amplitude(2.5);
    settle();
    pipeline.shutdown();

    let amplitudes: Vec<_> = sim
        .commands()
        .into_iter()
        .filter(|l| l.starts_with("VOLT "))
        .collect();
    assert_eq!(amplitudes.last().map(String::as_str), Some("VOLT 2.500000"));
    assert!(amplitudes.len() < 8_001);
}

#[test]
fn throttled_posts_are_applied_on_the_periodic_wake() {
    let (sim, driver) = connected();
    let pipeline = CommandPipeline::new(driver, timing());
    pipeline.start().expect("pipeline should start");
    let throttle = AutomationThrottle::new(Duration::from_secs(60));

    assert!(throttle.post(&pipeline, Param::Frequency(50.0)));
    settle();
    assert!(!throttle.post(&pipeline, Param::Frequency(75.0)));
    settle();
    pipeline.shutdown();

    assert_eq!(sim.commands(), vec!["FREQ 50.000000", "FREQ 75.000000"]);
}

#[test]
fn periodic_drain_surfaces_late_errors() {
    let (sim, driver) = connected();
    let lines = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = lines.clone();
    driver.set_log_sink(Some(Arc::new(move |line: &str| {
        sink.lock().push(line.to_string());
    })));
    let pipeline = CommandPipeline::new(
        driver.clone(),
        PipelineTiming {
            error_drain_interval: Duration::from_millis(20),
            ..timing()
        },
    );
    pipeline.start().expect("pipeline should start");
    pipeline.queue_frequency(1e12);
    sim.inject_error(-222, "Data out of range");
    settle();
    pipeline.shutdown();

    assert!(lines
        .lock()
        .contains(&"[DEVICE ERROR] -222,\"Data out of range\"".to_string()));
    assert_eq!(driver.last_error(), "-222,\"Data out of range\"");
}
