//! Shared simulated bench for the integration tests.
#![allow(dead_code)]

use laser_scan::config::TimingConfig;
use laser_scan::instrument::mock::{MockActuator, MockDaq, MockLaser};
use laser_scan::instrument::{ChannelMode, DaqTrigger, Device, DeviceKind, DeviceRegistry};
use laser_scan::quantity::Quantity;
use laser_scan::scan::{Axis, AxisRange, LaserSweep, MonitorSpec, ScanSpec, ShutterSpec};
use laser_scan::session::Session;
use std::sync::Arc;

pub const SHUTTER_PORT: &str = "port0/line1";

/// Handles to every mock on the bench, for assertions.
pub struct Bench {
    pub laser: Arc<MockLaser>,
    pub daq: Arc<MockDaq>,
    pub aux_daq: Arc<MockDaq>,
    pub stage: Arc<MockActuator>,
    pub session: Arc<Session>,
}

pub fn q(text: &str) -> Quantity {
    Quantity::parse(text).unwrap()
}

/// Timings short enough for a test: the line scan of [`sweep`] lasts 10 ms.
pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        settle_delay_ms: 0,
        motion_poll_interval_ms: 1,
        motion_timeout_ms: 1_000,
        shutter_sync_delay_ms: 1,
        min_sweep_timeout_ms: 2_000,
        ..TimingConfig::default()
    }
}

/// Bench with default mocks and [`fast_timing`].
pub fn bench() -> Bench {
    bench_with(MockLaser::new().with_polls_per_sweep(2), MockDaq::new(), fast_timing())
}

/// Two DAQs (`NI-DAQ` with pd1..pd3, the shutter and the piezo; `AUX-DAQ` with
/// pd4), a laser and a rotation stage.
pub fn bench_with(laser: MockLaser, daq: MockDaq, timing: TimingConfig) -> Bench {
    let laser = Arc::new(laser);
    let daq = Arc::new(daq);
    let aux_daq = Arc::new(MockDaq::new());
    let stage = Arc::new(MockActuator::new().with_polls_per_move(2));
    let trigger = DaqTrigger {
        trigger: "external".into(),
        trigger_source: "PFI0".into(),
    };

    let mut registry = DeviceRegistry::new();
    registry
        .register(Device::laser("santec", laser.clone()))
        .unwrap();
    registry
        .register(Device::daq("NI-DAQ", daq.clone(), trigger.clone()))
        .unwrap();
    registry
        .register(Device::daq("AUX-DAQ", aux_daq.clone(), trigger))
        .unwrap();
    registry
        .register(Device::daq_channel(
            "shutter",
            DeviceKind::ShutterChannel,
            "NI-DAQ",
            SHUTTER_PORT,
            ChannelMode::Output,
        ))
        .unwrap();
    for (name, port) in [("pd1", "ai0"), ("pd2", "ai1"), ("pd3", "ai2")] {
        registry
            .register(Device::daq_channel(name, DeviceKind::Detector, "NI-DAQ", port, ChannelMode::Input))
            .unwrap();
    }
    registry
        .register(Device::daq_channel("pd4", DeviceKind::Detector, "AUX-DAQ", "ai0", ChannelMode::Input))
        .unwrap();
    registry
        .register(Device::daq_channel("piezo", DeviceKind::Actuator, "NI-DAQ", "ao0", ChannelMode::Output))
        .unwrap();
    registry
        .register(Device::actuator("rotator", DeviceKind::RotationStage, stage.clone()))
        .unwrap();

    let session = Session::new(registry, timing).unwrap();
    Bench {
        laser,
        daq,
        aux_daq,
        stage,
        session,
    }
}

/// 1540 to 1541 nm in 10 pm steps at 100 nm/s: 100 points, 10 ms per sweep.
pub fn sweep() -> LaserSweep {
    LaserSweep {
        start_wavelength: q("1540 nm"),
        stop_wavelength: q("1541 nm"),
        interval_trigger: q("10 pm"),
        wavelength_speed: q("100 nm/s"),
        wavelength_sweeps: None,
    }
}

pub fn scan_spec(axis: Axis, range: AxisRange, detectors: &[&str]) -> ScanSpec {
    ScanSpec {
        laser: "santec".into(),
        sweep: sweep(),
        axis,
        range,
        shutter: ShutterSpec {
            device: "shutter".into(),
            port: None,
            delay: Some(q("1 ms")),
        },
        detectors: detectors.iter().map(|d| d.to_string()).collect(),
    }
}

/// Piezo from 0 to 10 V in 2 V steps.
pub fn piezo_scan(detectors: &[&str]) -> ScanSpec {
    scan_spec(
        Axis::Device {
            device: "piezo".into(),
            output: "voltage".into(),
        },
        AxisRange::Span {
            start: q("0 V"),
            stop: q("10 V"),
            step: q("2 V"),
        },
        detectors,
    )
}

pub fn monitor_spec(detectors: &[&str]) -> MonitorSpec {
    MonitorSpec {
        laser: "santec".into(),
        sweep: sweep(),
        detectors: detectors.iter().map(|d| d.to_string()).collect(),
    }
}
