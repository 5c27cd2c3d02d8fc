//! End-to-end scans against the simulated bench.

mod common;

use common::*;
use laser_scan::error::ScanError;
use laser_scan::instrument::mock::{MockDaq, MockLaser};
use laser_scan::instrument::SweepCondition;
use laser_scan::scan::{
    Axis, AxisRange, MonitorController, MonitorState, ScanSequencer, SequencerState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

fn levels(history: &[(String, bool)]) -> Vec<bool> {
    history.iter().map(|(_, level)| *level).collect()
}

#[tokio::test]
async fn test_piezo_scan_runs_every_line() {
    let bench = bench();
    let sequencer =
        ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd1", "pd2", "pd3"])).unwrap();

    let geometry = sequencer.setup_scan().await.unwrap();
    assert_eq!(geometry.wavelength_points, 100);
    assert_eq!(geometry.visited_points, 6);

    let tasks = bench.daq.live_tasks().await;
    assert_eq!(tasks.len(), 1);
    let conditions = bench.daq.task_conditions(tasks[0]).await.unwrap();
    assert_eq!(conditions.points, 600);
    assert_eq!(conditions.channels.len(), 3);
    assert!(bench.aux_daq.live_tasks().await.is_empty());

    let outcome = sequencer.do_scan().await.unwrap();
    assert!(outcome.is_complete());
    assert!(outcome.error.is_none());
    assert_eq!(outcome.lines.len(), 6);
    for line in &outcome.lines {
        assert_eq!(line.samples.len(), 3);
        assert!(line.samples.values().all(|s| s.len() == 100));
    }
    assert_eq!(outcome.sample_count(), 6 * 3 * 100);

    let volts: Vec<f64> = bench.daq.outputs().await.iter().map(|o| o.volts).collect();
    assert_eq!(volts.len(), 6);
    for (v, expected) in volts.iter().zip([0.0, 2.0, 4.0, 6.0, 8.0, 10.0]) {
        assert!((v - expected).abs() < 1e-9, "{} != {}", v, expected);
    }

    let history = bench.daq.digital_history().await;
    assert!(history.iter().all(|(port, _)| port == SHUTTER_PORT));
    assert_eq!(levels(&history), [false, true, false].repeat(6));

    assert_eq!(bench.laser.sweeps_started().await, 6);
    assert_eq!(sequencer.state().await, SequencerState::Complete);
    assert!(bench.daq.live_tasks().await.is_empty());
    assert!(!bench.session.is_busy());
}

#[tokio::test]
async fn test_laser_receives_single_sweep_parameters() {
    let bench = bench();
    let sequencer = ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd1"])).unwrap();
    sequencer.setup_scan().await.unwrap();

    let params = bench.laser.params().await;
    assert_eq!(params["wavelength_sweeps"].magnitude(), 1.0);
    assert_eq!(params["start_wavelength"], q("1540 nm"));
    assert_eq!(params["stop_wavelength"], q("1541 nm"));

    sequencer.stop_scan().await.unwrap();
}

#[tokio::test]
async fn test_rotation_stage_axis_waits_for_motion() {
    let bench = bench();
    let spec = scan_spec(
        Axis::Device {
            device: "rotator".into(),
            output: "angle".into(),
        },
        AxisRange::Span {
            start: q("0 deg"),
            stop: q("90 deg"),
            step: q("45 deg"),
        },
        &["pd1"],
    );
    let sequencer = ScanSequencer::new(Arc::clone(&bench.session), spec).unwrap();
    sequencer.setup_scan().await.unwrap();
    let outcome = sequencer.do_scan().await.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.lines.len(), 3);

    let applied = bench.stage.applied().await;
    let angles: Vec<f64> = applied
        .iter()
        .map(|values| values["angle"].m_as("deg").unwrap())
        .collect();
    assert_eq!(angles.len(), 3);
    for (angle, expected) in angles.iter().zip([0.0, 45.0, 90.0]) {
        assert!((angle - expected).abs() < 1e-9);
    }
    // Two "still moving" answers and one "done" per position.
    assert_eq!(bench.stage.status_polls().await, 9);
    assert!(bench.daq.outputs().await.is_empty());
}

#[tokio::test]
async fn test_time_axis_repeats_line_scans() {
    let bench = bench();
    let spec = scan_spec(Axis::Time, AxisRange::Count { points: 4 }, &["pd1", "pd2"]);
    let sequencer = ScanSequencer::new(Arc::clone(&bench.session), spec).unwrap();
    sequencer.setup_scan().await.unwrap();
    let outcome = sequencer.do_scan().await.unwrap();

    assert!(outcome.is_complete());
    let indices: Vec<f64> = outcome.lines.iter().map(|l| l.axis_value.magnitude()).collect();
    assert_eq!(indices, vec![1.0, 2.0, 3.0, 4.0]);
    assert!(bench.daq.outputs().await.is_empty());
    assert!(bench.stage.applied().await.is_empty());
    assert_eq!(bench.laser.sweeps_started().await, 4);
}

#[tokio::test]
async fn test_sweep_failure_keeps_completed_lines() {
    let bench = bench_with(
        MockLaser::new().with_polls_per_sweep(2).with_sweep_budget(2),
        MockDaq::new(),
        fast_timing(),
    );
    let sequencer = ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd1"])).unwrap();
    sequencer.setup_scan().await.unwrap();
    let outcome = sequencer.do_scan().await.unwrap();

    assert_eq!(outcome.state, SequencerState::Failed);
    assert_eq!(outcome.lines.len(), 2);
    assert!(matches!(
        outcome.error,
        Some(ScanError::Driver {
            operation: "execute_sweep",
            ..
        })
    ));
    assert_eq!(bench.daq.line_level(SHUTTER_PORT).await, Some(false));
    assert!(bench.daq.live_tasks().await.is_empty());
    assert!(!bench.session.is_busy());
}

#[tokio::test]
async fn test_shutter_failure_fails_the_scan_and_keeps_lines() {
    // Three shutter writes per line: the open of the third line is refused.
    let bench = bench_with(
        MockLaser::new().with_polls_per_sweep(2),
        MockDaq::new().with_digital_output_budget(7),
        fast_timing(),
    );
    let sequencer = ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd1"])).unwrap();
    sequencer.setup_scan().await.unwrap();
    let outcome = sequencer.do_scan().await.unwrap();

    assert_eq!(outcome.state, SequencerState::Failed);
    assert_eq!(sequencer.state().await, SequencerState::Failed);
    assert_eq!(outcome.lines.len(), 2);
    assert_eq!(outcome.lines[1].index, 1);
    assert!(outcome.lines.iter().all(|l| l.samples["pd1"].len() == 100));
    assert!(matches!(
        outcome.error,
        Some(ScanError::Driver {
            operation: "digital_output",
            ..
        })
    ));
    // The open and the close after it were both refused.
    assert_eq!(bench.daq.rejected_digital_writes().await, 2);
    assert_eq!(bench.laser.sweeps_started().await, 2);
    assert_eq!(bench.daq.line_level(SHUTTER_PORT).await, Some(false));
    assert!(bench.daq.live_tasks().await.is_empty());
    assert!(!bench.session.is_busy());
}

#[tokio::test]
async fn test_malformed_read_fails_the_scan() {
    let bench = bench_with(
        MockLaser::new().with_polls_per_sweep(2),
        MockDaq::new().with_flat_samples(301),
        fast_timing(),
    );
    let sequencer =
        ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd1", "pd2", "pd3"])).unwrap();
    sequencer.setup_scan().await.unwrap();
    let outcome = sequencer.do_scan().await.unwrap();

    assert_eq!(outcome.state, SequencerState::Failed);
    assert!(outcome.lines.is_empty());
    match outcome.error {
        Some(ScanError::AcquisitionRead { daq, samples, channels }) => {
            assert_eq!(daq, "NI-DAQ");
            assert_eq!(samples, 301);
            assert_eq!(channels, 3);
        }
        other => panic!("unexpected outcome error: {:?}", other),
    }
}

#[tokio::test]
async fn test_stuck_sweep_times_out() {
    let timing = laser_scan::config::TimingConfig {
        min_sweep_timeout_ms: 30,
        ..fast_timing()
    };
    let bench = bench_with(
        MockLaser::new().with_polls_per_sweep(u32::MAX),
        MockDaq::new(),
        timing,
    );
    let spec = scan_spec(Axis::Time, AxisRange::Count { points: 2 }, &["pd1"]);
    let sequencer = ScanSequencer::new(Arc::clone(&bench.session), spec).unwrap();
    sequencer.setup_scan().await.unwrap();
    let outcome = sequencer.do_scan().await.unwrap();

    assert_eq!(outcome.state, SequencerState::Failed);
    assert!(outcome.lines.is_empty());
    assert!(matches!(outcome.error, Some(ScanError::HardwareTimeout { .. })));
    assert_eq!(bench.daq.line_level(SHUTTER_PORT).await, Some(false));
}

#[tokio::test]
async fn test_stop_from_another_task() {
    let timing = laser_scan::config::TimingConfig {
        min_sweep_timeout_ms: 10_000,
        ..fast_timing()
    };
    let bench = bench_with(
        MockLaser::new().with_polls_per_sweep(u32::MAX),
        MockDaq::new(),
        timing,
    );
    let sequencer = Arc::new(
        ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd1"])).unwrap(),
    );
    sequencer.setup_scan().await.unwrap();

    let runner = Arc::clone(&sequencer);
    let handle = tokio::spawn(async move { runner.do_scan().await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    sequencer.stop_scan().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome.state, SequencerState::Stopped);
    assert!(matches!(outcome.error, Some(ScanError::Cancelled)));
    assert_eq!(sequencer.state().await, SequencerState::Stopped);

    assert!(bench.laser.pauses().await >= 1);
    assert!(bench.laser.stops().await >= 1);
    assert_eq!(bench.daq.line_level(SHUTTER_PORT).await, Some(false));
    assert!(bench.daq.live_tasks().await.is_empty());
    assert!(!bench.session.is_busy());
}

#[tokio::test]
async fn test_stop_after_the_run_leaves_a_monitor_running() {
    let bench = bench();
    let sequencer = ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd1"])).unwrap();
    sequencer.setup_scan().await.unwrap();
    assert_eq!(sequencer.do_scan().await.unwrap().state, SequencerState::Complete);

    let monitor = MonitorController::new(Arc::clone(&bench.session), monitor_spec(&["pd1"])).unwrap();
    monitor.setup_continuous_scans().await.unwrap();
    monitor.start_continuous_scans().await.unwrap();
    let writes = bench.daq.digital_history().await.len();

    sequencer.stop_scan().await.unwrap();

    assert_eq!(sequencer.state().await, SequencerState::Complete);
    assert_eq!(monitor.state().await, MonitorState::Running);
    assert_eq!(bench.daq.live_tasks().await.len(), 1);
    assert_eq!(bench.laser.current_condition().await, SweepCondition::Running);
    assert_eq!(bench.daq.digital_history().await.len(), writes);
    assert!(bench.session.is_busy());
    let samples = monitor.read_continuous_scans().await.unwrap();
    assert_eq!(samples["pd1"].len(), 100);

    monitor.stop_continuous_scans().await.unwrap();
    assert!(!bench.session.is_busy());
}

#[tokio::test]
async fn test_idle_sequencer_stop_does_not_touch_the_owner() {
    let bench = bench();
    let owner = ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd1"])).unwrap();
    let bystander = ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd2"])).unwrap();
    owner.setup_scan().await.unwrap();

    bystander.stop_scan().await.unwrap();
    assert_eq!(bystander.state().await, SequencerState::Idle);
    assert_eq!(bench.daq.live_tasks().await.len(), 1);
    assert!(bench.session.is_busy());

    let outcome = owner.do_scan().await.unwrap();
    assert_eq!(outcome.state, SequencerState::Complete);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.lines.len(), 6);
}

#[tokio::test]
async fn test_second_scan_waits_for_the_session() {
    let bench = bench();
    let first = ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd1"])).unwrap();
    let second = ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd2"])).unwrap();

    first.setup_scan().await.unwrap();
    assert!(matches!(second.setup_scan().await, Err(ScanError::SessionBusy)));
    assert_eq!(second.state().await, SequencerState::Idle);

    first.do_scan().await.unwrap();
    second.setup_scan().await.unwrap();
    let outcome = second.do_scan().await.unwrap();
    assert!(outcome.is_complete());
    assert!(outcome.lines.iter().all(|l| l.samples.contains_key("pd2")));
}

#[tokio::test]
async fn test_monitor_lists_do_not_accumulate_across_scans() {
    let bench = bench();
    let first =
        ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd1", "pd2"])).unwrap();
    first.setup_scan().await.unwrap();
    first.do_scan().await.unwrap();

    let second = ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd3"])).unwrap();
    second.setup_scan().await.unwrap();
    {
        let router = bench.session.router().lock().await;
        let monitored: Vec<&str> = router
            .binding("NI-DAQ")
            .unwrap()
            .monitor()
            .iter()
            .map(|d| d.name())
            .collect();
        assert_eq!(monitored, vec!["pd3"]);
    }
    let outcome = second.do_scan().await.unwrap();
    assert!(outcome
        .lines
        .iter()
        .all(|l| l.samples.len() == 1 && l.samples.contains_key("pd3")));
}

#[tokio::test]
async fn test_detectors_on_two_daqs() {
    let bench = bench();
    let spec = scan_spec(Axis::Time, AxisRange::Count { points: 2 }, &["pd1", "pd4"]);
    let sequencer = ScanSequencer::new(Arc::clone(&bench.session), spec).unwrap();
    sequencer.setup_scan().await.unwrap();
    assert_eq!(bench.daq.live_tasks().await.len(), 1);
    assert_eq!(bench.aux_daq.live_tasks().await.len(), 1);

    let outcome = sequencer.do_scan().await.unwrap();
    assert!(outcome.is_complete());
    for line in &outcome.lines {
        assert_eq!(line.samples["pd1"].len(), 100);
        assert_eq!(line.samples["pd4"].len(), 100);
    }
    assert!(bench.aux_daq.live_tasks().await.is_empty());
}

#[tokio::test]
#[traced_test]
async fn test_rejected_laser_parameters_are_not_fatal() {
    let bench = bench();
    bench.laser.set_failing("apply_values", true).await;
    let spec = scan_spec(Axis::Time, AxisRange::Count { points: 1 }, &["pd1"]);
    let sequencer = ScanSequencer::new(Arc::clone(&bench.session), spec).unwrap();

    sequencer.setup_scan().await.unwrap();
    assert!(logs_contain("Problem changing values of the laser"));

    let outcome = sequencer.do_scan().await.unwrap();
    assert!(outcome.is_complete());
}

#[tokio::test]
async fn test_unknown_detector_is_rejected_up_front() {
    let bench = bench();
    let err = ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd9"])).unwrap_err();
    assert!(matches!(err, ScanError::UnknownDevice(name) if name == "pd9"));
}
