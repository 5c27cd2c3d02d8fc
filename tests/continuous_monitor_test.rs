//! Continuous monitoring against the simulated bench.

mod common;

use common::*;
use laser_scan::error::ScanError;
use laser_scan::instrument::{Sampling, SweepCondition};
use laser_scan::scan::{MonitorController, MonitorState, ScanSequencer, SequencerState};
use std::sync::Arc;

#[tokio::test]
async fn test_monitor_lifecycle() {
    let bench = bench();
    let monitor =
        MonitorController::new(Arc::clone(&bench.session), monitor_spec(&["pd1", "pd2"])).unwrap();

    let geometry = monitor.setup_continuous_scans().await.unwrap();
    assert_eq!(geometry.wavelength_points, 100);
    assert_eq!(monitor.state().await, MonitorState::Armed);
    assert!(bench.session.is_busy());

    let params = bench.laser.params().await;
    assert_eq!(params["wavelength_sweeps"].magnitude(), 0.0);

    let tasks = bench.daq.live_tasks().await;
    assert_eq!(tasks.len(), 1);
    let conditions = bench.daq.task_conditions(tasks[0]).await.unwrap();
    assert_eq!(conditions.points, 100);
    assert_eq!(conditions.sampling, Sampling::Continuous);
    // 10 pm at 100 nm/s is 0.1 ms between triggers.
    assert!((conditions.accuracy.m_as("us").unwrap() - 85.0).abs() < 1e-6);

    monitor.start_continuous_scans().await.unwrap();
    assert_eq!(monitor.state().await, MonitorState::Running);
    assert_eq!(bench.daq.trigger_count().await, 1);
    assert_eq!(bench.laser.current_condition().await, SweepCondition::Running);

    for _ in 0..3 {
        let samples = monitor.read_continuous_scans().await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples["pd1"].len(), 100);
        assert_eq!(samples["pd2"].len(), 100);
    }

    monitor.pause_continuous_scans().await.unwrap();
    assert_eq!(monitor.state().await, MonitorState::Paused);
    assert_eq!(bench.laser.current_condition().await, SweepCondition::Pause);
    // Acquisition keeps running while the laser is paused.
    assert!(monitor.read_continuous_scans().await.is_ok());

    monitor.resume_continuous_scans().await.unwrap();
    assert_eq!(monitor.state().await, MonitorState::Running);
    assert_eq!(bench.laser.sweeps_started().await, 2);

    monitor.stop_continuous_scans().await.unwrap();
    assert_eq!(monitor.state().await, MonitorState::Stopped);
    assert_eq!(bench.laser.current_condition().await, SweepCondition::Stop);
    assert!(bench.daq.live_tasks().await.is_empty());
    assert!(!bench.session.is_busy());
}

#[tokio::test]
async fn test_monitor_never_touches_the_shutter() {
    let bench = bench();
    let monitor = MonitorController::new(Arc::clone(&bench.session), monitor_spec(&["pd1"])).unwrap();
    monitor.setup_continuous_scans().await.unwrap();
    monitor.start_continuous_scans().await.unwrap();
    monitor.read_continuous_scans().await.unwrap();
    monitor.stop_continuous_scans().await.unwrap();

    assert!(bench.daq.digital_history().await.is_empty());
}

#[tokio::test]
async fn test_stop_clears_armed_but_idle_tasks() {
    let bench = bench();
    let monitor = MonitorController::new(Arc::clone(&bench.session), monitor_spec(&["pd1"])).unwrap();
    monitor.setup_continuous_scans().await.unwrap();
    assert_eq!(bench.daq.live_tasks().await.len(), 1);
    assert_eq!(bench.daq.trigger_count().await, 0);

    monitor.stop_continuous_scans().await.unwrap();
    assert!(bench.daq.live_tasks().await.is_empty());
    assert_eq!(monitor.state().await, MonitorState::Stopped);
}

#[tokio::test]
async fn test_session_is_reusable_after_stop() {
    let bench = bench();
    let monitor = MonitorController::new(Arc::clone(&bench.session), monitor_spec(&["pd1"])).unwrap();
    monitor.setup_continuous_scans().await.unwrap();
    monitor.start_continuous_scans().await.unwrap();

    let sequencer = ScanSequencer::new(Arc::clone(&bench.session), piezo_scan(&["pd2"])).unwrap();
    assert!(matches!(sequencer.setup_scan().await, Err(ScanError::SessionBusy)));

    monitor.stop_continuous_scans().await.unwrap();

    sequencer.setup_scan().await.unwrap();
    let outcome = sequencer.do_scan().await.unwrap();
    assert_eq!(outcome.state, SequencerState::Complete);
    assert!(outcome.lines.iter().all(|l| !l.samples.contains_key("pd1")));

    // The same controller can be armed again once stopped.
    monitor.setup_continuous_scans().await.unwrap();
    assert_eq!(monitor.state().await, MonitorState::Armed);
    monitor.stop_continuous_scans().await.unwrap();
}

#[tokio::test]
async fn test_monitor_reads_from_two_daqs() {
    let bench = bench();
    let monitor =
        MonitorController::new(Arc::clone(&bench.session), monitor_spec(&["pd3", "pd4"])).unwrap();
    monitor.setup_continuous_scans().await.unwrap();
    monitor.start_continuous_scans().await.unwrap();
    assert_eq!(bench.daq.trigger_count().await, 1);
    assert_eq!(bench.aux_daq.trigger_count().await, 1);

    let samples = monitor.read_continuous_scans().await.unwrap();
    assert_eq!(samples.keys().map(String::as_str).collect::<Vec<_>>(), vec!["pd3", "pd4"]);

    monitor.stop_continuous_scans().await.unwrap();
    assert!(bench.daq.live_tasks().await.is_empty());
    assert!(bench.aux_daq.live_tasks().await.is_empty());
}

#[tokio::test]
async fn test_stop_reports_laser_failure_but_still_releases() {
    let bench = bench();
    let monitor = MonitorController::new(Arc::clone(&bench.session), monitor_spec(&["pd1"])).unwrap();
    monitor.setup_continuous_scans().await.unwrap();
    monitor.start_continuous_scans().await.unwrap();
    bench.laser.set_failing("pause_sweep", true).await;

    let err = monitor.stop_continuous_scans().await.unwrap_err();
    assert!(matches!(
        err,
        ScanError::Driver {
            operation: "pause_sweep",
            ..
        }
    ));
    assert_eq!(bench.laser.stops().await, 1);
    assert!(bench.daq.live_tasks().await.is_empty());
    assert!(!bench.session.is_busy());
}
