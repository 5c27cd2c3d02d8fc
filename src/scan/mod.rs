//! Scan geometry, the scan sequencer and the continuous monitor controller.

pub mod data;
pub mod geometry;
pub mod monitor;
pub mod sequencer;
pub mod setter;
pub mod spec;
pub mod state;

pub use data::{LineRecord, ScanOutcome};
pub use geometry::ScanGeometry;
pub use monitor::MonitorController;
pub use sequencer::ScanSequencer;
pub use setter::set_value;
pub use spec::{Axis, AxisRange, LaserSweep, MonitorSpec, ScanSpec, ShutterSpec};
pub use state::{MonitorState, SequencerState};
