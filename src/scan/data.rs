//! Records produced by a scan run.

use crate::daq::Samples;
use crate::error::ScanError;
use crate::quantity::Quantity;
use crate::scan::geometry::ScanGeometry;
use crate::scan::state::SequencerState;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Samples acquired during one line scan.
#[derive(Debug, Clone, Serialize)]
pub struct LineRecord {
    /// Position of the line in the outer loop.
    pub index: usize,
    /// Outer-axis value the line was taken at.
    pub axis_value: Quantity,
    /// When the samples were read back.
    pub acquired_at: DateTime<Utc>,
    /// Samples per monitored device.
    pub samples: Samples,
}

/// Result of `do_scan`: the lines read so far, the final state and, on
/// failure, the error that ended the run.
#[derive(Debug, Serialize)]
pub struct ScanOutcome {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Geometry the run was configured with.
    pub geometry: ScanGeometry,
    /// Completed lines, in order.
    pub lines: Vec<LineRecord>,
    /// State the sequencer ended in.
    pub state: SequencerState,
    /// Why the run ended early, if it did.
    #[serde(serialize_with = "error_message")]
    pub error: Option<ScanError>,
}

impl ScanOutcome {
    /// True when every outer-axis value was scanned.
    pub fn is_complete(&self) -> bool {
        self.state == SequencerState::Complete
    }

    /// Total number of samples across lines and devices.
    pub fn sample_count(&self) -> usize {
        self.lines
            .iter()
            .flat_map(|line| line.samples.values())
            .map(Vec::len)
            .sum()
    }
}

fn error_message<S: Serializer>(error: &Option<ScanError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}
