//! Lifecycle states of the scan sequencer and the continuous monitor.

use serde::{Deserialize, Serialize};

/// Scan sequencer state.
///
/// # State Machine
///
/// ```text
/// Idle ──setup_scan──> Configuring ──do_scan──> Scanning{i} ──> Complete
///                          │                      │    │
///                          │                error │    │ stop_scan
///                          ▼                      ▼    ▼
///                        Failed <─────────────  Failed Stopped
/// ```
///
/// `Complete`, `Failed` and `Stopped` all allow a new `setup_scan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SequencerState {
    /// Nothing configured.
    Idle,
    /// Laser and DAQs armed, waiting for `do_scan`.
    Configuring,
    /// Running the outer loop.
    Scanning {
        /// Index of the current outer-axis value.
        outer_index: usize,
        /// True while a line scan (laser sweep) is in progress.
        sweeping: bool,
    },
    /// Every outer-axis value was scanned.
    Complete,
    /// A device failed; the shutter was closed.
    Failed,
    /// Stopped on request before completion.
    Stopped,
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequencerState::Idle => write!(f, "Idle"),
            SequencerState::Configuring => write!(f, "Configuring"),
            SequencerState::Scanning {
                outer_index,
                sweeping,
            } => {
                if *sweeping {
                    write!(f, "Scanning({}, sweeping)", outer_index)
                } else {
                    write!(f, "Scanning({})", outer_index)
                }
            }
            SequencerState::Complete => write!(f, "Complete"),
            SequencerState::Failed => write!(f, "Failed"),
            SequencerState::Stopped => write!(f, "Stopped"),
        }
    }
}

impl SequencerState {
    /// Check if the state allows configuring a new scan.
    pub fn can_setup(&self) -> bool {
        matches!(
            self,
            SequencerState::Idle
                | SequencerState::Complete
                | SequencerState::Failed
                | SequencerState::Stopped
        )
    }

    /// Check if the state allows running the configured scan.
    pub fn can_scan(&self) -> bool {
        matches!(self, SequencerState::Configuring)
    }

    /// True once the run has ended, successfully or not.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            SequencerState::Complete | SequencerState::Failed | SequencerState::Stopped
        )
    }
}

/// Continuous monitor state.
///
/// ```text
/// Idle ──setup──> Armed ──start──> Running ──pause──> Paused
///                   │                 │  ▲               │
///                   │                 │  └───resume──────┘
///                   └──────stop───────┴────────stop──────┴──> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// Nothing configured.
    Idle,
    /// Laser parameters applied and DAQs armed.
    Armed,
    /// Laser sweeping, DAQs acquiring.
    Running,
    /// Laser sweep paused; DAQ tasks untouched.
    Paused,
    /// Sweep stopped and tasks released.
    Stopped,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorState::Idle => write!(f, "Idle"),
            MonitorState::Armed => write!(f, "Armed"),
            MonitorState::Running => write!(f, "Running"),
            MonitorState::Paused => write!(f, "Paused"),
            MonitorState::Stopped => write!(f, "Stopped"),
        }
    }
}

impl MonitorState {
    /// Check if the state allows a new setup.
    pub fn can_setup(&self) -> bool {
        matches!(self, MonitorState::Idle | MonitorState::Stopped)
    }

    /// Check if the state allows starting.
    pub fn can_start(&self) -> bool {
        matches!(self, MonitorState::Armed)
    }

    /// Check if the state allows reading samples.
    pub fn can_read(&self) -> bool {
        matches!(self, MonitorState::Running | MonitorState::Paused)
    }

    /// Check if the state allows pausing.
    pub fn can_pause(&self) -> bool {
        matches!(self, MonitorState::Running)
    }

    /// Check if the state allows resuming.
    pub fn can_resume(&self) -> bool {
        matches!(self, MonitorState::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequencer_transitions() {
        assert!(SequencerState::Idle.can_setup());
        assert!(SequencerState::Failed.can_setup());
        assert!(!SequencerState::Configuring.can_setup());
        assert!(SequencerState::Configuring.can_scan());
        let scanning = SequencerState::Scanning {
            outer_index: 2,
            sweeping: true,
        };
        assert!(!scanning.can_setup());
        assert!(!scanning.is_finished());
        assert_eq!(scanning.to_string(), "Scanning(2, sweeping)");
    }

    #[test]
    fn test_monitor_transitions() {
        assert!(MonitorState::Armed.can_start());
        assert!(MonitorState::Running.can_pause());
        assert!(!MonitorState::Paused.can_pause());
        assert!(MonitorState::Paused.can_resume());
        assert!(MonitorState::Paused.can_read());
        assert!(MonitorState::Stopped.can_setup());
        assert!(!MonitorState::Running.can_setup());
    }
}
