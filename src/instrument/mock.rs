//! Mock Hardware Implementations
//!
//! Simulated laser, DAQ and actuator used by the tests and by the `laser_scan`
//! binary when no hardware is attached. All waiting is async-safe
//! (`tokio::time::sleep`, never `std::thread::sleep`).
//!
//! # Available Mocks
//!
//! - `MockLaser` - sweep that reports `Stop` after a fixed number of status polls
//!   per sweep; free-running when `wavelength_sweeps` is 0
//! - `MockDaq` - task bookkeeping, shutter line history, analog outputs and a
//!   Gaussian test signal on every monitored channel
//! - `MockActuator` - reports motion complete after a fixed number of polls
//!
//! Every mock can be told to fail a named operation, which the tests use to
//! exercise the error paths of the sequencer.

use crate::instrument::capabilities::{
    AcquisitionConditions, Actuator, AnalogRead, Daq, Driver, Laser, OutputConditions,
    ReadConditions, ReadPoints, SweepCondition, TaskHandle, ValueMap,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

/// Default number of samples per channel produced by one read.
const DEFAULT_SAMPLES_PER_READ: usize = 100;

fn check_failure(failing: &HashSet<String>, device: &str, operation: &str) -> Result<()> {
    if failing.contains(operation) {
        bail!("{}: simulated failure of {}", device, operation);
    }
    Ok(())
}

// =============================================================================
// MockLaser - Simulated Tunable Laser
// =============================================================================

#[derive(Debug)]
struct LaserState {
    params: ValueMap,
    condition: SweepCondition,
    polls_left: Option<u32>,
    sweeps_started: u32,
    pauses: u32,
    stops: u32,
    initialized: bool,
    failing: HashSet<String>,
}

/// Mock tunable laser.
///
/// A bounded sweep reports `Running` for `polls_per_sweep × wavelength_sweeps`
/// status queries and `Stop` afterwards.
///
/// # Example
///
/// ```rust,ignore
/// let laser = MockLaser::new().with_polls_per_sweep(2);
/// laser.execute_sweep().await?;
/// assert_eq!(laser.sweep_condition().await?, SweepCondition::Running);
/// ```
#[derive(Debug)]
pub struct MockLaser {
    polls_per_sweep: u32,
    sweep_budget: Option<u32>,
    state: Mutex<LaserState>,
}

impl MockLaser {
    /// Create a laser whose sweeps end after three status polls.
    pub fn new() -> Self {
        Self {
            polls_per_sweep: 3,
            sweep_budget: None,
            state: Mutex::new(LaserState {
                params: ValueMap::new(),
                condition: SweepCondition::Standby,
                polls_left: None,
                sweeps_started: 0,
                pauses: 0,
                stops: 0,
                initialized: false,
                failing: HashSet::new(),
            }),
        }
    }

    /// Number of `sweep_condition` queries answered with `Running` per sweep.
    pub fn with_polls_per_sweep(mut self, polls: u32) -> Self {
        self.polls_per_sweep = polls;
        self
    }

    /// `execute_sweep` fails once `sweeps` sweeps have been started.
    pub fn with_sweep_budget(mut self, sweeps: u32) -> Self {
        self.sweep_budget = Some(sweeps);
        self
    }

    /// Make `operation` fail (or succeed again).
    pub async fn set_failing(&self, operation: &str, failing: bool) {
        let mut state = self.state.lock().await;
        if failing {
            state.failing.insert(operation.to_string());
        } else {
            state.failing.remove(operation);
        }
    }

    /// Last applied parameters.
    pub async fn params(&self) -> ValueMap {
        self.state.lock().await.params.clone()
    }

    /// Number of `execute_sweep` calls.
    pub async fn sweeps_started(&self) -> u32 {
        self.state.lock().await.sweeps_started
    }

    /// Number of `pause_sweep` calls.
    pub async fn pauses(&self) -> u32 {
        self.state.lock().await.pauses
    }

    /// Number of `stop_sweep` calls.
    pub async fn stops(&self) -> u32 {
        self.state.lock().await.stops
    }

    /// True once `initialize` succeeded.
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    /// Current sweep state without consuming a poll.
    pub async fn current_condition(&self) -> SweepCondition {
        self.state.lock().await.condition
    }
}

impl Default for MockLaser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MockLaser {
    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockLaser", "initialize")?;
        state.initialized = true;
        Ok(())
    }

    async fn apply_values(&self, values: &ValueMap) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockLaser", "apply_values")?;
        for (key, value) in values {
            state.params.insert(key.clone(), value.clone());
        }
        debug!(params = ?state.params, "MockLaser: parameters applied");
        Ok(())
    }
}

#[async_trait]
impl Laser for MockLaser {
    async fn execute_sweep(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockLaser", "execute_sweep")?;
        if self.sweep_budget.is_some_and(|budget| state.sweeps_started >= budget) {
            bail!("MockLaser: sweep budget of {} exhausted", state.sweeps_started);
        }
        let sweeps = state
            .params
            .get("wavelength_sweeps")
            .map(|q| q.magnitude().max(0.0) as u32)
            .unwrap_or(1);
        state.polls_left = if sweeps == 0 {
            None
        } else {
            Some(self.polls_per_sweep.saturating_mul(sweeps))
        };
        state.condition = SweepCondition::Running;
        state.sweeps_started += 1;
        debug!(sweeps, "MockLaser: sweep started");
        Ok(())
    }

    async fn pause_sweep(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockLaser", "pause_sweep")?;
        if state.condition == SweepCondition::Running {
            state.condition = SweepCondition::Pause;
        }
        state.pauses += 1;
        Ok(())
    }

    async fn stop_sweep(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockLaser", "stop_sweep")?;
        state.condition = SweepCondition::Stop;
        state.polls_left = None;
        state.stops += 1;
        Ok(())
    }

    async fn sweep_condition(&self) -> Result<SweepCondition> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockLaser", "sweep_condition")?;
        if state.condition == SweepCondition::Running {
            match state.polls_left {
                Some(0) => state.condition = SweepCondition::Stop,
                Some(n) => state.polls_left = Some(n - 1),
                None => {}
            }
        }
        Ok(state.condition)
    }
}

// =============================================================================
// MockDaq - Simulated Data-Acquisition Card
// =============================================================================

#[derive(Debug, Clone)]
struct MockTask {
    conditions: AcquisitionConditions,
    running: bool,
    cleared: bool,
}

#[derive(Debug, Default)]
struct DaqState {
    next_task: u64,
    tasks: BTreeMap<TaskHandle, MockTask>,
    digital: Vec<(String, bool)>,
    rejected_digital: u32,
    outputs: Vec<OutputConditions>,
    triggers: u32,
    initialized: bool,
    failing: HashSet<String>,
}

/// Mock DAQ card.
///
/// Reads return a Gaussian pulse with a little noise on every channel, laid out
/// channel after channel in the flat buffer.
#[derive(Debug)]
pub struct MockDaq {
    samples_per_read: usize,
    flat_samples: Option<usize>,
    digital_budget: Option<usize>,
    state: Mutex<DaqState>,
}

impl MockDaq {
    /// Create a DAQ that returns 100 samples per channel on each read.
    pub fn new() -> Self {
        Self {
            samples_per_read: DEFAULT_SAMPLES_PER_READ,
            flat_samples: None,
            digital_budget: None,
            state: Mutex::new(DaqState::default()),
        }
    }

    /// Samples per channel returned by each read.
    pub fn with_samples_per_read(mut self, samples: usize) -> Self {
        self.samples_per_read = samples;
        self
    }

    /// Force every read to return exactly `count` flat samples, whatever the
    /// channel count. Used to simulate malformed hardware responses.
    pub fn with_flat_samples(mut self, count: usize) -> Self {
        self.flat_samples = Some(count);
        self
    }

    /// `digital_output` fails once `writes` digital writes have succeeded.
    pub fn with_digital_output_budget(mut self, writes: usize) -> Self {
        self.digital_budget = Some(writes);
        self
    }

    /// Make `operation` fail (or succeed again).
    pub async fn set_failing(&self, operation: &str, failing: bool) {
        let mut state = self.state.lock().await;
        if failing {
            state.failing.insert(operation.to_string());
        } else {
            state.failing.remove(operation);
        }
    }

    /// Number of `digital_output` calls that failed.
    pub async fn rejected_digital_writes(&self) -> u32 {
        self.state.lock().await.rejected_digital
    }

    /// Every digital write, in order.
    pub async fn digital_history(&self) -> Vec<(String, bool)> {
        self.state.lock().await.digital.clone()
    }

    /// Last level written to `port`, if any.
    pub async fn line_level(&self, port: &str) -> Option<bool> {
        self.state
            .lock()
            .await
            .digital
            .iter()
            .rev()
            .find(|(p, _)| p == port)
            .map(|(_, level)| *level)
    }

    /// Every analog output write, in order.
    pub async fn outputs(&self) -> Vec<OutputConditions> {
        self.state.lock().await.outputs.clone()
    }

    /// Tasks that were set up and not cleared yet.
    pub async fn live_tasks(&self) -> Vec<TaskHandle> {
        self.state
            .lock()
            .await
            .tasks
            .iter()
            .filter(|(_, task)| !task.cleared)
            .map(|(handle, _)| *handle)
            .collect()
    }

    /// Conditions a task was armed with.
    pub async fn task_conditions(&self, task: TaskHandle) -> Option<AcquisitionConditions> {
        self.state
            .lock()
            .await
            .tasks
            .get(&task)
            .map(|t| t.conditions.clone())
    }

    /// Number of `trigger_analog` calls.
    pub async fn trigger_count(&self) -> u32 {
        self.state.lock().await.triggers
    }

    /// True once `initialize` succeeded.
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    fn signal(points: usize) -> Vec<f64> {
        let mut rng = rand::thread_rng();
        (0..points)
            .map(|i| {
                let x = if points > 1 {
                    -10.0 + 20.0 * i as f64 / (points - 1) as f64
                } else {
                    0.0
                };
                (-x * x).exp() + rng.gen_range(-0.01..0.01)
            })
            .collect()
    }
}

impl Default for MockDaq {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MockDaq {
    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockDaq", "initialize")?;
        state.initialized = true;
        Ok(())
    }

    async fn apply_values(&self, _values: &ValueMap) -> Result<()> {
        let state = self.state.lock().await;
        check_failure(&state.failing, "MockDaq", "apply_values")
    }
}

#[async_trait]
impl Daq for MockDaq {
    async fn digital_output(&self, port: &str, level: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let exhausted = self
            .digital_budget
            .is_some_and(|budget| state.digital.len() >= budget);
        if exhausted || state.failing.contains("digital_output") {
            state.rejected_digital += 1;
            bail!("MockDaq: simulated failure of digital_output on {}", port);
        }
        state.digital.push((port.to_string(), level));
        Ok(())
    }

    async fn analog_input_setup(&self, conditions: &AcquisitionConditions) -> Result<TaskHandle> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockDaq", "analog_input_setup")?;
        state.next_task += 1;
        let handle = TaskHandle(state.next_task);
        state.tasks.insert(
            handle,
            MockTask {
                conditions: conditions.clone(),
                running: false,
                cleared: false,
            },
        );
        debug!(%handle, points = conditions.points, channels = conditions.channels.len(), "MockDaq: task armed");
        Ok(handle)
    }

    async fn analog_output_dc(&self, conditions: &OutputConditions) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockDaq", "analog_output_dc")?;
        state.outputs.push(conditions.clone());
        Ok(())
    }

    async fn trigger_analog(&self, task: TaskHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockDaq", "trigger_analog")?;
        let entry = state
            .tasks
            .get_mut(&task)
            .filter(|t| !t.cleared)
            .ok_or_else(|| anyhow!("MockDaq: unknown task {}", task))?;
        entry.running = true;
        state.triggers += 1;
        Ok(())
    }

    async fn read_analog(&self, task: TaskHandle, conditions: &ReadConditions) -> Result<AnalogRead> {
        let state = self.state.lock().await;
        check_failure(&state.failing, "MockDaq", "read_analog")?;
        let entry = state
            .tasks
            .get(&task)
            .filter(|t| !t.cleared)
            .ok_or_else(|| anyhow!("MockDaq: unknown task {}", task))?;
        let channels = entry.conditions.channels.len().max(1);

        if let Some(flat) = self.flat_samples {
            return Ok(AnalogRead {
                samples_per_channel: flat / channels,
                data: Self::signal(flat),
            });
        }

        let per_channel = match conditions.points {
            ReadPoints::All => self.samples_per_read,
            ReadPoints::PerChannel(n) => n.min(self.samples_per_read),
        };
        let data = (0..channels).flat_map(|_| Self::signal(per_channel)).collect();
        Ok(AnalogRead {
            samples_per_channel: per_channel,
            data,
        })
    }

    async fn is_task_complete(&self, task: TaskHandle) -> Result<bool> {
        let state = self.state.lock().await;
        check_failure(&state.failing, "MockDaq", "is_task_complete")?;
        Ok(state.tasks.get(&task).map_or(true, |t| !t.running))
    }

    async fn stop_task(&self, task: TaskHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockDaq", "stop_task")?;
        if let Some(entry) = state.tasks.get_mut(&task) {
            entry.running = false;
        }
        Ok(())
    }

    async fn clear_task(&self, task: TaskHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockDaq", "clear_task")?;
        if let Some(entry) = state.tasks.get_mut(&task) {
            entry.running = false;
            entry.cleared = true;
        }
        Ok(())
    }
}

// =============================================================================
// MockActuator - Simulated Positioner
// =============================================================================

#[derive(Debug, Default)]
struct ActuatorState {
    applied: Vec<ValueMap>,
    polls_left: u32,
    status_polls: u32,
    initialized: bool,
    failing: HashSet<String>,
}

/// Mock positioner, e.g. a rotation stage.
///
/// After each `apply_values` it reports `finished_moving == false` for
/// `polls_per_move` queries.
#[derive(Debug)]
pub struct MockActuator {
    polls_per_move: u32,
    state: Mutex<ActuatorState>,
}

impl MockActuator {
    /// Create an actuator that settles after one status poll.
    pub fn new() -> Self {
        Self {
            polls_per_move: 1,
            state: Mutex::new(ActuatorState::default()),
        }
    }

    /// Number of `finished_moving == false` answers after each move.
    pub fn with_polls_per_move(mut self, polls: u32) -> Self {
        self.polls_per_move = polls;
        self
    }

    /// Make `operation` fail (or succeed again).
    pub async fn set_failing(&self, operation: &str, failing: bool) {
        let mut state = self.state.lock().await;
        if failing {
            state.failing.insert(operation.to_string());
        } else {
            state.failing.remove(operation);
        }
    }

    /// Every applied value set, in order.
    pub async fn applied(&self) -> Vec<ValueMap> {
        self.state.lock().await.applied.clone()
    }

    /// Number of `finished_moving` queries answered.
    pub async fn status_polls(&self) -> u32 {
        self.state.lock().await.status_polls
    }

    /// True once `initialize` succeeded.
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }
}

impl Default for MockActuator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MockActuator {
    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockActuator", "initialize")?;
        state.initialized = true;
        Ok(())
    }

    async fn apply_values(&self, values: &ValueMap) -> Result<()> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockActuator", "apply_values")?;
        state.applied.push(values.clone());
        state.polls_left = self.polls_per_move;
        Ok(())
    }
}

#[async_trait]
impl Actuator for MockActuator {
    async fn finished_moving(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        check_failure(&state.failing, "MockActuator", "finished_moving")?;
        state.status_polls += 1;
        if state.polls_left == 0 {
            Ok(true)
        } else {
            state.polls_left -= 1;
            Ok(false)
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
