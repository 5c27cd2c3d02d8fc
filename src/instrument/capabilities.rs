//! Capability contracts between the scan core and instrument drivers.
//!
//! Every concrete driver implements [`Driver`] plus exactly one role trait:
//! [`Laser`], [`Daq`] or [`Actuator`]. The registry stores drivers as a
//! [`DriverHandle`] so the role is checked once, at registration, instead of on
//! every call.

use crate::instrument::device::Calibration;
use crate::quantity::Quantity;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Named parameter values applied to a driver in one call.
pub type ValueMap = BTreeMap<String, Quantity>;

/// Opaque handle to an armed acquisition task, issued by a DAQ driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskHandle(pub u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// State reported by a tunable laser about its wavelength sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepCondition {
    /// The sweep has ended; terminal.
    Stop,
    /// Idle, waiting for a start trigger.
    Standby,
    /// Sweeping.
    Running,
    /// Suspended mid-sweep.
    Pause,
}

/// Sampling mode of an analog input task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sampling {
    /// Samples keep flowing into the driver buffer until the task is stopped.
    Continuous,
    /// The task stops after the requested number of points.
    Finite,
}

/// One analog channel of an acquisition task.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    /// Name of the device wired to the channel.
    pub device: String,
    /// Physical port on the DAQ.
    pub port: String,
    /// Conversion between volts and device units, if any.
    pub calibration: Option<Calibration>,
}

/// Everything a DAQ needs to arm an analog input task.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConditions {
    /// Expected time between two trigger events.
    pub accuracy: Quantity,
    /// Number of points per channel the task should be sized for.
    pub points: u64,
    /// Channels, in the order samples are grouped in the read buffer.
    pub channels: Vec<ChannelSpec>,
    /// Trigger mode configured on the DAQ device.
    pub trigger: String,
    /// Trigger source line.
    pub trigger_source: String,
    /// Sampling mode.
    pub sampling: Sampling,
}

/// A single DC value written to an analog output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputConditions {
    /// Device that owns the channel.
    pub device: String,
    /// Physical port on the DAQ.
    pub port: String,
    /// Output level in volts, after calibration.
    pub volts: f64,
}

/// How many points to pull from a task buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPoints {
    /// Everything currently buffered.
    All,
    /// At most this many points per channel.
    PerChannel(usize),
}

/// Parameters of a read from an analog input task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadConditions {
    /// Points to read.
    pub points: ReadPoints,
}

/// Raw result of an analog read: channel-major flat buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogRead {
    /// Points per channel as reported by the driver.
    pub samples_per_channel: usize,
    /// Flat samples, one contiguous block per channel.
    pub data: Vec<f64>,
}

/// Base contract shared by every driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Loads the driver and opens communication with the instrument.
    async fn initialize(&self) -> Result<()>;

    /// Applies a set of named parameters.
    async fn apply_values(&self, values: &ValueMap) -> Result<()>;
}

/// Tunable laser with a triggered wavelength sweep.
#[async_trait]
pub trait Laser: Driver {
    /// Starts a bounded or free-running sweep with the applied parameters.
    async fn execute_sweep(&self) -> Result<()>;

    /// Suspends the sweep.
    async fn pause_sweep(&self) -> Result<()>;

    /// Terminates the sweep.
    async fn stop_sweep(&self) -> Result<()>;

    /// Current sweep state; [`SweepCondition::Stop`] is terminal.
    async fn sweep_condition(&self) -> Result<SweepCondition>;
}

/// Task-based data-acquisition card.
#[async_trait]
pub trait Daq: Driver {
    /// Sets a digital line high or low.
    async fn digital_output(&self, port: &str, level: bool) -> Result<()>;

    /// Arms an analog input task without starting it.
    async fn analog_input_setup(&self, conditions: &AcquisitionConditions) -> Result<TaskHandle>;

    /// Writes one DC value to an analog output.
    async fn analog_output_dc(&self, conditions: &OutputConditions) -> Result<()>;

    /// Starts a previously armed task.
    async fn trigger_analog(&self, task: TaskHandle) -> Result<()>;

    /// Reads buffered samples of a task.
    async fn read_analog(&self, task: TaskHandle, conditions: &ReadConditions) -> Result<AnalogRead>;

    /// True when the task is not acquiring.
    async fn is_task_complete(&self, task: TaskHandle) -> Result<bool>;

    /// Stops a running task.
    async fn stop_task(&self, task: TaskHandle) -> Result<()>;

    /// Releases the hardware resources of a task.
    async fn clear_task(&self, task: TaskHandle) -> Result<()>;
}

/// Device that moves to a set point (rotation stage, motorized mount).
#[async_trait]
pub trait Actuator: Driver {
    /// True once the last requested motion has completed.
    async fn finished_moving(&self) -> Result<bool>;
}

/// Role-tagged shared driver.
#[derive(Clone)]
pub enum DriverHandle {
    /// Tunable laser.
    Laser(Arc<dyn Laser>),
    /// Data-acquisition card.
    Daq(Arc<dyn Daq>),
    /// Positioning device.
    Actuator(Arc<dyn Actuator>),
}

impl DriverHandle {
    /// Name of the capability, for diagnostics.
    pub fn capability(&self) -> &'static str {
        match self {
            DriverHandle::Laser(_) => "Laser",
            DriverHandle::Daq(_) => "Daq",
            DriverHandle::Actuator(_) => "Actuator",
        }
    }

    /// See [`Driver::initialize`].
    pub async fn initialize(&self) -> Result<()> {
        match self {
            DriverHandle::Laser(d) => d.initialize().await,
            DriverHandle::Daq(d) => d.initialize().await,
            DriverHandle::Actuator(d) => d.initialize().await,
        }
    }

    /// See [`Driver::apply_values`].
    pub async fn apply_values(&self, values: &ValueMap) -> Result<()> {
        match self {
            DriverHandle::Laser(d) => d.apply_values(values).await,
            DriverHandle::Daq(d) => d.apply_values(values).await,
            DriverHandle::Actuator(d) => d.apply_values(values).await,
        }
    }

    /// The laser capability, if this is a laser.
    pub fn as_laser(&self) -> Option<&Arc<dyn Laser>> {
        match self {
            DriverHandle::Laser(d) => Some(d),
            _ => None,
        }
    }

    /// The DAQ capability, if this is a DAQ.
    pub fn as_daq(&self) -> Option<&Arc<dyn Daq>> {
        match self {
            DriverHandle::Daq(d) => Some(d),
            _ => None,
        }
    }

    /// The actuator capability, if this is an actuator.
    pub fn as_actuator(&self) -> Option<&Arc<dyn Actuator>> {
        match self {
            DriverHandle::Actuator(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DriverHandle::{}", self.capability())
    }
}
