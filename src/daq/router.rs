//! Groups DAQ-routed devices by the card they are wired to and owns the
//! acquisition task of each card.
//!
//! One [`DaqBinding`] exists per registered DAQ. Its `monitor` list is rebuilt
//! from the current scan's detectors before every scan, and its task slot holds
//! at most one live task.

use crate::error::{ScanError, ScanResult};
use crate::instrument::capabilities::{
    AcquisitionConditions, ChannelSpec, Daq, ReadConditions, ReadPoints, Sampling, TaskHandle,
};
use crate::instrument::device::{ChannelMode, Connection, DaqTrigger, Device};
use crate::instrument::registry::DeviceRegistry;
use crate::quantity::Quantity;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Samples per monitored device, keyed by device name.
pub type Samples = BTreeMap<String, Vec<f64>>;

/// Scan-wide part of the acquisition conditions; channels and trigger wiring
/// are filled in per DAQ.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionPlan {
    /// Expected time between trigger events.
    pub accuracy: Quantity,
    /// Points per channel.
    pub points: u64,
    /// Sampling mode.
    pub sampling: Sampling,
}

/// Channel lists and the active task of one DAQ card.
pub struct DaqBinding {
    name: String,
    driver: Arc<dyn Daq>,
    trigger: DaqTrigger,
    input: Vec<Arc<Device>>,
    output: Vec<Arc<Device>>,
    monitor: Vec<Arc<Device>>,
    monitor_task: Option<TaskHandle>,
}

impl DaqBinding {
    /// DAQ device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Devices wired as inputs.
    pub fn input(&self) -> &[Arc<Device>] {
        &self.input
    }

    /// Devices wired as outputs.
    pub fn output(&self) -> &[Arc<Device>] {
        &self.output
    }

    /// Devices sampled during the current scan.
    pub fn monitor(&self) -> &[Arc<Device>] {
        &self.monitor
    }

    /// The armed task, if any.
    pub fn monitor_task(&self) -> Option<TaskHandle> {
        self.monitor_task
    }

    fn conditions(&self, plan: &AcquisitionPlan) -> AcquisitionConditions {
        let channels = self
            .monitor
            .iter()
            .map(|device| ChannelSpec {
                device: device.name().to_string(),
                port: match device.connection() {
                    Connection::DaqRouted { port, .. } => port.clone(),
                    Connection::Direct => String::new(),
                },
                calibration: device.calibration().cloned(),
            })
            .collect();
        AcquisitionConditions {
            accuracy: plan.accuracy.clone(),
            points: plan.points,
            channels,
            trigger: self.trigger.trigger.clone(),
            trigger_source: self.trigger.trigger_source.clone(),
            sampling: plan.sampling,
        }
    }

    async fn release_task(&mut self) -> ScanResult<()> {
        let Some(task) = self.monitor_task else {
            return Ok(());
        };
        let complete = self
            .driver
            .is_task_complete(task)
            .await
            .map_err(|e| ScanError::driver(&self.name, "is_task_complete", e))?;
        if !complete {
            self.driver
                .stop_task(task)
                .await
                .map_err(|e| ScanError::driver(&self.name, "stop_task", e))?;
        }
        self.driver
            .clear_task(task)
            .await
            .map_err(|e| ScanError::driver(&self.name, "clear_task", e))?;
        self.monitor_task = None;
        debug!(daq = %self.name, %task, "Task released");
        Ok(())
    }
}

impl std::fmt::Debug for DaqBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |devices: &[Arc<Device>]| -> Vec<String> {
            devices.iter().map(|d| d.name().to_string()).collect()
        };
        f.debug_struct("DaqBinding")
            .field("name", &self.name)
            .field("input", &names(&self.input))
            .field("output", &names(&self.output))
            .field("monitor", &names(&self.monitor))
            .field("monitor_task", &self.monitor_task)
            .finish()
    }
}

/// All DAQ bindings of a session.
#[derive(Debug, Default)]
pub struct DaqRouter {
    bindings: BTreeMap<String, DaqBinding>,
}

impl DaqRouter {
    /// Creates one binding per registered DAQ and fills its channel lists.
    pub fn new(registry: &DeviceRegistry) -> ScanResult<Self> {
        let mut bindings = BTreeMap::new();
        for device in registry.daqs() {
            let driver = registry.daq_driver(device.name())?;
            let trigger = device.trigger().cloned().ok_or_else(|| {
                ScanError::Configuration(format!("DAQ '{}' has no trigger settings", device.name()))
            })?;
            bindings.insert(
                device.name().to_string(),
                DaqBinding {
                    name: device.name().to_string(),
                    driver,
                    trigger,
                    input: Vec::new(),
                    output: Vec::new(),
                    monitor: Vec::new(),
                    monitor_task: None,
                },
            );
        }
        let mut router = Self { bindings };
        router.rebuild_connections(registry)?;
        Ok(router)
    }

    /// Binding of `daq`.
    pub fn binding(&self, daq: &str) -> ScanResult<&DaqBinding> {
        self.bindings
            .get(daq)
            .ok_or_else(|| ScanError::UnknownDevice(daq.to_string()))
    }

    /// All bindings in name order.
    pub fn bindings(&self) -> impl Iterator<Item = &DaqBinding> {
        self.bindings.values()
    }

    /// Task slot of `daq`.
    pub fn task(&self, daq: &str) -> ScanResult<Option<TaskHandle>> {
        Ok(self.binding(daq)?.monitor_task)
    }

    /// DAQs that currently hold an armed task.
    pub fn armed_daqs(&self) -> Vec<String> {
        self.bindings
            .values()
            .filter(|b| b.monitor_task.is_some())
            .map(|b| b.name.clone())
            .collect()
    }

    /// Re-derives every binding's input/output/monitor lists from the devices'
    /// wiring.
    pub fn rebuild_connections(&mut self, registry: &DeviceRegistry) -> ScanResult<()> {
        for binding in self.bindings.values_mut() {
            binding.input.clear();
            binding.output.clear();
            binding.monitor.clear();
        }
        for device in registry.iter() {
            if let Connection::DaqRouted { daq, mode, .. } = device.connection() {
                let binding = self
                    .bindings
                    .get_mut(daq)
                    .ok_or_else(|| ScanError::UnknownDevice(daq.clone()))?;
                let list = match mode {
                    ChannelMode::Input => &mut binding.input,
                    ChannelMode::Output => &mut binding.output,
                    ChannelMode::Monitor => &mut binding.monitor,
                };
                list.push(Arc::clone(device));
                debug!(device = device.name(), daq = %daq, ?mode, "Appended device to DAQ");
            }
        }
        Ok(())
    }

    /// Replaces every monitor list with the given detectors, grouped by DAQ.
    ///
    /// All names are checked before anything is cleared, so a bad request leaves
    /// the previous lists untouched.
    pub fn set_monitor_targets(
        &mut self,
        registry: &DeviceRegistry,
        detectors: &[String],
    ) -> ScanResult<()> {
        let mut grouped: Vec<(String, Arc<Device>)> = Vec::with_capacity(detectors.len());
        for name in detectors {
            let device = registry.get(name)?;
            let daq = device.routed_daq().ok_or_else(|| {
                ScanError::Configuration(format!("detector '{}' is not wired to a DAQ", name))
            })?;
            if !self.bindings.contains_key(daq) {
                return Err(ScanError::UnknownDevice(daq.to_string()));
            }
            if grouped.iter().any(|(_, d)| d.name() == device.name()) {
                continue;
            }
            grouped.push((daq.to_string(), Arc::clone(device)));
        }

        for binding in self.bindings.values_mut() {
            binding.monitor.clear();
        }
        for (daq, device) in grouped {
            if let Some(binding) = self.bindings.get_mut(&daq) {
                binding.monitor.push(device);
            }
        }
        Ok(())
    }

    /// Arms `daq` for its monitor list, replacing any stale task.
    ///
    /// Returns `None` without touching the card when nothing is monitored on it.
    pub async fn configure_acquisition(
        &mut self,
        daq: &str,
        plan: &AcquisitionPlan,
    ) -> ScanResult<Option<TaskHandle>> {
        let binding = self
            .bindings
            .get_mut(daq)
            .ok_or_else(|| ScanError::UnknownDevice(daq.to_string()))?;
        if binding.monitor.is_empty() {
            return Ok(None);
        }
        binding.release_task().await?;

        let conditions = binding.conditions(plan);
        info!(
            daq,
            devices = ?conditions.channels.iter().map(|c| c.device.as_str()).collect::<Vec<_>>(),
            trigger_source = %conditions.trigger_source,
            points = conditions.points,
            "Arming DAQ"
        );
        let task = binding
            .driver
            .analog_input_setup(&conditions)
            .await
            .map_err(|e| ScanError::driver(daq, "analog_input_setup", e))?;
        binding.monitor_task = Some(task);
        debug!(daq, %task, "Task armed");
        Ok(Some(task))
    }

    /// Arms every DAQ with a non-empty monitor list. Returns the armed DAQ names.
    pub async fn configure_all(&mut self, plan: &AcquisitionPlan) -> ScanResult<Vec<String>> {
        let names: Vec<String> = self.bindings.keys().cloned().collect();
        let mut armed = Vec::new();
        for name in names {
            if self.configure_acquisition(&name, plan).await?.is_some() {
                armed.push(name);
            }
        }
        Ok(armed)
    }

    /// Starts every armed task that is currently idle. Returns how many were
    /// triggered.
    pub async fn trigger_idle(&self) -> ScanResult<usize> {
        let mut triggered = 0;
        for binding in self.bindings.values() {
            let Some(task) = binding.monitor_task else {
                continue;
            };
            if binding.monitor.is_empty() {
                continue;
            }
            let idle = binding
                .driver
                .is_task_complete(task)
                .await
                .map_err(|e| ScanError::driver(&binding.name, "is_task_complete", e))?;
            if idle {
                binding
                    .driver
                    .trigger_analog(task)
                    .await
                    .map_err(|e| ScanError::driver(&binding.name, "trigger_analog", e))?;
                triggered += 1;
            }
        }
        Ok(triggered)
    }

    /// Pulls every buffered sample of every monitoring DAQ.
    ///
    /// The flat buffer of a DAQ holds one contiguous block per monitored device,
    /// in monitor-list order. A buffer that does not split evenly fails with
    /// `AcquisitionRead`.
    pub async fn read_all(&self) -> ScanResult<Samples> {
        let conditions = ReadConditions {
            points: ReadPoints::All,
        };
        let mut samples = Samples::new();
        for binding in self.bindings.values() {
            if binding.monitor.is_empty() {
                continue;
            }
            let Some(task) = binding.monitor_task else {
                warn!(daq = %binding.name, "Monitored DAQ has no armed task, skipping read");
                continue;
            };
            let read = binding
                .driver
                .read_analog(task, &conditions)
                .await
                .map_err(|e| ScanError::driver(&binding.name, "read_analog", e))?;

            let channels = binding.monitor.len();
            if read.data.len() % channels != 0 {
                return Err(ScanError::AcquisitionRead {
                    daq: binding.name.clone(),
                    samples: read.data.len(),
                    channels,
                });
            }
            let per_channel = read.data.len() / channels;
            if read.samples_per_channel != per_channel {
                debug!(
                    daq = %binding.name,
                    reported = read.samples_per_channel,
                    actual = per_channel,
                    "Driver-reported sample count differs from buffer length"
                );
            }
            for (i, device) in binding.monitor.iter().enumerate() {
                let row = &read.data[i * per_channel..(i + 1) * per_channel];
                samples.insert(device.name().to_string(), row.to_vec());
            }
        }
        Ok(samples)
    }

    /// Stops any running task and clears every task slot.
    ///
    /// Keeps going after a failing DAQ and returns the first error.
    pub async fn release_tasks(&mut self) -> ScanResult<()> {
        let mut first_error = None;
        for binding in self.bindings.values_mut() {
            if let Err(err) = binding.release_task().await {
                warn!(daq = %binding.name, error = %err, "Could not release acquisition task");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
