//! Device registry: name → device bindings and role lookups.

use crate::error::{ScanError, ScanResult};
use crate::instrument::capabilities::{Actuator, Daq, Laser};
use crate::instrument::device::{ChannelMode, Connection, Device, DeviceKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`DeviceRegistry::initialize_all`].
#[derive(Debug, Default)]
pub struct InitReport {
    /// Devices whose driver loaded and whose defaults were applied.
    pub initialized: Vec<String>,
    /// Per-device failures; the other devices were still initialized.
    pub failures: Vec<ScanError>,
}

impl InitReport {
    /// True when every device initialized cleanly.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns every device of the experiment.
///
/// Devices are handed out as `Arc<Device>`; the registry is the only owner that
/// creates them and nothing else duplicates a driver.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Arc<Device>>,
}

impl DeviceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device. Fails if the name is taken or the device is inconsistent.
    pub fn register(&mut self, device: Device) -> ScanResult<Arc<Device>> {
        if self.devices.contains_key(device.name()) {
            return Err(ScanError::DuplicateName(device.name().to_string()));
        }
        device.validate()?;
        let device = Arc::new(device);
        info!(device = %device, "Added device to the experiment");
        self.devices
            .insert(device.name().to_string(), Arc::clone(&device));
        Ok(device)
    }

    /// Looks a device up by name.
    pub fn get(&self, name: &str) -> ScanResult<&Arc<Device>> {
        self.devices
            .get(name)
            .ok_or_else(|| ScanError::UnknownDevice(name.to_string()))
    }

    /// True if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// All devices in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    /// Devices of one role.
    pub fn of_kind(&self, kind: DeviceKind) -> impl Iterator<Item = &Arc<Device>> {
        self.iter().filter(move |d| d.kind() == kind)
    }

    /// DAQ cards.
    pub fn daqs(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.of_kind(DeviceKind::Daq)
    }

    /// Rotation stages.
    pub fn rotation_stages(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.of_kind(DeviceKind::RotationStage)
    }

    /// Devices that can be driven to a value: direct actuators and DAQ outputs.
    pub fn output_devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.iter().filter(|d| match d.connection() {
            Connection::DaqRouted { mode, .. } => *mode == ChannelMode::Output,
            Connection::Direct => matches!(
                d.kind(),
                DeviceKind::RotationStage | DeviceKind::Actuator
            ),
        })
    }

    /// Laser driver of `name`.
    pub fn laser(&self, name: &str) -> ScanResult<Arc<dyn Laser>> {
        self.get(name)?
            .driver()
            .and_then(|d| d.as_laser())
            .cloned()
            .ok_or_else(|| missing(name, "Laser"))
    }

    /// DAQ driver of `name`.
    pub fn daq_driver(&self, name: &str) -> ScanResult<Arc<dyn Daq>> {
        self.get(name)?
            .driver()
            .and_then(|d| d.as_daq())
            .cloned()
            .ok_or_else(|| missing(name, "Daq"))
    }

    /// Actuator driver of `name`.
    pub fn actuator(&self, name: &str) -> ScanResult<Arc<dyn Actuator>> {
        self.get(name)?
            .driver()
            .and_then(|d| d.as_actuator())
            .cloned()
            .ok_or_else(|| missing(name, "Actuator"))
    }

    /// Loads every driver and applies each device's defaults.
    ///
    /// Best effort: a device that fails is logged and reported, and the loop moves
    /// on to the next one.
    pub async fn initialize_all(&self) -> InitReport {
        let mut report = InitReport::default();
        for device in self.devices.values() {
            let Some(driver) = device.driver() else {
                debug!(device = device.name(), "DAQ-routed device, nothing to initialize");
                continue;
            };
            info!(device = device.name(), "Starting device");
            if let Err(source) = driver.initialize().await {
                warn!(device = device.name(), error = %source, "Error initializing device");
                report.failures.push(ScanError::DriverInit {
                    device: device.name().to_string(),
                    source,
                });
                continue;
            }
            if let Some(defaults) = device.defaults() {
                if let Err(source) = driver.apply_values(defaults).await {
                    warn!(device = device.name(), error = %source, "Could not apply default values");
                    report.failures.push(ScanError::ParameterApply {
                        device: device.name().to_string(),
                        source,
                    });
                    continue;
                }
            }
            report.initialized.push(device.name().to_string());
        }
        report
    }
}

fn missing(name: &str, capability: &'static str) -> ScanError {
    ScanError::MissingCapability {
        device: name.to_string(),
        capability,
    }
}
