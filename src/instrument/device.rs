//! Device descriptions: role, wiring and calibration.

use crate::error::{ScanError, ScanResult};
use crate::instrument::capabilities::{Actuator, Daq, DriverHandle, Laser, ValueMap};
use crate::quantity::Quantity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Role of a device in the experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    /// Tunable laser source.
    Laser,
    /// Data-acquisition card.
    Daq,
    /// Motorized rotation mount.
    RotationStage,
    /// Shutter driven by a DAQ digital line.
    ShutterChannel,
    /// Any other positioning or output device.
    Actuator,
    /// Analog detector read through a DAQ.
    Detector,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Laser => "laser",
            DeviceKind::Daq => "daq",
            DeviceKind::RotationStage => "rotation-stage",
            DeviceKind::ShutterChannel => "shutter-channel",
            DeviceKind::Actuator => "actuator",
            DeviceKind::Detector => "detector",
        };
        f.write_str(name)
    }
}

/// Which DAQ list a routed device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Analog or digital input.
    Input,
    /// Analog or digital output.
    Output,
    /// Input sampled during scans.
    Monitor,
}

/// How the computer talks to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    /// The device has its own driver and communication channel.
    Direct,
    /// All I/O goes through a channel of a DAQ.
    DaqRouted {
        /// Name of the DAQ device.
        daq: String,
        /// Physical port on that DAQ.
        port: String,
        /// List the device is grouped into.
        mode: ChannelMode,
    },
}

/// Linear conversion between device units and DAQ volts.
///
/// `value = slope * volts + offset`, with `slope` and `offset` in `units`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Device units per volt.
    pub slope: f64,
    /// Device-unit value at zero volts.
    pub offset: f64,
    /// Unit symbol the slope and offset are expressed in.
    pub units: String,
}

impl Calibration {
    /// Volts to write for a value in device units.
    pub fn to_volts(&self, value: &Quantity) -> ScanResult<f64> {
        if self.slope == 0.0 {
            return Err(ScanError::Configuration(format!(
                "calibration slope in '{}' is zero",
                self.units
            )));
        }
        let value = value.m_as(&self.units)?;
        Ok((value - self.offset) / self.slope)
    }
}

/// Trigger wiring of a DAQ card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaqTrigger {
    /// Trigger mode, e.g. `"external"`.
    pub trigger: String,
    /// Line the trigger arrives on, e.g. `"PFI0"`.
    pub trigger_source: String,
}

/// A named instrument handle.
#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    kind: DeviceKind,
    connection: Connection,
    calibration: Option<Calibration>,
    defaults: Option<ValueMap>,
    trigger: Option<DaqTrigger>,
    driver: Option<DriverHandle>,
}

impl Device {
    fn base(name: impl Into<String>, kind: DeviceKind, connection: Connection) -> Self {
        Self {
            name: name.into(),
            kind,
            connection,
            calibration: None,
            defaults: None,
            trigger: None,
            driver: None,
        }
    }

    /// A laser with its own driver.
    pub fn laser(name: impl Into<String>, driver: Arc<dyn Laser>) -> Self {
        let mut device = Self::base(name, DeviceKind::Laser, Connection::Direct);
        device.driver = Some(DriverHandle::Laser(driver));
        device
    }

    /// A DAQ card and its trigger wiring.
    pub fn daq(name: impl Into<String>, driver: Arc<dyn Daq>, trigger: DaqTrigger) -> Self {
        let mut device = Self::base(name, DeviceKind::Daq, Connection::Direct);
        device.driver = Some(DriverHandle::Daq(driver));
        device.trigger = Some(trigger);
        device
    }

    /// A directly connected actuator, e.g. a rotation stage.
    pub fn actuator(name: impl Into<String>, kind: DeviceKind, driver: Arc<dyn Actuator>) -> Self {
        let mut device = Self::base(name, kind, Connection::Direct);
        device.driver = Some(DriverHandle::Actuator(driver));
        device
    }

    /// A device wired to a DAQ channel; it has no driver of its own.
    pub fn daq_channel(
        name: impl Into<String>,
        kind: DeviceKind,
        daq: impl Into<String>,
        port: impl Into<String>,
        mode: ChannelMode,
    ) -> Self {
        Self::base(
            name,
            kind,
            Connection::DaqRouted {
                daq: daq.into(),
                port: port.into(),
                mode,
            },
        )
    }

    /// Attaches a volts/units calibration.
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// Attaches values applied by `initialize_all`.
    pub fn with_defaults(mut self, defaults: ValueMap) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Wiring.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Name of the DAQ the device is wired to, if any.
    pub fn routed_daq(&self) -> Option<&str> {
        match &self.connection {
            Connection::DaqRouted { daq, .. } => Some(daq),
            Connection::Direct => None,
        }
    }

    /// Calibration, if any.
    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    /// Default values, if any.
    pub fn defaults(&self) -> Option<&ValueMap> {
        self.defaults.as_ref()
    }

    /// Trigger wiring; only set on DAQ devices.
    pub fn trigger(&self) -> Option<&DaqTrigger> {
        self.trigger.as_ref()
    }

    /// Driver, absent for DAQ-routed devices.
    pub fn driver(&self) -> Option<&DriverHandle> {
        self.driver.as_ref()
    }

    /// Checks that role, wiring and driver agree.
    pub(crate) fn validate(&self) -> ScanResult<()> {
        if self.name.trim().is_empty() {
            return Err(ScanError::Configuration(
                "device name cannot be empty".to_string(),
            ));
        }
        let expected = match (&self.connection, self.kind) {
            (Connection::DaqRouted { .. }, DeviceKind::Laser | DeviceKind::Daq) => {
                return Err(ScanError::Configuration(format!(
                    "{} '{}' cannot be routed through a DAQ",
                    self.kind, self.name
                )));
            }
            (Connection::DaqRouted { .. }, _) => None,
            (Connection::Direct, DeviceKind::Laser) => Some("Laser"),
            (Connection::Direct, DeviceKind::Daq) => Some("Daq"),
            (Connection::Direct, DeviceKind::RotationStage | DeviceKind::Actuator) => {
                Some("Actuator")
            }
            (Connection::Direct, DeviceKind::ShutterChannel | DeviceKind::Detector) => {
                return Err(ScanError::Configuration(format!(
                    "{} '{}' must be wired to a DAQ",
                    self.kind, self.name
                )));
            }
        };
        let actual = self.driver.as_ref().map(DriverHandle::capability);
        if actual != expected {
            return Err(ScanError::Configuration(format!(
                "{} '{}' expects driver {:?}, found {:?}",
                self.kind, self.name, expected, actual
            )));
        }
        if self.kind == DeviceKind::Daq && self.trigger.is_none() {
            return Err(ScanError::Configuration(format!(
                "DAQ '{}' has no trigger settings",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}
