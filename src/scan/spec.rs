//! Declarative scan and monitor descriptions.
//!
//! These types are deserialized from the `[scan]` and `[monitor]` tables of the
//! configuration file and stay immutable while a sequencer or monitor controller
//! runs them.

use crate::error::{ScanError, ScanResult};
use crate::instrument::capabilities::ValueMap;
use crate::quantity::Quantity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wavelength sweep parameters sent to the laser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserSweep {
    /// First wavelength of the sweep.
    pub start_wavelength: Quantity,
    /// Last wavelength of the sweep.
    pub stop_wavelength: Quantity,
    /// Wavelength step between two trigger pulses.
    pub interval_trigger: Quantity,
    /// Sweep speed, e.g. `"10 nm/s"`.
    pub wavelength_speed: Quantity,
    /// Number of sweeps per execution. `0` means free-running.
    #[serde(default)]
    pub wavelength_sweeps: Option<u32>,
}

impl LaserSweep {
    /// Parameters for a line scan: an absent or zero sweep count becomes 1.
    pub fn normalized(&self) -> LaserSweep {
        LaserSweep {
            wavelength_sweeps: Some(self.wavelength_sweeps.unwrap_or(0).max(1)),
            ..self.clone()
        }
    }

    /// Parameters for continuous monitoring: an absent sweep count becomes 0.
    pub fn free_running(&self) -> LaserSweep {
        LaserSweep {
            wavelength_sweeps: Some(self.wavelength_sweeps.unwrap_or(0)),
            ..self.clone()
        }
    }

    /// Sweep count, treating an absent value as 0.
    pub fn sweeps(&self) -> u32 {
        self.wavelength_sweeps.unwrap_or(0)
    }

    /// Named values as applied through [`Driver::apply_values`](crate::instrument::Driver::apply_values).
    pub fn to_values(&self) -> ValueMap {
        let mut values = ValueMap::new();
        values.insert("start_wavelength".into(), self.start_wavelength.clone());
        values.insert("stop_wavelength".into(), self.stop_wavelength.clone());
        values.insert("interval_trigger".into(), self.interval_trigger.clone());
        values.insert("wavelength_speed".into(), self.wavelength_speed.clone());
        if let Some(sweeps) = self.wavelength_sweeps {
            values.insert("wavelength_sweeps".into(), Quantity::count(f64::from(sweeps)));
        }
        values
    }
}

/// Outer scan dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Axis {
    /// Step an output of a device.
    Device {
        /// Device to step.
        device: String,
        /// Output of the device the value is written to.
        output: String,
    },
    /// Repeat the line scan a number of times.
    Time,
}

/// Range of the outer axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisRange {
    /// Inclusive `start..=stop` in steps of `step`.
    Span {
        /// First value.
        start: Quantity,
        /// Last value.
        stop: Quantity,
        /// Increment.
        step: Quantity,
    },
    /// Number of repetitions of a time axis.
    Count {
        /// Repetitions.
        points: u32,
    },
}

/// Shutter driven by a DAQ digital line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutterSpec {
    /// Either the DAQ itself or a shutter channel wired to it.
    pub device: String,
    /// Digital line; taken from the channel's wiring when omitted.
    #[serde(default)]
    pub port: Option<String>,
    /// Wait between closing and re-opening the shutter; none when omitted.
    #[serde(default)]
    pub delay: Option<Quantity>,
}

impl ShutterSpec {
    /// The shutter delay as a [`Duration`].
    pub fn delay(&self) -> ScanResult<Duration> {
        match &self.delay {
            Some(delay) => delay.as_duration().map_err(|_| {
                ScanError::Configuration(format!("shutter delay '{}' is not a duration", delay))
            }),
            None => Ok(Duration::ZERO),
        }
    }
}

/// A 1D or 2D scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSpec {
    /// Laser device name.
    pub laser: String,
    /// Sweep parameters.
    pub sweep: LaserSweep,
    /// Outer axis.
    pub axis: Axis,
    /// Outer axis range.
    pub range: AxisRange,
    /// Shutter.
    pub shutter: ShutterSpec,
    /// Devices sampled during the scan.
    pub detectors: Vec<String>,
}

impl ScanSpec {
    /// Structural checks that do not need the device registry.
    pub fn validate(&self) -> ScanResult<()> {
        if self.laser.trim().is_empty() {
            return Err(ScanError::Configuration("scan.laser cannot be empty".into()));
        }
        if self.shutter.device.trim().is_empty() {
            return Err(ScanError::Configuration(
                "scan.shutter.device cannot be empty".into(),
            ));
        }
        if self.detectors.is_empty() {
            return Err(ScanError::Configuration(
                "scan.detectors must name at least one device".into(),
            ));
        }
        match (&self.axis, &self.range) {
            (Axis::Device { device, output }, AxisRange::Span { .. }) => {
                if device.trim().is_empty() || output.trim().is_empty() {
                    return Err(ScanError::Configuration(
                        "scan.axis needs a device and an output".into(),
                    ));
                }
            }
            (Axis::Time, AxisRange::Count { .. }) => {}
            (Axis::Device { .. }, AxisRange::Count { .. }) => {
                return Err(ScanError::Configuration(
                    "a device axis needs a start/stop/step range".into(),
                ));
            }
            (Axis::Time, AxisRange::Span { .. }) => {
                return Err(ScanError::Configuration(
                    "a time axis needs a point count".into(),
                ));
            }
        }
        self.shutter.delay()?;
        Ok(())
    }
}

/// An open-ended monitor session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSpec {
    /// Laser device name.
    pub laser: String,
    /// Sweep parameters.
    pub sweep: LaserSweep,
    /// Devices sampled while the laser sweeps.
    pub detectors: Vec<String>,
}

impl MonitorSpec {
    /// Structural checks that do not need the device registry.
    pub fn validate(&self) -> ScanResult<()> {
        if self.laser.trim().is_empty() {
            return Err(ScanError::Configuration(
                "monitor.laser cannot be empty".into(),
            ));
        }
        if self.detectors.is_empty() {
            return Err(ScanError::Configuration(
                "monitor.detectors must name at least one device".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(sweeps: Option<u32>) -> LaserSweep {
        LaserSweep {
            start_wavelength: Quantity::parse("1540 nm").unwrap(),
            stop_wavelength: Quantity::parse("1560 nm").unwrap(),
            interval_trigger: Quantity::parse("10 pm").unwrap(),
            wavelength_speed: Quantity::parse("10 nm/s").unwrap(),
            wavelength_sweeps: sweeps,
        }
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for input in [None, Some(0)] {
            let once = sweep(input).normalized();
            assert_eq!(once.wavelength_sweeps, Some(1));
            assert_eq!(once.normalized(), once);
        }
        assert_eq!(sweep(Some(3)).normalized().wavelength_sweeps, Some(3));
    }

    #[test]
    fn test_free_running_keeps_explicit_count() {
        assert_eq!(sweep(None).free_running().wavelength_sweeps, Some(0));
        assert_eq!(sweep(Some(2)).free_running().wavelength_sweeps, Some(2));
    }

    #[test]
    fn test_to_values_carries_sweep_count() {
        let values = sweep(None).normalized().to_values();
        assert_eq!(values.len(), 5);
        assert_eq!(values["wavelength_sweeps"].magnitude(), 1.0);
        assert_eq!(values["interval_trigger"], Quantity::parse("10 pm").unwrap());
    }

    #[test]
    fn test_scan_spec_from_json() {
        let json = r#"{
            "laser": "santec",
            "sweep": {
                "start_wavelength": "1540 nm",
                "stop_wavelength": "1560 nm",
                "interval_trigger": "10 pm",
                "wavelength_speed": "10 nm/s"
            },
            "axis": { "kind": "device", "device": "piezo", "output": "voltage" },
            "range": { "start": "0 V", "stop": "10 V", "step": "2 V" },
            "shutter": { "device": "NI-DAQ", "port": "port0/line1", "delay": "50 ms" },
            "detectors": ["pd1"]
        }"#;
        let spec: ScanSpec = serde_json::from_str(json).unwrap();
        assert!(spec.validate().is_ok());
        assert_eq!(spec.shutter.delay().unwrap(), Duration::from_millis(50));
        assert_eq!(spec.sweep.wavelength_sweeps, None);
        assert!(matches!(spec.range, AxisRange::Span { .. }));

        let time = r#"{ "kind": "time" }"#;
        assert_eq!(serde_json::from_str::<Axis>(time).unwrap(), Axis::Time);
        let count: AxisRange = serde_json::from_str(r#"{ "points": 4 }"#).unwrap();
        assert_eq!(count, AxisRange::Count { points: 4 });
    }

    #[test]
    fn test_validate_rejects_mismatched_range() {
        let spec = ScanSpec {
            laser: "santec".into(),
            sweep: sweep(None),
            axis: Axis::Time,
            range: AxisRange::Span {
                start: Quantity::parse("0 V").unwrap(),
                stop: Quantity::parse("1 V").unwrap(),
                step: Quantity::parse("1 V").unwrap(),
            },
            shutter: ShutterSpec {
                device: "NI-DAQ".into(),
                port: Some("port0/line1".into()),
                delay: Some(Quantity::parse("10 ms").unwrap()),
            },
            detectors: vec!["pd1".into()],
        };
        assert!(matches!(spec.validate(), Err(ScanError::Configuration(_))));
    }
}
