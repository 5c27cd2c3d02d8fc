//! Writes a set point to a device, wherever it is wired.

use crate::error::{ScanError, ScanResult};
use crate::instrument::capabilities::{OutputConditions, ValueMap};
use crate::instrument::device::{ChannelMode, Connection};
use crate::instrument::registry::DeviceRegistry;
use crate::quantity::Quantity;
use tracing::debug;

/// Sets `output` of `device` to `value`.
///
/// A DAQ-routed device gets a DC level on its analog output; the level is the
/// value run through the device's calibration, or the value itself in volts when
/// there is none. A directly connected device receives `{output: value}` through
/// its own driver.
pub async fn set_value(
    registry: &DeviceRegistry,
    device: &str,
    output: &str,
    value: &Quantity,
) -> ScanResult<()> {
    let entry = registry.get(device)?;
    match entry.connection() {
        Connection::DaqRouted { daq, port, mode } => {
            if *mode != ChannelMode::Output {
                return Err(ScanError::Configuration(format!(
                    "'{}' is wired to {} as {:?}, not as an output",
                    device, daq, mode
                )));
            }
            let volts = match entry.calibration() {
                Some(calibration) => calibration.to_volts(value)?,
                None => value.m_as("V")?,
            };
            let driver = registry.daq_driver(daq)?;
            debug!(device, daq = %daq, port = %port, volts, "Writing analog output");
            driver
                .analog_output_dc(&OutputConditions {
                    device: device.to_string(),
                    port: port.clone(),
                    volts,
                })
                .await
                .map_err(|e| ScanError::driver(daq, "analog_output_dc", e))
        }
        Connection::Direct => {
            let driver = entry
                .driver()
                .ok_or_else(|| ScanError::MissingCapability {
                    device: device.to_string(),
                    capability: "Driver",
                })?;
            let mut values = ValueMap::new();
            values.insert(output.to_string(), value.clone());
            debug!(device, output, %value, "Applying value");
            driver
                .apply_values(&values)
                .await
                .map_err(|source| ScanError::ParameterApply {
                    device: device.to_string(),
                    source,
                })
        }
    }
}
