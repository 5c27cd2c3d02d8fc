//! Custom error types for scan orchestration.
//!
//! This module defines the primary error type, `ScanError`, used by the registry,
//! the DAQ router, the sequencer and the continuous monitor controller. It is built
//! with the `thiserror` crate so every failure carries a readable message and can be
//! propagated with the `?` operator.
//!
//! ## Error Hierarchy
//!
//! - **`DuplicateName`** / **`UnknownDevice`**: registry misuse.
//! - **`DriverInit`**: a driver failed to load. Logged per device during
//!   `initialize_all`, never fatal for the other devices.
//! - **`ParameterApply`**: a laser or actuator rejected a parameter set. Logged;
//!   the scan continues with the previous parameters.
//! - **`AcquisitionRead`**: the DAQ returned a sample buffer that cannot be split
//!   evenly across the monitored channels. Fatal to the current scan.
//! - **`HardwareTimeout`**: a status poll (motion complete, sweep stopped) exceeded
//!   its bound.
//! - **`Driver`**: any other driver call failure, tagged with the device and the
//!   operation that failed. Wraps the `anyhow::Error` returned at the driver seam.
//! - **`Cancelled`**: a cooperative stop request was observed.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the scan error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Errors raised while configuring or running a scan.
#[derive(Error, Debug)]
pub enum ScanError {
    /// A device with this name is already registered.
    #[error("Device '{0}' is already registered")]
    DuplicateName(String),

    /// No device with this name is registered.
    #[error("Unknown device '{0}'")]
    UnknownDevice(String),

    /// The driver of a device failed to initialize.
    #[error("Failed to initialize driver of '{device}': {source}")]
    DriverInit {
        /// Device whose driver failed.
        device: String,
        /// Underlying driver error.
        source: anyhow::Error,
    },

    /// A device rejected a parameter set.
    #[error("Device '{device}' rejected parameters: {source}")]
    ParameterApply {
        /// Device that rejected the values.
        device: String,
        /// Underlying driver error.
        source: anyhow::Error,
    },

    /// The DAQ returned a malformed sample buffer.
    #[error("Malformed acquisition from '{daq}': {samples} samples cannot be split across {channels} channels")]
    AcquisitionRead {
        /// DAQ that produced the buffer.
        daq: String,
        /// Flat sample count returned by the driver.
        samples: usize,
        /// Number of monitored channels on the DAQ.
        channels: usize,
    },

    /// A poll loop did not observe completion within its bound.
    #[error("Timed out after {elapsed:?} waiting for {what}")]
    HardwareTimeout {
        /// Condition that was being waited for.
        what: String,
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// A driver call failed.
    #[error("{operation} on '{device}' failed: {source}")]
    Driver {
        /// Device the call was addressed to.
        device: String,
        /// Driver operation name.
        operation: &'static str,
        /// Underlying driver error.
        source: anyhow::Error,
    },

    /// The device exists but lacks the capability the operation needs.
    #[error("Device '{device}' does not provide the {capability} capability")]
    MissingCapability {
        /// Device name.
        device: String,
        /// Name of the required capability.
        capability: &'static str,
    },

    /// Semantic problem with a scan description or device definition.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A quantity string could not be parsed or combined.
    #[error("Quantity error: {0}")]
    Quantity(String),

    /// The operation is not valid in the current state.
    #[error("Operation '{operation}' not allowed in state {state}")]
    InvalidState {
        /// Rejected operation.
        operation: &'static str,
        /// State the machine was in.
        state: String,
    },

    /// Another scan or monitor session already owns the session.
    #[error("Session is busy with another scan")]
    SessionBusy,

    /// The scan was stopped on request.
    #[error("Scan cancelled")]
    Cancelled,
}

impl ScanError {
    /// Wraps a driver failure with the device and operation it came from.
    pub fn driver(device: impl Into<String>, operation: &'static str, source: anyhow::Error) -> Self {
        ScanError::Driver {
            device: device.into(),
            operation,
            source,
        }
    }

    /// True for failures that end a scan without the hardware misbehaving.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ScanError::Cancelled)
    }
}
