//! Instruments: capability traits, device descriptions, the registry and mocks.

pub mod capabilities;
pub mod device;
pub mod mock;
pub mod registry;

pub use capabilities::{
    AcquisitionConditions, Actuator, AnalogRead, ChannelSpec, Daq, Driver, DriverHandle, Laser,
    OutputConditions, ReadConditions, ReadPoints, Sampling, SweepCondition, TaskHandle, ValueMap,
};
pub use device::{Calibration, ChannelMode, Connection, DaqTrigger, Device, DeviceKind};
pub use registry::{DeviceRegistry, InitReport};
