//! DAQ channel routing and acquisition task bookkeeping.

pub mod router;

pub use router::{AcquisitionPlan, DaqBinding, DaqRouter, Samples};
