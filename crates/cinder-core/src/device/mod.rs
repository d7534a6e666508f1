//! Device-kernel implementations

pub mod range;

pub use range::{RangeDeviceImpl, RangeKernel};
