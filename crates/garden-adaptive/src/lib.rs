//! # garden-adaptive
//!
//! Adaptive visual complexity. Frame ticks flow through the
//! [`PerformanceMonitor`] into the [`ComplexityController`], which writes
//! the level to the shared store. The starting level comes from a
//! [`DeviceCapabilityProbe`].

#![deny(unsafe_code)]

pub mod controller;
pub mod monitor;
pub mod probe;

pub use controller::{ComplexityController, ControlDecision};
pub use monitor::PerformanceMonitor;
pub use probe::{DeviceCapabilityProbe, HostProbe, StaticProbe};
