//! This module contains the settings which shape the update engine and describe each attached DAC.
//!
//! Everything here is plain data, fixed at start-up: the firmware builds an [`EngineConfig`] and a table of
//! [`DeviceConfig`]s, and the rest of the crate reads them.

mod bus;
pub use bus::*;

mod device;
pub use device::*;

mod engine;
pub use engine::*;
