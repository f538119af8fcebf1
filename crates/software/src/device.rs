//! Device drivers: the contract every DAC fulfils, a concrete I2C driver, the asynchronous adapter and its manager,
//! and a loopback bus for exercising all of them without hardware.
//!
//! Two ways of reaching a device coexist. A [`Dac`] awaits the bus itself, so the worker which calls it is occupied
//! for the whole transaction. An [`AsyncDac`] packs the same values into one frame and hands it to a
//! [`TransferHal`](crate::transfer::TransferHal), returning at once; the [`AsyncDacManager`] wraps it in a small
//! record which a worker can poll on each pass without ever waiting on the bus.

mod async_dac;
pub use async_dac::*;

mod i2c_dac;
pub use i2c_dac::*;

pub mod loopback;

mod manager;
pub use manager::*;

use crate::{configuration::DeviceConfig, error::TransferError};

/// The capability set of a DAC.
///
/// Each method completes once the device has accepted the operation, or fails with a bus-class
/// [`TransferError`]. Callers are expected to bound the whole sequence with a timeout.
#[allow(async_fn_in_trait)]
pub trait Dac {
    /// Number of channels the device owns.
    fn channels(&self) -> usize;

    /// Binds the driver to `config` and brings the device into its configured state.
    async fn initialize(&mut self, config: &DeviceConfig) -> Result<(), TransferError>;

    /// Prepares the device to receive values.
    async fn enable(&mut self) -> Result<(), TransferError>;

    /// Ends an update; the device presents whatever it was last sent.
    async fn disable(&mut self) -> Result<(), TransferError>;

    /// Writes every value in `values`, starting at channel 0, in one transaction.
    async fn set_values(&mut self, values: &[u16]) -> Result<(), TransferError>;

    /// Writes a single channel.
    async fn set_channel_value(&mut self, index: usize, value: u16) -> Result<(), TransferError>;
}
