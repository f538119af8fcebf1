//! This crate contains the architecture-agnostic engine behind cv_fanout, a device which turns a stream of sixteen
//! control values into [control voltages](https://en.wikipedia.org/wiki/CV/gate) by writing them to several
//! <abbr name="digital-to-analog converter">DAC</abbr>s that share a single I2C bus.
//!
//! Values flow one way: an upstream producer writes into the input half of the [`buffer::SharedBuffers`], the
//! [`coordinator::UpdateCoordinator`] copies them into per-device output slices and marks the device dirty, and one
//! worker per device writes the latest slice to hardware, either by awaiting the bus directly or by handing a single
//! frame to the non-blocking [`transfer::TransferHal`] through a [`device::AsyncDacManager`]. Rapid updates are
//! coalesced rather than queued, and a periodic refresh re-requests every device so that a write lost to a bus fault
//! is retried without the producer ever knowing.

#![deny(missing_docs)]
#![no_std]

#[macro_use]
mod fmt;

pub mod buffer;
pub mod codec;
pub mod configuration;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod sequence;
pub mod stats;
pub mod transfer;

pub use error::TransferError;
