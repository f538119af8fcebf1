use super::EngineConfig;
use embassy_time::Duration;

/// Binding of a [`TransferHal`](crate::transfer::TransferHal) to a bus target.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    /// I2C clock rate in hertz. The bus peripheral itself is configured by the board code; this is kept so that
    /// every handle agrees on what it was promised.
    pub clock_hz: u32,
    /// 7-bit target address used when a transfer does not override it.
    pub address: u8,
    /// Budget for one transaction, measured from the moment it is submitted.
    pub timeout: Duration,
}

impl BusConfig {
    /// Derives a bus binding for the device at `address` from the engine's settings.
    pub fn from_engine(engine: &EngineConfig, address: u8) -> Self {
        Self {
            clock_hz: engine.bus_clock_hz,
            address,
            timeout: engine.per_transfer_timeout,
        }
    }
}
