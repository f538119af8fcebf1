use crate::codec::Codec;

/// Selects how a device's worker reaches the hardware.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteMode {
    /// The worker awaits the bus itself: enable, write, disable. The worker is occupied for the whole transaction.
    Blocking,
    /// The worker hands one frame to a [`TransferHal`](crate::transfer::TransferHal) and polls for completion on
    /// later passes, so it is never held up by the bus.
    #[default]
    Async,
}

/// Describes one attached DAC.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceConfig {
    /// 7-bit I2C address.
    pub address: u8,
    /// Frame layout and electrical characteristics of the device family.
    pub codec: Codec,
    /// How the device's worker performs writes.
    pub mode: WriteMode,
}
