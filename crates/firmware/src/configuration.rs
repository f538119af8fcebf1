//! Board-level settings: how the engine is tuned, which DACs hang off the bus, and the user-selectable calibration
//! levels.

use cv_fanout_lib::{
    codec::{Codec, Gain, Mcp4728, Reference},
    configuration::{DeviceConfig, EngineConfig, WriteMode},
};
use embassy_time::Duration;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

/// Number of DACs on the bus.
pub const DEVICE_CNT: usize = 4;
/// Channels of each DAC; an MCP4728 has four.
pub const CHANNELS_PER_DEVICE: usize = 4;

/// Tuning of the update engine.
pub const ENGINE_CONFIG: EngineConfig = EngineConfig {
    thread_slice: Duration::from_millis(1),
    force_refresh_interval: Duration::from_millis(100),
    channels_per_device: CHANNELS_PER_DEVICE,
    per_transfer_timeout: Duration::from_millis(5),
    bus_clock_hz: 400_000,
};

const DAC: Codec = Codec::Mcp4728(Mcp4728 {
    reference: Reference::Internal,
    gain: Gain::X2,
    deferred: false,
});

/// The DACs, in channel order: device `n` owns channels `4n` to `4n + 3`.
///
/// The last one is written synchronously. It sits at the end of the table so that it is the one whose writes hold up
/// its worker, which makes the difference between the two paths easy to see in the transfer statistics.
pub const DEVICE_CONFIGS: [DeviceConfig; DEVICE_CNT] = [
    DeviceConfig {
        address: 0x60,
        codec: DAC,
        mode: WriteMode::Async,
    },
    DeviceConfig {
        address: 0x61,
        codec: DAC,
        mode: WriteMode::Async,
    },
    DeviceConfig {
        address: 0x62,
        codec: DAC,
        mode: WriteMode::Async,
    },
    DeviceConfig {
        address: 0x63,
        codec: DAC,
        mode: WriteMode::Blocking,
    },
];

/// A trait which allows infinite cycling of an enum's variants.
///
/// Useful for pushbutton user interfaces, allowing presses to advance from the current to the next variant,
/// cycling back to the beginning when all variants have been exhausted.
pub trait CycleConfig: FromPrimitive + ToPrimitive + Copy {
    /// Return the next variant, cycling back to the beginning as needed.
    fn cycle(self) -> Self {
        self.to_u8()
            .and_then(|index| Self::from_u8(index.saturating_add(1)))
            .or_else(|| Self::from_u8(0))
            .unwrap_or(self)
    }
}

/// Voltage every output is driven to while calibrating downstream gear, one volt per step.
#[derive(Clone, Copy, Debug, Default, FromPrimitive, PartialEq, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationLevel {
    #[default]
    ZeroVolts,
    OneVolt,
    TwoVolts,
    ThreeVolts,
    FourVolts,
}

impl CycleConfig for CalibrationLevel {}

impl CalibrationLevel {
    /// The voltage of the level, in volts.
    pub fn volts(&self) -> f64 {
        f64::from(*self as u8)
    }
}
