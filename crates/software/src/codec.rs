//! Frame layouts for the DAC families cv_fanout can drive.
//!
//! A codec turns "these N channel values" into the bytes of a single bus transaction, so that a whole device is
//! updated with one write instead of one write per channel. Codecs know nothing about buses or timing; they are
//! shared by the blocking [`I2cDac`](crate::device::I2cDac), the asynchronous [`AsyncDac`](crate::device::AsyncDac),
//! and the [loopback](crate::device::loopback) device, which decodes frames back into values.

use crate::error::TransferError;
use enum_dispatch::enum_dispatch;
use measurements::Voltage;
use tinyvec::ArrayVec;

mod mcp4728;
pub use mcp4728::*;

mod register16;
pub use register16::*;

/// Largest frame any codec produces.
pub const MAX_FRAME_LEN: usize = 64;

/// Bytes of one bus transaction, stored inline.
pub type Frame = ArrayVec<[u8; MAX_FRAME_LEN]>;

/// Configuration commands a codec sends once at initialization, one single-byte transaction each.
pub type SetupCommands = ArrayVec<[u8; 4]>;

/// Appends `bytes` to `frame`, refusing rather than overflowing.
fn append(frame: &mut Frame, bytes: &[u8]) -> Result<(), TransferError> {
    if frame.len() + bytes.len() > frame.capacity() {
        return Err(TransferError::InvalidParameter);
    }
    frame.extend_from_slice(bytes);
    Ok(())
}

/// A trait for packing channel values into device frames and back.
#[enum_dispatch(Codec)]
pub trait FrameCodec {
    /// Number of channels the device owns.
    fn channels(&self) -> usize;

    /// Largest value the device can represent; larger values are clamped when encoding.
    fn max_value(&self) -> u16;

    /// Voltage produced by [`max_value()`](Self::max_value).
    fn full_scale(&self) -> Voltage;

    /// Replaces the contents of `frame` with one transaction that writes every value in `values`, starting at
    /// channel 0.
    fn encode_values(&self, values: &[u16], frame: &mut Frame) -> Result<(), TransferError>;

    /// Replaces the contents of `frame` with one transaction that writes a single channel.
    fn encode_channel(
        &self,
        index: usize,
        value: u16,
        frame: &mut Frame,
    ) -> Result<(), TransferError>;

    /// Returns the commands which bring the device into the configured state.
    fn setup_commands(&self) -> SetupCommands {
        SetupCommands::new()
    }

    /// Decodes a frame produced by this codec into `values`, returning how many channels it carried.
    ///
    /// Setup commands decode to zero channels.
    fn decode_frame(&self, frame: &[u8], values: &mut [u16]) -> Result<usize, TransferError>;

    /// Returns the voltage a channel produces for `value`.
    fn voltage(&self, value: u16) -> Voltage {
        let value = value.min(self.max_value());
        Voltage::from_volts(
            self.full_scale().as_volts() * f64::from(value) / f64::from(self.max_value()),
        )
    }

    /// Returns the value which produces the voltage closest to `voltage`, saturating at either end of the range.
    fn value_for(&self, voltage: Voltage) -> u16 {
        let ratio = (voltage.as_volts() / self.full_scale().as_volts()).clamp(0.0, 1.0);
        // adding one half before truncating rounds to the nearest code
        (ratio * f64::from(self.max_value()) + 0.5) as u16
    }
}

/// The supported device families.
#[enum_dispatch]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Codec {
    /// Microchip MCP4728 quad 12-bit DAC.
    Mcp4728(Mcp4728),
    /// Generic 16-bit register-mapped DAC; also the layout of the loopback device.
    Register16(Register16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_refuses_to_overflow() {
        let mut frame = Frame::new();
        assert_eq!(Ok(()), append(&mut frame, &[0; MAX_FRAME_LEN - 1]));
        assert_eq!(
            Err(TransferError::InvalidParameter),
            append(&mut frame, &[1, 2]),
            "Expected left but got right"
        );
        assert_eq!(MAX_FRAME_LEN - 1, frame.len(), "Frame should be untouched");
    }

    #[test]
    fn voltage_conversion() {
        let codec = Codec::from(Register16::new(0x10, 4, 5_000));
        assert_eq!(0, codec.value_for(Voltage::from_volts(-1.0)));
        assert_eq!(u16::MAX, codec.value_for(Voltage::from_volts(5.0)));
        assert_eq!(u16::MAX, codec.value_for(Voltage::from_volts(12.0)));
        assert_eq!(32768, codec.value_for(Voltage::from_volts(2.5)));

        let volts = codec.voltage(u16::MAX).as_volts();
        assert!((volts - 5.0).abs() < 1e-9, "Expected 5 V but got {}", volts);
    }

    #[test]
    fn value_for_inverts_voltage() {
        let codec = Codec::from(Mcp4728::default());
        for value in [0, 1, 1000, 2048, 4094, 4095] {
            assert_eq!(
                value,
                codec.value_for(codec.voltage(value)),
                "Expected left but got right"
            );
        }
    }
}
