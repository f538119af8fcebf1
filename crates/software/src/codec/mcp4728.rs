use super::{Frame, FrameCodec, SetupCommands, append};
use crate::error::TransferError;
use measurements::Voltage;

const CHANNELS: usize = 4;
const MAX_VALUE: u16 = 0x0FFF;

/// "Multi-Write" command: `0 1 0 0 0 DAC1 DAC0 UDAC`, followed by two data bytes per channel.
const MULTI_WRITE: u8 = 0b0100_0000;
const MULTI_WRITE_MASK: u8 = 0b1111_1000;
/// "Write VREF" command: `1 0 0 X VREFA VREFB VREFC VREFD`.
const WRITE_VREF: u8 = 0b1000_0000;
/// "Write Gain" command: `1 1 0 X GXA GXB GXC GXD`.
const WRITE_GAIN: u8 = 0b1100_0000;
const SETUP_MASK: u8 = 0b1110_0000;

/// Voltage reference selection.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Reference {
    /// The internal 2.048 V bandgap reference.
    #[default]
    Internal,
    /// The supply rail, given in millivolts.
    Supply {
        /// Supply voltage in millivolts.
        millivolts: u16,
    },
}

/// Output amplifier gain; only applies to the internal reference.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Gain {
    /// Full scale equals the reference.
    #[default]
    X1,
    /// Full scale equals twice the reference.
    X2,
}

/// Microchip MCP4728: four 12-bit channels behind one I2C address.
///
/// Frames use the Multi-Write command, three bytes per channel, so all four outputs are updated by one
/// transaction. With `deferred` set the UDAC bit is raised and the outputs hold their previous value until the LDAC
/// pin falls, which lets [`I2cDac`](crate::device::I2cDac) latch every channel at the same instant.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Mcp4728 {
    /// Voltage reference for all channels.
    pub reference: Reference,
    /// Gain for all channels.
    pub gain: Gain,
    /// Defer output updates until LDAC falls.
    pub deferred: bool,
}

impl Mcp4728 {
    fn channel_bytes(&self, channel: usize, value: u16) -> [u8; 3] {
        let value = value.min(MAX_VALUE);
        let vref = match self.reference {
            Reference::Internal => 1 << 7,
            Reference::Supply { .. } => 0,
        };
        let gain = match self.gain {
            Gain::X1 => 0,
            Gain::X2 => 1 << 4,
        };
        // power-down bits (PD1:PD0) stay zero: normal operation
        [
            MULTI_WRITE | ((channel as u8) << 1) | u8::from(self.deferred),
            vref | gain | (value >> 8) as u8,
            (value & 0xFF) as u8,
        ]
    }
}

impl FrameCodec for Mcp4728 {
    fn channels(&self) -> usize {
        CHANNELS
    }

    fn max_value(&self) -> u16 {
        MAX_VALUE
    }

    fn full_scale(&self) -> Voltage {
        match (self.reference, self.gain) {
            (Reference::Internal, Gain::X1) => Voltage::from_volts(2.048),
            (Reference::Internal, Gain::X2) => Voltage::from_volts(4.096),
            (Reference::Supply { millivolts }, _) => Voltage::from_millivolts(f64::from(millivolts)),
        }
    }

    fn encode_values(&self, values: &[u16], frame: &mut Frame) -> Result<(), TransferError> {
        if values.is_empty() || values.len() > CHANNELS {
            return Err(TransferError::InvalidParameter);
        }
        frame.clear();
        for (channel, &value) in values.iter().enumerate() {
            append(frame, &self.channel_bytes(channel, value))?;
        }
        Ok(())
    }

    fn encode_channel(
        &self,
        index: usize,
        value: u16,
        frame: &mut Frame,
    ) -> Result<(), TransferError> {
        if index >= CHANNELS {
            return Err(TransferError::InvalidParameter);
        }
        frame.clear();
        append(frame, &self.channel_bytes(index, value))
    }

    fn setup_commands(&self) -> SetupCommands {
        let vref = match self.reference {
            Reference::Internal => 0x0F,
            Reference::Supply { .. } => 0x00,
        };
        let gain = match self.gain {
            Gain::X1 => 0x00,
            Gain::X2 => 0x0F,
        };
        let mut commands = SetupCommands::new();
        commands.push(WRITE_VREF | vref);
        commands.push(WRITE_GAIN | gain);
        commands
    }

    fn decode_frame(&self, frame: &[u8], values: &mut [u16]) -> Result<usize, TransferError> {
        if let [command] = frame {
            return match command & SETUP_MASK {
                WRITE_VREF | WRITE_GAIN => Ok(0),
                _ => Err(TransferError::InvalidParameter),
            };
        }
        if frame.is_empty() || frame.len() % 3 != 0 {
            return Err(TransferError::InvalidParameter);
        }
        for chunk in frame.chunks_exact(3) {
            if chunk[0] & MULTI_WRITE_MASK != MULTI_WRITE {
                return Err(TransferError::InvalidParameter);
            }
            let channel = usize::from((chunk[0] >> 1) & 0b11);
            let slot = values
                .get_mut(channel)
                .ok_or(TransferError::InvalidParameter)?;
            *slot = (u16::from(chunk[1] & 0x0F) << 8) | u16::from(chunk[2]);
        }
        Ok(frame.len() / 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_write_layout() {
        let codec = Mcp4728::default();
        let mut frame = Frame::new();
        codec
            .encode_values(&[0x0ABC, 0, 0x0FFF, 0x0123], &mut frame)
            .unwrap();
        assert_eq!(
            &[
                0x40, 0x8A, 0xBC, //
                0x42, 0x80, 0x00, //
                0x44, 0x8F, 0xFF, //
                0x46, 0x81, 0x23,
            ],
            frame.as_slice(),
            "Expected left but got right"
        );
    }

    #[test]
    fn deferred_supply_reference_gain_bits() {
        let codec = Mcp4728 {
            reference: Reference::Supply { millivolts: 5_000 },
            gain: Gain::X2,
            deferred: true,
        };
        let mut frame = Frame::new();
        codec.encode_channel(3, 0x0800, &mut frame).unwrap();
        assert_eq!(&[0x47, 0x18, 0x00], frame.as_slice());
    }

    #[test]
    fn values_are_clamped() {
        let codec = Mcp4728::default();
        let mut frame = Frame::new();
        codec.encode_channel(0, u16::MAX, &mut frame).unwrap();
        let mut decoded = [0; 4];
        codec.decode_frame(&frame, &mut decoded).unwrap();
        assert_eq!(MAX_VALUE, decoded[0]);
    }

    #[test]
    fn rejects_bad_channel_counts() {
        let codec = Mcp4728::default();
        let mut frame = Frame::new();
        assert_eq!(
            Err(TransferError::InvalidParameter),
            codec.encode_values(&[], &mut frame)
        );
        assert_eq!(
            Err(TransferError::InvalidParameter),
            codec.encode_values(&[0; 5], &mut frame)
        );
        assert_eq!(
            Err(TransferError::InvalidParameter),
            codec.encode_channel(4, 0, &mut frame)
        );
    }

    #[test]
    fn round_trip_full_range() {
        let codec = Mcp4728::default();
        let mut frame = Frame::new();
        let mut decoded = [0; CHANNELS];
        for value in 0..=MAX_VALUE {
            // each channel carries a different value so that a channel mix-up cannot go unnoticed
            let values = [
                value,
                MAX_VALUE - value,
                value / 2,
                value.wrapping_mul(7) % (MAX_VALUE + 1),
            ];
            codec.encode_values(&values, &mut frame).unwrap();
            assert_eq!(Ok(CHANNELS), codec.decode_frame(&frame, &mut decoded));
            assert_eq!(values, decoded, "Round trip failed for {}", value);
        }
    }

    #[test]
    fn setup_commands_decode_to_nothing() {
        let codec = Mcp4728 {
            gain: Gain::X2,
            ..Default::default()
        };
        let commands = codec.setup_commands();
        assert_eq!(&[0x8F, 0xCF], commands.as_slice());
        let mut decoded = [0; CHANNELS];
        for command in commands {
            assert_eq!(Ok(0), codec.decode_frame(&[command], &mut decoded));
        }
    }

    #[test]
    fn full_scale() {
        let x2 = Mcp4728 {
            gain: Gain::X2,
            ..Default::default()
        };
        assert!((x2.full_scale().as_volts() - 4.096).abs() < 1e-9);
        let supply = Mcp4728 {
            reference: Reference::Supply { millivolts: 3_300 },
            ..Default::default()
        };
        assert!((supply.full_scale().as_volts() - 3.3).abs() < 1e-9);
    }
}
