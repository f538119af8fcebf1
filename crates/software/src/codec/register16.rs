use super::{Frame, FrameCodec, append};
use crate::error::TransferError;
use measurements::Voltage;

/// A register-mapped 16-bit DAC: each channel is written as `[base + channel, value_hi, value_lo]`.
///
/// Several channels may be written back to back in one transaction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Register16 {
    base_register: u8,
    channels: u8,
    full_scale_mv: u16,
}

impl Register16 {
    /// Constructs a [`Register16`].
    pub const fn new(base_register: u8, channels: u8, full_scale_mv: u16) -> Self {
        Self {
            base_register,
            channels,
            full_scale_mv,
        }
    }

    fn channel_bytes(&self, channel: usize, value: u16) -> [u8; 3] {
        let [hi, lo] = value.to_be_bytes();
        [self.base_register.wrapping_add(channel as u8), hi, lo]
    }
}

impl FrameCodec for Register16 {
    fn channels(&self) -> usize {
        usize::from(self.channels)
    }

    fn max_value(&self) -> u16 {
        u16::MAX
    }

    fn full_scale(&self) -> Voltage {
        Voltage::from_millivolts(f64::from(self.full_scale_mv))
    }

    fn encode_values(&self, values: &[u16], frame: &mut Frame) -> Result<(), TransferError> {
        if values.is_empty() || values.len() > self.channels() {
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
        if index >= self.channels() {
            return Err(TransferError::InvalidParameter);
        }
        frame.clear();
        append(frame, &self.channel_bytes(index, value))
    }

    fn decode_frame(&self, frame: &[u8], values: &mut [u16]) -> Result<usize, TransferError> {
        if frame.is_empty() || frame.len() % 3 != 0 {
            return Err(TransferError::InvalidParameter);
        }
        for chunk in frame.chunks_exact(3) {
            let channel = usize::from(chunk[0].wrapping_sub(self.base_register));
            if channel >= self.channels() {
                return Err(TransferError::InvalidParameter);
            }
            let slot = values
                .get_mut(channel)
                .ok_or(TransferError::InvalidParameter)?;
            *slot = u16::from_be_bytes([chunk[1], chunk[2]]);
        }
        Ok(frame.len() / 3)
    }
}
