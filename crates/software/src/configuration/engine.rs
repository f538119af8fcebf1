use crate::error::TransferError;
use embassy_time::Duration;

/// Timing and sizing of the update engine.
///
/// Defaults suit four quad-channel DACs on a 400 kHz bus: a full four-channel frame takes well under a millisecond
/// on the wire, so a 5 ms budget per transfer leaves room for clock stretching without letting a wedged device hold
/// its worker for long.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineConfig {
    /// How long an idle worker parks before it looks at its device again.
    pub thread_slice: Duration,
    /// Period of the forced refresh which re-requests every device.
    pub force_refresh_interval: Duration,
    /// Number of channels each device owns.
    pub channels_per_device: usize,
    /// Upper bound on any single hardware write, blocking or asynchronous.
    pub per_transfer_timeout: Duration,
    /// I2C clock rate in hertz.
    pub bus_clock_hz: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_slice: Duration::from_millis(1),
            force_refresh_interval: Duration::from_millis(100),
            channels_per_device: 4,
            per_transfer_timeout: Duration::from_millis(5),
            bus_clock_hz: 400_000,
        }
    }
}

impl EngineConfig {
    /// Checks the configuration against an engine built for `C` channels per device.
    pub fn validate<const C: usize>(&self) -> Result<(), TransferError> {
        if self.thread_slice == Duration::from_ticks(0)
            || self.force_refresh_interval == Duration::from_ticks(0)
            || self.per_transfer_timeout == Duration::from_ticks(0)
            || self.bus_clock_hz == 0
            || self.channels_per_device != C
        {
            return Err(TransferError::InvalidParameter);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid_for_quad_dacs() {
        assert_eq!(Ok(()), EngineConfig::default().validate::<4>());
    }

    #[test]
    fn channel_count_must_match() {
        assert_eq!(
            Err(TransferError::InvalidParameter),
            EngineConfig::default().validate::<8>(),
            "Expected left but got right"
        );
    }

    #[test]
    fn zero_durations_are_rejected() {
        let config = EngineConfig {
            force_refresh_interval: Duration::from_ticks(0),
            ..Default::default()
        };
        assert_eq!(Err(TransferError::InvalidParameter), config.validate::<4>());

        let config = EngineConfig {
            per_transfer_timeout: Duration::from_ticks(0),
            ..Default::default()
        };
        assert_eq!(Err(TransferError::InvalidParameter), config.validate::<4>());
    }

    #[test]
    fn zero_clock_is_rejected() {
        let config = EngineConfig {
            bus_clock_hz: 0,
            ..Default::default()
        };
        assert_eq!(Err(TransferError::InvalidParameter), config.validate::<4>());
    }
}
