use super::Dac;
use crate::{
    codec::{Codec, Frame, FrameCodec},
    configuration::DeviceConfig,
    error::TransferError,
};
use core::convert::Infallible;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal_async::i2c::I2c;

/// Stands in for a latch pin on boards which do not wire one.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLatch;

impl digital::ErrorType for NoLatch {
    type Error = Infallible;
}

impl OutputPin for NoLatch {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A DAC on an I2C bus, with an optional latch pin (the MCP4728's LDAC, for example).
///
/// [`enable`](Dac::enable) raises the latch so that the outputs hold while a frame is written, and
/// [`disable`](Dac::disable) lowers it so that every channel changes at the same instant.
pub struct I2cDac<B, P = NoLatch> {
    bus: B,
    latch: P,
    binding: Option<(u8, Codec)>,
}

impl<B: I2c> I2cDac<B> {
    /// Constructs a driver without a latch pin.
    pub fn new(bus: B) -> Self {
        Self::with_latch(bus, NoLatch)
    }
}

impl<B: I2c, P: OutputPin> I2cDac<B, P> {
    /// Constructs a driver which drives `latch` around each update.
    pub fn with_latch(bus: B, latch: P) -> Self {
        Self {
            bus,
            latch,
            binding: None,
        }
    }

    fn binding(&self) -> Result<(u8, Codec), TransferError> {
        self.binding.ok_or(TransferError::NotInitialized)
    }

    async fn write(&mut self, address: u8, frame: &[u8]) -> Result<(), TransferError> {
        self.bus
            .write(address, frame)
            .await
            .map_err(TransferError::from_bus)
    }
}

impl<B: I2c, P: OutputPin> Dac for I2cDac<B, P> {
    fn channels(&self) -> usize {
        self.binding
            .map(|(_, codec)| codec.channels())
            .unwrap_or_default()
    }

    async fn initialize(&mut self, config: &DeviceConfig) -> Result<(), TransferError> {
        self.binding = Some((config.address, config.codec));
        for command in config.codec.setup_commands() {
            self.write(config.address, &[command]).await?;
        }
        Ok(())
    }

    async fn enable(&mut self) -> Result<(), TransferError> {
        self.binding()?;
        self.latch
            .set_high()
            .map_err(|_| TransferError::TransferFailure)
    }

    async fn disable(&mut self) -> Result<(), TransferError> {
        self.binding()?;
        self.latch
            .set_low()
            .map_err(|_| TransferError::TransferFailure)
    }

    async fn set_values(&mut self, values: &[u16]) -> Result<(), TransferError> {
        let (address, codec) = self.binding()?;
        let mut frame = Frame::new();
        codec.encode_values(values, &mut frame)?;
        self.write(address, &frame).await
    }

    async fn set_channel_value(&mut self, index: usize, value: u16) -> Result<(), TransferError> {
        let (address, codec) = self.binding()?;
        let mut frame = Frame::new();
        codec.encode_channel(index, value, &mut frame)?;
        self.write(address, &frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{Mcp4728, Register16},
        configuration::WriteMode,
        device::loopback::{LoopbackBus, LoopbackProbe},
    };
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

    /// Records the level it was last driven to.
    #[derive(Default)]
    struct Pin {
        high: bool,
        edges: u32,
    }

    impl digital::ErrorType for &mut Pin {
        type Error = Infallible;
    }

    impl OutputPin for &mut Pin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            self.edges += 1;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.high = true;
            self.edges += 1;
            Ok(())
        }
    }

    fn config(codec: Codec) -> DeviceConfig {
        DeviceConfig {
            address: 0x60,
            codec,
            mode: WriteMode::Blocking,
        }
    }

    #[test]
    fn refuses_to_write_before_initialization() {
        let probe = LoopbackProbe::<CriticalSectionRawMutex>::new();
        let mut dac = I2cDac::new(LoopbackBus::new(&probe, Register16::new(0, 4, 5_000).into()));
        block_on(async {
            assert_eq!(
                Err(TransferError::NotInitialized),
                dac.set_values(&[1, 2]).await
            );
            assert_eq!(Err(TransferError::NotInitialized), dac.enable().await);
        });
        assert_eq!(0, dac.channels());
        assert_eq!(0, probe.frames());
    }

    #[test]
    fn initialization_sends_setup_commands() {
        let codec = Codec::from(Mcp4728::default());
        let probe = LoopbackProbe::<CriticalSectionRawMutex>::new();
        let mut dac = I2cDac::new(LoopbackBus::new(&probe, codec));
        block_on(dac.initialize(&config(codec))).unwrap();

        assert_eq!(4, dac.channels());
        assert_eq!(
            codec.setup_commands().len() as u32,
            probe.setup_commands(),
            "Expected left but got right"
        );
        assert_eq!(0, probe.frames(), "Setup commands carry no channel values");
    }

    #[test]
    fn all_channels_go_out_in_one_transaction() {
        let codec = Codec::from(Mcp4728::default());
        let probe = LoopbackProbe::<CriticalSectionRawMutex>::new();
        let mut pin = Pin::default();
        let mut dac = I2cDac::with_latch(LoopbackBus::new(&probe, codec), &mut pin);
        block_on(async {
            dac.initialize(&config(codec)).await.unwrap();
            dac.enable().await.unwrap();
            dac.set_values(&[100, 200, 300, 400]).await.unwrap();
            dac.disable().await.unwrap();
        });
        drop(dac);

        assert_eq!(1, probe.frames());
        assert_eq!(Some(0x60), probe.last_address());
        assert_eq!([100, 200, 300, 400], probe.values()[..4]);
        assert!(!pin.high, "Latch should be released after the update");
        assert_eq!(2, pin.edges);
    }

    #[test]
    fn single_channel_write() {
        let codec = Codec::from(Register16::new(0x10, 4, 5_000));
        let probe = LoopbackProbe::<CriticalSectionRawMutex>::new();
        let mut dac = I2cDac::new(LoopbackBus::new(&probe, codec));
        block_on(async {
            dac.initialize(&config(codec)).await.unwrap();
            dac.set_channel_value(2, 0xBEEF).await.unwrap();
            assert_eq!(
                Err(TransferError::InvalidParameter),
                dac.set_channel_value(4, 1).await
            );
        });
        assert_eq!([0, 0, 0xBEEF, 0], probe.values()[..4]);
    }

    #[test]
    fn bus_errors_are_translated() {
        let codec = Codec::from(Register16::new(0, 4, 5_000));
        let probe = LoopbackProbe::<CriticalSectionRawMutex>::new();
        let mut dac = I2cDac::new(LoopbackBus::new(&probe, codec));
        block_on(dac.initialize(&config(codec))).unwrap();

        probe.fail_next(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address), 1);
        assert_eq!(
            Err(TransferError::NakReceived),
            block_on(dac.set_values(&[1, 2, 3, 4]))
        );
        assert_eq!(Ok(()), block_on(dac.set_values(&[1, 2, 3, 4])));
        assert_eq!([1, 2, 3, 4], probe.values()[..4]);
    }
}
