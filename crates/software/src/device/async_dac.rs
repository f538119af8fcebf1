use crate::{
    codec::{Codec, Frame, FrameCodec},
    error::TransferError,
    stats::TransferStats,
    transfer::{CompletionCallback, Transfer, TransferHal, TransferState},
};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Duration;

/// Writes a device through a [`TransferHal`] without waiting on the bus.
///
/// Every channel goes out in one frame, so a whole device costs one transaction rather than one per channel. `U`
/// is the context handed back to completion callbacks.
pub struct AsyncDac<'h, M: RawMutex, U> {
    hal: &'h TransferHal<M, U>,
    codec: Codec,
}

impl<'h, M: RawMutex, U> AsyncDac<'h, M, U> {
    /// Constructs an adapter which encodes with `codec` and submits to `hal`. The HAL must already be initialized
    /// with the device's address.
    pub fn new(hal: &'h TransferHal<M, U>, codec: Codec) -> Self {
        Self { hal, codec }
    }

    /// Number of channels the device owns.
    pub fn channels(&self) -> usize {
        self.codec.channels()
    }

    /// Packs `values` into one frame and submits it. Returns the HAL's pre-flight result; the outcome of the write
    /// itself is delivered to `callback`.
    pub fn set_values_async(
        &self,
        values: &[u16],
        callback: CompletionCallback<U>,
        user_data: U,
    ) -> Result<(), TransferError> {
        let mut frame = Frame::new();
        self.codec.encode_values(values, &mut frame)?;
        self.hal
            .transfer_async(Transfer::write(&frame), callback, user_data)
    }

    /// Submits a write of a single channel.
    pub fn set_channel_value_async(
        &self,
        index: usize,
        value: u16,
        callback: CompletionCallback<U>,
        user_data: U,
    ) -> Result<(), TransferError> {
        let mut frame = Frame::new();
        self.codec.encode_channel(index, value, &mut frame)?;
        self.hal
            .transfer_async(Transfer::write(&frame), callback, user_data)
    }

    /// State of the most recent operation.
    pub fn get_async_status(&self) -> TransferState {
        self.hal.state()
    }

    /// Returns `true` unless an operation is in flight.
    pub fn is_async_operation_complete(&self) -> bool {
        self.get_async_status() != TransferState::InProgress
    }

    /// Error which ended the most recent operation, if it failed.
    pub fn last_error(&self) -> Option<TransferError> {
        self.hal.last_error()
    }

    /// Waits for the operation in flight, aborting it if `timeout` elapses first.
    pub async fn wait_for_async_completion(&self, timeout: Duration) -> Result<(), TransferError> {
        self.hal.wait_for_completion(timeout).await
    }

    /// Cancels the operation in flight, if any, leaving the adapter in an error state.
    pub fn abort_async_operation(&self) {
        self.hal.abort_transfer();
    }

    /// Statistics of every operation since construction or the last reset.
    pub fn statistics(&self) -> TransferStats {
        self.hal.statistics()
    }

    /// Clears the statistics.
    pub fn reset_statistics(&self) {
        self.hal.reset_statistics();
    }
}
