//! The shared input and output buffers between upstream producers and the device workers.
//!
//! Two locks guard them. The outer lock covers the whole input buffer, which has a single writer (the producer)
//! and a single reader (the buffer-transfer step of the [coordinator](crate::coordinator)). Each device's slice of
//! the output buffer has its own inner lock, written by the buffer-transfer step and read by that device's worker.
//! When both are needed the outer lock is taken first.

use crate::error::TransferError;
use embassy_sync::{
    blocking_mutex::raw::RawMutex,
    mutex::{Mutex, MutexGuard},
    signal::Signal,
};

/// Input and output buffers for `D` devices of `C` channels each.
///
/// Channels are addressed either by device and position, or by a flat channel index in `0..D * C` where channel
/// `n` belongs to device `n / C`.
pub struct SharedBuffers<M: RawMutex, const D: usize, const C: usize> {
    input: Mutex<M, [[u16; C]; D]>,
    outputs: [Mutex<M, [u16; C]>; D],
    input_changed: Signal<M, ()>,
}

impl<M: RawMutex, const D: usize, const C: usize> Default for SharedBuffers<M, D, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const D: usize, const C: usize> SharedBuffers<M, D, C> {
    /// Constructs buffers with every channel at zero.
    pub fn new() -> Self {
        Self {
            input: Mutex::new([[0; C]; D]),
            outputs: core::array::from_fn(|_| Mutex::new([0; C])),
            input_changed: Signal::new(),
        }
    }

    /// Total number of channels across all devices.
    pub const fn channel_count(&self) -> usize {
        D * C
    }

    /// Splits a flat channel index into device index and position within the device.
    pub fn locate(channel: usize) -> Result<(usize, usize), TransferError> {
        if C == 0 || channel >= D * C {
            return Err(TransferError::InvalidParameter);
        }
        Ok((channel / C, channel % C))
    }

    /// Runs `write` against the input buffer while holding the outer lock, then notifies the buffer-transfer step.
    pub async fn write_input<R>(&self, write: impl FnOnce(&mut [[u16; C]; D]) -> R) -> R {
        let result = {
            let mut input = self.input.lock().await;
            write(&mut input)
        };
        self.input_changed.signal(());
        result
    }

    /// Sets one channel of the input buffer by its flat index.
    pub async fn set_input_channel(&self, channel: usize, value: u16) -> Result<(), TransferError> {
        let (device, position) = Self::locate(channel)?;
        self.write_input(|input| input[device][position] = value)
            .await;
        Ok(())
    }

    /// Returns a copy of the input buffer.
    pub async fn read_input(&self) -> [[u16; C]; D] {
        *self.input.lock().await
    }

    /// Takes the outer lock.
    pub async fn lock_input(&self) -> MutexGuard<'_, M, [[u16; C]; D]> {
        self.input.lock().await
    }

    /// Waits until a producer has written to the input buffer since the last wait.
    pub async fn input_changed(&self) {
        self.input_changed.wait().await
    }

    /// Takes the inner lock of one device's output slice.
    pub async fn lock_output(
        &self,
        device: usize,
    ) -> Result<MutexGuard<'_, M, [u16; C]>, TransferError> {
        let output = self
            .outputs
            .get(device)
            .ok_or(TransferError::InvalidParameter)?;
        Ok(output.lock().await)
    }

    /// Returns a copy of one device's output slice, holding its lock only for the copy.
    pub async fn output_snapshot(&self, device: usize) -> Result<[u16; C], TransferError> {
        Ok(*self.lock_output(device).await?)
    }
}
