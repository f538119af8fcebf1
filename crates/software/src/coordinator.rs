//! Makes every device eventually present the latest contents of its output slice, with at most one write in flight
//! per device.
//!
//! Each device has an [`UpdateState`] guarded by its own lock. A request bumps the device's sequence; a worker
//! [claims](UpdateCoordinator::claim) the device when the sequence differs from the last one it wrote, copies the
//! output slice, writes it, and records the claimed sequence as processed only if the write succeeded. Requests which
//! arrive before the worker gets round to them collapse into one write of whatever the slice holds by then, and a
//! failed write leaves the device dirty so that the next pass tries again. A write which fails with a
//! [programming error](TransferError::is_programming_error) is not retried: the device is marked faulted and stays
//! out of service until [`initialize_device`](UpdateCoordinator::initialize_device) brings it back.
//!
//! Locks are always taken in the same order: the input buffer, then an output slice, then a state record. The state
//! lock is never held across an `await`.

use crate::{
    buffer::SharedBuffers,
    configuration::{DeviceConfig, EngineConfig},
    device::{AsyncDacManager, Dac},
    error::TransferError,
    sequence::Sequence,
};
use core::cell::Cell;
use embassy_futures::select::select;
use embassy_sync::{
    blocking_mutex::{Mutex, raw::RawMutex},
    mutex::MutexGuard,
    signal::Signal,
};
use embassy_time::{Instant, Ticker, Timer, with_timeout};

/// Per-device bookkeeping of what has been asked for and what has been written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpdateState {
    /// An update was requested and no worker has claimed it yet.
    pub requested: bool,
    /// A worker holds responsibility for a write to the device.
    pub in_progress: bool,
    /// Bumped by every request.
    pub sequence: Sequence,
    /// Sequence of the most recent write which succeeded.
    pub last_processed: Sequence,
    /// A write failed in a way no retry can fix; the device is not claimed again until it is reinitialized.
    pub faulted: bool,
    /// Why the most recent write failed. Cleared by the next successful write.
    pub last_error: Option<TransferError>,
}

impl UpdateState {
    /// Returns `true` when the device may not be presenting the latest requested values.
    pub fn is_dirty(&self) -> bool {
        self.sequence != self.last_processed
    }
}

/// Responsibility for one write to one device.
///
/// Dropping a claim without [completing](Claim::complete) it (for instance because the future holding it was
/// cancelled) releases the device and leaves it dirty.
#[must_use]
pub struct Claim<'a, M: RawMutex, const D: usize, const C: usize> {
    coordinator: &'a UpdateCoordinator<M, D, C>,
    device: usize,
    sequence: Sequence,
    outcome: Outcome,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Abandoned,
    Succeeded,
    Failed(TransferError),
    Faulted(TransferError),
}

impl<M: RawMutex, const D: usize, const C: usize> Claim<'_, M, D, C> {
    /// Index of the claimed device.
    pub fn device(&self) -> usize {
        self.device
    }

    /// Sequence observed when the claim was made.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Records the outcome of the write and releases the device.
    pub fn complete(mut self, result: Result<(), TransferError>) {
        match result {
            Ok(()) => self.outcome = Outcome::Succeeded,
            Err(error) if error.is_programming_error() => {
                error!(
                    "write of sequence {} to device {} cannot succeed: {}",
                    self.sequence, self.device, error
                );
                self.outcome = Outcome::Faulted(error);
            }
            Err(error) => {
                warn!(
                    "write of sequence {} to device {} failed: {}",
                    self.sequence, self.device, error
                );
                self.outcome = Outcome::Failed(error);
            }
        }
    }
}

impl<M: RawMutex, const D: usize, const C: usize> Drop for Claim<'_, M, D, C> {
    fn drop(&mut self) {
        let (outcome, sequence) = (self.outcome, self.sequence);
        self.coordinator.states[self.device].lock(|cell| {
            let mut state = cell.get();
            match outcome {
                Outcome::Succeeded => {
                    state.last_processed = sequence;
                    state.last_error = None;
                }
                Outcome::Failed(error) => state.last_error = Some(error),
                Outcome::Faulted(error) => {
                    state.faulted = true;
                    state.last_error = Some(error);
                }
                Outcome::Abandoned => (),
            }
            state.in_progress = false;
            cell.set(state);
        });
    }
}

/// The update engine of `D` devices with `C` channels each.
pub struct UpdateCoordinator<M: RawMutex, const D: usize, const C: usize> {
    config: EngineConfig,
    buffers: SharedBuffers<M, D, C>,
    states: [Mutex<M, Cell<UpdateState>>; D],
    wakers: [Signal<M, ()>; D],
}

impl<M: RawMutex, const D: usize, const C: usize> UpdateCoordinator<M, D, C> {
    /// Constructs a coordinator with every device marked dirty, so that the first pass of each worker writes.
    pub fn new(config: EngineConfig) -> Result<Self, TransferError> {
        config.validate::<C>()?;
        let dirty = UpdateState {
            sequence: Sequence(1),
            ..Default::default()
        };
        Ok(Self {
            config,
            buffers: SharedBuffers::new(),
            states: core::array::from_fn(|_| Mutex::new(Cell::new(dirty))),
            wakers: core::array::from_fn(|_| Signal::new()),
        })
    }

    /// The engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The buffers values flow through.
    pub fn buffers(&self) -> &SharedBuffers<M, D, C> {
        &self.buffers
    }

    fn state_lock(&self, device: usize) -> Result<&Mutex<M, Cell<UpdateState>>, TransferError> {
        self.states
            .get(device)
            .ok_or(TransferError::InvalidParameter)
    }

    /// Brings a device's driver up, clearing any fault. The device is requested afterwards so that it receives the
    /// current values.
    pub async fn initialize_device<T: Dac>(
        &self,
        device: usize,
        dac: &mut T,
        config: &DeviceConfig,
    ) -> Result<(), TransferError> {
        let state = self.state_lock(device)?;
        with_timeout(self.config.per_transfer_timeout, dac.initialize(config))
            .await
            .unwrap_or(Err(TransferError::Timeout))?;
        info!("device {} at {} initialized", device, config.address);
        state.lock(|cell| {
            let mut state = cell.get();
            state.faulted = false;
            cell.set(state);
        });
        self.request_update(device)
    }

    /// Asks for the device to be written. Never blocks; requests made before the worker runs are coalesced.
    pub fn request_update(&self, device: usize) -> Result<(), TransferError> {
        self.state_lock(device)?.lock(|cell| {
            let mut state = cell.get();
            state.sequence = state.sequence.next();
            state.requested = true;
            cell.set(state);
        });
        self.wakers[device].signal(());
        Ok(())
    }

    /// Asks for every device to be written.
    pub fn request_update_all(&self) {
        for device in 0..D {
            // every index below D is valid
            let _ = self.request_update(device);
        }
    }

    /// Takes the lock of a device's output slice so that it can be written safely.
    pub async fn acquire_device_lock(
        &self,
        device: usize,
    ) -> Result<MutexGuard<'_, M, [u16; C]>, TransferError> {
        self.buffers.lock_output(device).await
    }

    /// Releases a lock taken with [`acquire_device_lock`](Self::acquire_device_lock).
    pub fn release_device_lock(&self, guard: MutexGuard<'_, M, [u16; C]>) {
        drop(guard);
    }

    /// Copy of a device's update state.
    pub fn state(&self, device: usize) -> Result<UpdateState, TransferError> {
        Ok(self.state_lock(device)?.lock(Cell::get))
    }

    /// Current sequence of a device.
    pub fn sequence(&self, device: usize) -> Result<Sequence, TransferError> {
        Ok(self.state(device)?.sequence)
    }

    /// Sequence of the last successful write to a device.
    pub fn last_processed(&self, device: usize) -> Result<Sequence, TransferError> {
        Ok(self.state(device)?.last_processed)
    }

    /// Returns `true` while a worker holds responsibility for a write to the device.
    pub fn is_in_progress(&self, device: usize) -> Result<bool, TransferError> {
        Ok(self.state(device)?.in_progress)
    }

    /// Takes responsibility for writing a device, if it is dirty, not faulted, and nobody else has.
    pub fn claim(&self, device: usize) -> Option<Claim<'_, M, D, C>> {
        let sequence = self.states.get(device)?.lock(|cell| {
            let mut state = cell.get();
            if !state.is_dirty() || state.in_progress || state.faulted {
                return None;
            }
            state.in_progress = true;
            state.requested = false;
            cell.set(state);
            Some(state.sequence)
        })?;
        Some(Claim {
            coordinator: self,
            device,
            sequence,
            outcome: Outcome::Abandoned,
        })
    }

    /// One pass of a worker which awaits the bus itself: if the device is dirty, write its output slice and record
    /// the outcome. The whole enable, write, disable sequence is bounded by the per-transfer timeout; a write cut
    /// short by it is followed by a separate `disable` so that the device is not left enabled.
    ///
    /// Returns `None` when there was nothing to do.
    pub async fn service<T: Dac>(
        &self,
        device: usize,
        dac: &mut T,
    ) -> Option<Result<(), TransferError>> {
        let claim = self.claim(device)?;
        let timeout = self.config.per_transfer_timeout;
        let result = match self.buffers.output_snapshot(device).await {
            Ok(values) => match with_timeout(timeout, write(dac, &values)).await {
                Ok(result) => result,
                Err(_) => {
                    if let Ok(Err(error)) = with_timeout(timeout, dac.disable()).await {
                        warn!("device {} not disabled after a timeout: {}", device, error);
                    }
                    Err(TransferError::Timeout)
                }
            },
            Err(error) => Err(error),
        };
        claim.complete(result);
        Some(result)
    }

    /// Waits for one time slice, or less if the device is requested in the meantime.
    async fn park(&self, device: usize) {
        let slice = Timer::after(self.config.thread_slice);
        match self.wakers.get(device) {
            Some(waker) => {
                select(waker.wait(), slice).await;
            }
            None => slice.await,
        }
    }

    /// Services a device with a [`Dac`] forever.
    pub async fn run_worker<T: Dac>(&self, device: usize, dac: &mut T) -> ! {
        debug!("worker for device {} started", device);
        loop {
            let _ = self.service(device, dac).await;
            self.park(device).await;
        }
    }

    /// Services a device through an [`AsyncWorker`] forever.
    pub async fn run_async_worker(&self, mut worker: AsyncWorker<'_, '_, M, D, C>) -> ! {
        debug!("async worker for device {} started", worker.device);
        loop {
            let _ = worker.service().await;
            self.park(worker.device).await;
        }
    }

    /// Requests every device once per refresh interval, so that a write lost to a bus fault is retried even when no
    /// new values arrive.
    pub async fn run_refresh(&self) -> ! {
        let mut ticker = Ticker::every(self.config.force_refresh_interval);
        loop {
            ticker.next().await;
            trace!("refresh");
            self.request_update_all();
        }
    }

    /// Copies the input buffer into every device's output slice and requests every device.
    pub async fn transfer_buffers(&self) {
        {
            let input = self.buffers.lock_input().await;
            for (device, values) in input.iter().enumerate() {
                if let Ok(mut output) = self.buffers.lock_output(device).await {
                    *output = *values;
                }
            }
        }
        self.request_update_all();
    }

    /// Runs [`transfer_buffers`](Self::transfer_buffers) whenever a producer writes to the input buffer.
    pub async fn run_buffer_transfer(&self) -> ! {
        loop {
            self.buffers.input_changed().await;
            self.transfer_buffers().await;
        }
    }
}

async fn write<T: Dac>(dac: &mut T, values: &[u16]) -> Result<(), TransferError> {
    dac.enable().await?;
    let written = dac.set_values(values).await;
    // disable even when the write failed so that the device is not left mid-update
    let disabled = dac.disable().await;
    written.and(disabled)
}

/// Drives one device through an [`AsyncDacManager`]: a pass either starts a write or collects the outcome of the
/// one in flight, and never waits on the bus.
pub struct AsyncWorker<'a, 'h, M: RawMutex, const D: usize, const C: usize> {
    coordinator: &'a UpdateCoordinator<M, D, C>,
    manager: AsyncDacManager<'h, M>,
    device: usize,
    in_flight: Option<InFlight<'a, M, D, C>>,
}

struct InFlight<'a, M: RawMutex, const D: usize, const C: usize> {
    claim: Claim<'a, M, D, C>,
    operation: Sequence,
    started_at: Instant,
}

impl<'a, 'h, M: RawMutex, const D: usize, const C: usize> AsyncWorker<'a, 'h, M, D, C> {
    /// Constructs a worker for `device`.
    pub fn new(
        coordinator: &'a UpdateCoordinator<M, D, C>,
        device: usize,
        manager: AsyncDacManager<'h, M>,
    ) -> Result<Self, TransferError> {
        coordinator.state_lock(device)?;
        Ok(Self {
            coordinator,
            manager,
            device,
            in_flight: None,
        })
    }

    /// Index of the serviced device.
    pub fn device(&self) -> usize {
        self.device
    }

    /// The manager writes go through.
    pub fn manager(&self) -> &AsyncDacManager<'h, M> {
        &self.manager
    }

    /// One pass. Returns the outcome of a write once it has been recorded, `None` otherwise.
    pub async fn service(&mut self) -> Option<Result<(), TransferError>> {
        if let Some(in_flight) = &self.in_flight {
            let config = self.coordinator.config();
            // the HAL enforces the timeout itself; this only catches a HAL whose bus task is not running
            let overdue = in_flight.started_at + config.per_transfer_timeout + config.thread_slice;
            if Instant::now() >= overdue {
                self.manager.abort();
            }
            let result = self.manager.check_and_clear_completion(in_flight.operation)?;
            if let Some(in_flight) = self.in_flight.take() {
                in_flight.claim.complete(result);
            }
            return Some(result);
        }

        let claim = self.coordinator.claim(self.device)?;
        let initiated = match self.coordinator.buffers.output_snapshot(self.device).await {
            Ok(values) => self.manager.initiate_async_update(&values),
            Err(error) => Err(error),
        };
        match initiated {
            Ok(operation) => {
                self.in_flight = Some(InFlight {
                    claim,
                    operation,
                    started_at: Instant::now(),
                });
                None
            }
            Err(error) => {
                claim.complete(Err(error));
                Some(Err(error))
            }
        }
    }
}
