//! A non-blocking bus transaction primitive with an explicit state machine, a deadline, and a one-shot completion
//! callback.
//!
//! [`TransferHal::transfer_async`] copies the transfer into the handle, marks it [`InProgress`][TransferState::InProgress],
//! and returns at once. The transaction itself runs in whichever task is driving [`TransferHal::run`], which races
//! the bus against the transfer's deadline and against [`abort_transfer`](TransferHal::abort_transfer). Whatever
//! happens first decides the terminal state, and the callback supplied with the transfer is invoked exactly once
//! with that outcome.
//!
//! ```text
//! Idle ──transfer_async──▶ InProgress ──▶ Completed
//!   ▲                          │      ├─▶ ErrorTimeout
//!   └────────reset─────────────┤      ├─▶ ErrorNak
//!                              │      ├─▶ ErrorArbitration
//!                              └──────┴─▶ ErrorTransferFailure (also on abort)
//! ```
//!
//! Terminal states are sticky until the next accepted transfer or an explicit [`reset`](TransferHal::reset).

use crate::{
    codec::{Frame, MAX_FRAME_LEN},
    configuration::BusConfig,
    error::TransferError,
    stats::TransferStats,
};
use core::cell::RefCell;
use embassy_futures::{
    select::{Either, select},
    yield_now,
};
use embassy_sync::{
    blocking_mutex::{Mutex, raw::RawMutex},
    signal::Signal,
};
use embassy_time::{Duration, Instant, with_deadline};
use embedded_hal_async::i2c::I2c;

/// Where a transfer handle is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferState {
    /// No transfer has been submitted since initialization or the last reset.
    Idle,
    /// A transfer has been accepted and has not finished.
    InProgress,
    /// The last transfer finished successfully.
    Completed,
    /// The last transfer overran its deadline.
    ErrorTimeout,
    /// The target did not acknowledge the last transfer.
    ErrorNak,
    /// Bus arbitration was lost during the last transfer.
    ErrorArbitration,
    /// The last transfer failed in the transport layer or was aborted.
    ErrorTransferFailure,
}

impl TransferState {
    /// Returns `true` once a transfer has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Idle | Self::InProgress)
    }

    /// Returns the error a terminal state stands for, if any.
    pub fn error(&self) -> Option<TransferError> {
        match self {
            Self::Idle | Self::InProgress | Self::Completed => None,
            Self::ErrorTimeout => Some(TransferError::Timeout),
            Self::ErrorNak => Some(TransferError::NakReceived),
            Self::ErrorArbitration => Some(TransferError::ArbitrationLost),
            Self::ErrorTransferFailure => Some(TransferError::TransferFailure),
        }
    }
}

impl From<Result<(), TransferError>> for TransferState {
    fn from(result: Result<(), TransferError>) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(TransferError::Timeout) => Self::ErrorTimeout,
            Err(TransferError::NakReceived) => Self::ErrorNak,
            Err(TransferError::ArbitrationLost) => Self::ErrorArbitration,
            Err(_) => Self::ErrorTransferFailure,
        }
    }
}

/// Direction of a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Bytes go from the controller to the target.
    Write,
    /// Bytes come from the target; fetch them with [`TransferHal::read_result`].
    Read,
}

/// Describes one transaction. The bytes of a write are copied into the handle before
/// [`TransferHal::transfer_async`] returns, so the caller's buffer is free again immediately.
#[derive(Clone, Copy, Debug)]
pub struct Transfer<'a> {
    direction: Direction,
    data: &'a [u8],
    len: usize,
    address: Option<u8>,
}

impl<'a> Transfer<'a> {
    /// A write of `data`.
    pub fn write(data: &'a [u8]) -> Self {
        Self {
            direction: Direction::Write,
            data,
            len: data.len(),
            address: None,
        }
    }

    /// A read of `len` bytes.
    pub fn read(len: usize) -> Self {
        Self {
            direction: Direction::Read,
            data: &[],
            len,
            address: None,
        }
    }

    /// Sends the transfer to `address` instead of the handle's default target.
    pub fn to(self, address: u8) -> Self {
        Self {
            address: Some(address),
            ..self
        }
    }

    /// Direction of the transfer.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Number of bytes moved.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a transfer of zero bytes, which is never accepted.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Invoked exactly once per accepted transfer, with its outcome and the context supplied alongside it.
///
/// Runs in the task which finished the transfer (the one driving [`TransferHal::run`], or the one which called
/// [`TransferHal::abort_transfer`]), after the handle's lock has been released.
pub type CompletionCallback<C> = fn(Result<(), TransferError>, C);

/// A transfer which has been accepted but not yet picked up by the bus task.
struct Job {
    generation: u32,
    address: u8,
    direction: Direction,
    frame: Frame,
    deadline: Instant,
}

struct Handle<C> {
    config: Option<BusConfig>,
    state: TransferState,
    last_error: Option<TransferError>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    /// Identifies the current transfer, so that a late result from an aborted one is ignored.
    generation: u32,
    job: Option<Job>,
    completion: Option<(CompletionCallback<C>, C)>,
    read_data: Frame,
    stats: TransferStats,
}

impl<C> Handle<C> {
    /// Moves an in-progress transfer to the terminal state for `result`. Returns the completion to invoke once the
    /// lock is released.
    fn settle(
        &mut self,
        result: Result<(), TransferError>,
        read: Option<&[u8]>,
    ) -> Option<(CompletionCallback<C>, C)> {
        let now = Instant::now();
        let duration = self
            .started_at
            .map(|started| now.saturating_duration_since(started).as_micros())
            .unwrap_or_default();

        self.state = TransferState::from(result);
        self.last_error = result.err();
        self.finished_at = Some(now);
        self.job = None;
        self.stats
            .record(result, u32::try_from(duration).unwrap_or(u32::MAX));
        if let Some(data) = read {
            self.read_data.clear();
            self.read_data.extend_from_slice(data);
        }
        self.completion.take()
    }
}

/// One transfer handle, bound to one bus target.
///
/// `C` is the opaque context handed back to the completion callback. Only one transfer may be outstanding at a
/// time; a second submission is rejected with [`TransferError::Busy`].
pub struct TransferHal<M: RawMutex, C> {
    handle: Mutex<M, RefCell<Handle<C>>>,
    submitted: Signal<M, ()>,
    cancelled: Signal<M, u32>,
}

impl<M: RawMutex, C> Default for TransferHal<M, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, C> TransferHal<M, C> {
    /// Constructs an uninitialized handle.
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(RefCell::new(Handle {
                config: None,
                state: TransferState::Idle,
                last_error: None,
                started_at: None,
                finished_at: None,
                generation: 0,
                job: None,
                completion: None,
                read_data: Frame::new(),
                stats: TransferStats::default(),
            })),
            submitted: Signal::new(),
            cancelled: Signal::new(),
        }
    }

    /// Binds the handle to a bus target.
    pub fn init(&self, config: BusConfig) -> Result<(), TransferError> {
        if config.clock_hz == 0 || config.timeout.as_ticks() == 0 {
            return Err(TransferError::InvalidParameter);
        }
        self.handle.lock(|handle| {
            let mut handle = handle.borrow_mut();
            if handle.config.is_some() {
                return Err(TransferError::AlreadyInitialized);
            }
            handle.config = Some(config);
            handle.state = TransferState::Idle;
            Ok(())
        })
    }

    /// Unbinds the handle so that it may be initialized again.
    pub fn deinit(&self) -> Result<(), TransferError> {
        self.handle.lock(|handle| {
            let mut handle = handle.borrow_mut();
            if handle.config.is_none() {
                return Err(TransferError::NotInitialized);
            }
            if handle.state == TransferState::InProgress {
                return Err(TransferError::Busy);
            }
            handle.config = None;
            handle.state = TransferState::Idle;
            handle.last_error = None;
            Ok(())
        })
    }

    /// Returns the bus binding, if initialized.
    pub fn config(&self) -> Option<BusConfig> {
        self.handle.lock(|handle| handle.borrow().config)
    }

    /// Submits a transfer and returns without waiting for it.
    ///
    /// Fails without changing any state when the transfer is empty or larger than [`MAX_FRAME_LEN`]
    /// ([`InvalidParameter`](TransferError::InvalidParameter)), when the handle is not initialized
    /// ([`NotInitialized`](TransferError::NotInitialized)), or when a transfer is already in progress
    /// ([`Busy`](TransferError::Busy)). Otherwise `callback` will be invoked exactly once with the outcome.
    pub fn transfer_async(
        &self,
        transfer: Transfer<'_>,
        callback: CompletionCallback<C>,
        context: C,
    ) -> Result<(), TransferError> {
        if transfer.is_empty() || transfer.len() > MAX_FRAME_LEN {
            return Err(TransferError::InvalidParameter);
        }
        let generation = self.handle.lock(|handle| {
            let mut handle = handle.borrow_mut();
            let config = handle.config.ok_or(TransferError::NotInitialized)?;
            if handle.state == TransferState::InProgress {
                return Err(TransferError::Busy);
            }

            let mut frame = Frame::new();
            match transfer.direction {
                Direction::Write => frame.extend_from_slice(transfer.data),
                Direction::Read => frame.resize(transfer.len, 0),
            }
            let now = Instant::now();
            let generation = handle.generation.wrapping_add(1);
            handle.generation = generation;
            handle.job = Some(Job {
                generation,
                address: transfer.address.unwrap_or(config.address),
                direction: transfer.direction,
                frame,
                deadline: now + config.timeout,
            });
            handle.state = TransferState::InProgress;
            handle.last_error = None;
            handle.started_at = Some(now);
            handle.finished_at = None;
            handle.completion = Some((callback, context));
            Ok(generation)
        })?;
        trace!("transfer {} submitted", generation);
        self.submitted.signal(());
        Ok(())
    }

    /// Executes submitted transfers on `bus`, forever. Spawn one task per handle to drive it.
    pub async fn run<B: I2c>(&self, bus: &mut B) -> ! {
        loop {
            self.submitted.wait().await;
            let Some(job) = self.handle.lock(|handle| handle.borrow_mut().job.take()) else {
                // aborted before it could start
                continue;
            };
            let Job {
                generation,
                address,
                direction,
                mut frame,
                deadline,
            } = job;

            let outcome = select(
                with_deadline(deadline, async {
                    match direction {
                        Direction::Write => bus.write(address, &frame).await,
                        Direction::Read => bus.read(address, &mut frame).await,
                    }
                }),
                self.cancellation(generation),
            )
            .await;

            let result = match outcome {
                Either::First(Ok(Ok(()))) => Ok(()),
                Either::First(Ok(Err(error))) => Err(TransferError::from_bus(error)),
                Either::First(Err(_)) => {
                    warn!("transfer {} to {} timed out", generation, address);
                    Err(TransferError::Timeout)
                }
                Either::Second(()) => continue,
            };
            let read = (direction == Direction::Read && result.is_ok()).then_some(frame.as_slice());
            self.finish(generation, result, read);
        }
    }

    /// Resolves once `generation` has been aborted.
    async fn cancellation(&self, generation: u32) {
        while self.cancelled.wait().await != generation {}
    }

    fn finish(&self, generation: u32, result: Result<(), TransferError>, read: Option<&[u8]>) {
        let completion = self.handle.lock(|handle| {
            let mut handle = handle.borrow_mut();
            // an abort (or a newer transfer) got there first
            if handle.generation != generation || handle.state != TransferState::InProgress {
                return None;
            }
            handle.settle(result, read)
        });
        if let Some((callback, context)) = completion {
            callback(result, context);
        }
    }

    /// Forces an in-progress transfer into [`ErrorTransferFailure`](TransferState::ErrorTransferFailure), releasing
    /// anyone waiting on it and cancelling the bus transaction if it has started. Does nothing otherwise.
    pub fn abort_transfer(&self) {
        let aborted = self.handle.lock(|handle| {
            let mut handle = handle.borrow_mut();
            if handle.state != TransferState::InProgress {
                return None;
            }
            let generation = handle.generation;
            Some((
                generation,
                handle.settle(Err(TransferError::TransferFailure), None),
            ))
        });
        if let Some((generation, completion)) = aborted {
            warn!("transfer {} aborted", generation);
            self.cancelled.signal(generation);
            if let Some((callback, context)) = completion {
                callback(Err(TransferError::TransferFailure), context);
            }
        }
    }

    /// Yields to the scheduler until the current transfer finishes or `timeout` elapses. On timeout the transfer
    /// is aborted and [`Timeout`](TransferError::Timeout) is returned.
    ///
    /// Returns `Ok(())` straight away when nothing has been submitted.
    pub async fn wait_for_completion(&self, timeout: Duration) -> Result<(), TransferError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.state() {
                TransferState::Idle | TransferState::Completed => return Ok(()),
                TransferState::InProgress => {}
                state => {
                    return Err(state.error().unwrap_or(TransferError::TransferFailure));
                }
            }
            if Instant::now() >= deadline {
                self.abort_transfer();
                return Err(TransferError::Timeout);
            }
            yield_now().await;
        }
    }

    /// Returns a terminal handle to [`Idle`](TransferState::Idle).
    pub fn reset(&self) -> Result<(), TransferError> {
        self.handle.lock(|handle| {
            let mut handle = handle.borrow_mut();
            if handle.state == TransferState::InProgress {
                return Err(TransferError::Busy);
            }
            handle.state = TransferState::Idle;
            handle.last_error = None;
            handle.started_at = None;
            handle.finished_at = None;
            Ok(())
        })
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        self.handle.lock(|handle| handle.borrow().state)
    }

    /// Error which ended the last transfer, if it failed.
    pub fn last_error(&self) -> Option<TransferError> {
        self.handle.lock(|handle| handle.borrow().last_error)
    }

    /// Microseconds since the current transfer began, or the duration of the last one once it has finished.
    pub fn elapsed_us(&self) -> u64 {
        self.handle.lock(|handle| {
            let handle = handle.borrow();
            match (handle.started_at, handle.finished_at) {
                (Some(started), Some(finished)) => {
                    finished.saturating_duration_since(started).as_micros()
                }
                (Some(started), None) => Instant::now()
                    .saturating_duration_since(started)
                    .as_micros(),
                _ => 0,
            }
        })
    }

    /// Copies the bytes of the last successful read into `out`, returning how many were copied.
    pub fn read_result(&self, out: &mut [u8]) -> usize {
        self.handle.lock(|handle| {
            let handle = handle.borrow();
            let len = handle.read_data.len().min(out.len());
            out[..len].copy_from_slice(&handle.read_data[..len]);
            len
        })
    }

    /// Returns the statistics gathered since construction or the last reset.
    pub fn statistics(&self) -> TransferStats {
        self.handle.lock(|handle| handle.borrow().stats)
    }

    /// Clears the statistics.
    pub fn reset_statistics(&self) {
        self.handle
            .lock(|handle| handle.borrow_mut().stats.reset());
    }
}
