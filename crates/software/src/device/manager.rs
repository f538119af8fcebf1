use super::AsyncDac;
use crate::{
    codec::Codec, error::TransferError, sequence::Sequence, stats::TransferStats,
    transfer::TransferHal,
};
use core::cell::Cell;
use embassy_sync::blocking_mutex::{Mutex, raw::RawMutex};
use embassy_time::Duration;

#[derive(Clone, Copy, Debug, Default)]
struct Operation {
    pending: bool,
    completed: bool,
    last_error: Option<TransferError>,
    /// Sequence of the most recently initiated update.
    issued: Sequence,
    /// Sequence of the most recently finished update.
    completion_sequence: Sequence,
}

/// Completion record of the asynchronous update of one device.
///
/// Lives outside the [`AsyncDacManager`] so that the HAL's completion callback can reach it. Its lock is never held
/// while any other lock is taken.
pub struct OperationState<M: RawMutex> {
    operation: Mutex<M, Cell<Operation>>,
}

impl<M: RawMutex> Default for OperationState<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> OperationState<M> {
    /// Constructs an idle record.
    pub const fn new() -> Self {
        Self {
            operation: Mutex::new(Cell::new(Operation {
                pending: false,
                completed: false,
                last_error: None,
                issued: Sequence(0),
                completion_sequence: Sequence(0),
            })),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut Operation) -> R) -> R {
        self.operation.lock(|cell| {
            let mut operation = cell.get();
            let result = f(&mut operation);
            cell.set(operation);
            result
        })
    }
}

/// Completion callback of every update initiated through an [`AsyncDacManager`].
fn complete<M: RawMutex>(result: Result<(), TransferError>, state: &OperationState<M>) {
    state.update(|operation| {
        operation.pending = false;
        operation.completed = true;
        operation.last_error = result.err();
        operation.completion_sequence = operation.issued;
    });
}

/// Lets a cooperative worker drive an [`AsyncDac`] with two non-blocking calls: one to start an update and one,
/// on each later pass, to collect its outcome.
pub struct AsyncDacManager<'h, M: RawMutex> {
    dac: AsyncDac<'h, M, &'h OperationState<M>>,
    state: &'h OperationState<M>,
}

impl<'h, M: RawMutex> AsyncDacManager<'h, M> {
    /// Constructs a manager over `hal`, recording completions in `state`.
    pub fn new(
        hal: &'h TransferHal<M, &'h OperationState<M>>,
        codec: Codec,
        state: &'h OperationState<M>,
    ) -> Self {
        Self {
            dac: AsyncDac::new(hal, codec),
            state,
        }
    }

    /// The adapter being managed.
    pub fn dac(&self) -> &AsyncDac<'h, M, &'h OperationState<M>> {
        &self.dac
    }

    /// Starts writing `values` and returns the sequence to pass to
    /// [`check_and_clear_completion`](Self::check_and_clear_completion).
    ///
    /// Fails with [`Busy`](TransferError::Busy) while a previous update is unfinished; on any failure nothing is
    /// left pending.
    pub fn initiate_async_update(&self, values: &[u16]) -> Result<Sequence, TransferError> {
        let sequence = self.state.update(|operation| {
            if operation.pending {
                return Err(TransferError::Busy);
            }
            operation.pending = true;
            operation.completed = false;
            operation.last_error = None;
            operation.issued = operation.issued.next();
            Ok(operation.issued)
        })?;

        if let Err(error) = self.dac.set_values_async(values, complete::<M>, self.state) {
            self.state.update(|operation| operation.pending = false);
            return Err(error);
        }
        Ok(sequence)
    }

    /// Returns the outcome of the update identified by `expected` (or a later one) once it has finished, and clears
    /// it so that the next update starts from a clean record. Returns `None` while it is still running.
    pub fn check_and_clear_completion(
        &self,
        expected: Sequence,
    ) -> Option<Result<(), TransferError>> {
        self.state.update(|operation| {
            if !operation.completed || !operation.completion_sequence.reached(expected) {
                return None;
            }
            operation.completed = false;
            Some(operation.last_error.map_or(Ok(()), Err))
        })
    }

    /// Returns `true` while an update is in flight.
    pub fn is_pending(&self) -> bool {
        self.state.update(|operation| operation.pending)
    }

    /// Waits for the update in flight, aborting it if `timeout` elapses first.
    pub async fn wait(&self, timeout: Duration) -> Result<(), TransferError> {
        self.dac.wait_for_async_completion(timeout).await
    }

    /// Aborts the update in flight. Its completion is recorded as a failure.
    pub fn abort(&self) {
        self.dac.abort_async_operation();
    }

    /// Statistics of the managed device.
    pub fn statistics(&self) -> TransferStats {
        self.dac.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::Mcp4728,
        configuration::BusConfig,
        device::loopback::{LoopbackBus, LoopbackProbe},
    };
    use embassy_futures::{block_on, select::select};
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

    type M = CriticalSectionRawMutex;

    fn init(hal: &TransferHal<M, &OperationState<M>>) {
        hal.init(BusConfig {
            clock_hz: 400_000,
            address: 0x60,
            timeout: Duration::from_millis(5),
        })
        .unwrap();
    }

    #[test]
    fn one_update_at_a_time() {
        let state = OperationState::<M>::new();
        let hal = TransferHal::new();
        init(&hal);
        let manager = AsyncDacManager::new(&hal, Mcp4728::default().into(), &state);

        let sequence = manager.initiate_async_update(&[1, 2, 3, 4]).unwrap();
        assert!(manager.is_pending());
        assert_eq!(
            Err(TransferError::Busy),
            manager.initiate_async_update(&[5, 6, 7, 8]),
            "Expected left but got right"
        );
        assert_eq!(None, manager.check_and_clear_completion(sequence));

        manager.abort();
        assert!(!manager.is_pending());
        assert_eq!(
            Some(Err(TransferError::TransferFailure)),
            manager.check_and_clear_completion(sequence)
        );
        assert_eq!(
            None,
            manager.check_and_clear_completion(sequence),
            "Completion should be reported once"
        );
    }

    #[test]
    fn rejected_submission_leaves_nothing_pending() {
        let state = OperationState::<M>::new();
        let hal = TransferHal::new();
        // not initialized: the HAL refuses
        let manager = AsyncDacManager::new(&hal, Mcp4728::default().into(), &state);

        assert_eq!(
            Err(TransferError::NotInitialized),
            manager.initiate_async_update(&[1, 2, 3, 4])
        );
        assert!(!manager.is_pending());
        init(&hal);
        assert!(manager.initiate_async_update(&[1, 2, 3, 4]).is_ok());
    }

    #[test]
    fn completion_is_collected_after_the_bus_finishes() {
        let codec = Codec::from(Mcp4728::default());
        let probe = LoopbackProbe::<M>::new();
        let mut bus = LoopbackBus::new(&probe, codec);
        let state = OperationState::<M>::new();
        let hal = TransferHal::new();
        init(&hal);
        let manager = AsyncDacManager::new(&hal, codec, &state);

        probe.fail_next(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data), 1);
        let first = manager.initiate_async_update(&[9, 9, 9, 9]).unwrap();
        block_on(select(hal.run(&mut bus), manager.wait(Duration::from_millis(5))));
        assert_eq!(
            Some(Err(TransferError::NakReceived)),
            manager.check_and_clear_completion(first)
        );

        let second = manager.initiate_async_update(&[1, 2, 3, 4]).unwrap();
        assert!(second.is_newer_than(first));
        block_on(select(hal.run(&mut bus), manager.wait(Duration::from_millis(5))));
        assert_eq!(Some(Ok(())), manager.check_and_clear_completion(second));
        assert_eq!([1, 2, 3, 4], probe.values()[..4]);

        let stats = manager.statistics();
        assert_eq!((2, 1, 1, 1), (stats.total, stats.successful, stats.failed, stats.naks));
    }
}
