//! Helpers shared by the tests which run the engine against the mock clock.

#![allow(dead_code)]

use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use cv_fanout_lib::TransferError;
use embassy_futures::{select::Either, yield_now};
use embassy_time::{Duration, MockDriver};
use std::sync::{Mutex, MutexGuard};

/// How many times every task is polled after each step of the clock.
const POLLS_PER_STEP: usize = 16;

static SERIAL: Mutex<()> = Mutex::new(());

/// Serialises tests which share the mock clock, and rewinds it to zero.
pub fn serial() -> MutexGuard<'static, ()> {
    let guard = SERIAL
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    MockDriver::get().reset();
    guard
}

/// Lets every task run until it next waits on the clock.
pub async fn settle() {
    for _ in 0..POLLS_PER_STEP {
        yield_now().await;
    }
}

/// Moves the mock clock forward one millisecond at a time, settling after each step.
pub async fn advance(duration: Duration) {
    for _ in 0..duration.as_millis() {
        MockDriver::get().advance(Duration::from_millis(1));
        settle().await;
    }
}

/// Unwraps the result of racing tasks which never return against a test script.
pub fn finished<N, T>(outcome: Either<N, T>) -> T {
    match outcome {
        Either::First(_) => unreachable!("tasks never return"),
        Either::Second(result) => result,
    }
}

/// Records every invocation of a completion callback.
#[derive(Default)]
pub struct CallLog {
    calls: AtomicU32,
    last: AtomicU8,
}

impl CallLog {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<TransferError> {
        TransferError::from_code(self.last.load(Ordering::SeqCst))
    }
}

/// A completion callback which writes to a [`CallLog`].
pub fn record(result: Result<(), TransferError>, log: &CallLog) {
    log.calls.fetch_add(1, Ordering::SeqCst);
    log.last
        .store(result.err().map_or(0, |error| error.code()), Ordering::SeqCst);
}
