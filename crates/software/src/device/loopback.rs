//! An I2C bus which decodes every frame written to it, so that drivers can be tested end to end without hardware.
//!
//! The [`LoopbackProbe`] is the observable side: it holds what the device would be presenting, counts transactions,
//! and can be told to fail, stall, or slow down the next ones. Several [`LoopbackBus`]es may share one probe.

use crate::codec::{Codec, FrameCodec};
use core::cell::RefCell;
use embassy_sync::blocking_mutex::{Mutex, raw::RawMutex};
use embassy_time::{Duration, Timer};
use embedded_hal_async::i2c::{ErrorKind, ErrorType, I2c, Operation};

/// Most channels a single probe keeps track of.
pub const MAX_CHANNELS: usize = 16;

#[derive(Default)]
struct ProbeState {
    values: [u16; MAX_CHANNELS],
    frames: u32,
    setup_commands: u32,
    last_address: Option<u8>,
    in_flight: u32,
    max_in_flight: u32,
    fault: Option<ErrorKind>,
    faults_remaining: u32,
    stalled: bool,
    latency: Option<Duration>,
}

/// Shared observation point of one or more [`LoopbackBus`]es.
pub struct LoopbackProbe<M: RawMutex> {
    state: Mutex<M, RefCell<ProbeState>>,
}

impl<M: RawMutex> Default for LoopbackProbe<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> LoopbackProbe<M> {
    /// Constructs a probe with every channel at zero and no faults queued.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(ProbeState::default())),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut ProbeState) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    /// Values the device is presenting.
    pub fn values(&self) -> [u16; MAX_CHANNELS] {
        self.with(|state| state.values)
    }

    /// Number of frames which carried channel values.
    pub fn frames(&self) -> u32 {
        self.with(|state| state.frames)
    }

    /// Number of setup commands received.
    pub fn setup_commands(&self) -> u32 {
        self.with(|state| state.setup_commands)
    }

    /// Address of the most recent transaction.
    pub fn last_address(&self) -> Option<u8> {
        self.with(|state| state.last_address)
    }

    /// Largest number of transactions observed in flight at the same time.
    pub fn max_in_flight(&self) -> u32 {
        self.with(|state| state.max_in_flight)
    }

    /// Fails the next `times` transactions with `kind`.
    pub fn fail_next(&self, kind: ErrorKind, times: u32) {
        self.with(|state| {
            state.fault = Some(kind);
            state.faults_remaining = times;
        });
    }

    /// While stalled, transactions never finish.
    pub fn set_stalled(&self, stalled: bool) {
        self.with(|state| state.stalled = stalled);
    }

    /// Makes every transaction take `latency` before it is applied.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.with(|state| state.latency = latency);
    }

    fn begin(&self, address: u8) -> InFlight<'_, M> {
        self.with(|state| {
            state.last_address = Some(address);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        });
        InFlight { probe: self }
    }

    fn take_fault(&self) -> Option<ErrorKind> {
        self.with(|state| {
            if state.faults_remaining == 0 {
                return None;
            }
            state.faults_remaining -= 1;
            state.fault
        })
    }

    fn apply(&self, codec: &Codec, frame: &[u8]) -> Result<(), ErrorKind> {
        self.with(|state| {
            let channels = codec
                .decode_frame(frame, &mut state.values)
                .map_err(|_| ErrorKind::Other)?;
            match channels {
                0 => state.setup_commands += 1,
                _ => state.frames += 1,
            }
            Ok(())
        })
    }
}

/// Decrements the in-flight count when a transaction ends, including when its future is dropped.
struct InFlight<'a, M: RawMutex> {
    probe: &'a LoopbackProbe<M>,
}

impl<M: RawMutex> Drop for InFlight<'_, M> {
    fn drop(&mut self) {
        self.probe.with(|state| state.in_flight -= 1);
    }
}

/// An I2C bus whose only target is a device speaking `codec`.
pub struct LoopbackBus<'a, M: RawMutex> {
    probe: &'a LoopbackProbe<M>,
    codec: Codec,
}

impl<'a, M: RawMutex> LoopbackBus<'a, M> {
    /// Constructs a bus which reports to `probe`.
    pub fn new(probe: &'a LoopbackProbe<M>, codec: Codec) -> Self {
        Self { probe, codec }
    }
}

impl<M: RawMutex> ErrorType for LoopbackBus<'_, M> {
    type Error = ErrorKind;
}

impl<M: RawMutex> I2c for LoopbackBus<'_, M> {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let _in_flight = self.probe.begin(address);
        let (stalled, latency) = self.probe.with(|state| (state.stalled, state.latency));
        if stalled {
            core::future::pending::<()>().await;
        }
        if let Some(latency) = latency {
            Timer::after(latency).await;
        }
        if let Some(kind) = self.probe.take_fault() {
            return Err(kind);
        }

        for operation in operations {
            match operation {
                Operation::Write(frame) => self.probe.apply(&self.codec, frame)?,
                Operation::Read(buffer) => {
                    let values = self.probe.values();
                    for (i, byte) in buffer.iter_mut().enumerate() {
                        let [hi, lo] = values[(i / 2) % MAX_CHANNELS].to_be_bytes();
                        *byte = if i % 2 == 0 { hi } else { lo };
                    }
                }
            }
        }
        Ok(())
    }
}
