//! Tasks which write the DACs.
//!
//! Embassy tasks cannot be generic, so these pin the library's workers to this board's bus and allocation types.

use crate::{
    BusDevice, Coordinator, Hal,
    configuration::{CHANNELS_PER_DEVICE, DEVICE_CNT},
};
use cv_fanout_lib::{coordinator::AsyncWorker, device::I2cDac};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// Worker for a DAC written synchronously: the task is occupied for the whole of each transaction.
#[embassy_executor::task(pool_size = DEVICE_CNT)]
pub async fn blocking_worker(
    coordinator: &'static Coordinator,
    device: usize,
    mut dac: I2cDac<BusDevice>,
) -> ! {
    coordinator.run_worker(device, &mut dac).await
}

/// Worker for a DAC written through its Transfer HAL; never waits on the bus.
#[embassy_executor::task(pool_size = DEVICE_CNT)]
pub async fn async_worker(
    coordinator: &'static Coordinator,
    worker: AsyncWorker<'static, 'static, CriticalSectionRawMutex, DEVICE_CNT, CHANNELS_PER_DEVICE>,
) -> ! {
    coordinator.run_async_worker(worker).await
}

/// Executes the transactions submitted to one Transfer HAL.
#[embassy_executor::task(pool_size = DEVICE_CNT)]
pub async fn transfer_runner(hal: &'static Hal, mut bus: BusDevice) -> ! {
    hal.run(&mut bus).await
}
