//! A status indicator for bus health.

use crate::{Coordinator, configuration::DEVICE_CNT};
use embassy_stm32::gpio::Output;
use embassy_time::Timer;

/// Blinks the numeric code (see [`TransferError::code`][cv_fanout_lib::TransferError::code]) of the error which
/// ended the latest write to any device, whichever path wrote it, and stays dark while every device is healthy.
///
/// Each cycle is divided in half. The LED remains dark for one half. For the other, the
/// LED lights up N times, where N is the error code.
#[embassy_executor::task]
pub async fn display_bus_errors(mut led: Output<'static>, coordinator: &'static Coordinator) -> ! {
    const BLINK_SLEEP_US: u64 = 1_000_000;

    loop {
        led.set_low();
        Timer::after_micros(BLINK_SLEEP_US).await;

        let Some(error) = (0..DEVICE_CNT)
            .filter_map(|device| coordinator.state(device).ok())
            .find_map(|state| state.last_error)
        else {
            continue;
        };
        let blink_cnt = error.code();
        // mult by two to account for the "off" periods, sub 1 so the LED always starts and ends lit
        let animation_frames = blink_cnt.saturating_mul(2).saturating_sub(1);
        let mut counter = animation_frames;
        while counter > 0 {
            led.toggle();
            Timer::after_micros(BLINK_SLEEP_US / u64::from(animation_frames)).await;
            counter -= 1;
        }
    }
}
