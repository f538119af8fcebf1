//! Tasks which move values through the engine: the buffer transfer, the periodic refresh, and the calibration
//! pushbutton, which is this board's only producer of channel values.

use crate::{
    Coordinator,
    configuration::{CalibrationLevel, CycleConfig, DEVICE_CONFIGS},
};
use cv_fanout_lib::codec::FrameCodec;
use defmt::*;
use embassy_stm32::exti::ExtiInput;
use measurements::Voltage;

/// Copies new input values into the devices' output slices.
#[embassy_executor::task]
pub async fn buffer_transfer(coordinator: &'static Coordinator) -> ! {
    coordinator.run_buffer_transfer().await
}

/// Rewrites every device periodically, recovering from writes lost on the bus.
#[embassy_executor::task]
pub async fn refresh(coordinator: &'static Coordinator) -> ! {
    coordinator.run_refresh().await
}

/// Handles button presses, stepping every output to the next [`CalibrationLevel`].
#[embassy_executor::task]
pub async fn calibration_input(
    mut button: ExtiInput<'static>,
    coordinator: &'static Coordinator,
) -> ! {
    let mut level = CalibrationLevel::default();
    loop {
        button.wait_for_rising_edge().await;
        level = level.cycle();
        info!("Driving every output to {}", level);

        let voltage = Voltage::from_volts(level.volts());
        coordinator
            .buffers()
            .write_input(|input| {
                for (values, config) in input.iter_mut().zip(DEVICE_CONFIGS.iter()) {
                    // each device family has its own resolution and full scale
                    values.fill(config.codec.value_for(voltage));
                }
            })
            .await;
    }
}
