//! cv_fanout is [Embassy](https://embassy.dev)-based firmware which turns sixteen control values into
//! [control voltages](https://en.wikipedia.org/wiki/CV/gate). It runs on the [Nucleo-F767ZI development
//! board](https://www.st.com/en/evaluation-tools/nucleo-f767zi.html) and drives four MCP4728 quad DACs which share
//! the board's I2C1 bus.
//!
//! Most of the work happens in [`cv_fanout_lib`]; this crate owns the hardware. It sets up the clocks and the bus,
//! allocates the engine, and spawns one task per concern: a worker per DAC, a bus task per asynchronously written
//! DAC, the buffer transfer, the periodic refresh, a pushbutton which steps every output through calibration
//! voltages, and an LED which reports bus errors.

#![no_std]
#![no_main]

mod configuration;
mod dac;
mod engine;
mod status;

use crate::configuration::{CHANNELS_PER_DEVICE, DEVICE_CNT, DEVICE_CONFIGS, ENGINE_CONFIG};
use cv_fanout_lib::{
    configuration::{BusConfig, WriteMode},
    coordinator::{AsyncWorker, UpdateCoordinator},
    device::{AsyncDacManager, I2cDac, OperationState},
    transfer::TransferHal,
};
use defmt::{panic, *};
use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_executor::Spawner;
use embassy_stm32::{
    Config, bind_interrupts,
    exti::ExtiInput,
    gpio::{Level, Output, Pull, Speed},
    i2c::{self, I2c},
    mode::Async,
    peripherals,
    time::Hertz,
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use static_cell::StaticCell;

use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(
    #[doc(hidden)]
    struct Irqs {
        I2C1_EV => i2c::EventInterruptHandler<peripherals::I2C1>;
        I2C1_ER => i2c::ErrorInterruptHandler<peripherals::I2C1>;
    }
);

type Bus = I2c<'static, Async>;
type SharedBus = Mutex<CriticalSectionRawMutex, Bus>;
/// One device's view of the shared bus; each transaction holds the bus lock for its duration.
type BusDevice = I2cDevice<'static, CriticalSectionRawMutex, Bus>;

type Coordinator = UpdateCoordinator<CriticalSectionRawMutex, DEVICE_CNT, CHANNELS_PER_DEVICE>;
type Operation = OperationState<CriticalSectionRawMutex>;
type Hal = TransferHal<CriticalSectionRawMutex, &'static Operation>;

/// Completion records of the asynchronously written DACs, indexed like [`DEVICE_CONFIGS`].
static OPERATIONS: [Operation; DEVICE_CNT] = [const { OperationState::new() }; DEVICE_CNT];

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Initializing cv_fanout");

    let mut config = Config::default();
    {
        use embassy_stm32::rcc::*;
        // hse: high-speed external clock
        config.rcc.hse = Some(Hse {
            freq: Hertz(8_000_000),
            mode: HseMode::Bypass,
        });

        // pll: phase-locked loop, crucial for dividing clock
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL216,
            divp: Some(PllPDiv::DIV2), // 8mhz / 4 * 216 / 2 = 216Mhz
            divq: None,
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        // I2C1 hangs off APB1, which may not exceed 54MHz
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
    }
    let p = embassy_stm32::init(config);

    static COORDINATOR: StaticCell<Coordinator> = StaticCell::new();
    let coordinator: &'static Coordinator = match Coordinator::new(ENGINE_CONFIG) {
        Ok(coordinator) => COORDINATOR.init(coordinator),
        Err(error) => panic!("Engine configuration rejected: {}", error),
    };

    // per the Nucleo-F767ZI pinout, the Arduino header's D15/D14 (SCL/SDA) are PB8/PB9
    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = Hertz(ENGINE_CONFIG.bus_clock_hz);
    let bus = I2c::new(
        p.I2C1,
        p.PB8,
        p.PB9,
        Irqs,
        p.DMA1_CH6,
        p.DMA1_CH0,
        i2c_config,
    );
    static BUS: StaticCell<SharedBus> = StaticCell::new();
    let bus: &'static SharedBus = BUS.init(Mutex::new(bus));

    static HALS: StaticCell<[Hal; DEVICE_CNT]> = StaticCell::new();
    let hals: &'static [Hal; DEVICE_CNT] = HALS.init(core::array::from_fn(|_| TransferHal::new()));

    for (device, config) in DEVICE_CONFIGS.iter().enumerate() {
        let mut driver = I2cDac::new(BusDevice::new(bus));
        if let Err(error) = coordinator.initialize_device(device, &mut driver, config).await {
            // the device stays dirty, so the worker keeps trying once it is running
            warn!("Device {} did not initialize: {}", device, error);
        }

        match config.mode {
            WriteMode::Blocking => {
                unwrap!(spawner.spawn(dac::blocking_worker(coordinator, device, driver)));
            }
            WriteMode::Async => {
                let hal = &hals[device];
                unwrap!(hal.init(BusConfig::from_engine(&ENGINE_CONFIG, config.address)));
                unwrap!(spawner.spawn(dac::transfer_runner(hal, BusDevice::new(bus))));

                let manager = AsyncDacManager::new(hal, config.codec, &OPERATIONS[device]);
                let worker = unwrap!(AsyncWorker::new(coordinator, device, manager));
                unwrap!(spawner.spawn(dac::async_worker(coordinator, worker)));
            }
        }
    }

    unwrap!(spawner.spawn(engine::buffer_transfer(coordinator)));
    unwrap!(spawner.spawn(engine::refresh(coordinator)));

    let button = ExtiInput::new(p.PC13, p.EXTI13, Pull::None);
    unwrap!(spawner.spawn(engine::calibration_input(button, coordinator)));

    let red_led = Output::new(p.PB14, Level::Low, Speed::Low);
    unwrap!(spawner.spawn(status::display_bus_errors(red_led, coordinator)));
}
