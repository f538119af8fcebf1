//! With no new values, the periodic refresh writes every device once per interval.

mod common;

use common::{advance, finished, serial, settle};
use cv_fanout_lib::{
    codec::{Codec, Register16},
    configuration::{DeviceConfig, EngineConfig, WriteMode},
    coordinator::UpdateCoordinator,
    device::{
        Dac, I2cDac,
        loopback::{LoopbackBus, LoopbackProbe},
    },
};
use embassy_futures::{
    block_on,
    join::{join3, join4},
    select::select,
};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Duration;

type M = CriticalSectionRawMutex;
type Coordinator = UpdateCoordinator<M, 3, 4>;

fn codec() -> Codec {
    Register16::new(0, 4, 5_000).into()
}

fn device_config(address: u8) -> DeviceConfig {
    DeviceConfig {
        address,
        codec: codec(),
        mode: WriteMode::Blocking,
    }
}

#[test]
fn one_write_per_device_per_interval() {
    let _serial = serial();
    let coordinator = Coordinator::new(EngineConfig::default()).unwrap();
    let probes: [LoopbackProbe<M>; 3] = Default::default();
    let [mut first, mut second, mut third] =
        core::array::from_fn(|i| I2cDac::new(LoopbackBus::new(&probes[i], codec())));
    for (address, dac) in (0x20..).zip([&mut first, &mut second, &mut third]) {
        block_on(dac.initialize(&device_config(address))).unwrap();
    }

    let history = finished(block_on(select(
        join4(
            coordinator.run_worker(0, &mut first),
            coordinator.run_worker(1, &mut second),
            coordinator.run_worker(2, &mut third),
            coordinator.run_refresh(),
        ),
        async {
            settle().await;
            let mut history = [[0; 3]; 11];
            history[0] = core::array::from_fn(|i| probes[i].frames());
            for interval in 1..=10 {
                advance(Duration::from_millis(99)).await;
                let early: [u32; 3] = core::array::from_fn(|i| probes[i].frames());
                assert_eq!(
                    history[interval - 1],
                    early,
                    "No write is due before the interval ends"
                );
                advance(Duration::from_millis(1)).await;
                history[interval] = core::array::from_fn(|i| probes[i].frames());
            }
            history
        },
    )));

    for (interval, frames) in history.iter().enumerate() {
        let expected = interval as u32 + 1;
        assert_eq!(
            [expected; 3],
            *frames,
            "Expected one start-up write plus one per elapsed interval"
        );
    }
}

#[test]
fn a_stuck_device_does_not_hold_up_the_others() {
    let _serial = serial();
    let coordinator = UpdateCoordinator::<M, 2, 4>::new(EngineConfig::default()).unwrap();
    let stuck = LoopbackProbe::<M>::new();
    let healthy = LoopbackProbe::<M>::new();
    let mut stuck_dac = I2cDac::new(LoopbackBus::new(&stuck, codec()));
    let mut healthy_dac = I2cDac::new(LoopbackBus::new(&healthy, codec()));
    block_on(stuck_dac.initialize(&device_config(0x20))).unwrap();
    block_on(healthy_dac.initialize(&device_config(0x21))).unwrap();
    // the bus stops answering once the device is up
    stuck.set_stalled(true);

    block_on(select(
        join3(
            coordinator.run_worker(0, &mut stuck_dac),
            coordinator.run_worker(1, &mut healthy_dac),
            coordinator.run_refresh(),
        ),
        advance(Duration::from_millis(1_000)),
    ));

    assert_eq!(0, stuck.frames());
    assert!(coordinator.state(0).unwrap().is_dirty());
    assert_eq!(11, healthy.frames(), "Expected the start-up write plus ten refreshes");
    assert!(!coordinator.state(1).unwrap().is_dirty());
}
