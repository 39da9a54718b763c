#![no_std]
#![no_main]

mod haldex_can;
mod mcp_can;

use defmt::*;
use embassy_executor::Spawner;
use embassy_stm32::{
    bind_interrupts,
    can::{self, CanConfigurator},
    gpio::{Level, Output, Speed},
    mode::Blocking,
    peripherals::*,
    spi::{self, Spi},
    time::Hertz,
};
use embassy_time::{Delay, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use haldex_core::{
    BusDriver, ControlState, ReadySet, Shared, Telemetry,
    bridge::{self, ChassisPipeline, HaldexPipeline},
    broadcast,
    config::MemoryStore,
    diag::FrameCache,
    mapped::MappedInputs,
    standalone, tasks,
};
use mcp2515::{CanSpeed, McpSpeed, Settings, regs::OpMode};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use haldex_can::HaldexCan;
use mcp_can::McpCan;

// bind can interrupts
bind_interrupts!(struct Irqs {
    TIM16_FDCAN_IT0 => can::IT0InterruptHandler<FDCAN1>;
    TIM17_FDCAN_IT1 => can::IT1InterruptHandler<FDCAN1>;
});

const CAN_BITRATE: u32 = 500_000;

type ChassisCan = McpCan<ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>>;
type Driver = BusDriver<ChassisCan, HaldexCan<'static>>;
type Frames = FrameCache<64>;

static STATE: StaticCell<ControlState> = StaticCell::new();
static TELEMETRY: StaticCell<Telemetry> = StaticCell::new();
static MAPPED: StaticCell<MappedInputs> = StaticCell::new();
static FRAMES: StaticCell<Frames> = StaticCell::new();
static DRIVER: StaticCell<Driver> = StaticCell::new();

#[embassy_executor::task]
async fn chassis_bridge(driver: &'static Driver, shared: Shared<'static>, frames: &'static Frames) {
    bridge::run(ChassisPipeline::new(), driver, shared, frames).await
}

#[embassy_executor::task]
async fn haldex_bridge(driver: &'static Driver, shared: Shared<'static>, frames: &'static Frames) {
    bridge::run(HaldexPipeline::new(), driver, shared, frames).await
}

#[embassy_executor::task]
async fn status_broadcast(driver: &'static Driver, shared: Shared<'static>, frames: &'static Frames) {
    broadcast::run(driver, shared, frames).await
}

#[embassy_executor::task]
async fn standalone_frames(driver: &'static Driver, shared: Shared<'static>, frames: &'static Frames) {
    standalone::run(driver, shared, frames).await
}

#[embassy_executor::task]
async fn bus_recovery(driver: &'static Driver, telemetry: &'static Telemetry) {
    tasks::recovery(driver, telemetry).await
}

#[embassy_executor::task]
async fn persistence(state: &'static ControlState, mut store: MemoryStore) {
    tasks::persistence(state, &mut store).await
}

#[embassy_executor::task]
async fn status_log(shared: Shared<'static>) {
    tasks::status_log(shared).await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_stm32::init(Default::default());
    info!("Launching");

    // -- Haldex side: native FDCAN
    let can_config = CanConfigurator::new(p.FDCAN1, p.PA11, p.PA12, Irqs);

    // set standby pin to low
    let _can_standby = Output::new(p.PA10, Level::Low, Speed::Low);

    let haldex = HaldexCan::new(can_config, CAN_BITRATE);

    // -- chassis side: MCP2515 on SPI1
    let mut spi_config = spi::Config::default();
    spi_config.frequency = Hertz(4_000_000);
    let spi_bus = Spi::new_blocking(p.SPI1, p.PA5, p.PA7, p.PA6, spi_config);
    let cs = Output::new(p.PA4, Level::High, Speed::VeryHigh);
    let spi = unwrap!(ExclusiveDevice::new(spi_bus, cs, Delay));

    let (chassis, chassis_ready) = McpCan::new(spi, Settings {
        mode: OpMode::Normal,
        can_speed: CanSpeed::Kbps500,
        mcp_speed: McpSpeed::MHz8,
        clkout_en: false,
    });

    let driver = DRIVER.init(BusDriver::new(chassis, haldex, ReadySet { chassis: chassis_ready, haldex: true }));

    let shared = Shared {
        state: STATE.init(ControlState::new()),
        telemetry: TELEMETRY.init(Telemetry::new()),
        mapped: MAPPED.init(MappedInputs::new()),
    };
    let frames = FRAMES.init(FrameCache::new());

    let mut store = MemoryStore::new();
    tasks::restore(shared.state, &mut store);

    unwrap!(spawner.spawn(haldex_bridge(driver, shared, frames)));
    unwrap!(spawner.spawn(chassis_bridge(driver, shared, frames)));
    unwrap!(spawner.spawn(standalone_frames(driver, shared, frames)));
    unwrap!(spawner.spawn(status_broadcast(driver, shared, frames)));
    unwrap!(spawner.spawn(bus_recovery(driver, shared.telemetry)));
    unwrap!(spawner.spawn(persistence(shared.state, store)));
    unwrap!(spawner.spawn(status_log(shared)));

    let mut led = Output::new(p.PA2, Level::High, Speed::Low);

    loop {
        led.set_high();
        Timer::after_millis(1000).await;

        led.set_low();
        Timer::after_millis(1000).await;
    }
}
