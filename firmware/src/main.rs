// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

mod battery;
mod config;
mod server;
mod transport;

use core::cell::RefCell;
#[cfg(feature = "debug")]
use defmt_rtt as _;
// time driver
use embassy_nrf as _;
use panic_probe as _;

use battery::sampler_task;
use config::{COMMAND_QUEUE_SIZE, EVENT_QUEUE_SIZE, PUBLISH_PERIOD_MS, SAMPLE_QUEUE_SIZE};
use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{select4, Either4};
use embassy_nrf::bind_interrupts;
use embassy_nrf::interrupt::{self, InterruptExt};
use embassy_nrf::saadc::{self, ChannelConfig, Saadc, VddInput};
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker};
use monitor::{Clock, Command, ConnectionState, Error, Event, Monitor, VoltageSample};
use nrf_softdevice::ble::{get_address, Connection};
use nrf_softdevice::Softdevice;
use server::{ble_task, initialize_sd, Frame, Server};
use static_cell::StaticCell;
use transport::{SoftdeviceTransport, UptimeClock};

bind_interrupts!(struct Irqs {
    SAADC => saadc::InterruptHandler;
});

#[cfg(not(feature = "debug"))]
mod dummy_logging {
    #[defmt::global_logger]
    struct Logger;

    unsafe impl defmt::Logger for Logger {
        fn acquire() {}

        unsafe fn flush() {}

        unsafe fn release() {}

        unsafe fn write(_bytes: &[u8]) {}
    }
}

/// Link and acknowledgement events for the monitor
static EVENTS: Channel<ThreadModeRawMutex, Event, EVENT_QUEUE_SIZE> = Channel::new();
/// Command frames written by the host
static COMMANDS: Channel<ThreadModeRawMutex, Frame, COMMAND_QUEUE_SIZE> = Channel::new();
/// Supply voltage samples in millivolts
static SAMPLES: Channel<ThreadModeRawMutex, u16, SAMPLE_QUEUE_SIZE> = Channel::new();

static ADVERTISE: Signal<ThreadModeRawMutex, ()> = Signal::new();
static STOP_ADVERTISING: Signal<ThreadModeRawMutex, ()> = Signal::new();

static CONNECTION: Mutex<ThreadModeRawMutex, RefCell<Option<Connection>>> = Mutex::new(RefCell::new(None));

static SERVER: StaticCell<Server> = StaticCell::new();

type VoltageMonitor = Monitor<SoftdeviceTransport, UptimeClock>;

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    info!("SD is running");
    sd.run().await
}

fn report(result: Result<(), Error>) {
    if let Err(e) = result {
        warn!("Monitor rejected event: {:?}", e);
    }
}

/// Feeds the events the transport raised while sending back into the monitor.
fn drain_transport_events(monitor: &mut VoltageMonitor) {
    while let Some(event) = monitor.transport_mut().take_event() {
        report(monitor.handle_event(event));
    }
}

/// The monitor stays reachable: once it is idle and the old link is gone it advertises again.
fn keep_advertising(monitor: &mut VoltageMonitor) {
    let link_down = CONNECTION.lock(|c| c.borrow().is_none());
    if link_down && monitor.session().state() == ConnectionState::Idle {
        if let Err(e) = monitor.execute(Command::StartAdvertising) {
            warn!("Restarting advertising failed: {:?}", e);
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut conf = embassy_nrf::config::Config::default();
    conf.hfclk_source = embassy_nrf::config::HfclkSource::ExternalXtal;
    conf.lfclk_source = embassy_nrf::config::LfclkSource::ExternalXtal;

    conf.gpiote_interrupt_priority = interrupt::Priority::P2;
    conf.time_interrupt_priority = interrupt::Priority::P2;

    let p = embassy_nrf::init(conf);

    let saadc = Saadc::new(p.SAADC, Irqs, saadc::Config::default(), [ChannelConfig::single_ended(VddInput)]);
    // set priority to avoid collisions with softdevice
    interrupt::SAADC.set_priority(interrupt::Priority::P3);

    let sd = initialize_sd();
    let server: &'static Server = SERVER.init(unwrap!(Server::new(sd), "Creating the GATT server failed"));
    let sd: &'static Softdevice = sd;
    unwrap!(spawner.spawn(softdevice_task(sd)), "Spawning the softdevice failed");

    let mut address = get_address(sd).bytes();
    address.reverse();
    info!("Address : {=[u8;6]:#X}", address);

    unwrap!(spawner.spawn(ble_task(sd, server)), "Spawning the BLE task failed");
    unwrap!(spawner.spawn(sampler_task(saadc)), "Spawning the sampler failed");
    info!("Init tasks");

    let mut monitor = Monitor::new(SoftdeviceTransport::new(sd, server.monitor.handles()), UptimeClock);
    keep_advertising(&mut monitor);

    let mut publish = Ticker::every(Duration::from_millis(PUBLISH_PERIOD_MS));
    loop {
        match select4(EVENTS.receive(), COMMANDS.receive(), SAMPLES.receive(), publish.next()).await {
            Either4::First(event) => report(monitor.handle_event(event)),
            Either4::Second(frame) => {
                if let Err(e) = monitor.dispatch_frame(&frame) {
                    warn!("Command failed: {:?}", e);
                }
            }
            Either4::Third(millivolts) => {
                let now = monitor.clock().now();
                monitor.ingest_sample(VoltageSample::new(now, millivolts))
            }
            Either4::Fourth(()) => monitor.transport_mut().release_congestion(),
        }
        drain_transport_events(&mut monitor);
        keep_advertising(&mut monitor);

        match monitor.publish_tick() {
            Ok(_) | Err(Error::NotConnected) => {}
            Err(e) => warn!("Publishing failed: {:?}", e),
        }
        drain_transport_events(&mut monitor);
    }
}
