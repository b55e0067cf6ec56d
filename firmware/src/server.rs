// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::config::{ADV_INTERVAL, ADV_RETRY_SECS, HVN_TX_QUEUE_SIZE};
use crate::{ADVERTISE, COMMANDS, CONNECTION, EVENTS, STOP_ADVERTISING};
use consts::{
    DEVICE_NAME, PIPE_BATTERY_VOLTAGE_TX, PIPE_HISTORY_DAILY_TX_ACK, PIPE_HISTORY_HOURLY_TX_ACK,
    PIPE_HISTORY_MINUTELY_TX_ACK, SERVICES_LIST, SHORT_NAME, TRANSPORT_MTU,
};
use core::mem;
use defmt::{debug, error, info, warn};
use embassy_time::{Duration, Timer};
use futures::future::{select, Either};
use futures::pin_mut;
use heapless::Vec;
use host_protocol::{decode_millivolts, Command, VoltageOverride, MAX_FRAME_SIZE, TELEMETRY_PAYLOAD_SIZE};
use monitor::{Event, PipeId};
use nrf_softdevice::ble::advertisement_builder::{ExtendedAdvertisementBuilder, ExtendedAdvertisementPayload, Flag, ServiceList};
use nrf_softdevice::ble::gatt_server::{RegisterError, Service, WriteOp};
use nrf_softdevice::ble::{gatt_server, peripheral, Connection};
use nrf_softdevice::gatt_service;
use nrf_softdevice::{raw, Softdevice};

/// Frame as written by the host, token first.
pub type Frame = Vec<u8, MAX_FRAME_SIZE>;

#[gatt_service(uuid = "DE0E0001-F0AF-4D38-9A1A-33E88519D3B2")]
pub struct VoltageMonitorService {
    /// Latest voltage; a write replaces it with a host supplied value
    #[characteristic(uuid = "DE0E0100-F0AF-4D38-9A1A-33E88519D3B2", read, write, notify)]
    voltage: Vec<u8, TELEMETRY_PAYLOAD_SIZE>,

    /// History entries, one indication per entry
    #[characteristic(uuid = "DE0E0200-F0AF-4D38-9A1A-33E88519D3B2", indicate)]
    minutely: Vec<u8, TELEMETRY_PAYLOAD_SIZE>,

    #[characteristic(uuid = "DE0E0300-F0AF-4D38-9A1A-33E88519D3B2", indicate)]
    hourly: Vec<u8, TELEMETRY_PAYLOAD_SIZE>,

    #[characteristic(uuid = "DE0E0400-F0AF-4D38-9A1A-33E88519D3B2", indicate)]
    daily: Vec<u8, TELEMETRY_PAYLOAD_SIZE>,

    #[characteristic(uuid = "DE0E0500-F0AF-4D38-9A1A-33E88519D3B2", write, write_without_response)]
    control: Frame,
}

/// Value handles of the characteristics backing each outgoing pipe.
#[derive(Clone, Copy)]
pub struct PipeHandles {
    pub voltage: u16,
    pub minutely: u16,
    pub hourly: u16,
    pub daily: u16,
}

impl PipeHandles {
    pub fn handle_for(&self, pipe: PipeId) -> Option<u16> {
        match pipe {
            PIPE_BATTERY_VOLTAGE_TX => Some(self.voltage),
            PIPE_HISTORY_MINUTELY_TX_ACK => Some(self.minutely),
            PIPE_HISTORY_HOURLY_TX_ACK => Some(self.hourly),
            PIPE_HISTORY_DAILY_TX_ACK => Some(self.daily),
            _ => None,
        }
    }

    /// History pipe indicated through `handle`.
    pub fn history_pipe_for(&self, handle: u16) -> Option<PipeId> {
        match handle {
            h if h == self.minutely => Some(PIPE_HISTORY_MINUTELY_TX_ACK),
            h if h == self.hourly => Some(PIPE_HISTORY_HOURLY_TX_ACK),
            h if h == self.daily => Some(PIPE_HISTORY_DAILY_TX_ACK),
            _ => None,
        }
    }
}

impl VoltageMonitorService {
    fn handle(&self, event: VoltageMonitorServiceEvent) {
        match event {
            VoltageMonitorServiceEvent::VoltageWrite(data) => {
                let Some(millivolts) = decode_millivolts(&data) else {
                    warn!("Voltage write {=[u8]:#X} ignored", data.as_slice());
                    return;
                };
                let command = Command::SetDataVoltage(VoltageOverride { millivolts });
                let mut buf = [0u8; MAX_FRAME_SIZE];
                match command.to_frame(&mut buf) {
                    Ok(frame) => forward(frame),
                    Err(e) => error!("Encoding voltage override failed: {:?}", e),
                }
            }
            VoltageMonitorServiceEvent::ControlWrite(frame) => forward(&frame),
            VoltageMonitorServiceEvent::VoltageCccdWrite { notifications } => {
                info!("Voltage notifications: {}", notifications)
            }
            VoltageMonitorServiceEvent::MinutelyCccdWrite { indications } => {
                info!("Minutely history indications: {}", indications)
            }
            VoltageMonitorServiceEvent::HourlyCccdWrite { indications } => {
                info!("Hourly history indications: {}", indications)
            }
            VoltageMonitorServiceEvent::DailyCccdWrite { indications } => {
                info!("Daily history indications: {}", indications)
            }
        }
    }

    pub fn handles(&self) -> PipeHandles {
        PipeHandles {
            voltage: self.voltage_value_handle,
            minutely: self.minutely_value_handle,
            hourly: self.hourly_value_handle,
            daily: self.daily_value_handle,
        }
    }
}

fn forward(frame: &[u8]) {
    let Ok(frame) = Frame::from_slice(frame) else {
        warn!("Command frame of {} bytes dropped", frame.len());
        return;
    };
    if COMMANDS.try_send(frame).is_err() {
        warn!("Command queue full, frame dropped");
    }
}

pub struct Server {
    pub monitor: VoltageMonitorService,
}

pub enum ServerEvent {
    Monitor(VoltageMonitorServiceEvent),
    /// The host confirmed the indication sent on this value handle
    Confirmed(u16),
}

impl Server {
    pub fn new(sd: &mut Softdevice) -> Result<Self, RegisterError> {
        Ok(Self {
            monitor: VoltageMonitorService::new(sd)?,
        })
    }

    fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Monitor(e) => self.monitor.handle(e),
            ServerEvent::Confirmed(handle) => match self.monitor.handles().history_pipe_for(handle) {
                Some(pipe) => {
                    if EVENTS.try_send(Event::Acknowledged(pipe)).is_err() {
                        warn!("Event queue full, acknowledgement on pipe {} lost", pipe);
                    }
                }
                None => debug!("Confirmation on unknown handle {}", handle),
            },
        }
    }
}

impl gatt_server::Server for Server {
    type Event = ServerEvent;

    fn on_write(&self, _conn: &Connection, handle: u16, _op: WriteOp, _offset: usize, data: &[u8]) -> Option<ServerEvent> {
        Service::on_write(&self.monitor, handle, data).map(ServerEvent::Monitor)
    }

    fn on_indicate_confirm(&self, _conn: &Connection, handle: u16) -> Option<ServerEvent> {
        Some(ServerEvent::Confirmed(handle))
    }
}

pub fn initialize_sd() -> &'static mut Softdevice {
    let config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_XTAL as u8,
            rc_ctiv: 0,
            rc_temp_ctiv: 0,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_20_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        // ATT header is 3 bytes on top of the payload
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t {
            att_mtu: (TRANSPORT_MTU + 3) as u16,
        }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: DEVICE_NAME.as_ptr() as _,
            current_len: DEVICE_NAME.len() as u16,
            max_len: DEVICE_NAME.len() as u16,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(raw::BLE_GATTS_VLOC_STACK as u8),
        }),
        conn_gatts: Some(raw::ble_gatts_conn_cfg_t {
            hvn_tx_queue_size: HVN_TX_QUEUE_SIZE,
        }),

        ..Default::default()
    };

    Softdevice::enable(&config)
}

/// Advertises whenever the monitor asks for it and serves one link at a time.
#[embassy_executor::task]
pub async fn ble_task(sd: &'static Softdevice, server: &'static Server) -> ! {
    static ADV_DATA: ExtendedAdvertisementPayload = ExtendedAdvertisementBuilder::new()
        .flags(&[Flag::GeneralDiscovery, Flag::LE_Only])
        .services_128(ServiceList::Complete, &SERVICES_LIST)
        .short_name(SHORT_NAME)
        .build();

    static SCAN_DATA: ExtendedAdvertisementPayload = ExtendedAdvertisementBuilder::new().full_name(DEVICE_NAME).build();

    let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
        adv_data: &ADV_DATA,
        scan_data: &SCAN_DATA,
    };

    loop {
        ADVERTISE.wait().await;
        STOP_ADVERTISING.reset();
        info!("Advertising");

        let config = peripheral::Config {
            interval: ADV_INTERVAL,
            ..Default::default()
        };
        let adv_fut = peripheral::advertise_connectable(sd, adv, &config);
        let stop_fut = STOP_ADVERTISING.wait();
        pin_mut!(adv_fut);
        pin_mut!(stop_fut);

        let conn = match select(adv_fut, stop_fut).await {
            Either::Left((Ok(conn), _)) => conn,
            Either::Left((Err(e), _)) => {
                error!("Advertising failed: {:?}", e);
                // The monitor asks again as soon as it is idle
                Timer::after(Duration::from_secs(ADV_RETRY_SECS)).await;
                EVENTS.send(Event::LinkLost).await;
                continue;
            }
            Either::Right(_) => {
                info!("Advertising stopped");
                continue;
            }
        };

        CONNECTION.lock(|c| c.borrow_mut().replace(conn.clone()));
        EVENTS.send(Event::LinkEstablished).await;

        let e = gatt_server::run(&conn, server, |e| server.handle_event(e)).await;
        debug!("gatt_server run exited: {:?}", e);

        CONNECTION.lock(|c| c.borrow_mut().take());
        EVENTS.send(Event::LinkLost).await;
    }
}
