// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! SoftDevice backed [`Transport`] and the uptime clock.

use crate::server::PipeHandles;
use crate::{ADVERTISE, CONNECTION, STOP_ADVERTISING};
use consts::PIPE_BATTERY_VOLTAGE_TX;
use defmt::{debug, warn};
use embassy_time::Instant;
use heapless::Deque;
use host_protocol::TimingParams;
use monitor::{Clock, Event, PipeId, Transport, TransportError};
use nrf_softdevice::ble::gatt_server::{self, indicate_value, notify_value, IndicateValueError, NotifyValueError};
use nrf_softdevice::ble::{Connection, SetConnParamsError};
use nrf_softdevice::raw::ble_gap_conn_params_t;
use nrf_softdevice::{RawError, Softdevice};

// Get connection interval with macro
// to get 15ms just call ci_ms!(15)
macro_rules! ci_ms {
    ($a:expr) => {{
        let ms = ($a as f32 * 1000.0) / 1250.0;
        debug!("ci units: {}", ms);
        ms as u16
    }};
}

/// No link to send on.
const STATUS_DISCONNECTED: u8 = 0xFF;
/// Pipe without a characteristic behind it.
const STATUS_NO_HANDLE: u8 = 0xFE;

/// Events the transport produces itself, drained by the event loop.
const LOCAL_EVENTS: usize = 16;

pub struct SoftdeviceTransport {
    sd: &'static Softdevice,
    handles: PipeHandles,
    events: Deque<Event, LOCAL_EVENTS>,
    /// Pipes the SoftDevice refused for lack of buffers since the last tick
    congested: Deque<PipeId, LOCAL_EVENTS>,
}

impl SoftdeviceTransport {
    pub fn new(sd: &'static Softdevice, handles: PipeHandles) -> Self {
        Self {
            sd,
            handles,
            events: Deque::new(),
            congested: Deque::new(),
        }
    }

    pub fn take_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Congestion lasts until the SoftDevice had a connection event to drain
    /// its queue, so every congested pipe is released once per tick.
    pub fn release_congestion(&mut self) {
        while let Some(pipe) = self.congested.pop_front() {
            self.push_event(Event::Cleared(pipe));
        }
    }

    fn push_event(&mut self, event: Event) {
        if self.events.push_back(event).is_err() {
            warn!("Transport event queue full, {:?} lost", event);
        }
    }

    /// Marks `pipe` congested until the next tick and returns the status to report.
    fn congest(&mut self, pipe: PipeId, e: RawError) -> TransportError {
        debug!("SoftDevice busy on pipe {}: {:?}", pipe, e);
        if !self.congested.iter().any(|&p| p == pipe) && self.congested.push_back(pipe).is_ok() {
            self.push_event(Event::Congested(pipe));
        }
        raw_status(e)
    }

    fn connection() -> Result<Connection, TransportError> {
        CONNECTION
            .lock(|c| c.borrow().clone())
            .ok_or(TransportError(STATUS_DISCONNECTED))
    }
}

fn raw_status(e: RawError) -> TransportError {
    TransportError(e as u32 as u8)
}

impl Transport for SoftdeviceTransport {
    fn send(&mut self, pipe: PipeId, payload: &[u8]) -> Result<(), TransportError> {
        let handle = self.handles.handle_for(pipe).ok_or(TransportError(STATUS_NO_HANDLE))?;
        if pipe == PIPE_BATTERY_VOLTAGE_TX {
            // Keep the readable value current as well
            if let Err(e) = gatt_server::set_value(self.sd, handle, payload) {
                warn!("Setting voltage value failed: {:?}", e);
            }
            let conn = Self::connection()?;
            return match notify_value(&conn, handle, payload) {
                Ok(()) => Ok(()),
                Err(NotifyValueError::Raw(RawError::Resources)) => Err(self.congest(pipe, RawError::Resources)),
                Err(NotifyValueError::Raw(e)) => Err(raw_status(e)),
                Err(NotifyValueError::Disconnected) => Err(TransportError(STATUS_DISCONNECTED)),
            };
        }

        // History pipes are acknowledged by the host's indication confirmation
        let conn = Self::connection()?;
        match indicate_value(&conn, handle, payload) {
            Ok(()) => Ok(()),
            Err(IndicateValueError::Raw(e @ (RawError::Resources | RawError::Busy))) => Err(self.congest(pipe, e)),
            Err(IndicateValueError::Raw(e)) => Err(raw_status(e)),
            Err(IndicateValueError::Disconnected) => Err(TransportError(STATUS_DISCONNECTED)),
        }
    }

    fn apply_timing(&mut self, timing: &TimingParams) -> Result<(), TransportError> {
        let conn = Self::connection()?;
        let params = ble_gap_conn_params_t {
            min_conn_interval: ci_ms!(timing.conn_interval_ms),
            max_conn_interval: ci_ms!(timing.conn_interval_ms),
            slave_latency: timing.slave_latency,
            // 10 ms units
            conn_sup_timeout: timing.timeout_ms / 10,
        };
        conn.set_conn_params(params).map_err(|e| {
            warn!("set_conn_params error - {:?}", e);
            match e {
                SetConnParamsError::Raw(e) => raw_status(e),
                SetConnParamsError::Disconnected => TransportError(STATUS_DISCONNECTED),
            }
        })
    }

    fn start_advertising(&mut self) -> Result<(), TransportError> {
        ADVERTISE.signal(());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        match CONNECTION.lock(|c| c.borrow().clone()) {
            Some(conn) => conn.disconnect().map_err(|_| TransportError(STATUS_DISCONNECTED)),
            None => {
                STOP_ADVERTISING.signal(());
                Ok(())
            }
        }
    }
}

/// Seconds since boot.
pub struct UptimeClock;

impl Clock for UptimeClock {
    fn now(&self) -> u32 {
        Instant::now().as_secs() as u32
    }
}
