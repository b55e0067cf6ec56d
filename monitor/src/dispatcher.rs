// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use host_protocol::{Command, TimingParams};

use crate::error::Error;
use crate::history::{HistoryStore, VoltageSample};
use crate::publisher::TelemetryPublisher;
use crate::session::{ConnectionState, SessionState, Trigger};
use crate::transport::Transport;

/// Runs one decoded host command against the monitor state.
///
/// Everything is validated and the transport request issued before any state
/// is written, so a failed command leaves the monitor untouched.
pub struct CommandDispatcher<'a, T> {
    pub session: &'a mut SessionState,
    pub history: &'a mut HistoryStore,
    pub publisher: &'a mut TelemetryPublisher,
    pub transport: &'a mut T,
}

impl<T: Transport> CommandDispatcher<'_, T> {
    /// `now` stamps host supplied voltages.
    pub fn execute(self, command: Command, now: u32) -> Result<(), Error> {
        match command {
            Command::StartAdvertising => self.start_advertising(),
            Command::ChangeTiming(timing) => self.change_timing(timing),
            Command::Disconnect => self.disconnect(),
            Command::SetDataVoltage(value) => {
                let sample = VoltageSample::new(now, value.millivolts);
                info!("Host set voltage to {} mV", sample.millivolts);
                if self.history.record(sample) {
                    self.publisher.offer_voltage(sample);
                }
                Ok(())
            }
        }
    }

    fn start_advertising(self) -> Result<(), Error> {
        let next = self.session.next(Trigger::StartAdvertising)?;
        self.transport.start_advertising()?;
        self.session.enter(next);
        Ok(())
    }

    fn change_timing(self, timing: TimingParams) -> Result<(), Error> {
        if !timing.within_radio_limits() || !timing.is_consistent() {
            warn!("Rejecting connection timing {:?}", timing);
            return Err(Error::InvalidTimingParameters);
        }
        self.session.next(Trigger::ChangeTiming)?;
        self.transport.apply_timing(&timing)?;
        self.session.set_timing(timing);
        info!(
            "Connection timing: interval {} ms, latency {}, timeout {} ms",
            timing.conn_interval_ms, timing.slave_latency, timing.timeout_ms
        );
        Ok(())
    }

    fn disconnect(self) -> Result<(), Error> {
        if self.session.state() == ConnectionState::Idle {
            debug!("Disconnect while idle");
            return Ok(());
        }
        let next = self.session.next(Trigger::Disconnect)?;
        self.transport.disconnect()?;
        self.session.enter(next);
        self.publisher.reset();
        Ok(())
    }
}
