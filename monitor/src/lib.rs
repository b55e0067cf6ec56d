// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Core of the battery voltage monitor.
//!
//! [`Monitor`] owns the voltage history, the connection state and the
//! telemetry cursors. It is driven from a single event loop: feed it samples,
//! host commands and radio events, and call [`Monitor::publish_tick`] once per
//! iteration to let it push data to the host.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod dispatcher;
pub mod error;
pub mod history;
pub mod publisher;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

pub use error::{CommandError, Error};
pub use history::{Granularity, HistoryStore, VoltageSample};
pub use host_protocol::{Command, CommandToken, TimingParams, VoltageOverride};
pub use publisher::TelemetryPublisher;
pub use registry::{PipeDescriptor, PipeId, PipeRegistry};
pub use session::{ConnectionState, SessionState};
pub use transport::{Clock, Event, Transport, TransportError};

use dispatcher::CommandDispatcher;
use session::Trigger;

pub struct Monitor<T, C> {
    registry: PipeRegistry,
    history: HistoryStore,
    session: SessionState,
    publisher: TelemetryPublisher,
    transport: T,
    clock: C,
}

impl<T: Transport, C: Clock> Monitor<T, C> {
    pub fn new(transport: T, clock: C) -> Self {
        let registry = PipeRegistry::new();
        Self {
            registry,
            history: HistoryStore::new(),
            session: SessionState::new(),
            publisher: TelemetryPublisher::new(registry),
            transport,
            clock,
        }
    }

    /// Records a sampled voltage and makes it the next value on the voltage pipe.
    pub fn ingest_sample(&mut self, sample: VoltageSample) {
        trace!("Sample {} mV at {}", sample.millivolts, sample.timestamp);
        if self.history.record(sample) {
            self.publisher.offer_voltage(sample);
        }
    }

    /// Decodes `params` for `token` and runs the command.
    pub fn dispatch(&mut self, token: CommandToken, params: &[u8]) -> Result<(), CommandError> {
        let command = Command::decode(token, params).map_err(|e| {
            warn!("Malformed parameters for {:?}: {:?}", token, e);
            Error::from(e)
        })?;
        self.execute(command)
    }

    /// Runs a `[token, params...]` frame as written by the host.
    pub fn dispatch_frame(&mut self, frame: &[u8]) -> Result<(), CommandError> {
        let command = Command::from_frame(frame).map_err(|e| {
            warn!("Malformed command frame: {:?}", e);
            Error::from(e)
        })?;
        self.execute(command)
    }

    pub fn execute(&mut self, command: Command) -> Result<(), CommandError> {
        debug!("Executing {:?}", command);
        let now = self.clock.now();
        CommandDispatcher {
            session: &mut self.session,
            history: &mut self.history,
            publisher: &mut self.publisher,
            transport: &mut self.transport,
        }
        .execute(command, now)
        .inspect_err(|e| warn!("{:?} failed: {:?}", command.token(), e))
    }

    /// Lets the publisher hand pending payloads to the transport.
    ///
    /// Fails with [`Error::NotConnected`] while there is no link; nothing is
    /// lost and the next tick after connecting picks up where it left off.
    pub fn publish_tick(&mut self) -> Result<usize, Error> {
        self.publisher.publish(&self.session, &self.history, &mut self.transport)
    }

    pub fn handle_event(&mut self, event: Event) -> Result<(), Error> {
        match event {
            Event::Acknowledged(pipe) => {
                if !self.session.is_connected() {
                    self.registry.describe(pipe)?;
                    debug!("Dropping acknowledgement on pipe {} without a link", pipe);
                    return Ok(());
                }
                self.publisher.on_acknowledge(pipe)
            }
            Event::Congested(pipe) => self.publisher.on_congested(pipe),
            Event::Cleared(pipe) => self.publisher.on_clear(pipe),
            Event::LinkEstablished => {
                let next = self.session.next(Trigger::LinkEstablished)?;
                self.session.enter(next);
                if self.publisher.pending_voltage().is_none() {
                    if let Some(latest) = self.history.latest(Granularity::Minutely) {
                        self.publisher.offer_voltage(latest);
                    }
                }
                Ok(())
            }
            Event::LinkLost => {
                let next = self.session.next(Trigger::LinkLost)?;
                self.session.enter(next);
                self.publisher.reset();
                Ok(())
            }
        }
    }

    pub fn registry(&self) -> &PipeRegistry {
        &self.registry
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn publisher(&self) -> &TelemetryPublisher {
        &self.publisher
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Time source used to stamp host supplied voltages.
    pub fn clock(&self) -> &C {
        &self.clock
    }
}
