// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Decides what goes out on the telemetry pipes.
//!
//! The voltage pipe carries only the freshest value. Each history pipe walks
//! its buffer oldest first, one payload in flight at a time, and closes every
//! pass with [`HISTORY_END_MARKER`].

use heapless::Vec;
use host_protocol::{encode_millivolts, HISTORY_END_MARKER};

use crate::error::Error;
use crate::history::{Granularity, HistoryStore, VoltageSample};
use crate::registry::{PipeId, PipeRegistry, VOLTAGE_PIPE};
use crate::session::SessionState;
use crate::transport::Transport;

/// Biggest payload any pipe can carry.
pub const MAX_PAYLOAD: usize = consts::TRANSPORT_MTU;

/// Payload waiting for its pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransmission {
    pub pipe: PipeId,
    pub payload: Vec<u8, MAX_PAYLOAD>,
}

impl PendingTransmission {
    /// Checks `payload` against the size limit of `pipe`.
    pub fn new(registry: &PipeRegistry, pipe: PipeId, payload: &[u8]) -> Result<Self, Error> {
        let descriptor = registry.describe(pipe)?;
        if payload.len() > descriptor.max_payload_bytes {
            return Err(Error::MalformedPayload);
        }
        let payload = Vec::from_slice(payload).map_err(|_| Error::MalformedPayload)?;
        Ok(Self { pipe, payload })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum InFlight {
    /// History entry with this sequence number
    Entry(u64),
    /// End marker sent once the buffer held this many writes
    EndMarker(u64),
}

#[derive(Debug, Clone)]
struct HistoryChannel {
    granularity: Granularity,
    pipe: PipeId,
    /// Sequence number of the next entry to hand off
    next_seq: u64,
    in_flight: Option<InFlight>,
    congested: bool,
    /// Write count at which the last end marker was acknowledged
    end_delivered: Option<u64>,
}

impl HistoryChannel {
    fn new(registry: &PipeRegistry, granularity: Granularity) -> Self {
        Self {
            granularity,
            pipe: registry.history_pipe(granularity),
            next_seq: 0,
            in_flight: None,
            congested: false,
            end_delivered: None,
        }
    }

    fn reset(&mut self) {
        self.next_seq = 0;
        self.in_flight = None;
        self.congested = false;
        self.end_delivered = None;
    }

    /// What to send next, if anything.
    fn next_payload(&mut self, history: &HistoryStore) -> Option<(InFlight, [u8; 2])> {
        if self.in_flight.is_some() || self.congested {
            return None;
        }
        let view = history.view(self.granularity);
        if self.next_seq < view.first_seq() {
            // Entries were evicted before they could be delivered
            debug!(
                "{:?} history skips from {} to {}",
                self.granularity,
                self.next_seq,
                view.first_seq()
            );
            self.next_seq = view.first_seq();
        }
        if let Some(sample) = view.get(self.next_seq) {
            return Some((InFlight::Entry(self.next_seq), encode_millivolts(sample.millivolts)));
        }
        if self.end_delivered != Some(view.written()) {
            return Some((InFlight::EndMarker(view.written()), HISTORY_END_MARKER));
        }
        None
    }

    fn acknowledge(&mut self) {
        match self.in_flight.take() {
            Some(InFlight::Entry(seq)) => self.next_seq = seq + 1,
            Some(InFlight::EndMarker(written)) => self.end_delivered = Some(written),
            None => debug!("Ignoring acknowledgement on pipe {} with nothing in flight", self.pipe),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    registry: PipeRegistry,
    /// Coalesced latest voltage
    voltage: Option<PendingTransmission>,
    voltage_congested: bool,
    history: [HistoryChannel; 3],
}

impl TelemetryPublisher {
    pub fn new(registry: PipeRegistry) -> Self {
        Self {
            registry,
            voltage: None,
            voltage_congested: false,
            history: Granularity::ALL.map(|granularity| HistoryChannel::new(&registry, granularity)),
        }
    }

    /// Replaces any voltage still waiting to go out with `sample`.
    pub fn offer_voltage(&mut self, sample: VoltageSample) {
        match PendingTransmission::new(&self.registry, VOLTAGE_PIPE, &encode_millivolts(sample.millivolts)) {
            Ok(pending) => self.voltage = Some(pending),
            Err(e) => error!("Voltage payload rejected: {:?}", e),
        }
    }

    /// Latest voltage not yet handed to the transport.
    pub fn pending_voltage(&self) -> Option<&PendingTransmission> {
        self.voltage.as_ref()
    }

    /// Forgets every pending value, cursor and congestion flag.
    pub fn reset(&mut self) {
        self.voltage = None;
        self.voltage_congested = false;
        for channel in self.history.iter_mut() {
            channel.reset();
        }
    }

    pub fn on_acknowledge(&mut self, pipe: PipeId) -> Result<(), Error> {
        let descriptor = self.registry.describe(pipe)?;
        match self.channel_mut(pipe) {
            Some(channel) => channel.acknowledge(),
            None => debug!("Acknowledgement on {:?} pipe {} ignored", descriptor.direction, pipe),
        }
        Ok(())
    }

    pub fn on_congested(&mut self, pipe: PipeId) -> Result<(), Error> {
        self.set_congested(pipe, true)
    }

    pub fn on_clear(&mut self, pipe: PipeId) -> Result<(), Error> {
        self.set_congested(pipe, false)
    }

    fn set_congested(&mut self, pipe: PipeId, congested: bool) -> Result<(), Error> {
        self.registry.describe(pipe)?;
        debug!("Pipe {} congested: {}", pipe, congested);
        if pipe == VOLTAGE_PIPE {
            self.voltage_congested = congested;
        } else if let Some(channel) = self.channel_mut(pipe) {
            channel.congested = congested;
        }
        Ok(())
    }

    fn channel_mut(&mut self, pipe: PipeId) -> Option<&mut HistoryChannel> {
        self.history.iter_mut().find(|channel| channel.pipe == pipe)
    }

    /// Hands every eligible payload to `transport`; returns how many were accepted.
    ///
    /// Send failures keep the payload for the next call.
    pub fn publish<T: Transport>(
        &mut self,
        session: &SessionState,
        history: &HistoryStore,
        transport: &mut T,
    ) -> Result<usize, Error> {
        if !session.is_connected() {
            return Err(Error::NotConnected);
        }
        let mut sent = 0;

        if !self.voltage_congested {
            if let Some(pending) = self.voltage.as_ref() {
                match transport.send(pending.pipe, &pending.payload) {
                    Ok(()) => {
                        self.voltage = None;
                        sent += 1;
                    }
                    Err(e) => warn!("Voltage send failed, keeping it: {:?}", e),
                }
            }
        }

        for channel in self.history.iter_mut() {
            let Some((in_flight, payload)) = channel.next_payload(history) else {
                continue;
            };
            match transport.send(channel.pipe, &payload) {
                Ok(()) => {
                    trace!("Pipe {} sent {:?}", channel.pipe, in_flight);
                    channel.in_flight = Some(in_flight);
                    sent += 1;
                }
                Err(e) => warn!("History send on pipe {} failed: {:?}", channel.pipe, e),
            }
        }
        Ok(sent)
    }
}
