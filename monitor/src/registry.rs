// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Read-only view of the pipe table generated for the radio coprocessor.

use consts::{PipeMode, PipeSetup, NUMBER_OF_PIPES, PIPE_TABLE};

use crate::error::Error;
use crate::history::Granularity;

/// Pipe identifier as numbered by the radio coprocessor.
pub type PipeId = u8;

/// Pipe carrying the latest battery voltage.
pub const VOLTAGE_PIPE: PipeId = consts::PIPE_BATTERY_VOLTAGE_TX;
/// Pipe the host writes voltage overrides to.
pub const VOLTAGE_SET_PIPE: PipeId = consts::PIPE_BATTERY_VOLTAGE_SET;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    DeviceToHost,
    HostToDevice,
    AcknowledgedDeviceToHost,
}

impl Direction {
    pub const fn from_mode(mode: PipeMode) -> Self {
        match mode {
            PipeMode::Tx => Direction::DeviceToHost,
            PipeMode::Set => Direction::HostToDevice,
            PipeMode::TxAck => Direction::AcknowledgedDeviceToHost,
        }
    }
}

impl From<PipeMode> for Direction {
    fn from(mode: PipeMode) -> Self {
        Self::from_mode(mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipeDescriptor {
    pub id: PipeId,
    pub direction: Direction,
    pub max_payload_bytes: usize,
}

impl PipeDescriptor {
    const fn from_setup(setup: &PipeSetup) -> Self {
        Self {
            id: setup.id,
            direction: Direction::from_mode(setup.mode),
            max_payload_bytes: setup.max_size,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.direction == Direction::AcknowledgedDeviceToHost
    }
}

const DESCRIPTORS: [PipeDescriptor; NUMBER_OF_PIPES] = {
    let mut out = [PipeDescriptor {
        id: 0,
        direction: Direction::DeviceToHost,
        max_payload_bytes: 0,
    }; NUMBER_OF_PIPES];
    let mut i = 0;
    while i < NUMBER_OF_PIPES {
        out[i] = PipeDescriptor::from_setup(&PIPE_TABLE[i]);
        i += 1;
    }
    out
};

/// Lookup table from pipe id to descriptor.
#[derive(Debug, Clone, Copy)]
pub struct PipeRegistry {
    pipes: &'static [PipeDescriptor],
}

impl PipeRegistry {
    /// Registry over the generated pipe table.
    pub const fn new() -> Self {
        Self { pipes: &DESCRIPTORS }
    }

    pub fn describe(&self, id: PipeId) -> Result<PipeDescriptor, Error> {
        self.pipes
            .iter()
            .find(|pipe| pipe.id == id)
            .copied()
            .ok_or(Error::UnknownPipe(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipeDescriptor> {
        self.pipes.iter()
    }

    /// Pipe that carries the history of `granularity`.
    pub fn history_pipe(&self, granularity: Granularity) -> PipeId {
        match granularity {
            Granularity::Minutely => consts::PIPE_HISTORY_MINUTELY_TX_ACK,
            Granularity::Hourly => consts::PIPE_HISTORY_HOURLY_TX_ACK,
            Granularity::Daily => consts::PIPE_HISTORY_DAILY_TX_ACK,
        }
    }
}

impl Default for PipeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
