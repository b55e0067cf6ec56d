// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection state of the single peripheral link.

use host_protocol::TimingParams;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    #[default]
    Idle,
    Advertising,
    Connected,
}

/// What moves the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trigger {
    StartAdvertising,
    LinkEstablished,
    Disconnect,
    LinkLost,
    ChangeTiming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    state: ConnectionState,
    /// `None` until the host negotiated timing on the current link
    timing: Option<TimingParams>,
}

impl SessionState {
    pub const fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            timing: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn timing(&self) -> Option<TimingParams> {
        self.timing
    }

    /// State that `trigger` leads to, without applying it.
    pub fn next(&self, trigger: Trigger) -> Result<ConnectionState, Error> {
        use ConnectionState::*;

        match (self.state, trigger) {
            (Idle, Trigger::StartAdvertising) => Ok(Advertising),
            (Connected, Trigger::StartAdvertising) => Err(Error::AlreadyConnected),
            (Advertising, Trigger::LinkEstablished) => Ok(Connected),
            (_, Trigger::Disconnect | Trigger::LinkLost) => Ok(Idle),
            (Connected, Trigger::ChangeTiming) => Ok(Connected),
            _ => Err(Error::IllegalStateTransition),
        }
    }

    /// Moves to `next`. Leaving a link behind forgets its timing.
    pub fn enter(&mut self, next: ConnectionState) {
        if next != self.state {
            info!("Connection state {:?} -> {:?}", self.state, next);
        }
        if next == ConnectionState::Idle {
            self.timing = None;
        }
        self.state = next;
    }

    pub fn set_timing(&mut self, timing: TimingParams) {
        self.timing = Some(timing);
    }
}
