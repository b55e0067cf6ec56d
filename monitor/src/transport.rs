// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Seams to the radio coprocessor and the wall clock.

use host_protocol::TimingParams;

use crate::registry::PipeId;

/// Opaque status code reported by the radio coprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("radio transport failed with status {0:#04x}")]
pub struct TransportError(pub u8);

/// Requests the core issues to the radio coprocessor.
///
/// Every method is non-blocking. Outcomes that arrive later (acknowledgements,
/// congestion, link changes) come back as [`Event`]s.
pub trait Transport {
    /// Queue `payload` on `pipe`.
    fn send(&mut self, pipe: PipeId, payload: &[u8]) -> Result<(), TransportError>;

    /// Ask the central for new connection timing.
    fn apply_timing(&mut self, timing: &TimingParams) -> Result<(), TransportError>;

    /// Start connectable advertising.
    fn start_advertising(&mut self) -> Result<(), TransportError>;

    /// Drop the link, or stop advertising when no link is up.
    fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Source of sample timestamps, in seconds.
pub trait Clock {
    fn now(&self) -> u32;
}

/// Notifications from the radio coprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// The host acknowledged the last payload sent on the pipe
    Acknowledged(PipeId),
    /// The pipe cannot take more data for now
    Congested(PipeId),
    /// The pipe accepts data again
    Cleared(PipeId),
    /// A central connected while advertising
    LinkEstablished,
    /// The link dropped, or advertising timed out
    LinkLost,
}
