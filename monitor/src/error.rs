// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use host_protocol::FrameError;

use crate::registry::PipeId;
use crate::transport::TransportError;

/// Everything that can go wrong while handling a command, an event or a publish attempt.
///
/// None of these are fatal: the offending command or send is dropped and state
/// is left as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("pipe {0} is not in the pipe table")]
    UnknownPipe(PipeId),
    #[error("malformed command payload")]
    MalformedPayload,
    #[error("connection timing parameters rejected")]
    InvalidTimingParameters,
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("command not allowed in the current connection state")]
    IllegalStateTransition,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of [`Monitor::dispatch`](crate::Monitor::dispatch).
pub type CommandError = Error;

impl From<FrameError> for Error {
    fn from(_: FrameError) -> Self {
        Error::MalformedPayload
    }
}
