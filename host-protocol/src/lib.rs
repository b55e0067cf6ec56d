// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host to voltage monitor communication protocol.
//! The phone or gateway is the host and the battery monitor is the peripheral.
//! Defines the command vocabulary the host can send and the payloads the
//! monitor pushes back over its telemetry pipes.

#![no_std]
use serde::{Deserialize, Serialize};

/// Largest command frame accepted, token byte included.
pub const MAX_FRAME_SIZE: usize = consts::TRANSPORT_MTU;

/// Size of every telemetry payload: one signed 16-bit millivolt value.
pub const TELEMETRY_PAYLOAD_SIZE: usize = 2;

/// Sent on a history pipe once every stored entry has been delivered.
pub const HISTORY_END_MARKER: [u8; TELEMETRY_PAYLOAD_SIZE] = (-1i16).to_le_bytes();

/// First byte of a command frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CommandToken {
    StartAdvertising = 0,
    ChangeTiming = 1,
    Disconnect = 2,
    SetDataVoltage = 3,
}

impl TryFrom<u8> for CommandToken {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::StartAdvertising),
            1 => Ok(Self::ChangeTiming),
            2 => Ok(Self::Disconnect),
            3 => Ok(Self::SetDataVoltage),
            other => Err(FrameError::UnknownToken(other)),
        }
    }
}

/// Connection timing requested by the host.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingParams {
    pub conn_interval_ms: u16,
    pub slave_latency: u16,
    pub timeout_ms: u16,
}

impl TimingParams {
    /// Supervision timeout must cover at least two effective connection intervals:
    /// `timeout >= 2 * interval * (latency + 1)`.
    pub fn is_consistent(&self) -> bool {
        // Largest product is 2 * 65535 * 65536, which needs 64 bits
        let effective = 2 * u64::from(self.conn_interval_ms) * (u64::from(self.slave_latency) + 1);
        u64::from(self.timeout_ms) >= effective
    }

    /// Checks every field against the limits of the radio coprocessor.
    pub fn within_radio_limits(&self) -> bool {
        (consts::MIN_CONN_INTERVAL_MS..=consts::MAX_CONN_INTERVAL_MS).contains(&self.conn_interval_ms)
            && self.slave_latency <= consts::MAX_SLAVE_LATENCY
            && (consts::MIN_SUPERVISION_TIMEOUT_MS..=consts::MAX_SUPERVISION_TIMEOUT_MS).contains(&self.timeout_ms)
    }
}

/// Voltage value written by the host in place of a sampled one.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoltageOverride {
    pub millivolts: u16,
}

/// Commands the host can issue, each with its own parameter type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Start connectable advertising
    StartAdvertising,
    /// Change the timing of the current connection
    ChangeTiming(TimingParams),
    /// Drop the connection or stop advertising
    Disconnect,
    /// Record a host supplied voltage as if it had been sampled
    SetDataVoltage(VoltageOverride),
}

/// Errors while reading or writing a command frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// First byte is not a known command token
    UnknownToken(u8),
    /// Parameters do not match the command
    Malformed,
    /// Output buffer cannot hold the encoded frame
    BufferTooSmall,
}

impl Command {
    pub fn token(&self) -> CommandToken {
        match self {
            Command::StartAdvertising => CommandToken::StartAdvertising,
            Command::ChangeTiming(_) => CommandToken::ChangeTiming,
            Command::Disconnect => CommandToken::Disconnect,
            Command::SetDataVoltage(_) => CommandToken::SetDataVoltage,
        }
    }

    /// Decodes the postcard encoded parameters that belong to `token`.
    pub fn decode(token: CommandToken, params: &[u8]) -> Result<Self, FrameError> {
        match token {
            CommandToken::StartAdvertising => no_params(params).map(|_| Command::StartAdvertising),
            CommandToken::ChangeTiming => take_exact(params).map(Command::ChangeTiming),
            CommandToken::Disconnect => no_params(params).map(|_| Command::Disconnect),
            CommandToken::SetDataVoltage => take_exact(params).map(Command::SetDataVoltage),
        }
    }

    /// Decodes a whole `[token, params...]` frame.
    pub fn from_frame(frame: &[u8]) -> Result<Self, FrameError> {
        let (&token, params) = frame.split_first().ok_or(FrameError::Malformed)?;
        Self::decode(CommandToken::try_from(token)?, params)
    }

    /// Encodes the command as `[token, params...]` into `buf`.
    pub fn to_frame<'b>(&self, buf: &'b mut [u8]) -> Result<&'b [u8], FrameError> {
        let (token, params) = buf.split_first_mut().ok_or(FrameError::BufferTooSmall)?;
        *token = self.token() as u8;
        let used = match self {
            Command::StartAdvertising | Command::Disconnect => 0,
            Command::ChangeTiming(timing) => encode_params(timing, params)?,
            Command::SetDataVoltage(value) => encode_params(value, params)?,
        };
        Ok(&buf[..1 + used])
    }
}

fn no_params(params: &[u8]) -> Result<(), FrameError> {
    if params.is_empty() {
        Ok(())
    } else {
        Err(FrameError::Malformed)
    }
}

fn take_exact<'a, T: Deserialize<'a>>(params: &'a [u8]) -> Result<T, FrameError> {
    match postcard::take_from_bytes::<T>(params) {
        Ok((value, [])) => Ok(value),
        _ => Err(FrameError::Malformed),
    }
}

fn encode_params<T: Serialize>(value: &T, buf: &mut [u8]) -> Result<usize, FrameError> {
    postcard::to_slice(value, buf)
        .map(|used| used.len())
        .map_err(|_| FrameError::BufferTooSmall)
}

/// Encodes a voltage the way the host reads it, as a little-endian `SINT16`.
/// Values that do not fit are clamped so they never collide with [`HISTORY_END_MARKER`].
pub fn encode_millivolts(millivolts: u16) -> [u8; TELEMETRY_PAYLOAD_SIZE] {
    let clamped = millivolts.min(i16::MAX as u16) as i16;
    clamped.to_le_bytes()
}

/// Reads a voltage written by the host to the SET pipe.
pub fn decode_millivolts(payload: &[u8]) -> Option<u16> {
    let bytes: [u8; TELEMETRY_PAYLOAD_SIZE] = payload.try_into().ok()?;
    u16::try_from(i16::from_le_bytes(bytes)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_timing_frame_decodes() {
        // 600 is a two byte varint
        let frame = [1, 100, 4, 0xD8, 0x04];
        let command = Command::from_frame(&frame).unwrap();
        assert_eq!(
            command,
            Command::ChangeTiming(TimingParams {
                conn_interval_ms: 100,
                slave_latency: 4,
                timeout_ms: 600,
            })
        );
    }

    #[test]
    fn frame_encoding_matches_decoding() {
        let command = Command::ChangeTiming(TimingParams {
            conn_interval_ms: 100,
            slave_latency: 4,
            timeout_ms: 1200,
        });
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let frame = command.to_frame(&mut buf).unwrap();
        assert_eq!(frame[0], CommandToken::ChangeTiming as u8);
        assert_eq!(Command::from_frame(frame), Ok(command));

        let mut buf = [0u8; MAX_FRAME_SIZE];
        let frame = Command::Disconnect.to_frame(&mut buf).unwrap();
        assert_eq!(frame, &[2]);
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert_eq!(Command::from_frame(&[9]), Err(FrameError::UnknownToken(9)));
        assert_eq!(Command::from_frame(&[]), Err(FrameError::Malformed));
    }

    #[test]
    fn parameter_mismatch_is_malformed() {
        // Parameterless commands must not carry bytes
        assert_eq!(Command::decode(CommandToken::StartAdvertising, &[0]), Err(FrameError::Malformed));
        // Truncated timing
        assert_eq!(Command::decode(CommandToken::ChangeTiming, &[100, 4]), Err(FrameError::Malformed));
        // Trailing byte after the voltage
        assert_eq!(
            Command::decode(CommandToken::SetDataVoltage, &[0x74, 0x1C, 0x00]),
            Err(FrameError::Malformed)
        );
        assert_eq!(Command::decode(CommandToken::SetDataVoltage, &[]), Err(FrameError::Malformed));
    }

    #[test]
    fn set_voltage_uses_varint() {
        // 3700 = 0x0E74 -> 0xF4 0x1C
        let command = Command::decode(CommandToken::SetDataVoltage, &[0xF4, 0x1C]).unwrap();
        assert_eq!(command, Command::SetDataVoltage(VoltageOverride { millivolts: 3700 }));
    }

    #[test]
    fn frame_does_not_fit() {
        let command = Command::ChangeTiming(TimingParams {
            conn_interval_ms: 4000,
            slave_latency: 400,
            timeout_ms: 32000,
        });
        let mut buf = [0u8; 3];
        assert_eq!(command.to_frame(&mut buf), Err(FrameError::BufferTooSmall));
        assert_eq!(Command::Disconnect.to_frame(&mut []), Err(FrameError::BufferTooSmall));
    }

    #[test]
    fn supervision_timeout_rule() {
        let mut timing = TimingParams {
            conn_interval_ms: 100,
            slave_latency: 4,
            timeout_ms: 600,
        };
        assert!(!timing.is_consistent());
        timing.timeout_ms = 1000;
        assert!(timing.is_consistent());
        assert!(timing.within_radio_limits());
        timing.conn_interval_ms = 5;
        assert!(!timing.within_radio_limits());
    }

    #[test]
    fn supervision_timeout_rule_with_extreme_fields() {
        let timing = TimingParams {
            conn_interval_ms: u16::MAX,
            slave_latency: u16::MAX,
            timeout_ms: u16::MAX,
        };
        assert!(!timing.is_consistent());
        assert!(!timing.within_radio_limits());

        let timing = TimingParams {
            conn_interval_ms: 1,
            slave_latency: u16::MAX,
            timeout_ms: u16::MAX,
        };
        // 2 * 1 * 65536 is one more than the timeout
        assert!(!timing.is_consistent());
    }

    #[test]
    fn millivolt_payloads() {
        assert_eq!(encode_millivolts(3700), [0x74, 0x0E]);
        assert_eq!(encode_millivolts(u16::MAX), [0xFF, 0x7F]);
        assert_eq!(HISTORY_END_MARKER, [0xFF, 0xFF]);
        assert_eq!(decode_millivolts(&[0x74, 0x0E]), Some(3700));
        assert_eq!(decode_millivolts(&HISTORY_END_MARKER), None);
        assert_eq!(decode_millivolts(&[0x74]), None);
    }
}
