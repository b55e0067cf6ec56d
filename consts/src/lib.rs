// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Static configuration of the voltage monitor.
//!
//! The pipe table mirrors the setup data generated by the vendor tool for the
//! radio coprocessor. It is read once at startup and never changes.

#![no_std]

/// Largest payload the radio coprocessor accepts in a single data packet.
pub const TRANSPORT_MTU: usize = 20;

/// Full device name advertised over BLE.
pub const DEVICE_NAME: &str = "BLE_V_Monitor";

/// Short device name used in the advertising packet.
pub const SHORT_NAME: &str = "V_Mon";

/// How a pipe moves data between the coprocessor and the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    /// Unacknowledged notification to the host.
    Tx,
    /// Value written by the host.
    Set,
    /// Notification that the host acknowledges.
    TxAck,
}

/// One row of the generated pipe table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeSetup {
    pub id: u8,
    pub mode: PipeMode,
    pub max_size: usize,
}

pub const PIPE_BATTERY_VOLTAGE_TX: u8 = 1;
pub const PIPE_BATTERY_VOLTAGE_SET: u8 = 2;
pub const PIPE_HISTORY_MINUTELY_TX_ACK: u8 = 3;
pub const PIPE_HISTORY_DAILY_TX_ACK: u8 = 4;
pub const PIPE_HISTORY_HOURLY_TX_ACK: u8 = 5;

pub const NUMBER_OF_PIPES: usize = 5;

/// Pipe table in the order the coprocessor numbers the pipes.
pub const PIPE_TABLE: [PipeSetup; NUMBER_OF_PIPES] = [
    PipeSetup {
        id: PIPE_BATTERY_VOLTAGE_TX,
        mode: PipeMode::Tx,
        max_size: 2,
    },
    PipeSetup {
        id: PIPE_BATTERY_VOLTAGE_SET,
        mode: PipeMode::Set,
        max_size: 2,
    },
    PipeSetup {
        id: PIPE_HISTORY_MINUTELY_TX_ACK,
        mode: PipeMode::TxAck,
        max_size: 2,
    },
    PipeSetup {
        id: PIPE_HISTORY_DAILY_TX_ACK,
        mode: PipeMode::TxAck,
        max_size: 2,
    },
    PipeSetup {
        id: PIPE_HISTORY_HOURLY_TX_ACK,
        mode: PipeMode::TxAck,
        max_size: 2,
    },
];

/// Number of entries kept in the minutely history.
pub const MINUTELY_CAPACITY: usize = 60;
/// Number of entries kept in the hourly history.
pub const HOURLY_CAPACITY: usize = 24;
/// Number of entries kept in the daily history.
pub const DAILY_CAPACITY: usize = 31;

/// Capacity large enough to copy out any of the history buffers.
pub const MAX_HISTORY_CAPACITY: usize = max(MINUTELY_CAPACITY, max(HOURLY_CAPACITY, DAILY_CAPACITY));

const fn max(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

pub const SECONDS_PER_MINUTE: u32 = 60;
pub const SECONDS_PER_HOUR: u32 = 3_600;
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Shortest connection interval the coprocessor accepts (7.5 ms rounded up).
pub const MIN_CONN_INTERVAL_MS: u16 = 8;
/// Longest connection interval the coprocessor accepts.
pub const MAX_CONN_INTERVAL_MS: u16 = 4_000;
/// Highest slave latency, in connection events.
pub const MAX_SLAVE_LATENCY: u16 = 499;
/// Shortest supervision timeout.
pub const MIN_SUPERVISION_TIMEOUT_MS: u16 = 100;
/// Longest supervision timeout.
pub const MAX_SUPERVISION_TIMEOUT_MS: u16 = 32_000;

/// 128-bit base UUID of the voltage monitor service, `de0eXXXX-f0af-4d38-9a1a-33e88519d3b2`.
/// The 16-bit id of the service or characteristic replaces `XXXX`.
pub const BASE_UUID: u128 = 0xDE0E0000_F0AF_4D38_9A1A_33E88519D3B2;

pub const SERVICE_ID: u16 = 0x0001;
pub const CHARACTERISTIC_ID_CURRENT_VOLTAGE: u16 = 0x0100;
pub const CHARACTERISTIC_ID_MINUTELY_HISTORY: u16 = 0x0200;
pub const CHARACTERISTIC_ID_HOURLY_HISTORY: u16 = 0x0300;
pub const CHARACTERISTIC_ID_DAILY_HISTORY: u16 = 0x0400;
pub const CHARACTERISTIC_ID_CONTROL: u16 = 0x0500;

/// Expands a 16-bit id into a full 128-bit UUID on top of [`BASE_UUID`].
pub const fn uuid(id: u16) -> u128 {
    (BASE_UUID & !(0xFFFF << 96)) | ((id as u128) << 96)
}

/// UUID of the voltage monitor service.
pub const SERVICE_UUID: u128 = uuid(SERVICE_ID);

/// List of BLE service UUIDs advertised by this device.
pub const SERVICES_LIST: [[u8; 16]; 1] = [SERVICE_UUID.to_le_bytes()];
