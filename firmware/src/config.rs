// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

/// Seconds between two supply voltage samples.
pub const SAMPLE_PERIOD_SECS: u64 = 60;

/// Milliseconds between two publish ticks when nothing else wakes the loop.
pub const PUBLISH_PERIOD_MS: u64 = 100;

/// Advertising interval in units of 625us (about 50ms with 75 units).
pub const ADV_INTERVAL: u32 = 75;

/// Seconds to wait before advertising again after the SoftDevice refused to.
pub const ADV_RETRY_SECS: u64 = 5;

/// Notifications the SoftDevice queues per connection.
pub const HVN_TX_QUEUE_SIZE: u8 = 3;

pub const EVENT_QUEUE_SIZE: usize = 8;
pub const COMMAND_QUEUE_SIZE: usize = 4;
pub const SAMPLE_QUEUE_SIZE: usize = 2;
