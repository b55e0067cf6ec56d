// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Supply voltage sampling with the SAADC.

use crate::config::SAMPLE_PERIOD_SECS;
use crate::SAMPLES;
use defmt::{debug, info};
use embassy_nrf::saadc::Saadc;
use embassy_time::{Duration, Ticker};

/// Full scale of the default channel setup: 0.6 V reference with 1/6 gain.
const FULL_SCALE_MV: i32 = 3_600;
/// 12-bit conversion.
const RESOLUTION: i32 = 1 << 12;

fn to_millivolts(raw: i16) -> u16 {
    (i32::from(raw).max(0) * FULL_SCALE_MV / RESOLUTION) as u16
}

#[embassy_executor::task]
pub async fn sampler_task(mut saadc: Saadc<'static, 1>) -> ! {
    saadc.calibrate().await;
    info!("SAADC calibrated");

    let mut ticker = Ticker::every(Duration::from_secs(SAMPLE_PERIOD_SECS));
    loop {
        let mut raw = [0; 1];
        saadc.sample(&mut raw).await;
        let millivolts = to_millivolts(raw[0]);
        debug!("VDD {} mV (raw {})", millivolts, raw[0]);
        SAMPLES.send(millivolts).await;

        ticker.next().await;
    }
}
