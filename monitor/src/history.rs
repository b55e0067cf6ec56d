// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Minutely, hourly and daily battery voltage history.
//!
//! Recorded samples land in the minutely buffer. Whenever a sample opens a new
//! hour, every closed hour is averaged into the hourly buffer, and the same
//! happens for days from the hourly buffer. Aggregation reads the finer buffer
//! and never removes from it.

use consts::{DAILY_CAPACITY, HOURLY_CAPACITY, MAX_HISTORY_CAPACITY, MINUTELY_CAPACITY};
use heapless::Deque;

/// A battery voltage reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoltageSample {
    /// Seconds, on the same clock for every sample
    pub timestamp: u32,
    pub millivolts: u16,
}

impl VoltageSample {
    pub const fn new(timestamp: u32, millivolts: u16) -> Self {
        Self { timestamp, millivolts }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Granularity {
    Minutely,
    Hourly,
    Daily,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::Minutely, Granularity::Hourly, Granularity::Daily];

    /// Length of one aggregation window in seconds.
    pub const fn period_secs(self) -> u32 {
        match self {
            Self::Minutely => consts::SECONDS_PER_MINUTE,
            Self::Hourly => consts::SECONDS_PER_HOUR,
            Self::Daily => consts::SECONDS_PER_DAY,
        }
    }

    /// Start of the window that contains `timestamp`.
    pub const fn window_start(self, timestamp: u32) -> u32 {
        timestamp - timestamp % self.period_secs()
    }
}

/// Copy of one history buffer, oldest first.
pub type Snapshot = heapless::Vec<VoltageSample, MAX_HISTORY_CAPACITY>;

/// Fixed capacity ring of samples in timestamp order.
///
/// `written` counts every insert since startup, so each entry keeps a stable
/// sequence number while older entries are evicted around it.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<const N: usize> {
    entries: Deque<VoltageSample, N>,
    written: u64,
}

impl<const N: usize> HistoryBuffer<N> {
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
            written: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Appends `sample`, evicting the oldest entry when full.
    pub fn push(&mut self, sample: VoltageSample) {
        if self.entries.is_full() {
            self.entries.pop_front();
        }
        if self.entries.push_back(sample).is_ok() {
            self.written += 1;
        }
    }

    pub fn view(&self) -> HistoryView<'_> {
        let (head, tail) = self.entries.as_slices();
        HistoryView {
            head,
            tail,
            written: self.written,
        }
    }
}

impl<const N: usize> Default for HistoryBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed, read-only view of a [`HistoryBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct HistoryView<'a> {
    head: &'a [VoltageSample],
    tail: &'a [VoltageSample],
    written: u64,
}

impl<'a> HistoryView<'a> {
    pub fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = VoltageSample> + 'a {
        let (head, tail) = (self.head, self.tail);
        head.iter().chain(tail.iter()).copied()
    }

    pub fn latest(&self) -> Option<VoltageSample> {
        self.tail.last().or(self.head.last()).copied()
    }

    /// Total number of entries ever pushed; the sequence number of the next entry.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Sequence number of the oldest retained entry.
    pub fn first_seq(&self) -> u64 {
        self.written - self.len() as u64
    }

    /// Entry with sequence number `seq`, if it is still retained.
    pub fn get(&self, seq: u64) -> Option<VoltageSample> {
        if seq < self.first_seq() || seq >= self.written {
            return None;
        }
        let index = (seq - self.first_seq()) as usize;
        match self.head.get(index) {
            Some(sample) => Some(*sample),
            None => self.tail.get(index - self.head.len()).copied(),
        }
    }
}

/// Running mean, rounded half away from zero.
#[derive(Debug, Clone, Copy)]
struct Mean {
    sum: u64,
    count: u64,
}

impl Mean {
    fn new(first: u16) -> Self {
        Self {
            sum: u64::from(first),
            count: 1,
        }
    }

    fn add(&mut self, value: u16) {
        self.sum += u64::from(value);
        self.count += 1;
    }

    fn value(&self) -> u16 {
        // Unsigned, so half away from zero is half up
        ((self.sum + self.count / 2) / self.count) as u16
    }
}

/// Averages every `source` entry with `from <= timestamp < until` into one
/// `target` entry per `granularity` window. Windows without entries produce nothing.
fn roll_up<const N: usize>(
    source: HistoryView<'_>,
    target: &mut HistoryBuffer<N>,
    granularity: Granularity,
    from: u32,
    until: u32,
) -> usize {
    let mut produced = 0;
    let mut open: Option<(u32, Mean)> = None;

    for entry in source.iter().filter(|e| e.timestamp >= from && e.timestamp < until) {
        let window = granularity.window_start(entry.timestamp);
        if let Some((start, mean)) = open.as_mut() {
            if *start == window {
                mean.add(entry.millivolts);
                continue;
            }
        }
        if let Some((start, mean)) = open.take() {
            target.push(VoltageSample::new(start, mean.value()));
            produced += 1;
        }
        open = Some((window, Mean::new(entry.millivolts)));
    }
    if let Some((start, mean)) = open {
        target.push(VoltageSample::new(start, mean.value()));
        produced += 1;
    }
    produced
}

/// The three history tiers and their rollup state.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    minutely: HistoryBuffer<MINUTELY_CAPACITY>,
    hourly: HistoryBuffer<HOURLY_CAPACITY>,
    daily: HistoryBuffer<DAILY_CAPACITY>,
    /// Hour window of the newest recorded sample
    open_hour: Option<u32>,
    /// Day window of the newest recorded sample
    open_day: Option<u32>,
}

impl HistoryStore {
    pub const fn new() -> Self {
        Self {
            minutely: HistoryBuffer::new(),
            hourly: HistoryBuffer::new(),
            daily: HistoryBuffer::new(),
            open_hour: None,
            open_day: None,
        }
    }

    /// Records `sample` into the minutely history, rolling up every hour and
    /// day the sample closes first.
    ///
    /// A sample older than the newest minutely entry is dropped and `false`
    /// is returned.
    pub fn record(&mut self, sample: VoltageSample) -> bool {
        if let Some(latest) = self.minutely.view().latest() {
            if sample.timestamp < latest.timestamp {
                warn!(
                    "Dropping sample at {} older than latest at {}",
                    sample.timestamp, latest.timestamp
                );
                return false;
            }
        }

        let hour = Granularity::Hourly.window_start(sample.timestamp);
        if let Some(open) = self.open_hour.filter(|&open| hour > open) {
            let produced = roll_up(self.minutely.view(), &mut self.hourly, Granularity::Hourly, open, hour);
            debug!("Hourly rollup of [{}, {}) produced {} entries", open, hour, produced);
        }
        self.open_hour = Some(hour);

        let day = Granularity::Daily.window_start(sample.timestamp);
        if let Some(open) = self.open_day.filter(|&open| day > open) {
            let produced = roll_up(self.hourly.view(), &mut self.daily, Granularity::Daily, open, day);
            debug!("Daily rollup of [{}, {}) produced {} entries", open, day, produced);
        }
        self.open_day = Some(day);

        self.minutely.push(sample);
        true
    }

    pub fn view(&self, granularity: Granularity) -> HistoryView<'_> {
        match granularity {
            Granularity::Minutely => self.minutely.view(),
            Granularity::Hourly => self.hourly.view(),
            Granularity::Daily => self.daily.view(),
        }
    }

    pub fn latest(&self, granularity: Granularity) -> Option<VoltageSample> {
        self.view(granularity).latest()
    }

    /// Copy of the buffer contents, oldest first.
    pub fn snapshot(&self, granularity: Granularity) -> Snapshot {
        // Every buffer fits in MAX_HISTORY_CAPACITY
        self.view(granularity).iter().collect()
    }
}
