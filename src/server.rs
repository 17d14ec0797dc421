// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Server-wide state every client observes: period size, sample rate and the
// transport position copied in from the host once per period.

use crate::protocol::{BridgeTimeInfo, TIME_INFO_VALID_BBT};

/// Musical position, present only when the host marks it valid.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BarBeatTick {
    pub bar: i32,
    pub beat: i32,
    pub tick: i32,
    pub bar_start_tick: f64,
    pub beats_per_bar: f32,
    pub beat_type: f32,
    pub ticks_per_beat: f64,
    pub beats_per_minute: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transport {
    pub playing: bool,
    pub frame: u64,
    pub usecs: u64,
    pub bbt: Option<BarBeatTick>,
}

impl Transport {
    /// Take over the host's snapshot. The musical position is cleared unless
    /// the host flagged it valid.
    pub fn update_from(&mut self, info: &BridgeTimeInfo) {
        self.playing = info.playing != 0;
        self.frame = info.frame;
        self.usecs = info.usecs;
        self.bbt = (info.valid & TIME_INFO_VALID_BBT != 0).then(|| BarBeatTick {
            bar: info.bar,
            beat: info.beat,
            tick: info.tick,
            bar_start_tick: info.bar_start_tick,
            beats_per_bar: info.beats_per_bar,
            beat_type: info.beat_type,
            ticks_per_beat: info.ticks_per_beat,
            beats_per_minute: info.beats_per_minute,
        });
    }
}

/// Period size and sample rate are zero only until the handshake succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServerState {
    pub buffer_size: u32,
    pub sample_rate: f64,
    pub transport: Transport,
}

/// A usable sample rate: finite and strictly positive.
pub fn is_valid_sample_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}
