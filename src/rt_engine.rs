// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Realtime engine: drains the realtime client channel once per host wake-up
// and mixes every registered client into the audio pool.
//
// The only blocking point is the bounded wait for the host. Every lock on this
// thread is a try-lock; a miss leaves the period silent.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::audio_pool::AudioPool;
use crate::bridge::{EngineState, Shared};
use crate::channel::RtClientControl;
use crate::mixer::{mix_period, silence_outputs, PoolLayout};
use crate::protocol::RtClientOpcode;
use crate::rt_prio::{audio_period_ns, enable_flush_denormals, set_realtime_priority};

pub(crate) struct RtEngine {
    control: RtClientControl,
    state: RtState,
}

/// Everything the opcode handlers touch besides the channel itself.
struct RtState {
    shared: Arc<Shared>,
    pool: AudioPool,
    /// Period size seen at the last successful engine lock.
    frames: u32,
    sample_rate: f64,
}

impl RtEngine {
    pub fn new(shared: Arc<Shared>, control: RtClientControl, pool: AudioPool) -> Self {
        Self {
            control,
            state: RtState {
                shared,
                pool,
                frames: 0,
                sample_rate: 0.0,
            },
        }
    }

    /// Seed the period geometry from the handshake.
    pub fn prepare(&mut self, frames: u32, sample_rate: f64) {
        self.state.frames = frames;
        self.state.sample_rate = sample_rate;
    }

    pub fn run(mut self) {
        let period_ns = audio_period_ns(self.state.sample_rate, self.state.frames);
        if !set_realtime_priority(period_ns, None, None) {
            debug!("realtime scheduling not granted, running at normal priority");
        }
        if !enable_flush_denormals() {
            debug!("denormal flushing not available on this architecture");
        }
        info!(period_ns, "realtime thread started");

        let quit = self.run_loop();

        // Either way the control side has to wind down too.
        self.state.shared.request_nonrt_stop();
        self.state.pool.release();
        info!(quit, "realtime thread finished");
    }

    /// Returns `true` if the host sent `Quit`.
    fn run_loop(&mut self) -> bool {
        let Self { control, state } = self;
        let wait = state.shared.timing.rt_wait;

        while !state.shared.rt_should_stop() {
            let Some(_period) = control.wait_for_host(wait) else {
                if state.shared.host_is_silent() {
                    warn!("host stopped responding, stopping realtime thread");
                    return false;
                }
                continue;
            };
            if state.handle_rt_data(control) {
                return true;
            }
        }
        false
    }
}

impl RtState {
    /// Drain everything the host committed for this wake-up.
    /// Returns `true` on `Quit`.
    fn handle_rt_data(&mut self, control: &RtClientControl) -> bool {
        let ring = control.ring();

        while ring.is_data_available_for_reading() {
            let opcode = match ring.read_opcode::<RtClientOpcode>() {
                Ok(op) => op,
                Err(raw) => {
                    warn!(opcode = raw, "unknown realtime opcode, dropping channel contents");
                    ring.discard_readable();
                    break;
                }
            };

            match opcode {
                RtClientOpcode::Null => {}
                RtClientOpcode::SetAudioPool => {
                    let bytes = ring.read_ulong();
                    if bytes == 0 {
                        warn!("host published an empty audio pool");
                        self.pool.release();
                    } else if let Err(e) = self.pool.remap(bytes) {
                        error!(bytes, "failed to map audio pool: {e}");
                    } else {
                        debug!(bytes, "audio pool mapped");
                    }
                }
                RtClientOpcode::ControlEventParameter => {
                    ring.read_uint();
                    ring.read_byte();
                    ring.read_ushort();
                    ring.read_float();
                }
                RtClientOpcode::ControlEventMidiBank | RtClientOpcode::ControlEventMidiProgram => {
                    ring.read_uint();
                    ring.read_byte();
                    ring.read_ushort();
                }
                RtClientOpcode::ControlEventAllSoundOff | RtClientOpcode::ControlEventAllNotesOff => {
                    ring.read_uint();
                    ring.read_byte();
                }
                RtClientOpcode::MidiEvent => {
                    ring.read_uint();
                    ring.read_byte();
                    let size = ring.read_byte();
                    ring.skip(usize::from(size));
                }
                RtClientOpcode::Process => self.process(control),
                RtClientOpcode::Quit => {
                    info!("quit received on realtime channel");
                    self.shared.mark_quit();
                    return true;
                }
            }
        }
        false
    }

    fn process(&mut self, control: &RtClientControl) {
        let time_info = control.time_info();
        let ports = self.shared.ports;

        match self.pool.buffers() {
            None => trace!("process before the audio pool was published"),
            Some((pool, copy)) => match self.shared.engine.try_lock() {
                Some(mut engine) => {
                    self.frames = engine.server.buffer_size;
                    let layout = PoolLayout::new(ports, self.frames);
                    if !silence_outputs(pool, layout) {
                        trace!("audio pool smaller than the output region");
                    }
                    let EngineState {
                        server,
                        registry,
                        scratch,
                        ..
                    } = &mut *engine;
                    let outcome = mix_period(
                        pool,
                        copy,
                        layout,
                        server,
                        &time_info,
                        registry,
                        scratch,
                        || control.raise_proc_flags(),
                    );
                    trace!(?outcome, "period mixed");
                }
                None => {
                    silence_outputs(pool, PoolLayout::new(ports, self.frames));
                    trace!("engine lock busy, period left silent");
                }
            },
        }

        control.clear_midi_out();
    }
}
