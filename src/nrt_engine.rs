// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Non-realtime engine: startup handshake, configuration changes, keepalive
// and the shutdown report, driven by polling the non-realtime client channel.

use std::os::unix::thread::JoinHandleExt;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use crate::bridge::{join_bounded, BridgeStatus, Shared};
use crate::channel::{NonRtClientControl, NonRtServerControl};
use crate::error::{BridgeError, Result};
use crate::mixer::MixBuffers;
use crate::protocol::{channel_data_sizes, NonRtClientOpcode, NonRtServerOpcode};
use crate::ring_buffer::Ring;
use crate::rt_engine::RtEngine;
use crate::server::is_valid_sample_rate;
use crate::shm_name::SegmentKind;

/// Reported to the host when the realtime thread stops while a client runs.
pub const PROCESS_STOPPED_MESSAGE: &str = "Plugin bridge error, process thread has stopped";

/// Null opcodes are logged this many times, then silently drained.
const NULL_LOG_LIMIT: u32 = 5;

pub(crate) struct NonRtEngine {
    shared: Arc<Shared>,
    client: NonRtClientControl,
    server: NonRtServerControl,
    rt: Option<RtEngine>,
    nulls_logged: u32,
}

impl NonRtEngine {
    pub fn new(
        shared: Arc<Shared>,
        client: NonRtClientControl,
        server: NonRtServerControl,
        rt: RtEngine,
    ) -> Self {
        Self {
            shared,
            client,
            server,
            rt: Some(rt),
            nulls_logged: 0,
        }
    }

    /// Thread body. Errors are startup failures; the host never saw Ready.
    pub fn run(mut self) -> Result<()> {
        let (buffer_size, sample_rate) = match self.handshake() {
            Ok(state) => state,
            Err(e) => {
                error!("bridge handshake failed: {e}");
                self.shared.set_status(BridgeStatus::Failed);
                return Err(e);
            }
        };

        let Some(mut rt) = self.rt.take() else {
            self.shared.set_status(BridgeStatus::Failed);
            return Err(BridgeError::Io(std::io::Error::other("realtime engine already started")));
        };
        rt.prepare(buffer_size, sample_rate);
        let rt_handle = match thread::Builder::new()
            .name("jack-bridge-rt".into())
            .spawn(move || rt.run())
        {
            Ok(h) => h,
            Err(source) => {
                error!("failed to spawn realtime thread: {source}");
                self.shared.set_status(BridgeStatus::Failed);
                return Err(BridgeError::Thread {
                    name: "realtime",
                    source,
                });
            }
        };
        self.shared.set_rt_thread(rt_handle.as_pthread_t());
        self.shared.set_status(BridgeStatus::Running);
        info!(buffer_size, sample_rate, "bridge ready");

        while !self.shared.nonrt_should_stop() {
            thread::sleep(self.shared.timing.nonrt_poll);
            if self.handle_nonrt_data() {
                self.shared.mark_quit();
                break;
            }
        }

        let shared = self.shared.clone();
        self.shutdown();

        if join_bounded(rt_handle, shared.timing.join_timeout).is_none() {
            warn!("realtime thread left running");
        }
        shared.set_status(BridgeStatus::Stopped);
        info!("bridge stopped");
        Ok(())
    }

    /// Verify protocol compatibility and take the initial configuration.
    fn handshake(&mut self) -> Result<(u32, f64)> {
        let ring = self.client.ring();

        expect_opcode(&ring, NonRtClientOpcode::Null)?;

        let segments = [
            SegmentKind::RtClient,
            SegmentKind::NonRtClient,
            SegmentKind::NonRtServer,
        ];
        let declared = [ring.read_uint(), ring.read_uint(), ring.read_uint()];
        for ((segment, declared), expected) in segments.into_iter().zip(declared).zip(channel_data_sizes()) {
            if declared != expected {
                return Err(BridgeError::SizeMismatch {
                    segment,
                    declared,
                    expected,
                });
            }
        }

        expect_opcode(&ring, NonRtClientOpcode::SetBufferSize)?;
        let buffer_size = ring.read_uint();
        expect_opcode(&ring, NonRtClientOpcode::SetSampleRate)?;
        let sample_rate = ring.read_double();

        if buffer_size == 0 || !is_valid_sample_rate(sample_rate) {
            return Err(BridgeError::InvalidState {
                buffer_size,
                sample_rate,
            });
        }

        {
            let mut engine = self.shared.engine.lock();
            engine.server.buffer_size = buffer_size;
            engine.server.sample_rate = sample_rate;
            engine.scratch = MixBuffers::new(buffer_size);
        }

        self.shared.set_liveness_tracking(true);

        let w = self.server.writer();
        w.write_opcode(NonRtServerOpcode::Ready);
        w.commit_write();
        w.wait_if_data_is_reaching_limit();

        Ok((buffer_size, sample_rate))
    }

    /// Drain everything committed on the client channel. Returns `true` on
    /// `Quit`.
    fn handle_nonrt_data(&mut self) -> bool {
        let ring = self.client.ring();

        while ring.is_data_available_for_reading() {
            let opcode = match ring.read_opcode::<NonRtClientOpcode>() {
                Ok(op) => op,
                Err(raw) => {
                    warn!(opcode = raw, "unknown non-realtime opcode, dropping channel contents");
                    ring.discard_readable();
                    break;
                }
            };
            log_opcode(&mut self.nulls_logged, opcode);

            if !matches!(opcode, NonRtClientOpcode::Null | NonRtClientOpcode::PingOnOff) {
                self.shared.touch_liveness();
            }

            match opcode {
                NonRtClientOpcode::Null
                | NonRtClientOpcode::Activate
                | NonRtClientOpcode::Deactivate
                | NonRtClientOpcode::ShowUI
                | NonRtClientOpcode::HideUI => {}
                NonRtClientOpcode::Ping => self.reply(NonRtServerOpcode::Pong),
                NonRtClientOpcode::PingOnOff => {
                    let on = ring.read_bool();
                    self.shared.set_liveness_tracking(on);
                }
                NonRtClientOpcode::SetBufferSize => {
                    let frames = ring.read_uint();
                    if frames != 0 {
                        self.set_buffer_size(frames);
                    }
                }
                NonRtClientOpcode::SetSampleRate => {
                    let rate = ring.read_double();
                    if is_valid_sample_rate(rate) {
                        self.set_sample_rate(rate);
                    }
                }
                NonRtClientOpcode::SetOffline => self.shared.engine.lock().offline = true,
                NonRtClientOpcode::SetOnline => self.shared.engine.lock().offline = false,
                NonRtClientOpcode::SetParameterValue | NonRtClientOpcode::UiParameterChange => {
                    ring.read_uint();
                    ring.read_float();
                }
                NonRtClientOpcode::SetParameterMidiChannel => {
                    ring.read_uint();
                    ring.read_byte();
                }
                NonRtClientOpcode::SetParameterMidiCC => {
                    ring.read_uint();
                    ring.read_short();
                }
                NonRtClientOpcode::SetProgram | NonRtClientOpcode::SetMidiProgram => {
                    ring.read_int();
                }
                NonRtClientOpcode::SetCustomData => {
                    for _ in 0..3 {
                        skip_sized(&ring);
                    }
                }
                NonRtClientOpcode::SetChunkDataFile => skip_sized(&ring),
                NonRtClientOpcode::SetOption => {
                    ring.read_uint();
                    ring.read_bool();
                }
                NonRtClientOpcode::SetCtrlChannel => {
                    ring.read_short();
                }
                NonRtClientOpcode::PrepareForSave => self.reply(NonRtServerOpcode::Saved),
                NonRtClientOpcode::UiProgramChange | NonRtClientOpcode::UiMidiProgramChange => {
                    ring.read_uint();
                }
                NonRtClientOpcode::UiNoteOn => {
                    ring.read_byte();
                    ring.read_byte();
                    ring.read_byte();
                }
                NonRtClientOpcode::UiNoteOff => {
                    ring.read_byte();
                    ring.read_byte();
                }
                NonRtClientOpcode::Quit => {
                    info!("quit received on non-realtime channel");
                    return true;
                }
            }
        }
        false
    }

    fn reply(&self, opcode: NonRtServerOpcode) {
        let w = self.server.writer();
        w.write_opcode(opcode);
        if !w.commit_write() {
            warn!(?opcode, "server channel full, reply dropped");
        }
    }

    fn set_buffer_size(&self, frames: u32) {
        let mut engine = self.shared.engine.lock();
        engine.server.buffer_size = frames;
        for client in engine.registry.iter() {
            if let Some(handler) = client.lock().handler.as_mut() {
                handler.buffer_size_changed(frames);
            }
        }
        engine.scratch.resize(frames);
        info!(frames, "buffer size changed");
    }

    fn set_sample_rate(&self, sample_rate: f64) {
        let mut engine = self.shared.engine.lock();
        engine.server.sample_rate = sample_rate;
        for client in engine.registry.iter() {
            if let Some(handler) = client.lock().handler.as_mut() {
                handler.sample_rate_changed(sample_rate);
            }
        }
        info!(sample_rate, "sample rate changed");
    }

    /// Wind down after the loop exits: stop the realtime side, then either
    /// end the process (host quit) or tell the host why the bridge stopped.
    /// Both channel mappings are released when `self` drops.
    fn shutdown(self) {
        self.shared.request_rt_stop();

        if self.shared.quit_received() {
            info!("session ended by host");
            self.shared.lifecycle.terminate();
        } else if self.shared.engine.lock().registry.any_active() {
            error!("{PROCESS_STOPPED_MESSAGE}");
            let w = self.server.writer();
            w.write_opcode(NonRtServerOpcode::Error);
            w.write_uint(PROCESS_STOPPED_MESSAGE.len() as u32);
            w.write_custom_data(PROCESS_STOPPED_MESSAGE.as_bytes());
            w.commit_write();
        } else {
            info!("bridge stopped with no active client");
            self.reply(NonRtServerOpcode::UiClosed);
        }
    }
}

fn log_opcode(nulls_logged: &mut u32, opcode: NonRtClientOpcode) {
    match opcode {
        NonRtClientOpcode::Ping => {}
        NonRtClientOpcode::Null => {
            if *nulls_logged < NULL_LOG_LIMIT {
                *nulls_logged += 1;
                debug!(?opcode, "non-realtime opcode");
            }
        }
        _ => debug!(?opcode, "non-realtime opcode"),
    }
}

fn expect_opcode(ring: &Ring<'_>, expected: NonRtClientOpcode) -> Result<()> {
    match ring.read_opcode::<NonRtClientOpcode>() {
        Ok(op) if op == expected => Ok(()),
        Ok(op) => Err(BridgeError::UnexpectedOpcode {
            expected: expected.name(),
            found: op.into(),
        }),
        Err(raw) => Err(BridgeError::UnexpectedOpcode {
            expected: expected.name(),
            found: raw,
        }),
    }
}

/// Drop a `{u32 len, bytes}` field.
fn skip_sized(ring: &Ring<'_>) {
    let len = ring.read_uint() as usize;
    if !ring.skip(len) {
        warn!(len, "truncated sized field, dropping channel contents");
        ring.discard_readable();
    }
}
