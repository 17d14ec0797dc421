// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared fixtures for the end-to-end bridge tests: a host peer over real
// shared memory, a bridge attached to it and a few process handlers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use libjack_bridge::host::HostPeer;
use libjack_bridge::protocol::NonRtServerOpcode;
use libjack_bridge::{
    Bridge, BridgeConfig, Lifecycle, PortCounts, PortId, ProcessHandler, ProcessScope, Setup,
    Timing,
};

pub const FRAMES: u32 = 4;
pub const RATE: f64 = 48_000.0;
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
pub const PERIOD_TIMEOUT: Duration = Duration::from_secs(2);

/// Counts `terminate` calls instead of signalling the test process.
#[derive(Default)]
pub struct RecordingLifecycle {
    terminated: AtomicUsize,
}

impl RecordingLifecycle {
    pub fn count(&self) -> usize {
        self.terminated.load(Ordering::Acquire)
    }
}

impl Lifecycle for RecordingLifecycle {
    fn terminate(&self) {
        self.terminated.fetch_add(1, Ordering::AcqRel);
    }
}

pub fn fast_timing() -> Timing {
    Timing {
        nonrt_poll: Duration::from_millis(5),
        rt_wait: Duration::from_millis(50),
        liveness_timeout: Duration::from_secs(30),
        join_timeout: Duration::from_secs(2),
    }
}

pub fn ports(audio_ins: u32, audio_outs: u32) -> PortCounts {
    PortCounts {
        audio_ins,
        audio_outs,
        ..Default::default()
    }
}

pub struct Session {
    pub host: HostPeer,
    pub bridge: Bridge,
    pub lifecycle: Arc<RecordingLifecycle>,
}

impl Session {
    /// Create the segments, queue the handshake, start the bridge and wait
    /// for Ready. The audio pool is published for `ports` at `FRAMES`.
    pub fn start(ports: PortCounts) -> Self {
        Self::start_with_timing(ports, fast_timing())
    }

    pub fn start_with_timing(ports: PortCounts, timing: Timing) -> Self {
        let mut host = HostPeer::create_unique().expect("create segments");
        assert!(host.write_handshake(FRAMES, RATE));

        let lifecycle = Arc::new(RecordingLifecycle::default());
        let config = BridgeConfig::new(host.segment_ids().clone(), Setup { ports, flags: 0 })
            .with_timing(timing);
        let bridge = Bridge::start_with(config, lifecycle.clone()).expect("start bridge");

        assert_eq!(
            host.read_server_opcode(REPLY_TIMEOUT),
            Some(Ok(NonRtServerOpcode::Ready))
        );
        let floats = ((ports.audio_ins + ports.audio_outs) * FRAMES) as usize;
        assert!(host.set_audio_pool(floats, PERIOD_TIMEOUT).expect("publish pool"));

        Self {
            host,
            bridge,
            lifecycle,
        }
    }

    /// Run one period with `inputs` and return the output region.
    pub fn period(&mut self, inputs: &[f32]) -> Vec<f32> {
        let pool = self.host.audio_pool_mut();
        pool[..inputs.len()].copy_from_slice(inputs);
        assert!(self.host.process(PERIOD_TIMEOUT).expect("process"));
        let ports = self.bridge.port_counts();
        let start = (ports.audio_ins * FRAMES) as usize;
        self.host.audio_pool_mut()[start..].to_vec()
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !cond() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

/// Fills every one of its outputs with a constant.
pub struct Constant {
    pub outputs: Vec<PortId>,
    pub value: f32,
}

impl ProcessHandler for Constant {
    fn process(&mut self, scope: &mut ProcessScope<'_>) {
        for &id in &self.outputs {
            if let Some(buf) = scope.output(id) {
                buf.fill(self.value);
            }
        }
    }
}

/// Copies one input to one output, scaled.
pub struct Gain {
    pub input: PortId,
    pub output: PortId,
    pub gain: f32,
}

impl ProcessHandler for Gain {
    fn process(&mut self, scope: &mut ProcessScope<'_>) {
        if let Some((input, output)) = scope.input_output(self.input, self.output) {
            for (o, i) in output.iter_mut().zip(input) {
                *o = *i * self.gain;
            }
        }
    }
}
