// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-period mixing across all registered clients.
//
// Pool layout for N static inputs, M static outputs and a period of P frames:
//
//   [ in 0 | in 1 | .. | in N-1 | out 0 | .. | out M-1 ]   each P floats
//
// Inputs are handed to every client by reference. Each client renders its
// outputs into the matching region of a private copy buffer, which is then
// summed into the pool's output region. With more than one contributor the
// sum is scaled by 1/count.
//
// Nothing here blocks: client locks are only ever attempted.

use tracing::trace;

use crate::config::PortCounts;
use crate::protocol::BridgeTimeInfo;
use crate::registry::{Port, PortBuffer, PortDirection, PortId, Registry};
use crate::server::{ServerState, Transport};

/// Implemented by whatever a client runs each period.
pub trait ProcessHandler: Send {
    /// Render one period. Port buffers are valid only for this call.
    fn process(&mut self, scope: &mut ProcessScope<'_>);

    fn buffer_size_changed(&mut self, _frames: u32) {}

    fn sample_rate_changed(&mut self, _sample_rate: f64) {}
}

/// Buffers shared by every port beyond the statically negotiated counts.
#[derive(Debug, Default)]
pub struct MixBuffers {
    silence: Vec<f32>,
    discard: Vec<f32>,
}

impl MixBuffers {
    pub fn new(frames: u32) -> Self {
        let mut b = Self::default();
        b.resize(frames);
        b
    }

    /// Reallocate for a new period size, zeroed.
    pub fn resize(&mut self, frames: u32) {
        self.silence = vec![0.0; frames as usize];
        self.discard = vec![0.0; frames as usize];
    }

    pub fn frames(&self) -> usize {
        self.silence.len()
    }
}

/// Pool geometry for one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    pub audio_ins: usize,
    pub audio_outs: usize,
    pub frames: usize,
}

impl PoolLayout {
    pub fn new(ports: PortCounts, frames: u32) -> Self {
        Self {
            audio_ins: ports.audio_ins as usize,
            audio_outs: ports.audio_outs as usize,
            frames: frames as usize,
        }
    }

    pub fn inputs_len(&self) -> usize {
        self.audio_ins * self.frames
    }

    pub fn outputs_len(&self) -> usize {
        self.audio_outs * self.frames
    }

    /// Floats the pool must hold for this layout.
    pub fn required_len(&self) -> usize {
        self.inputs_len() + self.outputs_len()
    }

    pub fn outputs_range(&self) -> std::ops::Range<usize> {
        self.inputs_len()..self.required_len()
    }
}

/// Zero the pool's output region.
///
/// If the pool is too small for `layout`, the period size changed and the
/// host has not republished the pool yet. The output region of the period
/// size the pool was published for is zeroed instead and `false` is
/// returned.
pub fn silence_outputs(pool: &mut [f32], layout: PoolLayout) -> bool {
    if let Some(out) = pool.get_mut(layout.outputs_range()) {
        out.fill(0.0);
        return true;
    }
    let channels = layout.audio_ins + layout.audio_outs;
    if channels > 0 {
        let published = PoolLayout {
            frames: pool.len() / channels,
            ..layout
        };
        if let Some(out) = pool.get_mut(published.outputs_range()) {
            out.fill(0.0);
        }
    }
    false
}

/// Buffers one client sees while its handler runs.
pub struct ProcessScope<'a> {
    frames: usize,
    transport: &'a Transport,
    ports: &'a [Port],
    inputs: &'a [f32],
    silence: &'a [f32],
    outputs: &'a mut [f32],
    discard: &'a mut [f32],
}

impl<'a> ProcessScope<'a> {
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn transport(&self) -> &Transport {
        self.transport
    }

    pub fn ports(&self) -> &[Port] {
        self.ports
    }

    fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.iter().find(|p| p.id == id)
    }

    fn input_slice(&self, buffer: PortBuffer) -> Option<&'a [f32]> {
        let n = self.frames;
        let inputs: &'a [f32] = self.inputs;
        match buffer {
            PortBuffer::PoolInput(slot) => inputs.get(slot * n..(slot + 1) * n),
            PortBuffer::Silence => Some(self.silence),
            _ => None,
        }
    }

    /// Read-only buffer of an audio input port.
    pub fn input(&self, id: PortId) -> Option<&[f32]> {
        let buffer = self.port(id)?.buffer;
        self.input_slice(buffer)
    }

    /// Writable buffer of an audio output port.
    pub fn output(&mut self, id: PortId) -> Option<&mut [f32]> {
        let buffer = self.port(id)?.buffer;
        let n = self.frames;
        match buffer {
            PortBuffer::CopyOutput(slot) => self.outputs.get_mut(slot * n..(slot + 1) * n),
            PortBuffer::Discard => Some(&mut *self.discard),
            _ => None,
        }
    }

    /// An input and an output at once, for in-place style processing.
    pub fn input_output(&mut self, input: PortId, output: PortId) -> Option<(&[f32], &mut [f32])> {
        let in_buf = self.port(input)?.buffer;
        let input = self.input_slice(in_buf)?;
        let output = self.output(output)?;
        Some((input, output))
    }
}

/// Result of one mixing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixOutcome {
    /// Clients whose output was summed into the pool.
    pub contributors: usize,
    /// Clients skipped because their lock was held, they had no handler, or
    /// they were inactive.
    pub skipped: usize,
}

/// Assign this period's buffers, in registration order per direction.
fn assign_port_buffers(ports: &mut [Port], layout: PoolLayout) {
    let (mut ins, mut outs) = (0usize, 0usize);
    for port in ports.iter_mut() {
        port.buffer = if port.is_audio(PortDirection::Input) {
            ins += 1;
            if ins <= layout.audio_ins {
                PortBuffer::PoolInput(ins - 1)
            } else {
                PortBuffer::Silence
            }
        } else if port.is_audio(PortDirection::Output) {
            outs += 1;
            if outs <= layout.audio_outs {
                PortBuffer::CopyOutput(outs - 1)
            } else {
                PortBuffer::Discard
            }
        } else {
            PortBuffer::Unassigned
        };
    }
}

/// Mix one period into `pool`, whose output region the caller has already
/// silenced.
///
/// `copy` is the private per-client render buffer, laid out like the pool.
/// `on_deactivate` runs once for each skipped client with a pending
/// deactivation request.
#[allow(clippy::too_many_arguments)]
pub fn mix_period(
    pool: &mut [f32],
    copy: &mut [f32],
    layout: PoolLayout,
    server: &mut ServerState,
    time_info: &BridgeTimeInfo,
    registry: &Registry,
    scratch: &mut MixBuffers,
    mut on_deactivate: impl FnMut(),
) -> MixOutcome {
    let mut outcome = MixOutcome::default();
    if registry.is_empty() {
        return outcome;
    }

    let required = layout.required_len();
    if pool.len() < required || copy.len() < required || scratch.frames() < layout.frames {
        trace!(
            pool = pool.len(),
            required,
            "audio pool smaller than the port layout, period skipped"
        );
        return outcome;
    }

    server.transport.update_from(time_info);
    let transport = &server.transport;

    let MixBuffers { silence, discard } = scratch;
    let silence = &mut silence[..layout.frames];
    let discard = &mut discard[..layout.frames];
    silence.fill(0.0);

    let (inputs, rest) = pool[..required].split_at_mut(layout.inputs_len());
    let inputs: &[f32] = inputs;
    let pool_out = rest;
    let copy_out = &mut copy[layout.outputs_range()];

    for client in registry.iter() {
        let guard = client.try_lock();
        let mut state = match guard {
            Some(state) if client.is_active() && state.handler.is_some() => state,
            _ => {
                outcome.skipped += 1;
                if client.take_deactivate_request() {
                    on_deactivate();
                }
                continue;
            }
        };

        let state = &mut *state;
        assign_port_buffers(&mut state.ports, layout);
        copy_out.fill(0.0);

        let mut scope = ProcessScope {
            frames: layout.frames,
            transport,
            ports: &state.ports,
            inputs,
            silence: &*silence,
            outputs: &mut *copy_out,
            discard: &mut *discard,
        };
        if let Some(handler) = state.handler.as_mut() {
            handler.process(&mut scope);
        }

        if layout.audio_outs > 0 {
            outcome.contributors += 1;
            for (dst, src) in pool_out.iter_mut().zip(copy_out.iter()) {
                *dst += *src;
            }
        }
    }

    if outcome.contributors > 1 {
        let gain = 1.0 / outcome.contributors as f32;
        for s in pool_out.iter_mut() {
            *s *= gain;
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Client, PortKind};

    struct Constant {
        out: PortId,
        value: f32,
    }

    impl ProcessHandler for Constant {
        fn process(&mut self, scope: &mut ProcessScope<'_>) {
            if let Some(buf) = scope.output(self.out) {
                buf.fill(self.value);
            }
        }
    }

    fn client_with_output(reg: &mut Registry, value: f32) -> std::sync::Arc<Client> {
        let h = reg.insert(Client::new("c"));
        let client = reg.get(h).unwrap().clone();
        {
            let mut st = client.lock();
            let out = st.register_port("out", PortDirection::Output, PortKind::Audio);
            st.handler = Some(Box::new(Constant { out, value }));
        }
        client.activate();
        client
    }

    fn layout(ins: usize, outs: usize, frames: usize) -> PoolLayout {
        PoolLayout {
            audio_ins: ins,
            audio_outs: outs,
            frames,
        }
    }

    fn run(reg: &Registry, l: PoolLayout, pool: &mut [f32]) -> MixOutcome {
        let mut copy = vec![0.0; pool.len()];
        let mut server = ServerState {
            buffer_size: l.frames as u32,
            sample_rate: 48_000.0,
            ..Default::default()
        };
        let mut scratch = MixBuffers::new(l.frames as u32);
        assert!(silence_outputs(pool, l));
        mix_period(
            pool,
            &mut copy,
            l,
            &mut server,
            &BridgeTimeInfo::default(),
            reg,
            &mut scratch,
            || {},
        )
    }

    #[test]
    fn single_client_is_not_attenuated() {
        let mut reg = Registry::new();
        client_with_output(&mut reg, 0.8);
        let mut pool = vec![9.0; 8];
        let outcome = run(&reg, layout(1, 1, 4), &mut pool);
        assert_eq!(outcome.contributors, 1);
        assert_eq!(&pool[..4], &[9.0; 4]);
        assert_eq!(&pool[4..], &[0.8; 4]);
    }

    #[test]
    fn undersized_pool_silences_published_outputs() {
        // Published for 1 in / 1 out at 4 frames; the period has since grown to 8.
        let mut pool = vec![0.3; 8];
        assert!(!silence_outputs(&mut pool, layout(1, 1, 8)));
        assert_eq!(&pool[..4], &[0.3; 4]);
        assert_eq!(&pool[4..], &[0.0; 4]);
    }

    #[test]
    fn two_clients_average() {
        let mut reg = Registry::new();
        client_with_output(&mut reg, 1.0);
        client_with_output(&mut reg, 0.0);
        let mut pool = vec![0.0; 4];
        run(&reg, layout(0, 1, 4), &mut pool);
        assert_eq!(pool, vec![0.5; 4]);
    }

    #[test]
    fn empty_registry_leaves_silence() {
        let reg = Registry::new();
        let mut pool = vec![1.0; 8];
        let outcome = run(&reg, layout(0, 2, 4), &mut pool);
        assert_eq!(outcome, MixOutcome::default());
        assert_eq!(pool, vec![0.0; 8]);
    }

    #[test]
    fn excess_ports_get_scratch_buffers() {
        let mut ports = Vec::new();
        let mut st = crate::registry::ClientState::default();
        for name in ["i0", "i1"] {
            st.register_port(name, PortDirection::Input, PortKind::Audio);
        }
        st.register_port("midi", PortDirection::Input, PortKind::Event);
        for name in ["o0", "o1"] {
            st.register_port(name, PortDirection::Output, PortKind::Audio);
        }
        ports.append(&mut st.ports);
        assign_port_buffers(&mut ports, layout(1, 1, 4));
        let buffers: Vec<_> = ports.iter().map(|p| p.buffer).collect();
        assert_eq!(
            buffers,
            vec![
                PortBuffer::PoolInput(0),
                PortBuffer::Silence,
                PortBuffer::Unassigned,
                PortBuffer::CopyOutput(0),
                PortBuffer::Discard,
            ]
        );
    }

    #[test]
    fn undersized_pool_skips_mixing() {
        let mut reg = Registry::new();
        client_with_output(&mut reg, 1.0);
        let l = layout(2, 2, 4);
        let mut pool = vec![0.0; 12];
        let mut copy = vec![0.0; 12];
        let mut server = ServerState::default();
        let mut scratch = MixBuffers::new(4);
        let outcome = mix_period(
            &mut pool,
            &mut copy,
            l,
            &mut server,
            &BridgeTimeInfo::default(),
            &reg,
            &mut scratch,
            || {},
        );
        assert_eq!(outcome.contributors, 0);
        assert_eq!(pool, vec![0.0; 12]);
    }

    #[test]
    fn held_client_lock_skips_client() {
        let mut reg = Registry::new();
        let busy = client_with_output(&mut reg, 1.0);
        client_with_output(&mut reg, 0.25);
        let _held = busy.lock();

        let mut pool = vec![0.0; 4];
        let outcome = run(&reg, layout(0, 1, 4), &mut pool);
        assert_eq!(outcome.contributors, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(pool, vec![0.25; 4]);
    }

    #[test]
    fn deactivation_is_reported_once() {
        let mut reg = Registry::new();
        let client = client_with_output(&mut reg, 1.0);
        client.deactivate();

        let l = layout(0, 1, 4);
        let mut pool = vec![0.0; 4];
        let mut copy = vec![0.0; 4];
        let mut server = ServerState::default();
        let mut scratch = MixBuffers::new(4);
        let mut reported = 0;
        for _ in 0..3 {
            mix_period(
                &mut pool,
                &mut copy,
                l,
                &mut server,
                &BridgeTimeInfo::default(),
                &reg,
                &mut scratch,
                || reported += 1,
            );
        }
        assert_eq!(reported, 1);
        assert_eq!(pool, vec![0.0; 4]);
    }
}
