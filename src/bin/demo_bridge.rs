// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Host and bridge in one process.
//
// Usage: demo_bridge [periods]
//
// Creates the four segments, starts a bridge on them, registers two sine
// clients with a stereo output each and drives a number of periods from the
// host side, printing the mixed peak level. Finishes with a ping, a save
// request, a buffer size change and a local stop.
//
// Set LIBJACK_BRIDGE_LOG=debug to see the bridge's own log output.

use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use libjack_bridge::host::HostPeer;
use libjack_bridge::protocol::{BridgeTimeInfo, NonRtClientOpcode, NonRtServerOpcode};
use libjack_bridge::{
    init_logging, Bridge, BridgeConfig, PortCounts, PortDirection, PortId, PortKind,
    ProcessHandler, ProcessScope, Setup,
};

const FRAMES: u32 = 256;
const RATE: f64 = 48_000.0;
const TIMEOUT: Duration = Duration::from_secs(2);

struct Sine {
    outs: [PortId; 2],
    freq: f32,
    phase: f32,
    rate: f32,
}

impl ProcessHandler for Sine {
    fn process(&mut self, scope: &mut ProcessScope<'_>) {
        let step = TAU * self.freq / self.rate;
        let start = self.phase;
        for &id in &self.outs {
            let mut phase = start;
            if let Some(buf) = scope.output(id) {
                for s in buf.iter_mut() {
                    *s = phase.sin();
                    phase = (phase + step) % TAU;
                }
            }
            self.phase = phase;
        }
    }

    fn sample_rate_changed(&mut self, sample_rate: f64) {
        self.rate = sample_rate as f32;
    }
}

fn add_sine(bridge: &Bridge, name: &str, freq: f32) {
    let h = bridge.open_client(name);
    let outs = [
        bridge
            .register_port(h, "out_l", PortDirection::Output, PortKind::Audio)
            .expect("port"),
        bridge
            .register_port(h, "out_r", PortDirection::Output, PortKind::Audio)
            .expect("port"),
    ];
    bridge
        .set_process_handler(
            h,
            Box::new(Sine {
                outs,
                freq,
                phase: 0.0,
                rate: RATE as f32,
            }),
        )
        .expect("handler");
    bridge.activate(h).expect("activate");
    println!("demo: client '{name}' at {freq} Hz");
}

fn expect_reply(host: &HostPeer, want: NonRtServerOpcode) {
    match host.read_server_opcode(TIMEOUT) {
        Some(Ok(op)) if op == want => println!("demo: host got {}", op.name()),
        other => {
            eprintln!("demo: expected {}, got {other:?}", want.name());
            std::process::exit(1);
        }
    }
}

fn main() {
    init_logging();
    let periods: u64 = std::env::args()
        .nth(1)
        .and_then(|a| a.parse().ok())
        .unwrap_or(200);

    let ports = PortCounts {
        audio_ins: 0,
        audio_outs: 2,
        midi_ins: 0,
        midi_outs: 0,
    };

    let mut host = HostPeer::create_unique().expect("create segments");
    host.write_handshake(FRAMES, RATE);
    println!("demo: segments {}", host.segment_ids().to_token());

    let config = BridgeConfig::new(host.segment_ids().clone(), Setup { ports, flags: 0 });
    let bridge = match Bridge::start(config) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("demo: bridge failed to start: {e}");
            std::process::exit(1);
        }
    };
    expect_reply(&host, NonRtServerOpcode::Ready);

    let floats = ((ports.audio_ins + ports.audio_outs) * FRAMES) as usize;
    if !host.set_audio_pool(floats, TIMEOUT).unwrap_or(false) {
        eprintln!("demo: bridge did not take the audio pool");
        std::process::exit(1);
    }

    add_sine(&bridge, "sine_a", 440.0);
    add_sine(&bridge, "sine_b", 660.0);

    println!("\ndemo: running {periods} periods of {FRAMES} frames...");
    let start = Instant::now();
    let mut worst = Duration::ZERO;
    for n in 0..periods {
        host.set_time_info(BridgeTimeInfo {
            playing: 1,
            frame: n * u64::from(FRAMES),
            ..Default::default()
        });
        let t = Instant::now();
        if !host.process(TIMEOUT).unwrap_or(false) {
            eprintln!("demo: period {n} timed out");
            std::process::exit(1);
        }
        worst = worst.max(t.elapsed());

        if n % 50 == 0 {
            let peak = host
                .audio_pool_mut()
                .iter()
                .fold(0.0f32, |m, s| m.max(s.abs()));
            println!("  period={n:<5} peak={peak:.3}");
        }
    }
    println!(
        "demo: {periods} periods in {:?}, worst round trip {:?}",
        start.elapsed(),
        worst
    );
    println!("demo: transport frame = {}", bridge.transport().frame);

    println!();
    host.send_nonrt_opcode(NonRtClientOpcode::Ping);
    expect_reply(&host, NonRtServerOpcode::Pong);
    host.send_nonrt_opcode(NonRtClientOpcode::PrepareForSave);
    expect_reply(&host, NonRtServerOpcode::Saved);

    host.set_buffer_size(FRAMES);
    host.send_nonrt_opcode(NonRtClientOpcode::Ping);
    expect_reply(&host, NonRtServerOpcode::Pong);
    println!("demo: buffer size now {}", bridge.buffer_size());

    println!("\ndemo: stopping bridge with clients still active...");
    if let Err(e) = bridge.stop() {
        eprintln!("demo: stop failed: {e}");
    }
    expect_reply(&host, NonRtServerOpcode::Error);
    println!("demo: host got message '{}'", host.read_server_message());
    println!("demo: done");
}
