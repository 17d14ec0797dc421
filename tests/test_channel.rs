// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Control channels over real shared memory: attach, framing across mappings,
// the realtime semaphore pair and writer backpressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use libjack_bridge::protocol::{BridgeTimeInfo, RtClientOpcode};
use libjack_bridge::{NonRtClientControl, NonRtServerControl, RtClientControl, ShmSemaphore};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

#[test]
fn attach_to_missing_segment_fails() {
    let name = unique_name("chmiss");
    assert!(NonRtClientControl::attach(&name).is_err());
}

#[test]
fn frames_cross_between_mappings() {
    let name = unique_name("chx");
    let host = NonRtClientControl::create(&name).expect("create");
    let bridge = NonRtClientControl::attach(&name).expect("attach");

    {
        let w = host.writer();
        w.write_opcode(5u32);
        w.write_uint(256);
        assert!(w.commit_write());
    }

    let ring = bridge.ring();
    assert!(ring.is_data_available_for_reading());
    assert_eq!(ring.read_uint(), 5);
    assert_eq!(ring.read_uint(), 256);
}

#[test]
fn time_info_is_shared() {
    let name = unique_name("chti");
    let host = RtClientControl::create(&name).expect("create");
    let bridge = RtClientControl::attach(&name).expect("attach");

    let info = BridgeTimeInfo {
        playing: 1,
        frame: 1234,
        beats_per_minute: 90.0,
        ..Default::default()
    };
    host.set_time_info(info);
    assert_eq!(bridge.time_info(), info);
}

#[test]
fn wait_for_host_times_out_without_signal() {
    let name = unique_name("chto");
    let _host = RtClientControl::create(&name).expect("create");
    let bridge = RtClientControl::attach(&name).expect("attach");

    let start = Instant::now();
    assert!(bridge.wait_for_host(Duration::from_millis(50)).is_none());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(40), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
}

#[test]
fn period_guard_completes_the_host_wait() {
    let name = unique_name("chpg");
    let host = RtClientControl::create(&name).expect("create");
    let bridge = RtClientControl::attach(&name).expect("attach");

    let worker = thread::spawn(move || {
        let period = bridge.wait_for_host(Duration::from_secs(5));
        assert!(period.is_some());
        let ring = bridge.ring();
        let op = ring.read_opcode::<RtClientOpcode>();
        drop(period);
        op
    });

    {
        let w = host.writer();
        w.write_opcode(RtClientOpcode::Process);
        w.commit_write();
    }
    assert!(host.signal_and_wait(Duration::from_secs(5)).expect("signal"));
    assert_eq!(worker.join().unwrap(), Ok(RtClientOpcode::Process));
}

#[cfg(target_os = "linux")]
#[test]
fn semaphore_is_a_single_shared_word() {
    // No mutex inside, so posting from the realtime side cannot block on
    // a lock the host holds.
    assert_eq!(std::mem::size_of::<ShmSemaphore>(), std::mem::size_of::<u32>());
}

#[test]
fn back_to_back_periods_stay_in_step() {
    let name = unique_name("chbb");
    let host = RtClientControl::create(&name).expect("create");
    let bridge = RtClientControl::attach(&name).expect("attach");
    const PERIODS: usize = 500;

    let worker = thread::spawn(move || {
        let mut served = 0;
        while served < PERIODS {
            if let Some(period) = bridge.wait_for_host(Duration::from_secs(5)) {
                served += 1;
                drop(period);
            } else {
                break;
            }
        }
        served
    });

    for _ in 0..PERIODS {
        assert!(host.signal_and_wait(Duration::from_secs(5)).expect("signal"));
    }
    assert_eq!(worker.join().unwrap(), PERIODS);
    assert!(!host.signal_and_wait(Duration::from_millis(20)).expect("signal"));
}

#[test]
fn proc_flags_are_one_shot() {
    let name = unique_name("chpf");
    let host = RtClientControl::create(&name).expect("create");
    let bridge = RtClientControl::attach(&name).expect("attach");

    assert_eq!(host.take_proc_flags(), 0);
    bridge.raise_proc_flags();
    assert_eq!(host.take_proc_flags(), 1);
    assert_eq!(host.take_proc_flags(), 0);
}

#[test]
fn backpressure_returns_once_consumer_drains() {
    let name = unique_name("chbp");
    let bridge = NonRtServerControl::create(&name).expect("create");
    let host = NonRtServerControl::attach(&name).expect("attach");

    let cap = bridge.ring().capacity();
    {
        let w = bridge.writer();
        // Leave less than a quarter free.
        w.write_custom_data(&vec![0u8; cap * 7 / 8]);
        assert!(w.commit_write());
    }

    let drainer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        host.ring().discard_readable();
    });

    let start = Instant::now();
    bridge.writer().wait_if_data_is_reaching_limit();
    let elapsed = start.elapsed();
    drainer.join().unwrap();

    assert!(elapsed >= Duration::from_millis(40), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(900), "{elapsed:?}");
}

#[test]
fn backpressure_is_free_when_ring_is_empty() {
    let name = unique_name("chbf");
    let bridge = NonRtServerControl::create(&name).expect("create");

    let start = Instant::now();
    bridge.writer().wait_if_data_is_reaching_limit();
    assert!(start.elapsed() < Duration::from_millis(10));
}
