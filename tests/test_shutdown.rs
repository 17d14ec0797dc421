// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// How a session ends: host quit on either channel, local stop with and
// without running clients, and the host liveness watchdog.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{fast_timing, ports, Constant, Session, PERIOD_TIMEOUT, REPLY_TIMEOUT};
use libjack_bridge::protocol::{NonRtClientOpcode, NonRtServerOpcode, RtClientOpcode};
use libjack_bridge::{BridgeStatus, Timing, PROCESS_STOPPED_MESSAGE};

const QUIET: Duration = Duration::from_millis(100);

fn active_client(s: &Session) {
    let h = s.bridge.open_client("app");
    s.bridge
        .set_process_handler(
            h,
            Box::new(Constant {
                outputs: Vec::new(),
                value: 0.0,
            }),
        )
        .expect("handler");
    s.bridge.activate(h).expect("activate");
}

fn short_liveness() -> Timing {
    Timing {
        liveness_timeout: Duration::from_millis(200),
        ..fast_timing()
    }
}

#[test]
fn realtime_quit_terminates_without_report() {
    let s = Session::start(ports(0, 1));
    active_client(&s);

    let done = s
        .host
        .run_rt(PERIOD_TIMEOUT, |r| {
            r.write_opcode(RtClientOpcode::Quit);
        })
        .expect("quit");
    assert!(done);

    assert!(s.bridge.wait_until_stopped(REPLY_TIMEOUT));
    assert_eq!(s.lifecycle.count(), 1);
    assert_eq!(s.bridge.status(), BridgeStatus::Stopped);
    assert_eq!(s.host.read_server_opcode(QUIET), None);
}

#[test]
fn nonrt_quit_terminates_without_report() {
    let s = Session::start(ports(0, 1));
    active_client(&s);

    assert!(s.host.send_nonrt_opcode(NonRtClientOpcode::Quit));
    assert!(s.bridge.wait_until_stopped(REPLY_TIMEOUT));
    assert_eq!(s.lifecycle.count(), 1);
    assert_eq!(s.host.read_server_opcode(QUIET), None);

    // The realtime side no longer answers.
    assert!(!s.host.process(Duration::from_millis(200)).expect("signal"));
}

#[test]
fn stop_with_active_client_reports_error() {
    let s = Session::start(ports(0, 1));
    active_client(&s);

    assert!(s.bridge.stop().is_ok());
    assert_eq!(
        s.host.read_server_opcode(REPLY_TIMEOUT),
        Some(Ok(NonRtServerOpcode::Error))
    );
    assert_eq!(s.host.read_server_message(), PROCESS_STOPPED_MESSAGE);
    assert_eq!(s.lifecycle.count(), 0);
    assert_eq!(s.bridge.client_count(), 0);
}

#[test]
fn stop_without_active_client_reports_ui_closed() {
    let s = Session::start(ports(0, 1));
    s.bridge.open_client("never-activated");

    assert!(s.bridge.stop().is_ok());
    assert_eq!(
        s.host.read_server_opcode(REPLY_TIMEOUT),
        Some(Ok(NonRtServerOpcode::UiClosed))
    );
    assert_eq!(s.lifecycle.count(), 0);
}

#[test]
fn stop_is_bounded() {
    let s = Session::start(ports(0, 1));
    let start = Instant::now();
    assert!(s.bridge.stop().is_ok());
    assert!(start.elapsed() < Duration::from_secs(2), "{:?}", start.elapsed());
}

#[test]
fn silent_host_stops_the_bridge() {
    let s = Session::start_with_timing(ports(0, 1), short_liveness());
    active_client(&s);

    assert!(s.bridge.wait_until_stopped(Duration::from_secs(3)));
    assert_eq!(s.bridge.status(), BridgeStatus::Stopped);
    assert_eq!(
        s.host.read_server_opcode(REPLY_TIMEOUT),
        Some(Ok(NonRtServerOpcode::Error))
    );
    assert_eq!(s.host.read_server_message(), PROCESS_STOPPED_MESSAGE);
    assert_eq!(s.lifecycle.count(), 0);
}

#[test]
fn pings_keep_the_bridge_alive() {
    let s = Session::start_with_timing(ports(0, 1), short_liveness());

    for _ in 0..10 {
        assert!(s.host.send_nonrt_opcode(NonRtClientOpcode::Ping));
        assert_eq!(
            s.host.read_server_opcode(REPLY_TIMEOUT),
            Some(Ok(NonRtServerOpcode::Pong))
        );
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(s.bridge.status(), BridgeStatus::Running);
}

#[test]
fn ping_off_disables_the_watchdog() {
    let s = Session::start_with_timing(ports(0, 1), short_liveness());
    assert!(s.host.send_nonrt(|r| {
        r.write_opcode(NonRtClientOpcode::PingOnOff);
        r.write_bool(false);
    }));

    thread::sleep(Duration::from_millis(600));
    assert_eq!(s.bridge.status(), BridgeStatus::Running);
    assert!(!s.bridge.wait_until_stopped(Duration::from_millis(10)));
}
