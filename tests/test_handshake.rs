// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Startup: segment attach, structure size negotiation and the initial
// configuration.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_timing, ports, RecordingLifecycle, Session, FRAMES, RATE, REPLY_TIMEOUT};
use libjack_bridge::host::{unique_segment_ids, HostPeer};
use libjack_bridge::protocol::{channel_data_sizes, NonRtServerOpcode};
use libjack_bridge::shm_name::SegmentKind;
use libjack_bridge::{Bridge, BridgeConfig, BridgeError, BridgeStatus, Setup};

fn start_raw(host: &HostPeer) -> (Bridge, Arc<RecordingLifecycle>) {
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let config = BridgeConfig::new(
        host.segment_ids().clone(),
        Setup {
            ports: ports(1, 1),
            flags: 0,
        },
    )
    .with_timing(fast_timing());
    let bridge = Bridge::start_with(config, lifecycle.clone()).expect("start");
    (bridge, lifecycle)
}

#[test]
fn valid_handshake_reaches_running() {
    let session = Session::start(ports(2, 2));
    let bridge = &session.bridge;

    assert!(common::wait_for(REPLY_TIMEOUT, || bridge.status() == BridgeStatus::Running));
    assert_eq!(bridge.buffer_size(), FRAMES);
    assert_eq!(bridge.sample_rate(), RATE);
    assert!(bridge.realtime_thread_id().is_some());
    assert_eq!(bridge.port_counts(), ports(2, 2));
}

#[test]
fn missing_segments_fail_to_attach() {
    let config = BridgeConfig::new(
        unique_segment_ids(),
        Setup {
            ports: ports(1, 1),
            flags: 0,
        },
    );
    let err = Bridge::start(config).err().expect("attach must fail");
    assert!(matches!(
        err,
        BridgeError::SharedMemory {
            segment: SegmentKind::AudioPool,
            ..
        }
    ));
}

#[test]
fn each_size_mismatch_is_rejected() {
    let kinds = [
        SegmentKind::RtClient,
        SegmentKind::NonRtClient,
        SegmentKind::NonRtServer,
    ];
    for (i, kind) in kinds.into_iter().enumerate() {
        let host = HostPeer::create_unique().expect("create");
        let mut sizes = channel_data_sizes();
        sizes[i] += 8;
        assert!(host.write_handshake_with_sizes(sizes, FRAMES, RATE));

        let (bridge, _) = start_raw(&host);
        assert!(bridge.wait_until_stopped(REPLY_TIMEOUT));
        assert_eq!(bridge.status(), BridgeStatus::Failed);
        assert_eq!(host.read_server_opcode(Duration::from_millis(50)), None);

        match bridge.stop() {
            Err(BridgeError::SizeMismatch {
                segment,
                declared,
                expected,
            }) => {
                assert_eq!(segment, kind);
                assert_eq!(declared, expected + 8);
            }
            other => panic!("expected size mismatch for {kind}, got {other:?}"),
        }
    }
}

#[test]
fn zero_buffer_size_is_invalid() {
    let host = HostPeer::create_unique().expect("create");
    assert!(host.write_handshake(0, RATE));

    let (bridge, _) = start_raw(&host);
    assert!(bridge.wait_until_stopped(REPLY_TIMEOUT));
    assert_eq!(bridge.status(), BridgeStatus::Failed);
    assert!(matches!(
        bridge.stop(),
        Err(BridgeError::InvalidState { buffer_size: 0, .. })
    ));
}

#[test]
fn zero_sample_rate_is_invalid() {
    let host = HostPeer::create_unique().expect("create");
    assert!(host.write_handshake(FRAMES, 0.0));

    let (bridge, _) = start_raw(&host);
    assert!(bridge.wait_until_stopped(REPLY_TIMEOUT));
    assert!(matches!(bridge.stop(), Err(BridgeError::InvalidState { .. })));
    assert_eq!(host.read_server_opcode(Duration::from_millis(50)), None);
}

#[test]
fn negative_or_nan_sample_rate_is_invalid() {
    for rate in [-48_000.0, f64::NAN] {
        let host = HostPeer::create_unique().expect("create");
        assert!(host.write_handshake(FRAMES, rate));

        let (bridge, _) = start_raw(&host);
        assert!(bridge.wait_until_stopped(REPLY_TIMEOUT));
        assert_eq!(bridge.status(), BridgeStatus::Failed);
        assert!(matches!(bridge.stop(), Err(BridgeError::InvalidState { .. })));
        assert_eq!(host.read_server_opcode(Duration::from_millis(50)), None);
    }
}

#[test]
fn wrong_first_opcode_is_rejected() {
    let host = HostPeer::create_unique().expect("create");
    assert!(host.set_buffer_size(FRAMES));

    let (bridge, lifecycle) = start_raw(&host);
    assert!(bridge.wait_until_stopped(REPLY_TIMEOUT));
    assert!(matches!(
        bridge.stop(),
        Err(BridgeError::UnexpectedOpcode { expected: "Null", .. })
    ));
    assert_eq!(lifecycle.count(), 0);
}

#[test]
fn second_stop_is_a_no_op() {
    let session = Session::start(ports(1, 1));
    assert!(session.bridge.stop().is_ok());
    assert_eq!(session.bridge.status(), BridgeStatus::Stopped);
    assert!(session.bridge.stop().is_ok());
}
