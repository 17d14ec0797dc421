// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Host side of the protocol.
//
// Creates the four segments the way a bridge host does and drives both client
// channels. Used by the integration tests and the demo to exercise the bridge
// end to end over real shared memory.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::channel::{NonRtClientControl, NonRtServerControl, RtClientControl};
use crate::config::{SegmentIds, SEGMENT_ID_LEN};
use crate::protocol::{
    channel_data_sizes, BridgeTimeInfo, NonRtClientOpcode, NonRtServerOpcode, RtClientOpcode,
};
use crate::ring_buffer::Ring;
use crate::shm::{ShmOpenMode, ShmSegment};
use crate::shm_name::SegmentKind;

const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(2);

static ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Segment ids unique to this process and call.
pub fn unique_segment_ids() -> SegmentIds {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut seed = (u64::from(std::process::id()) << 12) ^ u64::from(n);
    let mut base = String::with_capacity(SEGMENT_ID_LEN - 1);
    for _ in 0..SEGMENT_ID_LEN - 1 {
        base.push(char::from(ALPHABET[(seed % 36) as usize]));
        seed /= 36;
    }
    SegmentIds {
        audio_pool: format!("{base}p"),
        rt_client: format!("{base}r"),
        nonrt_client: format!("{base}c"),
        nonrt_server: format!("{base}s"),
    }
}

/// Owner of the four segments; unlinks them when dropped.
pub struct HostPeer {
    ids: SegmentIds,
    pool: ShmSegment,
    rt: RtClientControl,
    nonrt_client: NonRtClientControl,
    nonrt_server: NonRtServerControl,
}

impl HostPeer {
    /// Create and initialise all four segments. The audio pool stays
    /// unmapped until [`set_audio_pool`](Self::set_audio_pool).
    pub fn create(ids: SegmentIds) -> io::Result<Self> {
        let pool = ShmSegment::open(&ids.segment_name(SegmentKind::AudioPool), ShmOpenMode::Create)?;
        let rt = RtClientControl::create(&ids.segment_name(SegmentKind::RtClient))?;
        let nonrt_client = NonRtClientControl::create(&ids.segment_name(SegmentKind::NonRtClient))?;
        let nonrt_server = NonRtServerControl::create(&ids.segment_name(SegmentKind::NonRtServer))?;
        Ok(Self {
            ids,
            pool,
            rt,
            nonrt_client,
            nonrt_server,
        })
    }

    /// Create segments under fresh ids.
    pub fn create_unique() -> io::Result<Self> {
        Self::create(unique_segment_ids())
    }

    pub fn segment_ids(&self) -> &SegmentIds {
        &self.ids
    }

    pub fn rt_control(&self) -> &RtClientControl {
        &self.rt
    }

    // --- non-realtime client channel ---

    /// Stage one frame with `write` and commit it.
    pub fn send_nonrt(&self, write: impl FnOnce(&Ring<'_>)) -> bool {
        let w = self.nonrt_client.writer();
        write(&*w);
        w.commit_write()
    }

    pub fn send_nonrt_opcode(&self, opcode: NonRtClientOpcode) -> bool {
        self.send_nonrt(|r| {
            r.write_opcode(opcode);
        })
    }

    /// The startup sequence with this build's structure sizes.
    pub fn write_handshake(&self, buffer_size: u32, sample_rate: f64) -> bool {
        self.write_handshake_with_sizes(channel_data_sizes(), buffer_size, sample_rate)
    }

    /// The startup sequence with explicit structure sizes.
    pub fn write_handshake_with_sizes(
        &self,
        sizes: [u32; 3],
        buffer_size: u32,
        sample_rate: f64,
    ) -> bool {
        self.send_nonrt(|r| {
            r.write_opcode(NonRtClientOpcode::Null);
            for size in sizes {
                r.write_uint(size);
            }
            r.write_opcode(NonRtClientOpcode::SetBufferSize);
            r.write_uint(buffer_size);
            r.write_opcode(NonRtClientOpcode::SetSampleRate);
            r.write_double(sample_rate);
        })
    }

    pub fn set_buffer_size(&self, frames: u32) -> bool {
        self.send_nonrt(|r| {
            r.write_opcode(NonRtClientOpcode::SetBufferSize);
            r.write_uint(frames);
        })
    }

    pub fn set_sample_rate(&self, rate: f64) -> bool {
        self.send_nonrt(|r| {
            r.write_opcode(NonRtClientOpcode::SetSampleRate);
            r.write_double(rate);
        })
    }

    // --- non-realtime server channel ---

    /// Poll the server channel until an opcode arrives or `timeout` elapses.
    /// Unknown values come back as `Err(raw)`.
    pub fn read_server_opcode(
        &self,
        timeout: Duration,
    ) -> Option<Result<NonRtServerOpcode, u32>> {
        let ring = self.nonrt_server.ring();
        let deadline = Instant::now() + timeout;
        while !ring.is_data_available_for_reading() {
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(SERVER_POLL_INTERVAL);
        }
        Some(ring.read_opcode())
    }

    /// Payload of an `Error` opcode.
    pub fn read_server_message(&self) -> String {
        let ring = self.nonrt_server.ring();
        let len = ring.read_uint() as usize;
        let mut buf = vec![0u8; len];
        ring.read_custom_data(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    // --- realtime client channel ---

    /// Stage one frame, commit it, wake the bridge and wait for it to finish.
    /// Returns `Ok(false)` if the bridge did not complete within `timeout`.
    pub fn run_rt(&self, timeout: Duration, write: impl FnOnce(&Ring<'_>)) -> io::Result<bool> {
        {
            let w = self.rt.writer();
            write(&*w);
            if !w.commit_write() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "realtime channel full"));
            }
        }
        self.rt.signal_and_wait(timeout)
    }

    /// Size, map and publish the audio pool.
    pub fn set_audio_pool(&mut self, floats: usize, timeout: Duration) -> io::Result<bool> {
        let bytes = floats * std::mem::size_of::<f32>();
        self.pool.truncate(bytes)?;
        self.pool.map(bytes)?;
        self.run_rt(timeout, |r| {
            r.write_opcode(RtClientOpcode::SetAudioPool);
            r.write_ulong(bytes as u64);
        })
    }

    /// The host's view of the pool; empty until published.
    pub fn audio_pool_mut(&mut self) -> &mut [f32] {
        if !self.pool.is_mapped() {
            return &mut [];
        }
        let len = self.pool.mapped_len() / std::mem::size_of::<f32>();
        unsafe { std::slice::from_raw_parts_mut(self.pool.as_mut_ptr() as *mut f32, len) }
    }

    pub fn set_time_info(&self, info: BridgeTimeInfo) {
        self.rt.set_time_info(info);
    }

    /// One `Process` period.
    pub fn process(&self, timeout: Duration) -> io::Result<bool> {
        self.run_rt(timeout, |r| {
            r.write_opcode(RtClientOpcode::Process);
        })
    }

    pub fn take_proc_flags(&self) -> u32 {
        self.rt.take_proc_flags()
    }
}
