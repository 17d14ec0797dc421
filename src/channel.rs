// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Control channels: a mapped segment holding one `ControlData` structure.
//
// Reading needs no lock: each channel has exactly one consumer thread.
// Writers go through `ChannelWriter`, which holds the channel's local lock
// for as long as a frame is being staged and committed.

use std::io;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use crate::protocol::{
    BridgeTimeInfo, ControlData, NonRtClientData, NonRtServerData, RtClientData,
    RT_MIDI_OUT_SIZE,
};
use crate::ring_buffer::Ring;
use crate::shm::ShmSegment;

/// Bounded wait used by `wait_if_data_is_reaching_limit`: 50 × 20 ms.
const BACKPRESSURE_POLLS: u32 = 50;
const BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A control channel backed by a named shared memory segment.
pub struct ControlChannel<D: ControlData> {
    segment: ShmSegment,
    write_lock: Mutex<()>,
    _marker: PhantomData<D>,
}

pub type RtClientControl = ControlChannel<RtClientData>;
pub type NonRtClientControl = ControlChannel<NonRtClientData>;
pub type NonRtServerControl = ControlChannel<NonRtServerData>;

impl<D: ControlData> ControlChannel<D> {
    /// Attach to a channel segment created by the host and map it.
    pub fn attach(name: &str) -> io::Result<Self> {
        let mut segment = ShmSegment::attach(name)?;
        segment.map(std::mem::size_of::<D>())?;
        Ok(Self::from_segment(segment))
    }

    /// Create and initialise a channel segment (host side).
    pub fn create(name: &str) -> io::Result<Self> {
        let segment = ShmSegment::create(name, std::mem::size_of::<D>())?;
        unsafe { D::init_in_place(segment.as_mut_ptr() as *mut D)? };
        Ok(Self::from_segment(segment))
    }

    fn from_segment(segment: ShmSegment) -> Self {
        Self {
            segment,
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// The mapped structure.
    pub fn data(&self) -> &D {
        // The segment stays mapped with at least size_of::<D>() bytes for the
        // lifetime of `self`, and mmap returns page-aligned memory.
        unsafe { &*(self.segment.as_mut_ptr() as *const D) }
    }

    /// Reader view. Only the channel's consumer thread may read.
    pub fn ring(&self) -> Ring<'_> {
        self.data().ring()
    }

    /// Take the channel's write lock.
    pub fn writer(&self) -> ChannelWriter<'_> {
        ChannelWriter {
            ring: self.data().ring(),
            _guard: self.write_lock.lock(),
        }
    }

    pub fn segment_name(&self) -> &str {
        self.segment.name()
    }
}

/// Exclusive writer for one channel. Staged writes become visible to the
/// consumer only through [`commit_write`](Ring::commit_write).
pub struct ChannelWriter<'a> {
    ring: Ring<'a>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> Deref for ChannelWriter<'a> {
    type Target = Ring<'a>;

    fn deref(&self) -> &Ring<'a> {
        &self.ring
    }
}

impl ChannelWriter<'_> {
    /// Block while the consumer has left less than a quarter of the ring
    /// free, polling until three quarters are free again or the bounded wait
    /// runs out.
    pub fn wait_if_data_is_reaching_limit(&self) {
        let cap = self.ring.capacity();
        if self.ring.writable_size() >= cap / 4 {
            return;
        }
        for _ in 0..BACKPRESSURE_POLLS {
            thread::sleep(BACKPRESSURE_POLL_INTERVAL);
            if self.ring.writable_size() >= cap * 3 / 4 {
                return;
            }
        }
        warn!("control channel is still nearly full, peer is not draining it");
    }
}

// ---------------------------------------------------------------------------
// Realtime channel extras
// ---------------------------------------------------------------------------

impl ControlChannel<RtClientData> {
    /// Wait up to `timeout` for the host to announce new realtime data.
    ///
    /// On success the returned guard posts `bridge_done` when dropped, telling
    /// the host the period has been handled.
    pub fn wait_for_host(&self, timeout: Duration) -> Option<PeriodGuard<'_>> {
        match self.data().sem.host_ready.timed_wait(timeout) {
            Ok(true) => Some(PeriodGuard { control: self }),
            Ok(false) => None,
            Err(e) => {
                warn!("realtime wait failed: {e}");
                None
            }
        }
    }

    /// Transport snapshot for the current period.
    pub fn time_info(&self) -> BridgeTimeInfo {
        unsafe { *self.data().time_info.get() }
    }

    /// Host side: publish the transport snapshot for the next period.
    pub fn set_time_info(&self, info: BridgeTimeInfo) {
        unsafe { *self.data().time_info.get() = info };
    }

    pub fn raise_proc_flags(&self) {
        self.data().proc_flags.store(1, Ordering::Release);
    }

    /// Host side: read and reset the process flags.
    pub fn take_proc_flags(&self) -> u32 {
        self.data().proc_flags.swap(0, Ordering::AcqRel)
    }

    /// Clear the event output record for the next period.
    pub fn clear_midi_out(&self) {
        unsafe { *self.data().midi_out.get() = [0; RT_MIDI_OUT_SIZE] };
    }

    /// Host side: wake the bridge and wait for it to finish the period.
    pub fn signal_and_wait(&self, timeout: Duration) -> io::Result<bool> {
        let sem = &self.data().sem;
        sem.host_ready.post()?;
        sem.bridge_done.timed_wait(timeout)
    }
}

/// Held while one batch of realtime opcodes is processed.
pub struct PeriodGuard<'a> {
    control: &'a RtClientControl,
}

impl Drop for PeriodGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.control.data().sem.bridge_done.post() {
            warn!("failed to post realtime completion: {e}");
        }
    }
}
