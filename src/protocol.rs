// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wire layout of the three control channels and their opcode catalogues.
// Both peers run on the same machine, so every value is native-endian and
// every structure is `#[repr(C)]`. The host declares `size_of` for each of
// the three channel structures during the handshake; any difference means
// the two sides were built from different protocol revisions.

use std::cell::UnsafeCell;
use std::io;
use std::sync::atomic::AtomicU32;

use crate::ring_buffer::{Ring, StackBuffer};
use crate::semaphore::ShmSemaphore;

pub const RT_CLIENT_RING_SIZE: usize = 4096;
pub const NON_RT_CLIENT_RING_SIZE: usize = 16384;
pub const NON_RT_SERVER_RING_SIZE: usize = 65536;

/// Bytes reserved for event output written back to the host each period.
pub const RT_MIDI_OUT_SIZE: usize = 2048;

/// `BridgeTimeInfo::valid` bit: bar/beat/tick fields are meaningful.
pub const TIME_INFO_VALID_BBT: u32 = 0x1;

/// Transport snapshot the host writes before each `Process`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BridgeTimeInfo {
    pub playing: u32,
    pub valid: u32,
    pub frame: u64,
    pub usecs: u64,
    pub bar: i32,
    pub beat: i32,
    pub tick: i32,
    pub beats_per_bar: f32,
    pub beat_type: f32,
    pub ticks_per_beat: f64,
    pub beats_per_minute: f64,
    pub bar_start_tick: f64,
}

/// Semaphores pairing every realtime wake-up with a completion.
#[repr(C)]
pub struct SemaphorePair {
    /// Posted by the host once realtime opcodes are committed.
    pub host_ready: ShmSemaphore,
    /// Posted by the bridge once it drained them.
    pub bridge_done: ShmSemaphore,
}

/// Realtime client channel (host → bridge), one per period.
#[repr(C)]
pub struct RtClientData {
    pub sem: SemaphorePair,
    pub time_info: UnsafeCell<BridgeTimeInfo>,
    pub ring_buffer: StackBuffer<RT_CLIENT_RING_SIZE>,
    pub midi_out: UnsafeCell<[u8; RT_MIDI_OUT_SIZE]>,
    pub proc_flags: AtomicU32,
}

/// Non-realtime client channel (host → bridge).
#[repr(C)]
pub struct NonRtClientData {
    pub ring_buffer: StackBuffer<NON_RT_CLIENT_RING_SIZE>,
}

/// Non-realtime server channel (bridge → host).
#[repr(C)]
pub struct NonRtServerData {
    pub ring_buffer: StackBuffer<NON_RT_SERVER_RING_SIZE>,
}

// Safety: the host writes `time_info` and reads `midi_out` only while the
// bridge is parked on `host_ready`, and vice versa.
unsafe impl Sync for RtClientData {}

/// A structure that backs one control channel segment.
pub trait ControlData: Sync + Sized {
    fn ring(&self) -> Ring<'_>;

    /// Prepare freshly zeroed memory. Called by the creating side only.
    ///
    /// # Safety
    /// `this` must point to writable, zeroed memory for `Self` that no
    /// other thread or process uses yet.
    unsafe fn init_in_place(_this: *mut Self) -> io::Result<()> {
        Ok(())
    }
}

impl ControlData for RtClientData {
    fn ring(&self) -> Ring<'_> {
        self.ring_buffer.ring()
    }

    unsafe fn init_in_place(this: *mut Self) -> io::Result<()> {
        ShmSemaphore::init_in_place(std::ptr::addr_of_mut!((*this).sem.host_ready))?;
        ShmSemaphore::init_in_place(std::ptr::addr_of_mut!((*this).sem.bridge_done))
    }
}

impl ControlData for NonRtClientData {
    fn ring(&self) -> Ring<'_> {
        self.ring_buffer.ring()
    }
}

impl ControlData for NonRtServerData {
    fn ring(&self) -> Ring<'_> {
        self.ring_buffer.ring()
    }
}

/// The three sizes exchanged during the handshake, in wire order.
pub fn channel_data_sizes() -> [u32; 3] {
    [
        std::mem::size_of::<RtClientData>() as u32,
        std::mem::size_of::<NonRtClientData>() as u32,
        std::mem::size_of::<NonRtServerData>() as u32,
    ]
}

macro_rules! opcodes {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident = $value:literal,)* }
    ) => {
        $(#[$meta])*
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name { $($variant = $value,)* }

        impl TryFrom<u32> for $name {
            type Error = u32;

            fn try_from(value: u32) -> Result<Self, u32> {
                match value {
                    $($value => Ok($name::$variant),)*
                    other => Err(other),
                }
            }
        }

        impl $name {
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant),)*
                }
            }
        }

        impl From<$name> for u32 {
            fn from(op: $name) -> u32 {
                op as u32
            }
        }
    };
}

opcodes! {
    /// Opcodes on the realtime client channel.
    pub enum RtClientOpcode {
        Null = 0,
        SetAudioPool = 1,
        ControlEventParameter = 2,
        ControlEventMidiBank = 3,
        ControlEventMidiProgram = 4,
        ControlEventAllSoundOff = 5,
        ControlEventAllNotesOff = 6,
        MidiEvent = 7,
        Process = 8,
        Quit = 9,
    }
}

opcodes! {
    /// Opcodes on the non-realtime client channel.
    pub enum NonRtClientOpcode {
        Null = 0,
        Ping = 1,
        PingOnOff = 2,
        Activate = 3,
        Deactivate = 4,
        SetBufferSize = 5,
        SetSampleRate = 6,
        SetOffline = 7,
        SetOnline = 8,
        SetParameterValue = 9,
        SetParameterMidiChannel = 10,
        SetParameterMidiCC = 11,
        SetProgram = 12,
        SetMidiProgram = 13,
        SetCustomData = 14,
        SetChunkDataFile = 15,
        SetOption = 16,
        SetCtrlChannel = 17,
        PrepareForSave = 18,
        ShowUI = 19,
        HideUI = 20,
        UiParameterChange = 21,
        UiProgramChange = 22,
        UiMidiProgramChange = 23,
        UiNoteOn = 24,
        UiNoteOff = 25,
        Quit = 26,
    }
}

opcodes! {
    /// Opcodes on the non-realtime server channel.
    pub enum NonRtServerOpcode {
        Null = 0,
        Pong = 1,
        Ready = 2,
        Saved = 3,
        UiClosed = 4,
        Error = 5,
    }
}
