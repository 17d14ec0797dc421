// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// JACK client library replacement that bridges an unmodified JACK application
// to a host process over shared memory.
//
// Layering, bottom up: platform syscalls, named segments and in-segment
// semaphores, the byte ring and channel structures, the client registry and
// mixer, and finally the two engine threads behind `Bridge` plus the exported
// C entry points.

#[cfg(not(unix))]
compile_error!("libjack-bridge requires POSIX shared memory and pthreads");

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmOpenMode, ShmSegment};

mod semaphore;
pub use semaphore::ShmSemaphore;

pub mod ring_buffer;
pub use ring_buffer::{Ring, StackBuffer};

pub mod protocol;

pub mod channel;
pub use channel::{ControlChannel, NonRtClientControl, NonRtServerControl, RtClientControl};

pub mod error;
pub use error::{BridgeError, Result};

pub mod config;
pub use config::{BridgeConfig, PortCounts, SegmentIds, Setup, Timing};

pub mod server;
pub use server::{BarBeatTick, ServerState, Transport};

pub mod registry;
pub use registry::{ClientHandle, PortDirection, PortId, PortKind};

pub mod mixer;
pub use mixer::{MixOutcome, ProcessHandler, ProcessScope};

mod audio_pool;

pub mod rt_prio;

pub mod lifecycle;
pub use lifecycle::{Lifecycle, SelfSignal};

mod rt_engine;
mod nrt_engine;
pub use nrt_engine::PROCESS_STOPPED_MESSAGE;

mod bridge;
pub use bridge::{Bridge, BridgeStatus};

pub mod host;

pub mod ffi;
pub use ffi::init_logging;
