// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The bridge instance: attaches the host's segments, owns the two engine
// threads and exposes the client registry to the application.
//
// Locking: `Shared::engine` is the single coarse lock over server state,
// registry and mix scratch. The control side takes it blocking; the realtime
// thread only ever tries it. Client locks are always taken after the engine
// lock, never before.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::audio_pool::AudioPool;
use crate::channel::{NonRtClientControl, NonRtServerControl, RtClientControl};
use crate::config::{BridgeConfig, PortCounts, Timing};
use crate::error::{BridgeError, Result};
use crate::lifecycle::{Lifecycle, SelfSignal};
use crate::mixer::{MixBuffers, ProcessHandler};
use crate::nrt_engine::NonRtEngine;
use crate::registry::{Client, ClientHandle, ClientState, PortDirection, PortId, PortKind, Registry};
use crate::rt_engine::RtEngine;
use crate::server::{ServerState, Transport};
use crate::shm_name::SegmentKind;

const NO_TIMESTAMP: u64 = u64::MAX;
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Everything guarded by the engine lock.
#[derive(Default)]
pub(crate) struct EngineState {
    pub server: ServerState,
    pub registry: Registry,
    pub scratch: MixBuffers,
    pub offline: bool,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    /// Handshake not finished yet.
    Starting = 0,
    /// Ready was sent; both engine threads run.
    Running = 1,
    /// Engines exited after a quit, a host timeout or `stop`.
    Stopped = 2,
    /// Handshake or thread setup failed; the host never saw Ready.
    Failed = 3,
}

impl BridgeStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BridgeStatus::Starting,
            1 => BridgeStatus::Running,
            2 => BridgeStatus::Stopped,
            _ => BridgeStatus::Failed,
        }
    }
}

/// State shared by the bridge handle and both engine threads.
pub(crate) struct Shared {
    pub engine: Mutex<EngineState>,
    pub ports: PortCounts,
    pub timing: Timing,
    pub lifecycle: Arc<dyn Lifecycle>,
    nonrt_stop: AtomicBool,
    rt_stop: AtomicBool,
    quit_received: AtomicBool,
    status: AtomicU8,
    rt_thread: AtomicU64,
    epoch: Instant,
    last_activity_ms: AtomicU64,
}

impl Shared {
    fn new(config: &BridgeConfig, lifecycle: Arc<dyn Lifecycle>) -> Self {
        Self {
            engine: Mutex::new(EngineState::default()),
            ports: config.setup.ports,
            timing: config.timing,
            lifecycle,
            nonrt_stop: AtomicBool::new(false),
            rt_stop: AtomicBool::new(false),
            quit_received: AtomicBool::new(false),
            status: AtomicU8::new(BridgeStatus::Starting as u8),
            rt_thread: AtomicU64::new(0),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(NO_TIMESTAMP),
        }
    }

    pub fn request_nonrt_stop(&self) {
        self.nonrt_stop.store(true, Ordering::Release);
    }

    pub fn nonrt_should_stop(&self) -> bool {
        self.nonrt_stop.load(Ordering::Acquire)
    }

    pub fn request_rt_stop(&self) {
        self.rt_stop.store(true, Ordering::Release);
    }

    pub fn rt_should_stop(&self) -> bool {
        self.rt_stop.load(Ordering::Acquire)
    }

    /// The host ended the session with `Quit` on either channel.
    pub fn mark_quit(&self) {
        self.quit_received.store(true, Ordering::Release);
    }

    pub fn quit_received(&self) -> bool {
        self.quit_received.load(Ordering::Acquire)
    }

    pub fn set_status(&self, status: BridgeStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_rt_thread(&self, id: libc::pthread_t) {
        self.rt_thread.store(id as u64, Ordering::Release);
    }

    pub fn rt_thread(&self) -> Option<libc::pthread_t> {
        match self.rt_thread.load(Ordering::Acquire) {
            0 => None,
            id => Some(id as libc::pthread_t),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Enable or disable host liveness tracking. Enabling restarts the clock.
    pub fn set_liveness_tracking(&self, enabled: bool) {
        let value = if enabled { self.now_ms() } else { NO_TIMESTAMP };
        self.last_activity_ms.store(value, Ordering::Release);
    }

    /// Record host activity, if tracking is enabled.
    pub fn touch_liveness(&self) {
        let now = self.now_ms();
        let _ = self.last_activity_ms.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            (last != NO_TIMESTAMP).then_some(now)
        });
    }

    /// Tracking is enabled and the host has been silent for longer than the
    /// liveness timeout.
    pub fn host_is_silent(&self) -> bool {
        let last = self.last_activity_ms.load(Ordering::Acquire);
        last != NO_TIMESTAMP
            && self.now_ms().saturating_sub(last) > self.timing.liveness_timeout.as_millis() as u64
    }
}

/// Wait at most `timeout` for `handle` to finish. A thread still running at
/// the deadline is detached.
pub(crate) fn join_bounded<T>(
    handle: JoinHandle<T>,
    timeout: Duration,
) -> Option<thread::Result<T>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(
                thread = handle.thread().name().unwrap_or("unnamed"),
                "thread did not stop in time, detaching"
            );
            return None;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    Some(handle.join())
}

/// A running bridge attached to one host.
pub struct Bridge {
    shared: Arc<Shared>,
    nonrt: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Bridge {
    /// Attach to the host's segments and start the engines. A `Quit` from the
    /// host terminates the process.
    pub fn start(config: BridgeConfig) -> Result<Self> {
        Self::start_with(config, Arc::new(SelfSignal))
    }

    /// Like [`start`](Self::start), with a custom reaction to `Quit`.
    ///
    /// Returns once the segments are attached; the handshake runs on the
    /// non-realtime thread.
    pub fn start_with(config: BridgeConfig, lifecycle: Arc<dyn Lifecycle>) -> Result<Self> {
        let ids = &config.segments;

        let pool = AudioPool::attach(&ids.segment_name(SegmentKind::AudioPool))
            .map_err(BridgeError::shm(SegmentKind::AudioPool, "attach"))?;
        let rt = RtClientControl::attach(&ids.segment_name(SegmentKind::RtClient))
            .map_err(BridgeError::shm(SegmentKind::RtClient, "attach"))?;
        let nonrt_client = NonRtClientControl::attach(&ids.segment_name(SegmentKind::NonRtClient))
            .map_err(BridgeError::shm(SegmentKind::NonRtClient, "attach"))?;
        let nonrt_server = NonRtServerControl::attach(&ids.segment_name(SegmentKind::NonRtServer))
            .map_err(BridgeError::shm(SegmentKind::NonRtServer, "attach"))?;

        let shared = Arc::new(Shared::new(&config, lifecycle));
        let rt_engine = RtEngine::new(shared.clone(), rt, pool);
        let engine = NonRtEngine::new(shared.clone(), nonrt_client, nonrt_server, rt_engine);

        let handle = thread::Builder::new()
            .name("jack-bridge-nonrt".into())
            .spawn(move || engine.run())
            .map_err(|source| BridgeError::Thread {
                name: "non-realtime",
                source,
            })?;

        info!(
            audio_ins = config.setup.ports.audio_ins,
            audio_outs = config.setup.ports.audio_outs,
            midi_ins = config.setup.ports.midi_ins,
            midi_outs = config.setup.ports.midi_outs,
            "bridge attached"
        );

        Ok(Self {
            shared,
            nonrt: Mutex::new(Some(handle)),
        })
    }

    // --- clients ---

    /// Register a new logical client.
    pub fn open_client(&self, name: &str) -> ClientHandle {
        let handle = self.shared.engine.lock().registry.insert(Client::new(name));
        info!(name, "client opened");
        handle
    }

    /// Unregister a client. It is dropped after the engine lock is released.
    pub fn close_client(&self, handle: ClientHandle) -> Result<()> {
        let removed = self.shared.engine.lock().registry.remove(handle);
        let client = removed.ok_or(BridgeError::UnknownClient)?;
        info!(name = client.name(), "client closed");
        Ok(())
    }

    fn client(&self, handle: ClientHandle) -> Result<Arc<Client>> {
        self.shared
            .engine
            .lock()
            .registry
            .get(handle)
            .cloned()
            .ok_or(BridgeError::UnknownClient)
    }

    /// Run `f` with the client's state locked. The engine lock is not held
    /// meanwhile; any period that starts while `f` runs skips this client.
    pub fn with_client<R>(
        &self,
        handle: ClientHandle,
        f: impl FnOnce(&mut ClientState) -> R,
    ) -> Result<R> {
        let client = self.client(handle)?;
        let mut state = client.lock();
        Ok(f(&mut state))
    }

    pub fn client_count(&self) -> usize {
        self.shared.engine.lock().registry.len()
    }

    pub fn register_port(
        &self,
        handle: ClientHandle,
        name: &str,
        direction: PortDirection,
        kind: PortKind,
    ) -> Result<PortId> {
        self.with_client(handle, |state| state.register_port(name, direction, kind))
    }

    pub fn unregister_port(&self, handle: ClientHandle, port: PortId) -> Result<bool> {
        self.with_client(handle, |state| state.unregister_port(port))
    }

    /// Install the handler run every period, replacing any previous one.
    pub fn set_process_handler(
        &self,
        handle: ClientHandle,
        handler: Box<dyn ProcessHandler>,
    ) -> Result<()> {
        self.with_client(handle, |state| state.handler = Some(handler))
    }

    pub fn activate(&self, handle: ClientHandle) -> Result<()> {
        self.client(handle)?.activate();
        Ok(())
    }

    /// Stop processing the client. The host is told through the process
    /// flags the next time the mixer skips it.
    pub fn deactivate(&self, handle: ClientHandle) -> Result<()> {
        self.client(handle)?.deactivate();
        Ok(())
    }

    pub fn is_client_active(&self, handle: ClientHandle) -> Result<bool> {
        Ok(self.client(handle)?.is_active())
    }

    // --- server state ---

    pub fn status(&self) -> BridgeStatus {
        self.shared.status()
    }

    /// Identity of the realtime thread, once it runs.
    pub fn realtime_thread_id(&self) -> Option<libc::pthread_t> {
        self.shared.rt_thread()
    }

    pub fn buffer_size(&self) -> u32 {
        self.shared.engine.lock().server.buffer_size
    }

    pub fn sample_rate(&self) -> f64 {
        self.shared.engine.lock().server.sample_rate
    }

    pub fn transport(&self) -> Transport {
        self.shared.engine.lock().server.transport
    }

    pub fn is_offline(&self) -> bool {
        self.shared.engine.lock().offline
    }

    pub fn port_counts(&self) -> PortCounts {
        self.shared.ports
    }

    // --- shutdown ---

    /// Wait up to `timeout` for the engines to exit on their own.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let finished = self
                .nonrt
                .lock()
                .as_ref()
                .map_or(true, |h| h.is_finished());
            if finished {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
    }

    /// Stop both engines, join them within the configured deadline and drop
    /// every client. Returns the engine's startup error, if any. Calling it
    /// again is a no-op.
    pub fn stop(&self) -> Result<()> {
        self.shared.request_nonrt_stop();
        let handle = self.nonrt.lock().take();

        let result = match handle {
            None => Ok(()),
            Some(h) => match join_bounded(h, self.shared.timing.join_timeout) {
                Some(Ok(r)) => r,
                Some(Err(_)) => Err(BridgeError::Io(std::io::Error::other(
                    "non-realtime thread panicked",
                ))),
                None => Ok(()),
            },
        };

        let clients = self.shared.engine.lock().registry.drain();
        if !clients.is_empty() {
            info!(count = clients.len(), "dropping remaining clients");
        }
        drop(clients);
        result
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("bridge stopped with error: {e}");
        }
    }
}
