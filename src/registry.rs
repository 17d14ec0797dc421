// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Client/port registry.
//
// Clients live in a slab; a handle pairs the slab key with a generation taken
// from a registry-wide counter, so a handle to a removed client never resolves
// to whichever client later reuses the slot. Iteration follows registration
// order, which is the order the mixer processes clients and the order
// reconfiguration callbacks run in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use slab::Slab;

use crate::mixer::ProcessHandler;

/// Opaque, generation-checked client handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle {
    key: u32,
    generation: u32,
}

impl ClientHandle {
    /// Pack into a non-zero integer suitable for an opaque C pointer.
    pub fn into_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | (u64::from(self.key) + 1)
    }

    /// Inverse of [`into_raw`](Self::into_raw). Zero is never a handle.
    pub fn from_raw(raw: u64) -> Option<Self> {
        let low = (raw & 0xffff_ffff) as u32;
        if low == 0 {
            return None;
        }
        Some(Self {
            key: low - 1,
            generation: (raw >> 32) as u32,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Audio,
    Event,
}

/// Where a port's buffer points for the current period. Reassigned by the
/// mixer every period; meaningless outside one `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortBuffer {
    Unassigned,
    /// Input slot `n` of the shared audio pool.
    PoolInput(usize),
    /// Output slot `n` of the private copy region.
    CopyOutput(usize),
    /// The zeroed buffer shared by inputs beyond the static count.
    Silence,
    /// The sink shared by outputs beyond the static count.
    Discard,
}

#[derive(Debug, Clone)]
pub struct Port {
    pub id: PortId,
    pub name: String,
    pub direction: PortDirection,
    pub kind: PortKind,
    pub buffer: PortBuffer,
}

impl Port {
    pub fn is_audio(&self, direction: PortDirection) -> bool {
        self.kind == PortKind::Audio && self.direction == direction
    }
}

/// State guarded by the client's private lock.
#[derive(Default)]
pub struct ClientState {
    pub ports: Vec<Port>,
    pub handler: Option<Box<dyn ProcessHandler>>,
    next_port_id: u32,
}

impl ClientState {
    pub fn register_port(&mut self, name: &str, direction: PortDirection, kind: PortKind) -> PortId {
        let id = PortId(self.next_port_id);
        self.next_port_id += 1;
        self.ports.push(Port {
            id,
            name: name.to_string(),
            direction,
            kind,
            buffer: PortBuffer::Unassigned,
        });
        id
    }

    pub fn unregister_port(&mut self, id: PortId) -> bool {
        let before = self.ports.len();
        self.ports.retain(|p| p.id != id);
        self.ports.len() != before
    }
}

/// One logical client registration.
pub struct Client {
    name: String,
    activated: AtomicBool,
    deactivate_requested: AtomicBool,
    state: Mutex<ClientState>,
}

impl Client {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            activated: AtomicBool::new(false),
            deactivate_requested: AtomicBool::new(false),
            state: Mutex::new(ClientState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    pub fn activate(&self) {
        self.deactivate_requested.store(false, Ordering::Relaxed);
        self.activated.store(true, Ordering::Release);
    }

    pub fn deactivate(&self) {
        self.activated.store(false, Ordering::Release);
        self.deactivate_requested.store(true, Ordering::Release);
    }

    /// Consume a pending deactivation request.
    pub fn take_deactivate_request(&self) -> bool {
        self.deactivate_requested.swap(false, Ordering::AcqRel)
    }

    /// Blocking lock, for the control side.
    pub fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock()
    }

    /// Non-blocking attempt, for the realtime side.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, ClientState>> {
        self.state.try_lock()
    }
}

struct Entry {
    generation: u32,
    client: Arc<Client>,
}

/// Insertion-ordered collection of clients.
#[derive(Default)]
pub struct Registry {
    clients: Slab<Entry>,
    order: Vec<usize>,
    next_generation: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: Client) -> ClientHandle {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let key = self.clients.insert(Entry {
            generation,
            client: Arc::new(client),
        });
        self.order.push(key);
        ClientHandle {
            key: key as u32,
            generation,
        }
    }

    pub fn get(&self, handle: ClientHandle) -> Option<&Arc<Client>> {
        self.clients
            .get(handle.key as usize)
            .filter(|e| e.generation == handle.generation)
            .map(|e| &e.client)
    }

    /// Remove by identity. The caller drops the returned client, ideally after
    /// releasing the registry lock.
    pub fn remove(&mut self, handle: ClientHandle) -> Option<Arc<Client>> {
        let key = handle.key as usize;
        if self.clients.get(key)?.generation != handle.generation {
            return None;
        }
        self.order.retain(|&k| k != key);
        Some(self.clients.remove(key).client)
    }

    /// Clients in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Client>> + '_ {
        self.order.iter().map(move |&k| &self.clients[k].client)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn any_active(&self) -> bool {
        self.iter().any(|c| c.is_active())
    }

    /// Remove every client, returning them in registration order.
    pub fn drain(&mut self) -> Vec<Arc<Client>> {
        let order = std::mem::take(&mut self.order);
        let drained = order
            .into_iter()
            .map(|k| self.clients.remove(k).client)
            .collect();
        self.clients.clear();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_handle_round_trip_is_never_null() {
        let mut reg = Registry::new();
        let h = reg.insert(Client::new("a"));
        let raw = h.into_raw();
        assert_ne!(raw, 0);
        assert_eq!(ClientHandle::from_raw(raw), Some(h));
        assert_eq!(ClientHandle::from_raw(0), None);
    }

    #[test]
    fn stale_handle_does_not_resolve_after_slot_reuse() {
        let mut reg = Registry::new();
        let a = reg.insert(Client::new("a"));
        assert!(reg.remove(a).is_some());
        let b = reg.insert(Client::new("b"));
        assert_eq!(a.key, b.key);
        assert!(reg.get(a).is_none());
        assert!(reg.remove(a).is_none());
        assert_eq!(reg.get(b).map(|c| c.name()), Some("b"));
    }

    #[test]
    fn deactivate_request_is_one_shot() {
        let c = Client::new("x");
        c.activate();
        c.deactivate();
        assert!(!c.is_active());
        assert!(c.take_deactivate_request());
        assert!(!c.take_deactivate_request());
    }

    #[test]
    fn iteration_follows_registration_order() {
        let mut reg = Registry::new();
        let a = reg.insert(Client::new("a"));
        reg.insert(Client::new("b"));
        reg.insert(Client::new("c"));
        reg.remove(a);
        reg.insert(Client::new("d"));
        let names: Vec<_> = reg.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, ["b", "c", "d"]);
    }

    #[test]
    fn port_ids_are_not_reused() {
        let mut st = ClientState::default();
        let a = st.register_port("a", PortDirection::Input, PortKind::Audio);
        assert!(st.unregister_port(a));
        assert!(!st.unregister_port(a));
        let b = st.register_port("b", PortDirection::Output, PortKind::Event);
        assert_ne!(a, b);
        assert_eq!(st.ports.len(), 1);
    }
}
