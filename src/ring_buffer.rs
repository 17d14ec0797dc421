// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Byte ring buffer embedded in the control channel structures.
//
// One producer stages a frame with the typed writers and publishes it with
// `commit_write`; one consumer drains committed bytes in write order. A staged
// frame that does not fit is dropped as a whole at commit time, so a reader
// never sees half an opcode.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Cursor block at the start of every ring.
#[repr(C)]
#[derive(Debug)]
pub struct RingHeader {
    head: AtomicU32,
    tail: AtomicU32,
    wrtn: AtomicU32,
    invalidate_commit: AtomicU32,
}

/// Fixed-capacity ring storage, `#[repr(C)]` so it can live in shared memory.
#[repr(C)]
pub struct StackBuffer<const N: usize> {
    header: RingHeader,
    buf: UnsafeCell<[u8; N]>,
}

// Safety: one producer and one consumer coordinate through the atomic cursors.
unsafe impl<const N: usize> Sync for StackBuffer<N> {}

impl<const N: usize> StackBuffer<N> {
    pub const CAPACITY: usize = N;

    /// An empty ring. All-zero memory is also a valid empty ring.
    pub const fn new() -> Self {
        Self {
            header: RingHeader {
                head: AtomicU32::new(0),
                tail: AtomicU32::new(0),
                wrtn: AtomicU32::new(0),
                invalidate_commit: AtomicU32::new(0),
            },
            buf: UnsafeCell::new([0; N]),
        }
    }

    /// Access view used by readers and writers.
    pub fn ring(&self) -> Ring<'_> {
        Ring {
            header: &self.header,
            buf: self.buf.get() as *mut u8,
            size: N as u32,
        }
    }
}

impl<const N: usize> Default for StackBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Size-erased view over a [`StackBuffer`].
#[derive(Clone, Copy)]
pub struct Ring<'a> {
    header: &'a RingHeader,
    buf: *mut u8,
    size: u32,
}

macro_rules! typed_io {
    ($($read:ident, $write:ident, $ty:ty;)*) => {$(
        #[doc = concat!("Read a `", stringify!($ty), "`; zero if not enough data is committed.")]
        pub fn $read(&self) -> $ty {
            let mut bytes = [0u8; std::mem::size_of::<$ty>()];
            self.try_read(&mut bytes);
            <$ty>::from_ne_bytes(bytes)
        }

        #[doc = concat!("Stage a `", stringify!($ty), "`.")]
        pub fn $write(&self, value: $ty) -> bool {
            self.try_write(&value.to_ne_bytes())
        }
    )*};
}

impl<'a> Ring<'a> {
    pub fn capacity(&self) -> usize {
        self.size as usize
    }

    /// Reset all cursors. Only valid while neither side is active.
    pub fn clear(&self) {
        let h = self.header;
        h.head.store(0, Ordering::Relaxed);
        h.tail.store(0, Ordering::Relaxed);
        h.wrtn.store(0, Ordering::Relaxed);
        h.invalidate_commit.store(0, Ordering::Release);
    }

    pub fn is_data_available_for_reading(&self) -> bool {
        self.header.head.load(Ordering::Relaxed) != self.header.tail.load(Ordering::Acquire)
    }

    /// Committed bytes not yet consumed.
    pub fn readable_size(&self) -> usize {
        let head = self.header.head.load(Ordering::Relaxed);
        let tail = self.header.tail.load(Ordering::Acquire);
        (if tail >= head { tail - head } else { self.size - head + tail }) as usize
    }

    /// Bytes that can still be staged before the next commit.
    pub fn writable_size(&self) -> usize {
        let head = self.header.head.load(Ordering::Acquire);
        let wrtn = self.header.wrtn.load(Ordering::Relaxed);
        (if head > wrtn {
            head - wrtn - 1
        } else {
            self.size - (wrtn - head) - 1
        }) as usize
    }

    // --- consumer ---

    /// Copy the next `out.len()` committed bytes into `out`.
    /// Returns `false` and zero-fills `out` when not enough data is committed.
    pub fn try_read(&self, out: &mut [u8]) -> bool {
        if out.is_empty() {
            return true;
        }
        if out.len() > self.readable_size() {
            out.fill(0);
            return false;
        }

        let head = self.header.head.load(Ordering::Relaxed) as usize;
        let size = self.size as usize;
        let first = out.len().min(size - head);
        unsafe {
            ptr::copy_nonoverlapping(self.buf.add(head), out.as_mut_ptr(), first);
            if first < out.len() {
                ptr::copy_nonoverlapping(self.buf, out.as_mut_ptr().add(first), out.len() - first);
            }
        }
        let new_head = (head + out.len()) % size;
        self.header.head.store(new_head as u32, Ordering::Release);
        true
    }

    /// Drop `len` committed bytes without copying them.
    pub fn skip(&self, len: usize) -> bool {
        if len > self.readable_size() {
            return false;
        }
        let head = self.header.head.load(Ordering::Relaxed) as usize;
        let new_head = (head + len) % self.size as usize;
        self.header.head.store(new_head as u32, Ordering::Release);
        true
    }

    /// Drop everything committed so far. Used to resynchronise after an
    /// unknown opcode.
    pub fn discard_readable(&self) {
        let tail = self.header.tail.load(Ordering::Acquire);
        self.header.head.store(tail, Ordering::Release);
    }

    /// Fill `out` with the next bytes, as written by `write_custom_data`.
    pub fn read_custom_data(&self, out: &mut [u8]) -> bool {
        self.try_read(out)
    }

    pub fn read_bool(&self) -> bool {
        self.read_byte() != 0
    }

    /// Read a raw opcode value.
    pub fn read_opcode<O: TryFrom<u32, Error = u32>>(&self) -> Result<O, u32> {
        O::try_from(self.read_uint())
    }

    // --- producer ---

    /// Stage `data` after the last staged byte.
    /// On overflow the whole staged frame is marked invalid.
    pub fn try_write(&self, data: &[u8]) -> bool {
        if self.header.invalidate_commit.load(Ordering::Relaxed) != 0 {
            return false;
        }
        if data.is_empty() {
            return true;
        }
        if data.len() > self.writable_size() {
            self.header.invalidate_commit.store(1, Ordering::Relaxed);
            return false;
        }

        let wrtn = self.header.wrtn.load(Ordering::Relaxed) as usize;
        let size = self.size as usize;
        let first = data.len().min(size - wrtn);
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.buf.add(wrtn), first);
            if first < data.len() {
                ptr::copy_nonoverlapping(data.as_ptr().add(first), self.buf, data.len() - first);
            }
        }
        let new_wrtn = (wrtn + data.len()) % size;
        self.header.wrtn.store(new_wrtn as u32, Ordering::Relaxed);
        true
    }

    /// Publish everything staged since the last commit.
    /// Returns `false` (and drops the staged frame) if any staged write overflowed.
    pub fn commit_write(&self) -> bool {
        let h = self.header;
        if h.invalidate_commit.load(Ordering::Relaxed) != 0 {
            h.wrtn.store(h.tail.load(Ordering::Relaxed), Ordering::Relaxed);
            h.invalidate_commit.store(0, Ordering::Relaxed);
            return false;
        }
        h.tail.store(h.wrtn.load(Ordering::Relaxed), Ordering::Release);
        true
    }

    pub fn write_custom_data(&self, data: &[u8]) -> bool {
        self.try_write(data)
    }

    pub fn write_bool(&self, value: bool) -> bool {
        self.write_byte(u8::from(value))
    }

    pub fn write_opcode(&self, opcode: impl Into<u32>) -> bool {
        self.write_uint(opcode.into())
    }

    typed_io! {
        read_byte, write_byte, u8;
        read_short, write_short, i16;
        read_ushort, write_ushort, u16;
        read_int, write_int, i32;
        read_uint, write_uint, u32;
        read_long, write_long, i64;
        read_ulong, write_ulong, u64;
        read_float, write_float, f32;
        read_double, write_double, f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_reports_capacity_minus_one() {
        let sb = StackBuffer::<16>::new();
        let ring = sb.ring();
        assert_eq!(ring.writable_size(), 15);
        assert_eq!(ring.readable_size(), 0);
        assert!(!ring.is_data_available_for_reading());
    }

    #[test]
    fn short_read_zero_fills_and_consumes_nothing() {
        let sb = StackBuffer::<16>::new();
        let ring = sb.ring();
        ring.write_ushort(7);
        ring.commit_write();

        assert_eq!(ring.read_uint(), 0);
        assert_eq!(ring.readable_size(), 2);
        assert_eq!(ring.read_ushort(), 7);
    }
}
