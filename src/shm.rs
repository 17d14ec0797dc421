// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared memory segment handle.
// Delegates to platform::PlatformShm. Attach and map are separate steps because
// the audio pool is attached once and remapped whenever the host resizes it.

use std::io;

use crate::platform::{PlatformShm, ShmMode};

/// Open mode for shared memory segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmOpenMode {
    /// Create exclusively; fail if it already exists. The handle unlinks the
    /// segment when dropped.
    Create,
    /// Open existing; fail if it does not exist.
    Open,
}

/// A named, inter-process shared memory segment.
///
/// The mapping is released and the descriptor closed when the handle is
/// dropped, on every exit path.
pub struct ShmSegment {
    inner: PlatformShm,
}

impl ShmSegment {
    /// Open a named segment. Nothing is mapped yet.
    pub fn open(name: &str, mode: ShmOpenMode) -> io::Result<Self> {
        let platform_mode = match mode {
            ShmOpenMode::Create => ShmMode::Create,
            ShmOpenMode::Open => ShmMode::Open,
        };
        let inner = PlatformShm::open(name, platform_mode)?;
        Ok(Self { inner })
    }

    /// Attach to a segment the host already created.
    pub fn attach(name: &str) -> io::Result<Self> {
        Self::open(name, ShmOpenMode::Open)
    }

    /// Create a segment of `size` bytes and map all of it.
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        let mut seg = Self::open(name, ShmOpenMode::Create)?;
        seg.inner.truncate(size)?;
        seg.inner.map(size)?;
        Ok(seg)
    }

    /// Resize the backing object (creator side).
    pub fn truncate(&self, size: usize) -> io::Result<()> {
        self.inner.truncate(size)
    }

    /// Map `size` bytes, dropping any previous mapping first.
    pub fn map(&mut self, size: usize) -> io::Result<*mut u8> {
        self.inner.map(size)
    }

    pub fn unmap(&mut self) {
        self.inner.unmap();
    }

    pub fn is_mapped(&self) -> bool {
        !self.inner.as_mut_ptr().is_null()
    }

    /// Pointer to the start of the mapping, null while unmapped.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    /// Number of bytes currently mapped.
    pub fn mapped_len(&self) -> usize {
        self.inner.mapped_len()
    }

    /// The platform name used to open the segment.
    pub fn name(&self) -> &str {
        self.inner.name()
    }
}
