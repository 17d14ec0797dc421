// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared audio pool plus the private render buffer that mirrors its layout.
// Owned by the realtime thread, which is the only thread that touches either.

use std::io;

use crate::shm::ShmSegment;

pub struct AudioPool {
    segment: ShmSegment,
    copy: Vec<f32>,
}

impl AudioPool {
    /// Attach to the host's pool segment. Nothing is mapped until the host
    /// publishes a size.
    pub fn attach(name: &str) -> io::Result<Self> {
        Ok(Self {
            segment: ShmSegment::attach(name)?,
            copy: Vec::new(),
        })
    }

    /// Map `bytes` of the pool, dropping the previous mapping and render
    /// buffer first. On error the pool stays unmapped.
    pub fn remap(&mut self, bytes: u64) -> io::Result<()> {
        self.segment.unmap();
        self.copy = Vec::new();
        let bytes = usize::try_from(bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pool size overflows usize"))?;
        self.segment.map(bytes)?;
        self.copy = vec![0.0; bytes / std::mem::size_of::<f32>()];
        Ok(())
    }

    /// Pool length in floats.
    pub fn len(&self) -> usize {
        self.segment.mapped_len() / std::mem::size_of::<f32>()
    }

    /// The mapped pool and the render buffer, or `None` while unmapped.
    ///
    /// The host writes inputs before waking the realtime thread and reads
    /// outputs only after the period completes, so the slice is exclusive for
    /// the duration of one period.
    pub fn buffers(&mut self) -> Option<(&mut [f32], &mut [f32])> {
        if !self.segment.is_mapped() {
            return None;
        }
        let pool = unsafe {
            std::slice::from_raw_parts_mut(self.segment.as_mut_ptr() as *mut f32, self.len())
        };
        Some((pool, &mut self.copy))
    }

    /// Release the mapping and the render buffer.
    pub fn release(&mut self) {
        self.segment.unmap();
        self.copy = Vec::new();
    }
}
