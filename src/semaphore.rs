// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Counting semaphore stored inline in a shared memory structure.
// Linux: a shared futex word, so posting never blocks.
// Other unix: pthread_mutex_t + pthread_cond_t with PTHREAD_PROCESS_SHARED.

use std::cell::UnsafeCell;
use std::io;
use std::time::Duration;

use crate::platform::PlatformSemaphore;

/// A process-shared counting semaphore embedded in a `#[repr(C)]` layout.
///
/// The creating side calls [`ShmSemaphore::init_in_place`] once; afterwards
/// both processes may [`post`](ShmSemaphore::post) and
/// [`timed_wait`](ShmSemaphore::timed_wait) through a shared reference.
#[repr(C)]
pub struct ShmSemaphore {
    inner: UnsafeCell<PlatformSemaphore>,
}

// Safety: the count is only touched atomically or under the shared mutex.
unsafe impl Send for ShmSemaphore {}
unsafe impl Sync for ShmSemaphore {}

impl ShmSemaphore {
    /// # Safety
    /// `this` must point to writable memory for `Self` that nobody uses yet.
    pub unsafe fn init_in_place(this: *mut Self) -> io::Result<()> {
        PlatformSemaphore::init_in_place(UnsafeCell::raw_get(std::ptr::addr_of!((*this).inner)))
    }

    /// Increment the count, waking one waiter.
    pub fn post(&self) -> io::Result<()> {
        unsafe { PlatformSemaphore::post(self.inner.get()) }
    }

    /// Block until the count is positive or `timeout` elapses.
    /// Returns `Ok(true)` if the semaphore was taken, `Ok(false)` on timeout.
    pub fn timed_wait(&self, timeout: Duration) -> io::Result<bool> {
        unsafe { PlatformSemaphore::timed_wait(self.inner.get(), timeout) }
    }
}
