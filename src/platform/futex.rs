// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Linux counting semaphore on a shared futex word. Posting is an atomic
// increment followed by FUTEX_WAKE and never takes a lock, so the realtime
// thread can release the host without contending with it.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

#[repr(C)]
pub struct PlatformSemaphore {
    count: AtomicU32,
}

impl PlatformSemaphore {
    /// Initialise a semaphore with a zero count at `this`.
    ///
    /// # Safety
    /// `this` must point to writable memory large enough for `Self`, and no
    /// other thread or process may be using it yet.
    pub unsafe fn init_in_place(this: *mut Self) -> io::Result<()> {
        std::ptr::write(
            this,
            Self {
                count: AtomicU32::new(0),
            },
        );
        Ok(())
    }

    /// Increment the count and wake one waiter.
    ///
    /// # Safety
    /// `this` must point to an initialised semaphore.
    pub unsafe fn post(this: *mut Self) -> io::Result<()> {
        let count = &(*this).count;
        count.fetch_add(1, Ordering::Release);
        futex_wake(count);
        Ok(())
    }

    /// Wait until the count is positive, then decrement it.
    /// Returns `Ok(false)` if `timeout` elapsed first.
    ///
    /// # Safety
    /// `this` must point to an initialised semaphore.
    pub unsafe fn timed_wait(this: *mut Self, timeout: Duration) -> io::Result<bool> {
        let count = &(*this).count;
        let deadline = Instant::now() + timeout;
        loop {
            let mut v = count.load(Ordering::Relaxed);
            while v > 0 {
                match count.compare_exchange_weak(v, v - 1, Ordering::Acquire, Ordering::Relaxed) {
                    Ok(_) => return Ok(true),
                    Err(actual) => v = actual,
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            futex_wait(count, 0, remaining)?;
        }
    }
}

// The word lives in a mapping shared between processes, so the
// FUTEX_PRIVATE_FLAG variants must not be used.

fn futex_wake(word: &AtomicU32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32,
            libc::FUTEX_WAKE,
            1 as libc::c_int,
        );
    }
}

/// Sleep while `word == expected`, for at most `timeout` (relative,
/// monotonic). Spurious returns are fine: the caller re-checks the count.
fn futex_wait(word: &AtomicU32, expected: u32, timeout: Duration) -> io::Result<()> {
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32,
            libc::FUTEX_WAIT,
            expected,
            &ts as *const libc::timespec,
        )
    };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::EINTR) | Some(libc::ETIMEDOUT) => Ok(()),
        _ => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::UnsafeCell;
    use std::sync::Arc;
    use std::thread;

    struct Sem(UnsafeCell<PlatformSemaphore>);
    unsafe impl Send for Sem {}
    unsafe impl Sync for Sem {}

    fn sem() -> Arc<Sem> {
        let s = Arc::new(Sem(UnsafeCell::new(PlatformSemaphore {
            count: AtomicU32::new(7),
        })));
        unsafe { PlatformSemaphore::init_in_place(s.0.get()).unwrap() };
        s
    }

    #[test]
    fn init_resets_count() {
        let s = sem();
        let ok = unsafe { PlatformSemaphore::timed_wait(s.0.get(), Duration::from_millis(20)) };
        assert!(!ok.unwrap());
    }

    #[test]
    fn posts_are_counted() {
        let s = sem();
        unsafe {
            PlatformSemaphore::post(s.0.get()).unwrap();
            PlatformSemaphore::post(s.0.get()).unwrap();
            assert!(PlatformSemaphore::timed_wait(s.0.get(), Duration::ZERO).unwrap());
            assert!(PlatformSemaphore::timed_wait(s.0.get(), Duration::ZERO).unwrap());
            assert!(!PlatformSemaphore::timed_wait(s.0.get(), Duration::ZERO).unwrap());
        }
    }

    #[test]
    fn post_wakes_waiter_on_other_thread() {
        let s = sem();
        let s2 = s.clone();
        let waiter = thread::spawn(move || unsafe {
            PlatformSemaphore::timed_wait(s2.0.get(), Duration::from_secs(2)).unwrap()
        });
        thread::sleep(Duration::from_millis(20));
        unsafe { PlatformSemaphore::post(s.0.get()).unwrap() };
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn timeout_is_honoured() {
        let s = sem();
        let start = Instant::now();
        let ok = unsafe { PlatformSemaphore::timed_wait(s.0.get(), Duration::from_millis(50)) };
        assert!(!ok.unwrap());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
