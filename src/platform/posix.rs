// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX implementation of the shared memory segments, plus the pthread
// semaphore used on the realtime control channel where futexes are not
// available.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr;
#[cfg(not(target_os = "linux"))]
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::shm_name;

// ---------------------------------------------------------------------------
// Robust mutex symbols, not exposed by the `libc` crate on all platforms.
// Only needed by the pthread semaphore; macOS has no robust mutexes.
// ---------------------------------------------------------------------------

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
const EOWNERDEAD: i32 = libc::EOWNERDEAD;

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

// ---------------------------------------------------------------------------
// PlatformShm: POSIX shared memory
// ---------------------------------------------------------------------------

/// Open mode flags for [`PlatformShm::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    Create,
    Open,
}

pub struct PlatformShm {
    fd: OwnedFd,
    name: String, // POSIX name (with leading '/')
    mem: *mut u8,
    len: usize,
    owner: bool, // created by us: unlinked on drop
}

// Safety: the shared memory region is process-shared by design.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    /// Open (or exclusively create) a named segment without mapping it.
    pub fn open(name: &str, mode: ShmMode) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }

        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let perms: libc::mode_t = 0o600;
        let flags = match mode {
            ShmMode::Create => libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            ShmMode::Open => libc::O_RDWR,
        };
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, perms as libc::c_uint) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            name: posix_name,
            mem: ptr::null_mut(),
            len: 0,
            owner: mode == ShmMode::Create,
        })
    }

    /// Resize the backing object. Only the creating side does this.
    pub fn truncate(&self, size: usize) -> io::Result<()> {
        let ret = unsafe { libc::ftruncate(self.fd.as_raw_fd(), size as libc::off_t) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Map `size` bytes of the segment, replacing any previous mapping.
    pub fn map(&mut self, size: usize) -> io::Result<*mut u8> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }
        self.unmap();

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd.as_raw_fd(),
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        self.mem = mem as *mut u8;
        self.len = size;
        Ok(self.mem)
    }

    /// Release the current mapping, if any. The segment stays open.
    pub fn unmap(&mut self) {
        if self.mem.is_null() {
            return;
        }
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.len) };
        self.mem = ptr::null_mut();
        self.len = 0;
    }

    /// Start of the mapping, null while unmapped.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn mapped_len(&self) -> usize {
        self.len
    }

    /// POSIX name (with leading '/').
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        self.unmap();
        if self.owner {
            if let Ok(c_name) = CString::new(self.name.as_bytes()) {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
        }
        // `fd` closes itself.
    }
}

// ---------------------------------------------------------------------------
// PlatformSemaphore: counting semaphore living inside a mapped segment.
// pthread_mutex_t + pthread_cond_t with PTHREAD_PROCESS_SHARED.
// Linux uses the futex semaphore in `platform::futex` instead.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "linux"))]
#[repr(C)]
pub struct PlatformSemaphore {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    count: u32,
}

#[cfg(not(target_os = "linux"))]
impl PlatformSemaphore {
    /// Initialise a semaphore with a zero count at `this`.
    ///
    /// # Safety
    /// `this` must point to writable memory large enough for `Self`, and no
    /// other thread or process may be using it yet.
    pub unsafe fn init_in_place(this: *mut Self) -> io::Result<()> {
        ptr::write_bytes(this, 0, 1);

        let mut mattr: libc::pthread_mutexattr_t = std::mem::zeroed();
        let mut eno = libc::pthread_mutexattr_init(&mut mattr);
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        eno = libc::pthread_mutexattr_setpshared(&mut mattr, libc::PTHREAD_PROCESS_SHARED);
        if eno != 0 {
            libc::pthread_mutexattr_destroy(&mut mattr);
            return Err(io::Error::from_raw_os_error(eno));
        }
        #[cfg(not(target_os = "macos"))]
        {
            eno = pthread_mutexattr_setrobust(&mut mattr, PTHREAD_MUTEX_ROBUST);
            if eno != 0 {
                libc::pthread_mutexattr_destroy(&mut mattr);
                return Err(io::Error::from_raw_os_error(eno));
            }
        }
        eno = libc::pthread_mutex_init(ptr::addr_of_mut!((*this).mutex), &mattr);
        libc::pthread_mutexattr_destroy(&mut mattr);
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }

        let mut cattr: libc::pthread_condattr_t = std::mem::zeroed();
        eno = libc::pthread_condattr_init(&mut cattr);
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        eno = libc::pthread_condattr_setpshared(&mut cattr, libc::PTHREAD_PROCESS_SHARED);
        if eno != 0 {
            libc::pthread_condattr_destroy(&mut cattr);
            return Err(io::Error::from_raw_os_error(eno));
        }
        eno = libc::pthread_cond_init(ptr::addr_of_mut!((*this).cond), &cattr);
        libc::pthread_condattr_destroy(&mut cattr);
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    /// Lock the inner mutex, recovering it if the previous owner died.
    ///
    /// # Safety
    /// `this` must point to an initialised semaphore.
    unsafe fn lock(this: *mut Self) -> io::Result<()> {
        let mtx = ptr::addr_of_mut!((*this).mutex);
        let eno = libc::pthread_mutex_lock(mtx);
        match eno {
            0 => Ok(()),
            #[cfg(not(target_os = "macos"))]
            EOWNERDEAD => {
                let eno2 = pthread_mutex_consistent(mtx);
                if eno2 != 0 {
                    return Err(io::Error::from_raw_os_error(eno2));
                }
                Ok(())
            }
            _ => Err(io::Error::from_raw_os_error(eno)),
        }
    }

    /// # Safety
    /// `this` must point to an initialised semaphore locked by this thread.
    unsafe fn unlock(this: *mut Self) {
        libc::pthread_mutex_unlock(ptr::addr_of_mut!((*this).mutex));
    }

    /// Increment the count and wake one waiter.
    ///
    /// # Safety
    /// `this` must point to an initialised semaphore.
    pub unsafe fn post(this: *mut Self) -> io::Result<()> {
        Self::lock(this)?;
        (*this).count = (*this).count.saturating_add(1);
        let eno = libc::pthread_cond_signal(ptr::addr_of_mut!((*this).cond));
        Self::unlock(this);
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    /// Wait until the count is positive, then decrement it.
    /// Returns `Ok(false)` if `timeout` elapsed first.
    ///
    /// # Safety
    /// `this` must point to an initialised semaphore.
    pub unsafe fn timed_wait(this: *mut Self, timeout: Duration) -> io::Result<bool> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let deadline = now + timeout;
        let ts = libc::timespec {
            tv_sec: deadline.as_secs() as libc::time_t,
            tv_nsec: deadline.subsec_nanos() as libc::c_long,
        };

        Self::lock(this)?;
        while (*this).count == 0 {
            let eno = libc::pthread_cond_timedwait(
                ptr::addr_of_mut!((*this).cond),
                ptr::addr_of_mut!((*this).mutex),
                &ts,
            );
            match eno {
                0 | libc::EINTR => {}
                libc::ETIMEDOUT => {
                    Self::unlock(this);
                    return Ok(false);
                }
                #[cfg(not(target_os = "macos"))]
                EOWNERDEAD => {
                    pthread_mutex_consistent(ptr::addr_of_mut!((*this).mutex));
                }
                _ => {
                    Self::unlock(this);
                    return Err(io::Error::from_raw_os_error(eno));
                }
            }
        }
        (*this).count -= 1;
        Self::unlock(this);
        Ok(true)
    }
}
