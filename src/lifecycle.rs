// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process lifetime: the bridge lives exactly as long as its host.

use std::io;

use tracing::info;

/// What the bridge does when the host ends the session with `Quit`.
pub trait Lifecycle: Send + Sync {
    fn terminate(&self);
}

/// Ends the process by sending `SIGTERM` to itself, so the application's own
/// signal handling runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfSignal;

impl Lifecycle for SelfSignal {
    fn terminate(&self) {
        info!("host requested quit, terminating process");
        unsafe {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }
    }
}

/// Ask the kernel to kill this process when its parent exits.
#[cfg(target_os = "linux")]
pub fn die_with_parent() -> io::Result<()> {
    let ret = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn die_with_parent() -> io::Result<()> {
    tracing::debug!("parent death signal not available on this platform");
    Ok(())
}
