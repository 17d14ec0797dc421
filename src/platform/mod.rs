// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(unix)]
pub mod posix;

#[cfg(target_os = "linux")]
pub mod futex;

// Re-export the platform-specific implementations under a uniform name.

#[cfg(unix)]
pub use posix::{PlatformShm, ShmMode};

#[cfg(target_os = "linux")]
pub use futex::PlatformSemaphore;

#[cfg(all(unix, not(target_os = "linux")))]
pub use posix::PlatformSemaphore;
