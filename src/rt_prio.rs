// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Real-time setup for the audio thread: scheduling class and denormal
// handling. Both are best effort; failure only costs headroom.

/// Set real-time thread priority for the calling thread.
///
/// - `period_ns`: nominal period between wake-ups (e.g. 5_333_333 for 256 frames @ 48 kHz).
/// - `computation_ns`: max computation time per period (default: `period_ns / 2`).
/// - `constraint_ns`: hard deadline (default: `period_ns`).
///
/// Returns `true` on success.
pub fn set_realtime_priority(
    period_ns: u64,
    computation_ns: Option<u64>,
    constraint_ns: Option<u64>,
) -> bool {
    let computation_ns = computation_ns.unwrap_or(period_ns / 2);
    let constraint_ns = constraint_ns.unwrap_or(period_ns);

    #[cfg(target_os = "macos")]
    {
        set_realtime_macos(period_ns, computation_ns, constraint_ns)
    }
    #[cfg(target_os = "linux")]
    {
        let _ = (period_ns, computation_ns, constraint_ns);
        set_realtime_linux()
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = (period_ns, computation_ns, constraint_ns);
        false
    }
}

/// Audio period in nanoseconds for `frames` at `sample_rate`.
/// Zero when either value is not usable yet.
pub fn audio_period_ns(sample_rate: f64, frames: u32) -> u64 {
    if sample_rate <= 0.0 || !sample_rate.is_finite() {
        return 0;
    }
    (f64::from(frames) * 1_000_000_000.0 / sample_rate) as u64
}

/// Make the calling thread flush denormal floats to zero.
///
/// x86_64 sets MXCSR.FTZ and MXCSR.DAZ; aarch64 sets FPCR.FZ. Returns `false`
/// on other architectures.
pub fn enable_flush_denormals() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        const FTZ_DAZ: u32 = 0x8040;
        let mut csr: u32 = 0;
        unsafe {
            std::arch::asm!("stmxcsr [{}]", in(reg) std::ptr::addr_of_mut!(csr), options(nostack));
            csr |= FTZ_DAZ;
            std::arch::asm!("ldmxcsr [{}]", in(reg) std::ptr::addr_of!(csr), options(nostack));
        }
        true
    }
    #[cfg(target_arch = "aarch64")]
    {
        const FZ: u64 = 1 << 24;
        let mut fpcr: u64;
        unsafe {
            std::arch::asm!("mrs {}, fpcr", out(reg) fpcr, options(nomem, nostack));
            fpcr |= FZ;
            std::arch::asm!("msr fpcr, {}", in(reg) fpcr, options(nomem, nostack));
        }
        true
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

// ---------------------------------------------------------------------------
// macOS: Mach thread time constraint policy
// ---------------------------------------------------------------------------

#[cfg(target_os = "macos")]
fn set_realtime_macos(period_ns: u64, computation_ns: u64, constraint_ns: u64) -> bool {
    #[repr(C)]
    struct MachTimebaseInfo {
        numer: u32,
        denom: u32,
    }

    extern "C" {
        fn mach_timebase_info(info: *mut MachTimebaseInfo) -> i32;
        fn pthread_mach_thread_np(thread: libc::pthread_t) -> u32; // mach_port_t
        fn thread_policy_set(thread: u32, flavor: u32, policy_info: *const u32, count: u32) -> i32;
    }

    const THREAD_TIME_CONSTRAINT_POLICY: u32 = 2;
    const THREAD_TIME_CONSTRAINT_POLICY_COUNT: u32 = 4;

    #[repr(C)]
    struct ThreadTimeConstraintPolicy {
        period: u32,
        computation: u32,
        constraint: u32,
        preemptible: i32, // boolean_t
    }

    let mut tb = MachTimebaseInfo { numer: 0, denom: 0 };
    unsafe {
        mach_timebase_info(&mut tb);
    }
    if tb.numer == 0 || tb.denom == 0 {
        return false;
    }

    let to_abs = |ns: u64| -> u32 { ((ns * tb.denom as u64) / tb.numer as u64) as u32 };

    let policy = ThreadTimeConstraintPolicy {
        period: to_abs(period_ns),
        computation: to_abs(computation_ns),
        constraint: to_abs(constraint_ns),
        preemptible: 1,
    };

    let kr = unsafe {
        let mach_thread = pthread_mach_thread_np(libc::pthread_self());
        thread_policy_set(
            mach_thread,
            THREAD_TIME_CONSTRAINT_POLICY,
            &policy as *const _ as *const u32,
            THREAD_TIME_CONSTRAINT_POLICY_COUNT,
        )
    };
    kr == 0 // KERN_SUCCESS
}

// ---------------------------------------------------------------------------
// Linux: SCHED_FIFO (requires CAP_SYS_NICE or an rtprio limit)
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
fn set_realtime_linux() -> bool {
    let param = libc::sched_param { sched_priority: 80 };
    let ret =
        unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    ret == 0
}
