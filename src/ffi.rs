// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Exported JACK client entry points.
//
// The process-wide bridge is created when the library is loaded, from the two
// environment tokens, so the host gets its Ready reply and the process is tied
// to its parent before the application opens any client. If the tokens are
// absent at load the first `jack_client_open` tries once more; if they are
// missing or malformed, or the segments cannot be attached, no bridge exists
// and every open reports `JackServerError`.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::sync::OnceLock;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bridge::Bridge;
use crate::config::{BridgeConfig, SETUP_ENV, SHM_IDS_ENV};
use crate::lifecycle::die_with_parent;
use crate::registry::ClientHandle;

/// Environment filter for the bridge's log output.
pub const LOG_ENV: &str = "LIBJACK_BRIDGE_LOG";

/// `jack_status_t::JackFailure`.
pub const JACK_FAILURE: c_int = 0x01;
/// `jack_status_t::JackServerError`.
pub const JACK_SERVER_ERROR: c_int = 0x20;

/// Opaque client pointer handed to the application.
#[repr(C)]
pub struct JackClient {
    _private: [u8; 0],
}

static BRIDGE: OnceLock<Option<Bridge>> = OnceLock::new();

/// Install the stderr subscriber unless the application already has one.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn bootstrap() -> Option<Bridge> {
    init_logging();

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            warn!("not started by a bridge host: {e}");
            return None;
        }
    };
    if let Err(e) = die_with_parent() {
        warn!("failed to tie lifetime to parent process: {e}");
    }
    match Bridge::start(config) {
        Ok(bridge) => Some(bridge),
        Err(e) => {
            error!("failed to start bridge: {e}");
            None
        }
    }
}

fn bridge() -> Option<&'static Bridge> {
    BRIDGE.get_or_init(bootstrap).as_ref()
}

/// Start the process-wide bridge if a host put its tokens in the
/// environment. Returns whether a bridge is running afterwards.
///
/// Runs from the library's load-time constructor; later calls are lookups.
pub fn start_from_env() -> bool {
    if BRIDGE.get().is_none()
        && std::env::var_os(SHM_IDS_ENV).is_none()
        && std::env::var_os(SETUP_ENV).is_none()
    {
        return false;
    }
    bridge().is_some()
}

extern "C" fn on_load() {
    start_from_env();
}

#[used]
#[cfg_attr(
    any(target_os = "linux", target_os = "android", target_os = "freebsd"),
    link_section = ".init_array"
)]
#[cfg_attr(target_os = "macos", link_section = "__DATA,__mod_init_func")]
static ON_LOAD: extern "C" fn() = on_load;

fn handle_from_ptr(client: *mut JackClient) -> Option<ClientHandle> {
    ClientHandle::from_raw(client as usize as u64)
}

unsafe fn read_name(name: *const c_char) -> String {
    if name.is_null() {
        return String::new();
    }
    CStr::from_ptr(name).to_string_lossy().into_owned()
}

/// Open a client. Extra variadic arguments (server name) are ignored.
///
/// # Safety
/// `client_name` must be null or a valid C string; `status` must be null or
/// writable.
#[no_mangle]
pub unsafe extern "C" fn jack_client_open(
    client_name: *const c_char,
    options: c_int,
    status: *mut c_int,
) -> *mut JackClient {
    let name = read_name(client_name);
    debug!(name, options, "jack_client_open");

    let Some(bridge) = bridge() else {
        if !status.is_null() {
            *status = JACK_FAILURE | JACK_SERVER_ERROR;
        }
        return std::ptr::null_mut();
    };

    let handle = bridge.open_client(&name);
    if !status.is_null() {
        *status = 0;
    }
    handle.into_raw() as usize as *mut JackClient
}

/// # Safety
/// `client_name` must be null or a valid C string.
#[no_mangle]
pub unsafe extern "C" fn jack_client_new(client_name: *const c_char) -> *mut JackClient {
    jack_client_open(client_name, 0, std::ptr::null_mut())
}

/// Unregister and release a client. Returns 0 on success.
#[no_mangle]
pub extern "C" fn jack_client_close(client: *mut JackClient) -> c_int {
    let (Some(bridge), Some(handle)) = (bridge(), handle_from_ptr(client)) else {
        return 1;
    };
    match bridge.close_client(handle) {
        Ok(()) => 0,
        Err(e) => {
            warn!("jack_client_close: {e}");
            1
        }
    }
}

/// The bridge's realtime thread, or 0 for an unknown client.
#[no_mangle]
pub extern "C" fn jack_client_thread_id(client: *mut JackClient) -> libc::pthread_t {
    let (Some(bridge), Some(handle)) = (bridge(), handle_from_ptr(client)) else {
        return 0;
    };
    if bridge.is_client_active(handle).is_err() {
        return 0;
    }
    bridge.realtime_thread_id().unwrap_or(0)
}

/// Realtime priority is not reported to clients.
#[no_mangle]
pub extern "C" fn jack_client_real_time_priority(_client: *mut JackClient) -> c_int {
    -1
}

/// Session management is not supported; the callback is never called.
#[no_mangle]
pub extern "C" fn jack_set_session_callback(
    _client: *mut JackClient,
    _callback: Option<unsafe extern "C" fn(*mut c_void, *mut c_void)>,
    _arg: *mut c_void,
) -> c_int {
    info!("session callbacks are not supported");
    0
}
