//! C-callable facade.
//!
//! Thin translations of the Rust operations into a stable return-code
//! vocabulary, so hosts in any language can link the monitor as a static
//! or shared library. Verdicts cross the boundary as their integer
//! values (`SAFE=0`, `WARNING=1`, `COMPROMISED=2`).

use libc::{c_char, c_int};

use crate::monitor::{self, GuardError};
use crate::probe;

/// Operation succeeded.
pub const OK: c_int = 0;
/// Initialization failed.
pub const ERR_INIT: c_int = -1;
/// The monitor has not been initialized.
pub const ERR_NOT_INIT: c_int = -2;
/// The monitor is already initialized.
pub const ERR_ALREADY_INIT: c_int = -3;
/// Invalid argument or internal failure.
pub const ERR_INTERNAL: c_int = -4;

fn code(result: Result<(), GuardError>) -> c_int {
    match result {
        Ok(()) => OK,
        Err(GuardError::AlreadyInitialized) => ERR_ALREADY_INIT,
        Err(GuardError::NotInitialized) => ERR_NOT_INIT,
        Err(GuardError::EmptyMask) => ERR_INTERNAL,
    }
}

/// Start a monitoring session. See [`crate::init`].
#[unsafe(no_mangle)]
pub extern "C" fn selfguard_init() -> c_int {
    code(monitor::init())
}

/// Record the code baseline. See [`crate::snapshot`].
#[unsafe(no_mangle)]
pub extern "C" fn selfguard_snapshot() -> c_int {
    code(monitor::snapshot())
}

/// Run the probes selected by `mask`. See [`crate::check_integrity`].
#[unsafe(no_mangle)]
pub extern "C" fn selfguard_check_integrity(mask: u32) -> c_int {
    code(monitor::check_integrity(mask))
}

/// Fast tracer probe: `1` if a tracer is attached, `0` if not, `-1` when
/// the monitor is uninitialized.
#[unsafe(no_mangle)]
pub extern "C" fn selfguard_detect_debugger() -> c_int {
    match monitor::debugger_present() {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(_) => -1,
    }
}

/// Read the current verdict. Lock-free.
#[unsafe(no_mangle)]
pub extern "C" fn selfguard_get_security_state() -> c_int {
    monitor::security_state() as c_int
}

/// End the session. See [`crate::shutdown`].
#[unsafe(no_mangle)]
pub extern "C" fn selfguard_shutdown() -> c_int {
    code(monitor::shutdown())
}

/// The backend linked into this build, as a static NUL-terminated string:
/// `"x86_64-native"`, `"arm64-native"`, or `"c-fallback"`.
#[unsafe(no_mangle)]
pub extern "C" fn selfguard_backend() -> *const c_char {
    probe::BACKEND_LABEL_C.as_ptr()
}
