//! Self-Guard: in-process runtime integrity monitoring.
//!
//! A host application links this crate, takes a baseline snapshot of its
//! own executable code and timing environment, and then periodically asks
//! whether the process has been tampered with: by an attached debugger,
//! by code patching, or by execution-time instrumentation. The answer is
//! a coarse tri-valued [`Verdict`] the host uses to decide whether to
//! continue, alert, or abort. The monitor itself never aborts the host
//! process.
//!
//! # Example
//!
//! ```no_run
//! use self_guard::{Verdict, mask};
//!
//! self_guard::init().unwrap();
//! self_guard::snapshot().unwrap();
//!
//! self_guard::check_integrity(mask::ALL).unwrap();
//! if self_guard::security_state() != Verdict::Safe {
//!     // Alert, degrade, or abort; the host decides.
//! }
//!
//! self_guard::shutdown().unwrap();
//! ```
//!
//! `security_state()` is lock-free and safe to poll from any thread; the
//! mutating operations serialize internally. Outside an initialized
//! session every read reports [`Verdict::Compromised`].
//!
//! C hosts link the same crate through the `selfguard_*` entry points in
//! [`ffi`].
//!
//! # Environment variables
//!
//! Read once per process, never written:
//!
//! - `SELF_GUARD_TIMING_THRESHOLD`: timing-probe threshold override, in
//!   backend units.
//! - `SELF_GUARD_MAPS`: path of the memory-map pseudo-file (default
//!   `/proc/self/maps`).
//! - `SELF_GUARD_STATUS`: path of the process status pseudo-file
//!   (default `/proc/self/status`).

mod config;
mod monitor;
mod probe;
mod region;
mod verdict;

pub mod ffi;

pub use monitor::{
    GuardError, check_integrity, debugger_present, init, mask, security_state, shutdown, snapshot,
};
pub use probe::{backend, checksum_bytes, checksum_memory, cycle_counter};
pub use verdict::Verdict;
