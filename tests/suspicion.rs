//! Verdict promotion scenario: a timing anomaly raises `Warning`, a
//! forged tracer record then promotes to `Compromised`, and nothing
//! ever moves the verdict back down.
//!
//! Lives in its own integration binary because the threshold and
//! status-file overrides are read once per process. Keep this file to a
//! single test.

use std::io::Write;

use self_guard::{Verdict, mask};

#[test]
fn warning_then_promotion_to_compromised() {
    let mut status = tempfile::NamedTempFile::new().unwrap();
    write!(status, "Name:\tsuspicion\nTracerPid:\t4242\nUid:\t1000\n").unwrap();
    status.flush().unwrap();

    // SAFETY: set before any monitor call, in a single-threaded test
    // process; the configuration is cached on first use.
    unsafe {
        // A zero threshold makes every timing measurement an anomaly,
        // standing in for a single-stepped workload.
        std::env::set_var("SELF_GUARD_TIMING_THRESHOLD", "0");
        std::env::set_var("SELF_GUARD_STATUS", status.path());
    }

    self_guard::init().unwrap();
    self_guard::snapshot().unwrap();

    // The fast path sees the tracer but never touches the verdict.
    assert!(self_guard::debugger_present().unwrap());
    assert_eq!(self_guard::security_state(), Verdict::Safe);

    self_guard::check_integrity(mask::TIMING).unwrap();
    assert_eq!(self_guard::security_state(), Verdict::Warning);

    // A clean memory check must not downgrade the verdict.
    self_guard::check_integrity(mask::MEMORY).unwrap();
    assert_eq!(self_guard::security_state(), Verdict::Warning);

    // A further timing anomaly cannot promote past Warning on its own.
    self_guard::check_integrity(mask::TIMING).unwrap();
    assert_eq!(self_guard::security_state(), Verdict::Warning);

    self_guard::check_integrity(mask::DEBUGGER).unwrap();
    assert_eq!(self_guard::security_state(), Verdict::Compromised);

    self_guard::shutdown().unwrap();
}
