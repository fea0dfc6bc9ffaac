//! Detection primitives: cycle counter, tracer probe, timing probe, and
//! memory checksum.
//!
//! All four operations are stateless and re-entrant. The cycle counter and
//! the timing threshold are backend-specific (one backend is selected at
//! build time per target architecture), while the tracer probe and the
//! checksum are shared across backends.

use std::ffi::CStr;
use std::fs;
use std::path::Path;

use crate::config;

/// Iteration count of the timing micro-workload. The workload must be
/// identical on every call so the threshold stays meaningful.
const TIMING_ITERATIONS: u64 = 10;

/// Timing threshold in cycle-counter units. The native counters tick per
/// CPU cycle (or per virtual-counter tick on arm64); the portable counter
/// ticks in nanoseconds, hence the much larger fallback value.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
const TIMING_THRESHOLD: u64 = 1_000;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const TIMING_THRESHOLD: u64 = 100_000;

/// Status-file lines scanned for the tracer record before giving up.
const MAX_STATUS_LINES: usize = 128;

#[cfg(target_arch = "x86_64")]
const BACKEND_LABEL: &str = "x86_64-native";
#[cfg(target_arch = "x86_64")]
pub(crate) const BACKEND_LABEL_C: &CStr = c"x86_64-native";

#[cfg(target_arch = "aarch64")]
const BACKEND_LABEL: &str = "arm64-native";
#[cfg(target_arch = "aarch64")]
pub(crate) const BACKEND_LABEL_C: &CStr = c"arm64-native";

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const BACKEND_LABEL: &str = "c-fallback";
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub(crate) const BACKEND_LABEL_C: &CStr = c"c-fallback";

/// Returns the fixed label of the backend linked into this build:
/// `"x86_64-native"`, `"arm64-native"`, or `"c-fallback"`.
pub fn backend() -> &'static str {
    BACKEND_LABEL
}

/// Read the monotonic cycle counter.
///
/// Non-decreasing within a process under normal conditions. The absolute
/// magnitude is backend-dependent (CPU cycles, virtual-counter ticks, or
/// nanoseconds); callers must only take deltas.
#[inline]
pub fn cycle_counter() -> u64 {
    counter_impl()
}

/// Read the TSC with serialization via `LFENCE` + `RDTSC` + `LFENCE` so
/// the read is not reordered around the measured workload.
#[cfg(target_arch = "x86_64")]
#[inline]
fn counter_impl() -> u64 {
    let lo: u32;
    let hi: u32;
    // SAFETY: LFENCE and RDTSC are always available on x86_64 and have
    // no side effects beyond reading the timestamp counter.
    unsafe {
        core::arch::asm!(
            "lfence",
            "rdtsc",
            "lfence",
            out("eax") lo,
            out("edx") hi,
            options(nomem, nostack, preserves_flags),
        );
    }
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Read the virtual counter, with an `ISB` so in-flight instructions
/// retire before the read.
#[cfg(target_arch = "aarch64")]
#[inline]
fn counter_impl() -> u64 {
    let value: u64;
    // SAFETY: CNTVCT_EL0 is readable from EL0 on all supported arm64
    // systems; the read has no side effects.
    unsafe {
        core::arch::asm!(
            "isb",
            "mrs {value}, cntvct_el0",
            value = out(reg) value,
            options(nomem, nostack, preserves_flags),
        );
    }
    value
}

/// Portable fallback: CLOCK_MONOTONIC in nanoseconds.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline]
fn counter_impl() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        // Counter read failed; a zero delta is treated as "no evidence".
        return 0;
    }
    (ts.tv_sec as u64)
        .wrapping_mul(1_000_000_000)
        .wrapping_add(ts.tv_nsec as u64)
}

/// Low-level tracer probe.
///
/// Hardware debug registers are privileged on the supported architectures
/// and cannot be inspected from user mode, so every backend consults the
/// kernel's tracer record instead. `None` means the probe is unavailable
/// (no readable status file); the orchestrator treats that as
/// not-suspicious and lets the other checks run.
//
// TODO: macOS tracer detection via sysctl kinfo_proc / P_TRACED.
pub(crate) fn tracer_attached() -> Option<bool> {
    let path = config::config()
        .status_path
        .as_deref()
        .unwrap_or(Path::new("/proc/self/status"));
    let status = fs::read_to_string(path).ok()?;
    parse_tracer_pid(&status).map(|pid| pid != 0)
}

/// Extract the `TracerPid:` field from status-file content.
fn parse_tracer_pid(status: &str) -> Option<i32> {
    for line in status.lines().take(MAX_STATUS_LINES) {
        if let Some(rest) = line.strip_prefix("TracerPid:") {
            return rest.trim().parse().ok();
        }
    }
    None
}

/// Timing probe: measure a fixed micro-workload against the backend
/// threshold. Returns `true` when execution took suspiciously long,
/// which is what single-stepping or instruction-level instrumentation
/// looks like from inside the process. Reaching the threshold counts:
/// a zero threshold flags every measurement.
pub(crate) fn timing_anomaly() -> bool {
    let threshold = config::config()
        .timing_threshold
        .unwrap_or(TIMING_THRESHOLD);

    let t0 = cycle_counter();
    let acc = workload();
    let t1 = cycle_counter();
    std::hint::black_box(acc);

    t1.saturating_sub(t0) >= threshold
}

/// Fixed, data-independent micro-workload. `black_box` keeps the
/// accumulation from being folded away.
#[inline(never)]
fn workload() -> u64 {
    let mut acc = 0u64;
    for i in 0..TIMING_ITERATIONS {
        acc = std::hint::black_box(acc.wrapping_add(i ^ 0xA5));
    }
    acc
}

/// Running XOR/rotate digest over a byte slice.
///
/// The recurrence is `h = rotl32(h, 1) ^ byte`, starting from `h = 0`.
/// It is deterministic and injective per step, so flipping any single
/// input byte changes the output. It is a tamper-evidence tripwire, not
/// a MAC.
pub fn checksum_bytes(bytes: &[u8]) -> u32 {
    checksum_update(0, bytes)
}

/// Continue a running digest. `checksum_bytes(b)` is `checksum_update(0, b)`.
pub(crate) fn checksum_update(mut h: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        h = h.rotate_left(1) ^ u32::from(b);
    }
    h
}

/// Digest `len` bytes starting at `start`.
///
/// A null `start`, a zero `len`, or a length that cannot back a valid
/// slice yields `0`.
///
/// # Safety
///
/// `start..start + len` must be readable mapped memory for the duration
/// of the call.
pub unsafe fn checksum_memory(start: *const u8, len: usize) -> u32 {
    if start.is_null() || len == 0 || len > isize::MAX as usize {
        return 0;
    }
    // SAFETY: non-null, non-empty, in-bounds per the caller's contract.
    let bytes = unsafe { std::slice::from_raw_parts(start, len) };
    checksum_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_reference_vectors() {
        assert_eq!(checksum_bytes(b""), 0);
        assert_eq!(checksum_bytes(b"\x00"), 0);
        assert_eq!(checksum_bytes(b"\x01"), 1);
        // 0 -> rotl(0,1)^1 = 1 -> rotl(1,1)^1 = 3
        assert_eq!(checksum_bytes(b"\x01\x01"), 3);
    }

    #[test]
    fn checksum_is_deterministic() {
        let buf = b"the quick brown fox jumps over the lazy dog";
        assert_eq!(checksum_bytes(buf), checksum_bytes(buf));
    }

    #[test]
    fn checksum_detects_any_single_byte_flip() {
        let baseline: Vec<u8> = (0u8..64).collect();
        let digest = checksum_bytes(&baseline);
        for i in 0..baseline.len() {
            let mut tampered = baseline.clone();
            tampered[i] ^= 0x01;
            assert_ne!(
                checksum_bytes(&tampered),
                digest,
                "flip at offset {i} went undetected"
            );
        }
    }

    #[test]
    fn checksum_update_matches_one_shot() {
        let buf = b"split digest input";
        let (head, tail) = buf.split_at(7);
        let streamed = checksum_update(checksum_update(0, head), tail);
        assert_eq!(streamed, checksum_bytes(buf));
    }

    #[test]
    fn checksum_memory_degenerate_inputs() {
        // SAFETY: null/zero-length inputs never dereference.
        unsafe {
            assert_eq!(checksum_memory(std::ptr::null(), 16), 0);
            assert_eq!(checksum_memory(b"x".as_ptr(), 0), 0);
        }
    }

    #[test]
    fn checksum_memory_matches_slice_digest() {
        let buf = [0xDEu8, 0xAD, 0xBE, 0xEF];
        // SAFETY: buf is live for the call.
        let raw = unsafe { checksum_memory(buf.as_ptr(), buf.len()) };
        assert_eq!(raw, checksum_bytes(&buf));
    }

    #[test]
    fn cycle_counter_is_monotonic() {
        let t0 = cycle_counter();
        let t1 = cycle_counter();
        assert!(t1 >= t0);
    }

    #[test]
    fn workload_is_stable() {
        assert_eq!(workload(), workload());
    }

    #[test]
    fn backend_label_is_one_of_the_fixed_strings() {
        assert!(matches!(
            backend(),
            "x86_64-native" | "arm64-native" | "c-fallback"
        ));
        assert_eq!(BACKEND_LABEL_C.to_str().unwrap(), backend());
    }

    #[test]
    fn tracer_pid_parsing() {
        let status = "Name:\tcargo\nUmask:\t0022\nTracerPid:\t0\nUid:\t1000\n";
        assert_eq!(parse_tracer_pid(status), Some(0));

        let traced = "Name:\tcargo\nTracerPid:\t4242\n";
        assert_eq!(parse_tracer_pid(traced), Some(4242));

        assert_eq!(parse_tracer_pid("Name:\tcargo\n"), None);
        assert_eq!(parse_tracer_pid("TracerPid:\tgarbage\n"), None);
    }
}
