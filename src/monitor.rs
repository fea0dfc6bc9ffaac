//! Security state machine and check orchestration.
//!
//! Owns the single piece of shared state: the per-session baseline behind
//! a mutex, and the published verdict in an atomic. Mutating operations
//! serialize on the mutex; verdict reads are lock-free.

use std::sync::atomic::{AtomicU8, Ordering};

use log::{debug, info, warn};
use parking_lot::Mutex;
use thiserror::Error;
use zeroize::Zeroize;

use crate::probe;
use crate::region;
use crate::verdict::Verdict;

/// Check-selector bits for [`check_integrity`](crate::check_integrity).
///
/// A mask of zero is a caller error, not a no-op: a successful check must
/// have run at least one probe.
pub mod mask {
    /// Tracer / debugger probe.
    pub const DEBUGGER: u32 = 1;
    /// Timing probe.
    pub const TIMING: u32 = 1 << 1;
    /// Code-region digest comparison.
    pub const MEMORY: u32 = 1 << 2;
    /// Reserved; currently a no-op.
    pub const STACK: u32 = 1 << 3;
    /// Complement of zero, so future bits are on by default.
    pub const ALL: u32 = !0;
}

/// Ways a monitor operation can fail. All of these report host misuse of
/// the API; probe failures never surface here, they degrade locally.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    /// `init` was called while a session is already live.
    #[error("monitor is already initialized")]
    AlreadyInitialized,
    /// An operation other than `init` was called outside a session.
    #[error("monitor is not initialized")]
    NotInitialized,
    /// The check mask selects no probes.
    #[error("check mask selects no probes")]
    EmptyMask,
}

/// Per-session baseline. Created zeroed, written only under [`STATE`]'s
/// mutex, wiped through [`Zeroize`] at shutdown. The explicit padding
/// keeps the record free of uninitialized slack so it can be digested
/// as raw bytes.
#[derive(Zeroize)]
#[repr(C)]
struct Baseline {
    code_checksum: u32,
    _pad0: [u8; 4],
    baseline_tsc: u64,
    initialized: u8,
    _pad1: [u8; 7],
}

impl Baseline {
    const fn zeroed() -> Self {
        Baseline {
            code_checksum: 0,
            _pad0: [0; 4],
            baseline_tsc: 0,
            initialized: 0,
            _pad1: [0; 7],
        }
    }

    /// Digest of the record, excluding the checksum field itself so the
    /// value is stable between the snapshot that stores it and the check
    /// that recomputes it.
    fn self_digest(&self) -> u32 {
        let mut h = probe::checksum_update(0, &self.baseline_tsc.to_ne_bytes());
        h = probe::checksum_update(h, &[self.initialized]);
        probe::checksum_update(h, &self._pad1)
    }
}

/// Published verdict for lock-free readers. Starts at `Compromised` so
/// both the pre-init and the post-shutdown state read fail-secure.
static VERDICT: AtomicU8 = AtomicU8::new(Verdict::Compromised as u8);

/// Singleton baseline. `None` outside an initialized session.
static STATE: Mutex<Option<Baseline>> = Mutex::new(None);

/// Start a monitoring session.
///
/// Records the baseline cycle value and publishes a `Safe` verdict. No
/// code digest is taken here: call [`snapshot`] to establish the memory
/// baseline. Until then the `MEMORY` check flags the mismatch between
/// the zeroed baseline and any real digest.
pub fn init() -> Result<(), GuardError> {
    let mut state = STATE.lock();
    if state.is_some() {
        return Err(GuardError::AlreadyInitialized);
    }

    let mut baseline = Baseline::zeroed();
    baseline.baseline_tsc = probe::cycle_counter();
    baseline.initialized = 1;
    *state = Some(baseline);

    VERDICT.store(Verdict::Safe as u8, Ordering::Release);
    info!("integrity monitor initialized (backend: {})", probe::backend());
    Ok(())
}

/// Record the code baseline: the digest of the current executable region,
/// or of the baseline record itself when no region is available.
///
/// Does not reset the verdict: a process already judged `Compromised`
/// cannot launder itself by re-snapshotting.
pub fn snapshot() -> Result<(), GuardError> {
    let mut state = STATE.lock();
    let baseline = state.as_mut().ok_or(GuardError::NotInitialized)?;

    baseline.code_checksum = match region::locate() {
        // SAFETY: the locator reports a readable mapping of this process.
        Some(text) => unsafe { probe::checksum_memory(text.start, text.len) },
        None => {
            debug!("code region unavailable; baselining the record itself");
            baseline.self_digest()
        }
    };
    Ok(())
}

/// Run the probes selected by `mask_bits` and fold their findings into
/// the verdict.
///
/// Success means "the selected checks ran", not "nothing was found";
/// read the outcome separately through [`security_state`]. The verdict
/// only ever moves upward: a strong finding stores `Compromised`
/// unconditionally, a weak finding raises `Safe` to `Warning` and leaves
/// anything higher untouched.
pub fn check_integrity(mask_bits: u32) -> Result<(), GuardError> {
    let state = STATE.lock();
    let baseline = state.as_ref().ok_or(GuardError::NotInitialized)?;
    if mask_bits == 0 {
        return Err(GuardError::EmptyMask);
    }

    let mut suspicious = false;
    let mut compromised = false;

    if mask_bits & mask::DEBUGGER != 0 && probe::tracer_attached() == Some(true) {
        warn!("tracer attached to this process");
        compromised = true;
    }

    if mask_bits & mask::TIMING != 0 && probe::timing_anomaly() {
        debug!("timing probe exceeded its threshold");
        suspicious = true;
    }

    if mask_bits & mask::MEMORY != 0 {
        match region::locate() {
            Some(text) => {
                // SAFETY: the locator reports a readable mapping of this process.
                let digest = unsafe { probe::checksum_memory(text.start, text.len) };
                if digest != baseline.code_checksum {
                    warn!(
                        "code region digest mismatch (baseline {:#010x}, current {:#010x})",
                        baseline.code_checksum, digest
                    );
                    compromised = true;
                }
            }
            None => {
                // Degraded check: no code coverage, so a mismatch is only
                // a weak signal.
                if baseline.self_digest() != baseline.code_checksum {
                    debug!("baseline record digest mismatch in degraded memory check");
                    suspicious = true;
                }
            }
        }
    }

    // mask::STACK is reserved and deliberately not dispatched.

    if compromised {
        VERDICT.store(Verdict::Compromised as u8, Ordering::Release);
        warn!("verdict raised to COMPROMISED");
    } else if suspicious {
        // Raise Safe to Warning; never touch an already-raised verdict.
        if VERDICT
            .compare_exchange(
                Verdict::Safe as u8,
                Verdict::Warning as u8,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            warn!("verdict raised to WARNING");
        }
    }

    Ok(())
}

/// Fast path: is a tracer attached right now?
///
/// Consults the tracer probe only and never updates the verdict. An
/// unavailable probe reads as "no tracer".
pub fn debugger_present() -> Result<bool, GuardError> {
    let state = STATE.lock();
    if state.is_none() {
        return Err(GuardError::NotInitialized);
    }
    Ok(probe::tracer_attached() == Some(true))
}

/// Read the current verdict. Lock-free; safe to poll from any thread.
///
/// Reads `Compromised` outside an initialized session, and clamps any
/// out-of-range stored value to `Compromised`.
pub fn security_state() -> Verdict {
    Verdict::from_raw(VERDICT.load(Ordering::Acquire))
}

/// End the session: publish a fail-secure verdict, wipe the baseline,
/// and release the singleton. A later [`init`] starts a fresh session.
pub fn shutdown() -> Result<(), GuardError> {
    let mut state = STATE.lock();
    if state.is_none() {
        return Err(GuardError::NotInitialized);
    }

    // Publish before the wipe so a reader racing past shutdown never
    // observes Safe against a zeroed baseline.
    VERDICT.store(Verdict::Compromised as u8, Ordering::Release);
    if let Some(baseline) = state.as_mut() {
        baseline.zeroize();
    }
    *state = None;

    info!("integrity monitor shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_vocabulary() {
        assert_eq!(mask::DEBUGGER, 1);
        assert_eq!(mask::TIMING, 2);
        assert_eq!(mask::MEMORY, 4);
        assert_eq!(mask::STACK, 8);
        assert_eq!(mask::ALL, 0xFFFF_FFFF);
    }

    #[test]
    fn self_digest_is_stable() {
        let mut baseline = Baseline::zeroed();
        baseline.baseline_tsc = 0x0123_4567_89AB_CDEF;
        baseline.initialized = 1;
        assert_eq!(baseline.self_digest(), baseline.self_digest());

        // The digest excludes the checksum field, so storing it does not
        // perturb the next computation.
        let digest = baseline.self_digest();
        baseline.code_checksum = digest;
        assert_eq!(baseline.self_digest(), digest);
    }

    #[test]
    fn self_digest_tracks_the_cycle_value() {
        let mut a = Baseline::zeroed();
        a.baseline_tsc = 1;
        a.initialized = 1;
        let mut b = Baseline::zeroed();
        b.baseline_tsc = 2;
        b.initialized = 1;
        assert_ne!(a.self_digest(), b.self_digest());
    }

    #[test]
    fn zeroed_baseline_digests_to_zero() {
        // A wiped record is self-consistent with a wiped checksum.
        assert_eq!(Baseline::zeroed().self_digest(), 0);
    }

    #[test]
    fn zeroize_clears_every_field() {
        let mut baseline = Baseline::zeroed();
        baseline.code_checksum = 0xDEAD_BEEF;
        baseline.baseline_tsc = 42;
        baseline.initialized = 1;
        baseline.zeroize();
        assert_eq!(baseline.code_checksum, 0);
        assert_eq!(baseline.baseline_tsc, 0);
        assert_eq!(baseline.initialized, 0);
    }
}
