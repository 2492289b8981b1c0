//! Signal deferral for the durable-move critical section.
//!
//! POSIX signal handlers cannot close over context, so the "a signal
//! arrived during the critical section" fact has to live in global
//! mutable state. [`SignalDeferGuard`] installs handlers for SIGINT and
//! SIGTERM that only record the signal number; on drop it restores the
//! previous handlers and, if a signal was recorded, re-raises it so the
//! process still exits the way the caller expects once the on-disk
//! state is safe to observe again.

use std::sync::atomic::{AtomicI32, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::Result;

static DEFERRED_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_signal(signum: libc::c_int) {
    DEFERRED_SIGNAL.store(signum, Ordering::SeqCst);
}

/// RAII guard: while alive, SIGINT and SIGTERM are captured instead of
/// acting on the process's default disposition. Deliberately narrow in
/// scope — only the hardlink/fsync/unlink sequence of the durable move
/// primitive runs under this guard.
pub struct SignalDeferGuard {
    previous_sigint: SigAction,
    previous_sigterm: SigAction,
}

impl SignalDeferGuard {
    pub fn install() -> Result<Self> {
        DEFERRED_SIGNAL.store(0, Ordering::SeqCst);

        let action = SigAction::new(
            SigHandler::Handler(record_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );

        // SAFETY: `record_signal` only performs an atomic store, which is
        // async-signal-safe.
        let previous_sigint = unsafe { signal::sigaction(Signal::SIGINT, &action)? };
        let previous_sigterm = unsafe { signal::sigaction(Signal::SIGTERM, &action)? };

        Ok(SignalDeferGuard {
            previous_sigint,
            previous_sigterm,
        })
    }
}

impl Drop for SignalDeferGuard {
    fn drop(&mut self) {
        // SAFETY: restoring a previously-installed handler is always
        // sound; both signals were handled by `install`.
        unsafe {
            let _ = signal::sigaction(Signal::SIGINT, &self.previous_sigint);
            let _ = signal::sigaction(Signal::SIGTERM, &self.previous_sigterm);
        }

        let deferred = DEFERRED_SIGNAL.swap(0, Ordering::SeqCst);
        if deferred != 0 {
            if let Ok(sig) = Signal::try_from(deferred) {
                let _ = signal::raise(sig);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_and_drop_without_signal_is_a_no_op() {
        let guard = SignalDeferGuard::install().unwrap();
        drop(guard);
        assert_eq!(DEFERRED_SIGNAL.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn recorded_signal_is_cleared_by_drop() {
        // Ignore SIGTERM first so the guard's restored "previous" handler
        // is SIG_IGN rather than the default terminate action — the
        // re-raise on drop must not kill the test process.
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        let original = unsafe { signal::sigaction(Signal::SIGTERM, &ignore).unwrap() };

        let guard = SignalDeferGuard::install().unwrap();
        record_signal(Signal::SIGTERM as i32);
        assert_ne!(DEFERRED_SIGNAL.load(Ordering::SeqCst), 0);
        drop(guard);
        assert_eq!(DEFERRED_SIGNAL.load(Ordering::SeqCst), 0);

        unsafe {
            let _ = signal::sigaction(Signal::SIGTERM, &original);
        }
    }
}
