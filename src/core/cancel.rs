//! Run cancellation: SIGINT/SIGTERM raise a shared flag that the pipeline
//! polls only at stage boundaries.
//!
//! Uses the `signal-hook` crate for safe signal registration. Nothing inside a
//! stage reads the flag, so a signal that arrives mid-deletion lets the
//! executor finish its pass before the run stops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::core::errors::{Result, SweepError};

/// Cloneable cancellation flag shared between the signal handler and the run.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that is only ever raised programmatically.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token wired to SIGINT and SIGTERM.
    ///
    /// Registration is best-effort; failures are reported on stderr but not fatal.
    pub fn with_signals() -> Self {
        let token = Self::new();
        for (name, signal) in [("SIGINT", SIGINT), ("SIGTERM", SIGTERM)] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&token.flag)) {
                eprintln!("[RSW-SIGNAL] failed to register {name}: {e}");
            }
        }
        token
    }

    /// Raise the flag.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Stage-boundary checkpoint: errors with `Cancelled` if the flag is up.
    pub fn checkpoint(&self, next_stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(SweepError::Cancelled { stage: next_stage });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_passes_checkpoints() {
        let token = CancelToken::new();
        assert!(token.checkpoint("scan").is_ok());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        let err = token.checkpoint("archive").unwrap_err();
        assert!(matches!(err, SweepError::Cancelled { stage: "archive" }));
        assert_eq!(err.exit_code(), 130);
    }
}
