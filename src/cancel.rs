//! Cooperative cancellation for lifecycle operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Shared flag checked between major lifecycle steps. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request cancellation once `deadline` has elapsed. The watchdog thread
    /// is detached and exits after firing.
    pub fn cancel_after(&self, deadline: Duration) {
        let token = self.clone();
        std::thread::spawn(move || {
            std::thread::sleep(deadline);
            if !token.is_cancelled() {
                warn!(?deadline, "deadline reached, cancelling at the next step");
                token.cancel();
            }
        });
    }

    /// Fail with [`Error::Cancelled`] naming `step` if cancellation was requested.
    pub fn check(&self, step: &'static str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(step))
        } else {
            Ok(())
        }
    }
}
