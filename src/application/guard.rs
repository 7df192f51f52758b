use crate::error::{PaymentError, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Flag that rejects nested entry into the orchestrator.
///
/// It does not queue: a caller on another task that arrives while the flag
/// is held is rejected the same way, so concurrent callers must serialize.
///
/// `enter` hands back a token that clears the flag when dropped, so every
/// exit path (including `?` early returns) releases it.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: AtomicBool,
}

pub struct Entered<'a> {
    flag: &'a AtomicBool,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> Result<Entered<'_>> {
        self.entered
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| PaymentError::Reentrancy)?;
        Ok(Entered {
            flag: &self.entered,
        })
    }

    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
