use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::VaultError;

/// Admits one mutating operation at a time.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: AtomicBool,
}

/// Proof of entry; the guard reopens when this is dropped.
#[derive(Debug)]
pub struct EntryToken<'g> {
    guard: &'g ReentrancyGuard,
}

impl ReentrancyGuard {
    pub fn enter(&self) -> Result<EntryToken<'_>, VaultError> {
        self.entered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                tracing::warn!("re-entrant vault call rejected");
                VaultError::ReentrancyBlocked
            })?;
        Ok(EntryToken { guard: self })
    }

    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }
}

impl Drop for EntryToken<'_> {
    fn drop(&mut self) {
        self.guard.entered.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_blocked_until_release() {
        let guard = ReentrancyGuard::default();
        let token = guard.enter().expect("first entry should succeed");
        assert!(guard.is_entered());
        assert!(matches!(guard.enter(), Err(VaultError::ReentrancyBlocked)));
        drop(token);
        assert!(!guard.is_entered());
        guard.enter().expect("entry after release should succeed");
    }
}
