//! Nullifier replay guard.
//!
//! `spent` only ever grows. `reserved` holds nullifiers of withdrawals that
//! were accepted but have not yet finished; they block new requests but are
//! handed back if execution fails.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use shadow_accumulator::Fr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("nullifier already used")]
    AlreadyUsed,
}

#[derive(Default)]
struct ReplayState {
    spent: HashSet<Fr>,
    reserved: HashSet<Fr>,
}

#[derive(Clone, Default)]
pub struct ReplayGuard {
    inner: Arc<Mutex<ReplayState>>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the nullifier's funds have been released.
    pub fn has_been_used(&self, nullifier: &Fr) -> bool {
        self.inner
            .lock()
            .expect("replay guard poisoned")
            .spent
            .contains(nullifier)
    }

    /// True when the nullifier is spent or held by an in-flight withdrawal.
    pub fn is_blocked(&self, nullifier: &Fr) -> bool {
        let state = self.inner.lock().expect("replay guard poisoned");
        state.spent.contains(nullifier) || state.reserved.contains(nullifier)
    }

    pub fn try_reserve(&self, nullifier: Fr) -> Result<(), ReplayError> {
        let mut state = self.inner.lock().expect("replay guard poisoned");
        if state.spent.contains(&nullifier) || !state.reserved.insert(nullifier) {
            return Err(ReplayError::AlreadyUsed);
        }
        Ok(())
    }

    /// Consumes the nullifier. Only called after the whole hop chain succeeded.
    pub fn mark_used(&self, nullifier: Fr) {
        let mut state = self.inner.lock().expect("replay guard poisoned");
        state.reserved.remove(&nullifier);
        state.spent.insert(nullifier);
    }

    /// Drops an in-flight reservation. Spent nullifiers are never released.
    pub fn release(&self, nullifier: &Fr) {
        self.inner
            .lock()
            .expect("replay guard poisoned")
            .reserved
            .remove(nullifier);
    }

    pub fn spent_count(&self) -> usize {
        self.inner.lock().expect("replay guard poisoned").spent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_blocks_without_consuming() {
        let guard = ReplayGuard::new();
        let n = Fr::from(42u64);

        assert!(!guard.is_blocked(&n));
        guard.try_reserve(n).unwrap();
        assert!(guard.is_blocked(&n));
        assert!(!guard.has_been_used(&n));
        assert_eq!(guard.try_reserve(n), Err(ReplayError::AlreadyUsed));
    }

    #[test]
    fn release_after_failure_frees_the_nullifier() {
        let guard = ReplayGuard::new();
        let n = Fr::from(7u64);
        guard.try_reserve(n).unwrap();
        guard.release(&n);
        assert!(!guard.is_blocked(&n));
        guard.try_reserve(n).unwrap();
    }

    #[test]
    fn used_nullifier_is_rejected_forever() {
        let guard = ReplayGuard::new();
        let n = Fr::from(9u64);
        guard.try_reserve(n).unwrap();
        guard.mark_used(n);

        assert!(guard.has_been_used(&n));
        guard.release(&n);
        assert!(guard.has_been_used(&n));
        for _ in 0..3 {
            assert_eq!(guard.try_reserve(n), Err(ReplayError::AlreadyUsed));
        }
        assert_eq!(guard.spent_count(), 1);
    }
}
