use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::AccountId;

/// Per-account mutation locks.
///
/// Guards are always taken in ascending id order, so two operations touching
/// the same pair of accounts cannot deadlock. A slot lives only while a guard
/// or a waiter references it.
#[derive(Debug, Default)]
pub struct AccountLocks {
    slots: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

/// Held locks; released on drop.
#[derive(Debug)]
pub struct AccountGuard {
    ids: Vec<AccountId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl AccountGuard {
    /// Whether every given account is covered by this guard.
    pub fn covers(&self, ids: &[AccountId]) -> bool {
        ids.iter().all(|id| self.ids.binary_search(id).is_ok())
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, ids: &[AccountId]) -> AccountGuard {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mutexes: Vec<Arc<Mutex<()>>> = {
            let mut slots = self.slots.lock().await;
            slots.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            ids.iter()
                .map(|id| slots.entry(*id).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        AccountGuard {
            ids,
            _guards: guards,
        }
    }

    #[cfg(test)]
    async fn slot_count(&self) -> usize {
        self.slots.lock().await.len()
    }
}
