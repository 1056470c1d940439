//! Per-key async locks
//!
//! Trades and invoice periods are serialized on their own key only. Lock
//! order is trade before period; the closing sweep takes period locks alone.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use shared::{PeriodKey, WorkflowError, WorkflowResult};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Idle slots are pruned once the table grows past this size
const PRUNE_THRESHOLD: usize = 256;

pub type LockGuard = OwnedMutexGuard<()>;

struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.len() > PRUNE_THRESHOLD {
            // Only the table holds an idle slot
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        slots.entry(key.clone()).or_default().clone()
    }

    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct LockRegistry {
    trades: KeyedLocks<Uuid>,
    periods: KeyedLocks<PeriodKey>,
    timeout: Duration,
}

impl LockRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            trades: KeyedLocks::new(),
            periods: KeyedLocks::new(),
            timeout,
        }
    }

    pub async fn lock_trade(&self, trade_id: Uuid) -> WorkflowResult<LockGuard> {
        self.acquire(&self.trades, &trade_id, "trade").await
    }

    pub async fn lock_period(&self, key: &PeriodKey) -> WorkflowResult<LockGuard> {
        self.acquire(&self.periods, key, "invoice period").await
    }

    async fn acquire<K>(&self, locks: &KeyedLocks<K>, key: &K, kind: &str) -> WorkflowResult<LockGuard>
    where
        K: Eq + Hash + Clone + Display,
    {
        let slot = locks.slot(key);
        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!(%key, kind, "Timed out waiting for lock");
                Err(WorkflowError::concurrent(format!("{} {}", kind, key)))
            }
        }
    }

    /// Number of lock slots currently tracked
    pub fn tracked(&self) -> usize {
        self.trades.len() + self.periods.len()
    }
}
