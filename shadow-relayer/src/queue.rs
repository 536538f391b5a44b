//! In-memory withdrawal queue shared by the HTTP handlers and the poller.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use shadow_accumulator::Fr;
use solana_sdk::pubkey::Pubkey;
use uuid::Uuid;

use crate::{delay::DelayReason, pool::PoolId};

pub const DEFAULT_MAX_COMPLETED_HISTORY: usize = 10_000;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `pending -> processing -> completed | failed`. Terminal states never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Clone, Debug)]
pub struct Withdrawal {
    pub id: Uuid,
    pub pool_id: PoolId,
    pub nullifier_hash: Fr,
    pub root: Fr,
    pub final_address: Pubkey,
    /// Lamports.
    pub amount: u64,
    pub num_hops: usize,
    /// Relayer that receives the vault release.
    pub relayer_id: usize,
    /// Intermediate relayers, filled in when execution starts.
    pub hop_relayer_ids: Vec<usize>,
    pub delay: Duration,
    pub delay_reason: DelayReason,
    pub created_at_ms: u64,
    pub execute_at_ms: u64,
    pub status: WithdrawalStatus,
    pub completed_at_ms: Option<u64>,
    pub final_signature: Option<String>,
    pub error: Option<String>,
}

impl Withdrawal {
    pub fn time_remaining_ms(&self, now_ms: u64) -> u64 {
        self.execute_at_ms.saturating_sub(now_ms)
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.status == WithdrawalStatus::Pending && now_ms >= self.execute_at_ms
    }

    /// First eight characters of the id, for log lines.
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }
}

#[derive(Default)]
struct StoreState {
    active: HashMap<Uuid, Withdrawal>,
    completed: VecDeque<Withdrawal>,
    total_completed: u64,
}

#[derive(Clone)]
pub struct WithdrawalStore {
    inner: Arc<RwLock<StoreState>>,
    max_completed_history: usize,
}

impl Default for WithdrawalStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COMPLETED_HISTORY)
    }
}

impl WithdrawalStore {
    pub fn new(max_completed_history: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreState::default())),
            max_completed_history,
        }
    }

    pub fn insert(&self, withdrawal: Withdrawal) {
        let mut guard = self.inner.write().expect("withdrawal store poisoned");
        guard.active.insert(withdrawal.id, withdrawal);
    }

    pub fn find(&self, id: &Uuid) -> Option<Withdrawal> {
        let guard = self.inner.read().expect("withdrawal store poisoned");
        guard
            .active
            .get(id)
            .or_else(|| guard.completed.iter().rev().find(|w| &w.id == id))
            .cloned()
    }

    /// Flips every due `pending` entry to `processing` and returns them,
    /// oldest deadline first. An entry is returned by at most one call.
    pub fn claim_due(&self, now_ms: u64) -> Vec<Withdrawal> {
        let mut guard = self.inner.write().expect("withdrawal store poisoned");
        let mut claimed: Vec<Withdrawal> = guard
            .active
            .values_mut()
            .filter(|w| w.is_due(now_ms))
            .map(|w| {
                w.status = WithdrawalStatus::Processing;
                w.clone()
            })
            .collect();
        claimed.sort_by_key(|w| (w.execute_at_ms, w.created_at_ms));
        claimed
    }

    pub fn set_hop_relayers(&self, id: &Uuid, hop_relayer_ids: Vec<usize>) {
        let mut guard = self.inner.write().expect("withdrawal store poisoned");
        if let Some(entry) = guard.active.get_mut(id) {
            entry.hop_relayer_ids = hop_relayer_ids;
        }
    }

    /// Moves a `processing` entry into the completed history.
    pub fn complete(&self, id: &Uuid, signature: String, at_ms: u64) -> bool {
        let mut guard = self.inner.write().expect("withdrawal store poisoned");
        match guard.active.get(id).map(|w| w.status) {
            Some(WithdrawalStatus::Processing) => {}
            other => {
                tracing::warn!("ignoring completion of withdrawal {} in state {:?}", id, other);
                return false;
            }
        }
        let Some(mut withdrawal) = guard.active.remove(id) else {
            return false;
        };
        withdrawal.status = WithdrawalStatus::Completed;
        withdrawal.completed_at_ms = Some(at_ms);
        withdrawal.final_signature = Some(signature);

        guard.completed.push_back(withdrawal);
        guard.total_completed += 1;
        while guard.completed.len() > self.max_completed_history {
            guard.completed.pop_front();
        }
        true
    }

    /// Marks a `processing` entry failed. It stays visible to lookups and is
    /// never claimed again.
    pub fn fail(&self, id: &Uuid, error: String, at_ms: u64) -> bool {
        let mut guard = self.inner.write().expect("withdrawal store poisoned");
        match guard.active.get_mut(id) {
            Some(entry) if entry.status == WithdrawalStatus::Processing => {
                entry.status = WithdrawalStatus::Failed;
                entry.error = Some(error);
                entry.completed_at_ms = Some(at_ms);
                true
            }
            other => {
                tracing::warn!(
                    "ignoring failure of withdrawal {} in state {:?}",
                    id,
                    other.map(|w| w.status)
                );
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        let guard = self.inner.read().expect("withdrawal store poisoned");
        guard
            .active
            .values()
            .filter(|w| w.status == WithdrawalStatus::Pending)
            .count()
    }

    pub fn total_completed(&self) -> u64 {
        self.inner
            .read()
            .expect("withdrawal store poisoned")
            .total_completed
    }
}
