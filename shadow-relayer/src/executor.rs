//! Drives a claimed withdrawal through the vault release and its relay hops.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use solana_sdk::signature::Signature;
use thiserror::Error;

use crate::{
    pool::{PoolId, PoolRegistry},
    queue::{now_millis, Withdrawal, WithdrawalStore},
    relayers::{Relayer, RelayerPool},
    replay::ReplayGuard,
    settlement::{Settlement, SettlementError},
};

pub const DEFAULT_HOP_DELAY_MIN: Duration = Duration::from_millis(2_000);
pub const DEFAULT_HOP_DELAY_MAX: Duration = Duration::from_millis(5_000);

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("unknown pool {0}")]
    UnknownPool(PoolId),
    #[error("relayer #{0} is not loaded")]
    UnknownRelayer(usize),
    #[error("need {needed} hop relayers, only {available} available")]
    NotEnoughRelayers { needed: usize, available: usize },
    #[error("vault release failed: {0}")]
    Release(#[source] SettlementError),
    #[error("hop {hop} failed: {source}")]
    Hop {
        hop: usize,
        #[source]
        source: SettlementError,
    },
}

pub struct Executor {
    pools: Arc<PoolRegistry>,
    relayers: RelayerPool,
    replay: ReplayGuard,
    store: WithdrawalStore,
    settlement: Arc<dyn Settlement>,
    hop_delay_min: Duration,
    hop_delay_max: Duration,
}

impl Executor {
    pub fn new(
        pools: Arc<PoolRegistry>,
        relayers: RelayerPool,
        replay: ReplayGuard,
        store: WithdrawalStore,
        settlement: Arc<dyn Settlement>,
    ) -> Self {
        Self {
            pools,
            relayers,
            replay,
            store,
            settlement,
            hop_delay_min: DEFAULT_HOP_DELAY_MIN,
            hop_delay_max: DEFAULT_HOP_DELAY_MAX,
        }
    }

    /// Inter-hop sleep is drawn from `[min, max)`; `min == max` gives a fixed delay.
    pub fn with_hop_delay(mut self, min: Duration, max: Duration) -> Self {
        self.hop_delay_min = min;
        self.hop_delay_max = max.max(min);
        self
    }

    /// Runs a withdrawal that the poller already moved to `processing`.
    ///
    /// On success the nullifier is consumed and the entry completed; on any
    /// failure the remaining hops are abandoned, the entry is failed and the
    /// nullifier reservation is released.
    pub async fn execute(&self, withdrawal: Withdrawal) -> Result<Signature, ExecutionError> {
        let short_id = withdrawal.short_id();
        match self.run_chain(&withdrawal, &short_id).await {
            Ok(signature) => {
                self.replay.mark_used(withdrawal.nullifier_hash);
                self.store
                    .complete(&withdrawal.id, signature.to_string(), now_millis());
                tracing::info!(
                    "[{}] completed: {} lamports delivered to {}",
                    short_id,
                    withdrawal.amount,
                    withdrawal.final_address
                );
                Ok(signature)
            }
            Err(err) => {
                tracing::warn!("[{}] withdrawal failed: {}", short_id, err);
                self.replay.release(&withdrawal.nullifier_hash);
                self.store.fail(&withdrawal.id, err.to_string(), now_millis());
                Err(err)
            }
        }
    }

    async fn run_chain(
        &self,
        withdrawal: &Withdrawal,
        short_id: &str,
    ) -> Result<Signature, ExecutionError> {
        let pool = self
            .pools
            .get(withdrawal.pool_id)
            .ok_or(ExecutionError::UnknownPool(withdrawal.pool_id))?;
        let primary = self
            .relayers
            .get(withdrawal.relayer_id)
            .ok_or(ExecutionError::UnknownRelayer(withdrawal.relayer_id))?;

        let num_hops = withdrawal.num_hops.max(1);
        let (hop_relayers, hop_delays) = {
            let mut rng = rand::thread_rng();
            let hops = self.relayers.sample_hops(primary.id, num_hops - 1, &mut rng);
            let delays: Vec<Duration> = (0..num_hops)
                .map(|_| self.draw_hop_delay(&mut rng))
                .collect();
            (hops, delays)
        };
        if hop_relayers.len() < num_hops - 1 {
            return Err(ExecutionError::NotEnoughRelayers {
                needed: num_hops - 1,
                available: hop_relayers.len(),
            });
        }
        self.store.set_hop_relayers(
            &withdrawal.id,
            hop_relayers.iter().map(|r| r.id).collect(),
        );

        let steps = num_hops + 1;
        tracing::info!(
            "[{}] [1/{}] vault -> relayer #{} (pool {}, {} lamports)",
            short_id,
            steps,
            primary.id,
            pool.id,
            pool.denomination
        );
        let release = self
            .settlement
            .release_from_vault(pool, &primary, &withdrawal.nullifier_hash)
            .await
            .map_err(ExecutionError::Release)?;
        tracing::info!("[{}] vault release: {}", short_id, release);

        let mut holder: &Relayer = &primary;
        let mut last_signature = release;
        for hop in 0..num_hops {
            tokio::time::sleep(hop_delays[hop]).await;

            let next = hop_relayers.get(hop);
            let destination = match next {
                Some(relayer) if hop + 1 < num_hops => relayer.pubkey(),
                _ => withdrawal.final_address,
            };
            tracing::info!(
                "[{}] [{}/{}] relayer #{} -> {}",
                short_id,
                hop + 2,
                steps,
                holder.id,
                destination
            );

            last_signature = self
                .settlement
                .transfer(holder, &destination, withdrawal.amount)
                .await
                .map_err(|source| ExecutionError::Hop {
                    hop: hop + 1,
                    source,
                })?;
            tracing::info!("[{}] hop {}: {}", short_id, hop + 1, last_signature);

            if let Some(relayer) = next {
                holder = &**relayer;
            }
        }

        Ok(last_signature)
    }

    fn draw_hop_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = self.hop_delay_min.as_millis() as u64;
        let max = self.hop_delay_max.as_millis() as u64;
        if max > min {
            Duration::from_millis(rng.gen_range(min..max))
        } else {
            self.hop_delay_min
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pool::Pool,
        queue::{tests::withdrawal, WithdrawalStatus},
        relayers::Relayer,
    };
    use async_trait::async_trait;
    use shadow_accumulator::Fr;
    use solana_sdk::{
        pubkey::Pubkey,
        signature::{Keypair, Signer},
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSettlement {
        log: Mutex<Vec<(Pubkey, Pubkey)>>,
        fail_on_call: Option<usize>,
    }

    impl RecordingSettlement {
        fn record(&self, from: Pubkey, to: Pubkey) -> Result<Signature, SettlementError> {
            let mut log = self.log.lock().unwrap();
            if self.fail_on_call == Some(log.len()) {
                return Err(SettlementError::Rejected("insufficient funds".into()));
            }
            log.push((from, to));
            Ok(Signature::new_unique())
        }
    }

    #[async_trait]
    impl Settlement for RecordingSettlement {
        async fn release_from_vault(
            &self,
            pool: &Pool,
            relayer: &Relayer,
            _nullifier_hash: &Fr,
        ) -> Result<Signature, SettlementError> {
            self.record(pool.vault, relayer.pubkey())
        }

        async fn transfer(
            &self,
            from: &Relayer,
            to: &Pubkey,
            _lamports: u64,
        ) -> Result<Signature, SettlementError> {
            self.record(from.pubkey(), *to)
        }
    }

    struct Harness {
        executor: Executor,
        store: WithdrawalStore,
        replay: ReplayGuard,
        settlement: Arc<RecordingSettlement>,
        pool: Pool,
        relayers: RelayerPool,
    }

    fn harness(fail_on_call: Option<usize>) -> Harness {
        let pool = Pool {
            id: 1,
            denomination: 1_000_000_000,
            account: Pubkey::new_unique(),
            vault: Pubkey::new_unique(),
        };
        let pools = Arc::new(PoolRegistry::new(vec![pool.clone()], 4).unwrap());
        let relayers =
            RelayerPool::new((1..=3).map(|id| Relayer::new(id, Keypair::new())).collect());
        let replay = ReplayGuard::new();
        let store = WithdrawalStore::default();
        let settlement = Arc::new(RecordingSettlement {
            fail_on_call,
            ..Default::default()
        });
        let executor = Executor::new(
            pools,
            relayers.clone(),
            replay.clone(),
            store.clone(),
            settlement.clone(),
        )
        .with_hop_delay(Duration::ZERO, Duration::ZERO);
        Harness {
            executor,
            store,
            replay,
            settlement,
            pool,
            relayers,
        }
    }

    fn claimed(h: &Harness, num_hops: usize) -> Withdrawal {
        let mut w = withdrawal(0);
        w.num_hops = num_hops;
        h.replay.try_reserve(w.nullifier_hash).unwrap();
        h.store.insert(w);
        h.store.claim_due(0).remove(0)
    }

    #[tokio::test]
    async fn two_hops_route_through_an_intermediate_relayer() {
        let h = harness(None);
        let w = claimed(&h, 2);

        let signature = h.executor.execute(w.clone()).await.unwrap();

        let log = h.settlement.log.lock().unwrap().clone();
        let primary = h.relayers.get(w.relayer_id).unwrap().pubkey();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0], (h.pool.vault, primary));
        assert_eq!(log[1].0, primary);
        assert_ne!(log[1].1, primary);
        assert_eq!(log[2], (log[1].1, w.final_address));

        let stored = h.store.find(&w.id).unwrap();
        assert_eq!(stored.status, WithdrawalStatus::Completed);
        assert_eq!(stored.final_signature, Some(signature.to_string()));
        assert!(h.replay.has_been_used(&w.nullifier_hash));
    }

    #[tokio::test]
    async fn single_hop_goes_straight_to_recipient() {
        let h = harness(None);
        let w = claimed(&h, 1);
        h.executor.execute(w.clone()).await.unwrap();

        let log = h.settlement.log.lock().unwrap().clone();
        let primary = h.relayers.get(w.relayer_id).unwrap().pubkey();
        assert_eq!(log, vec![(h.pool.vault, primary), (primary, w.final_address)]);
    }

    #[tokio::test]
    async fn failed_hop_aborts_and_keeps_nullifier_unspent() {
        let h = harness(Some(2));
        let w = claimed(&h, 3);

        let err = h.executor.execute(w.clone()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Hop { hop: 2, .. }));
        assert_eq!(h.settlement.log.lock().unwrap().len(), 2);

        let stored = h.store.find(&w.id).unwrap();
        assert_eq!(stored.status, WithdrawalStatus::Failed);
        assert!(stored.error.unwrap().contains("insufficient funds"));
        assert!(!h.replay.has_been_used(&w.nullifier_hash));
        assert!(!h.replay.is_blocked(&w.nullifier_hash));
    }

    #[tokio::test]
    async fn missing_primary_relayer_fails_without_submitting() {
        let h = harness(None);
        let mut w = withdrawal(0);
        w.relayer_id = 42;
        h.store.insert(w);
        let w = h.store.claim_due(0).remove(0);

        let err = h.executor.execute(w.clone()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::UnknownRelayer(42)));
        assert!(h.settlement.log.lock().unwrap().is_empty());
        assert_eq!(h.store.find(&w.id).unwrap().status, WithdrawalStatus::Failed);
    }
}
