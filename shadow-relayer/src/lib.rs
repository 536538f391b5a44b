//! shadow-relayer
//!
//! Off-chain relay for fixed-denomination privacy pools.
//!
//! Architecture:
//! 1. Deposits append commitments to a per-pool Merkle accumulator
//! 2. Withdrawals pass the proof gate and are queued with a randomized delay
//! 3. A poller promotes due withdrawals to the executor
//! 4. The executor releases the vault and relays funds through random hops

pub mod api;
pub mod config;
pub mod delay;
pub mod executor;
pub mod gate;
pub mod poller;
pub mod pool;
pub mod queue;
pub mod relayers;
pub mod replay;
pub mod settlement;

use std::{sync::Arc, time::Duration};

use shadow_accumulator::DEFAULT_DEPTH;
use shadow_verifier::ProofVerifier;

pub use api::{app_router, AppState};
pub use config::RelayerConfig;
pub use executor::{ExecutionError, Executor};
pub use gate::{GateRejection, ProofGate, VerifiedWithdrawal};
pub use poller::Poller;
pub use pool::{Pool, PoolError, PoolId, PoolRegistry};
pub use queue::{Withdrawal, WithdrawalStatus, WithdrawalStore};
pub use relayers::{Relayer, RelayerPool};
pub use replay::ReplayGuard;
pub use settlement::{Settlement, SettlementError, SolanaSettlement};

/// Tunables that differ between deployments and tests.
#[derive(Clone, Debug)]
pub struct ServiceOptions {
    pub merkle_depth: usize,
    pub max_completed_history: usize,
    pub hop_delay_min: Duration,
    pub hop_delay_max: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            merkle_depth: DEFAULT_DEPTH,
            max_completed_history: queue::DEFAULT_MAX_COMPLETED_HISTORY,
            hop_delay_min: executor::DEFAULT_HOP_DELAY_MIN,
            hop_delay_max: executor::DEFAULT_HOP_DELAY_MAX,
        }
    }
}

impl From<&RelayerConfig> for ServiceOptions {
    fn from(config: &RelayerConfig) -> Self {
        Self {
            merkle_depth: config.merkle_depth,
            max_completed_history: config.max_completed_history,
            hop_delay_min: config.hop_delay_min,
            hop_delay_max: config.hop_delay_max,
        }
    }
}

/// HTTP state and poller wired to the same pools, queue and replay guard.
pub struct RelayService {
    pub state: AppState,
    pub poller: Poller,
}

impl RelayService {
    pub fn new(
        pools: Vec<Pool>,
        relayers: RelayerPool,
        verifier: Arc<dyn ProofVerifier>,
        settlement: Arc<dyn Settlement>,
        options: ServiceOptions,
    ) -> Result<Self, PoolError> {
        let pools = Arc::new(PoolRegistry::new(pools, options.merkle_depth)?);
        let replay = ReplayGuard::new();
        let store = WithdrawalStore::new(options.max_completed_history);

        let gate = ProofGate::new(Arc::clone(&pools), replay.clone(), verifier);
        let executor = Executor::new(
            Arc::clone(&pools),
            relayers.clone(),
            replay.clone(),
            store.clone(),
            settlement,
        )
        .with_hop_delay(options.hop_delay_min, options.hop_delay_max);

        Ok(Self {
            state: AppState::new(pools, relayers, store.clone(), replay, gate),
            poller: Poller::new(store, Arc::new(executor)),
        })
    }
}
