//! Proof verification gate: known root, fresh nullifier, valid proof, in that order.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use shadow_accumulator::{abbreviate_field, Fr};
use shadow_verifier::ProofVerifier;
use thiserror::Error;

use crate::{
    pool::{PoolId, PoolRegistry},
    replay::ReplayGuard,
};

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum GateRejection {
    #[error("Unknown Merkle root")]
    UnknownRoot,
    #[error("Nullifier already used")]
    NullifierUsed,
    #[error("Invalid ZK proof")]
    InvalidProof,
}

/// A withdrawal that passed every check. Its nullifier is reserved in the
/// replay guard until the executor either consumes or releases it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedWithdrawal {
    pub pool_id: PoolId,
    pub root: Fr,
    pub nullifier_hash: Fr,
}

#[derive(Clone)]
pub struct ProofGate {
    pools: Arc<PoolRegistry>,
    replay: ReplayGuard,
    verifier: Arc<dyn ProofVerifier>,
}

impl ProofGate {
    pub fn new(pools: Arc<PoolRegistry>, replay: ReplayGuard, verifier: Arc<dyn ProofVerifier>) -> Self {
        Self {
            pools,
            replay,
            verifier,
        }
    }

    /// `public_signals` is `[root, nullifierHash, ...]`.
    pub async fn check(
        &self,
        pool_id: PoolId,
        proof: JsonValue,
        public_signals: Vec<Fr>,
    ) -> Result<VerifiedWithdrawal, GateRejection> {
        let (root, nullifier_hash) = match public_signals.as_slice() {
            [root, nullifier, ..] => (*root, *nullifier),
            _ => return Err(GateRejection::InvalidProof),
        };

        if !self.pools.is_known_root(pool_id, &root) {
            tracing::info!(
                pool = pool_id,
                "rejected withdrawal: unknown root {}",
                abbreviate_field(&root)
            );
            return Err(GateRejection::UnknownRoot);
        }

        if self.replay.is_blocked(&nullifier_hash) {
            tracing::warn!(
                pool = pool_id,
                "rejected withdrawal: nullifier {} already used",
                abbreviate_field(&nullifier_hash)
            );
            return Err(GateRejection::NullifierUsed);
        }

        let verifier = Arc::clone(&self.verifier);
        let valid = tokio::task::spawn_blocking(move || verifier.verify(&proof, &public_signals))
            .await
            .unwrap_or_else(|err| {
                tracing::warn!("proof verification task failed: {}", err);
                false
            });
        if !valid {
            tracing::info!(pool = pool_id, "rejected withdrawal: invalid proof");
            return Err(GateRejection::InvalidProof);
        }

        // A concurrent request with the same nullifier may have passed the
        // check above while this proof was being verified.
        if self.replay.try_reserve(nullifier_hash).is_err() {
            tracing::warn!(
                pool = pool_id,
                "rejected withdrawal: nullifier {} reserved concurrently",
                abbreviate_field(&nullifier_hash)
            );
            return Err(GateRejection::NullifierUsed);
        }

        Ok(VerifiedWithdrawal {
            pool_id,
            root,
            nullifier_hash,
        })
    }
}
