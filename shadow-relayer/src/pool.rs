//! Fixed-denomination pools and their commitment accumulators.

use std::sync::Mutex;

use shadow_accumulator::{AccumulatorError, Fr, MerkleProof, MerkleTree};
use solana_sdk::{native_token::LAMPORTS_PER_SOL, pubkey::Pubkey};
use thiserror::Error;

pub type PoolId = u8;

/// Pool used when a request does not name one.
pub const DEFAULT_POOL_ID: PoolId = 1;

/// On-chain identity of one pool. Immutable after startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pool {
    pub id: PoolId,
    /// Fixed deposit and withdrawal amount in lamports.
    pub denomination: u64,
    pub account: Pubkey,
    pub vault: Pubkey,
}

impl Pool {
    pub fn denomination_sol(&self) -> f64 {
        lamports_to_sol(self.denomination)
    }

    /// Human label such as `0.1 SOL`.
    pub fn denomination_label(&self) -> String {
        format!("{} SOL", self.denomination_sol())
    }
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("unknown pool {0}")]
    UnknownPool(PoolId),
    #[error(transparent)]
    Accumulator(#[from] AccumulatorError),
}

#[derive(Clone, Debug)]
pub struct DepositReceipt {
    pub index: usize,
    pub root: Fr,
    pub total_deposits: usize,
}

/// Membership path together with the root it folds to.
#[derive(Clone, Debug)]
pub struct PoolPath {
    pub root: Fr,
    pub proof: MerkleProof,
}

struct PoolEntry {
    pool: Pool,
    tree: Mutex<MerkleTree>,
}

/// Every configured pool with its own accumulator, keyed by pool id.
pub struct PoolRegistry {
    entries: Vec<PoolEntry>,
}

impl PoolRegistry {
    pub fn new(pools: Vec<Pool>, depth: usize) -> Result<Self, PoolError> {
        let mut entries = Vec::with_capacity(pools.len());
        for pool in pools {
            entries.push(PoolEntry {
                tree: Mutex::new(MerkleTree::new(depth)?),
                pool,
            });
        }
        entries.sort_by_key(|entry| entry.pool.id);
        Ok(Self { entries })
    }

    fn entry(&self, id: PoolId) -> Result<&PoolEntry, PoolError> {
        self.entries
            .iter()
            .find(|entry| entry.pool.id == id)
            .ok_or(PoolError::UnknownPool(id))
    }

    pub fn get(&self, id: PoolId) -> Option<&Pool> {
        self.entry(id).ok().map(|entry| &entry.pool)
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.entries.iter().map(|entry| &entry.pool)
    }

    pub fn deposit(&self, id: PoolId, commitment: Fr) -> Result<DepositReceipt, PoolError> {
        let entry = self.entry(id)?;
        let mut tree = entry.tree.lock().expect("merkle tree poisoned");
        let index = tree.insert(commitment)?;
        Ok(DepositReceipt {
            index,
            root: tree.root(),
            total_deposits: tree.leaf_count(),
        })
    }

    /// Path for the first leaf equal to `commitment`, or `None` when it was never deposited.
    pub fn merkle_path(&self, id: PoolId, commitment: &Fr) -> Result<Option<PoolPath>, PoolError> {
        let entry = self.entry(id)?;
        let tree = entry.tree.lock().expect("merkle tree poisoned");
        let Some(index) = tree.leaf_index_of(commitment) else {
            return Ok(None);
        };
        Ok(Some(PoolPath {
            root: tree.root(),
            proof: tree.proof(index)?,
        }))
    }

    pub fn is_known_root(&self, id: PoolId, root: &Fr) -> bool {
        match self.entry(id) {
            Ok(entry) => entry
                .tree
                .lock()
                .expect("merkle tree poisoned")
                .is_known_root(root),
            Err(_) => false,
        }
    }

    pub fn deposit_count(&self, id: PoolId) -> usize {
        self.entry(id)
            .map(|entry| entry.tree.lock().expect("merkle tree poisoned").leaf_count())
            .unwrap_or(0)
    }
}
