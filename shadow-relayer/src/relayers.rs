//! Static pool of relayer identities loaded at startup.

use std::{fmt, path::Path, sync::Arc};

use anyhow::{anyhow, Result};
use rand::{seq::SliceRandom, Rng};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signer},
};

/// One relay identity: a numeric id and the keypair that signs its transfers.
pub struct Relayer {
    pub id: usize,
    keypair: Keypair,
}

impl Relayer {
    pub fn new(id: usize, keypair: Keypair) -> Self {
        Self { id, keypair }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl fmt::Debug for Relayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relayer")
            .field("id", &self.id)
            .field("pubkey", &self.pubkey())
            .finish()
    }
}

/// Read-only after startup; shared freely between concurrent withdrawals.
#[derive(Clone, Debug, Default)]
pub struct RelayerPool {
    relayers: Arc<Vec<Arc<Relayer>>>,
}

impl RelayerPool {
    pub fn new(relayers: Vec<Relayer>) -> Self {
        Self {
            relayers: Arc::new(relayers.into_iter().map(Arc::new).collect()),
        }
    }

    /// Loads `relayer1.json ..= relayer{count}.json` from `dir`.
    ///
    /// Missing files are skipped; a file that exists but does not hold a
    /// keypair is an error.
    pub fn load_dir(dir: &Path, count: usize) -> Result<Self> {
        let mut relayers = Vec::new();
        for id in 1..=count {
            let path = dir.join(format!("relayer{}.json", id));
            if !path.exists() {
                tracing::warn!("relayer key {} not found, skipping", path.display());
                continue;
            }
            let keypair = read_keypair_file(&path)
                .map_err(|err| anyhow!("failed to read relayer key {}: {}", path.display(), err))?;
            tracing::info!("loaded relayer #{} ({})", id, keypair.pubkey());
            relayers.push(Relayer::new(id, keypair));
        }
        Ok(Self::new(relayers))
    }

    pub fn len(&self) -> usize {
        self.relayers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relayers.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<Arc<Relayer>> {
        self.relayers.iter().find(|r| r.id == id).cloned()
    }

    /// Uniformly random relayer, `None` when the pool is empty.
    pub fn choose_primary<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<Relayer>> {
        self.relayers.choose(rng).cloned()
    }

    /// Up to `count` distinct relayers other than `exclude`, in random order.
    pub fn sample_hops<R: Rng + ?Sized>(
        &self,
        exclude: usize,
        count: usize,
        rng: &mut R,
    ) -> Vec<Arc<Relayer>> {
        let candidates: Vec<&Arc<Relayer>> =
            self.relayers.iter().filter(|r| r.id != exclude).collect();
        candidates
            .choose_multiple(rng, count)
            .map(|r| Arc::clone(r))
            .collect()
    }
}
