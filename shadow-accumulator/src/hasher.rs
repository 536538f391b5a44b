//! Two-to-one compression used for every interior node of the tree.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonError, PoseidonHasher as _};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("poseidon: {0}")]
    Poseidon(#[from] PoseidonError),
}

/// Compresses an ordered pair of field elements into one.
pub trait PairHasher {
    fn hash_pair(&mut self, left: &Fr, right: &Fr) -> Result<Fr, HashError>;
}

/// Poseidon with the circomlib parameters for two inputs (t = 3, RF = 8,
/// RP = 57). Matches `circomlibjs.buildPoseidon()([left, right])`.
pub struct PoseidonHasher {
    inner: Poseidon<Fr>,
}

impl PoseidonHasher {
    pub fn new() -> Result<Self, HashError> {
        Ok(Self {
            inner: Poseidon::<Fr>::new_circom(2)?,
        })
    }
}

impl PairHasher for PoseidonHasher {
    fn hash_pair(&mut self, left: &Fr, right: &Fr) -> Result<Fr, HashError> {
        Ok(self.inner.hash(&[*left, *right])?)
    }
}
