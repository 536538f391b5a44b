// shadow-verifier/src/lib.rs
//
// Groth16 gate for withdrawal proofs produced by snarkjs.

pub mod snarkjs;

use std::{fs, path::Path};

use anyhow::{Context, Result};
use ark_bn254::{Bn254, Fr};
use ark_groth16::{prepare_verifying_key, Groth16, PreparedVerifyingKey, Proof};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use snarkjs::{SnarkjsProof, SnarkjsVerifyingKey};

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("unsupported protocol '{0}', expected groth16")]
    Protocol(String),
    #[error("unsupported curve '{0}', expected bn128")]
    Curve(String),
    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
    #[error("{0} is not a valid curve point")]
    NotOnCurve(&'static str),
    #[error("expected {expected} public signals, got {actual}")]
    Arity { expected: usize, actual: usize },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decides whether a proof is valid for an ordered list of public signals.
///
/// Any decoding failure counts as an invalid proof.
pub trait ProofVerifier: Send + Sync {
    fn verify(&self, proof: &JsonValue, public_signals: &[Fr]) -> bool;
}

/// Groth16 over BN254 with a verifying key fixed at startup.
pub struct Groth16Verifier {
    pvk: PreparedVerifyingKey<Bn254>,
    n_public: usize,
}

impl Groth16Verifier {
    pub fn from_json(bytes: &[u8]) -> Result<Self, VerifierError> {
        let raw: SnarkjsVerifyingKey = serde_json::from_slice(bytes)?;
        let vk = raw.to_verifying_key()?;
        let n_public = vk.gamma_abc_g1.len() - 1;
        Ok(Self {
            pvk: prepare_verifying_key(&vk),
            n_public,
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read verification key at {}", path.display()))?;
        Self::from_json(&bytes)
            .with_context(|| format!("failed to parse verification key at {}", path.display()))
    }

    pub fn public_input_count(&self) -> usize {
        self.n_public
    }

    pub fn verify_parsed(
        &self,
        proof: &Proof<Bn254>,
        public_signals: &[Fr],
    ) -> Result<bool, VerifierError> {
        if public_signals.len() != self.n_public {
            return Err(VerifierError::Arity {
                expected: self.n_public,
                actual: public_signals.len(),
            });
        }
        Groth16::<Bn254>::verify_proof(&self.pvk, proof, public_signals).map_err(|err| {
            VerifierError::Malformed {
                field: "verifying key",
                reason: err.to_string(),
            }
        })
    }

    fn try_verify(&self, proof: &JsonValue, public_signals: &[Fr]) -> Result<bool, VerifierError> {
        let raw: SnarkjsProof = serde_json::from_value(proof.clone())?;
        let proof = raw.to_proof()?;
        self.verify_parsed(&proof, public_signals)
    }
}

impl ProofVerifier for Groth16Verifier {
    fn verify(&self, proof: &JsonValue, public_signals: &[Fr]) -> bool {
        match self.try_verify(proof, public_signals) {
            Ok(valid) => valid,
            Err(err) => {
                tracing::debug!("proof rejected: {}", err);
                false
            }
        }
    }
}
