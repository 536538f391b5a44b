//! Settlement layer: the vault release and relay-hop transfers.

mod solana;

pub use solana::{release_instruction, SolanaSettlement, RELEASE_DISCRIMINATOR};

use async_trait::async_trait;
use shadow_accumulator::Fr;
use solana_client::client_error::ClientError;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use thiserror::Error;

use crate::{pool::Pool, relayers::Relayer};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("rpc error: {0}")]
    Rpc(#[from] Box<ClientError>),
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

impl From<ClientError> for SettlementError {
    fn from(err: ClientError) -> Self {
        SettlementError::Rpc(Box::new(err))
    }
}

/// Submits and confirms on-chain transactions on behalf of relayers.
#[async_trait]
pub trait Settlement: Send + Sync {
    /// Releases one denomination of `pool` from its vault to `relayer`,
    /// consuming `nullifier_hash` on chain.
    async fn release_from_vault(
        &self,
        pool: &Pool,
        relayer: &Relayer,
        nullifier_hash: &Fr,
    ) -> Result<Signature, SettlementError>;

    /// Plain value transfer signed and paid for by `from`.
    async fn transfer(
        &self,
        from: &Relayer,
        to: &Pubkey,
        lamports: u64,
    ) -> Result<Signature, SettlementError>;
}
