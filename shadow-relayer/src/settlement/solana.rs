use async_trait::async_trait;
use shadow_accumulator::{field_to_be_bytes, Fr};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_instruction, system_program,
    transaction::Transaction,
};

use super::{Settlement, SettlementError};
use crate::{pool::Pool, relayers::Relayer};

/// Selects the vault-release handler of the pool program.
pub const RELEASE_DISCRIMINATOR: [u8; 8] = [183, 18, 70, 156, 148, 109, 161, 34];

/// Vault release: discriminator followed by the 32-byte big-endian nullifier hash.
pub fn release_instruction(
    program_id: &Pubkey,
    pool: &Pool,
    relayer: &Pubkey,
    nullifier_hash: &Fr,
) -> Instruction {
    let mut data = Vec::with_capacity(RELEASE_DISCRIMINATOR.len() + 32);
    data.extend_from_slice(&RELEASE_DISCRIMINATOR);
    data.extend_from_slice(&field_to_be_bytes(nullifier_hash));

    Instruction::new_with_bytes(
        *program_id,
        &data,
        vec![
            AccountMeta::new(pool.account, false),
            AccountMeta::new(pool.vault, false),
            AccountMeta::new(*relayer, false),
            AccountMeta::new(*relayer, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

pub struct SolanaSettlement {
    rpc: RpcClient,
    program_id: Pubkey,
}

impl SolanaSettlement {
    pub fn new(rpc_url: String, program_id: Pubkey) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed()),
            program_id,
        }
    }

    /// Fetches a fresh blockhash, signs with `signer` as fee payer, then sends and confirms.
    async fn submit(
        &self,
        instruction: Instruction,
        signer: &Keypair,
    ) -> Result<Signature, SettlementError> {
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&signer.pubkey()),
            &[signer],
            blockhash,
        );
        let signature = self.rpc.send_and_confirm_transaction(&tx).await?;
        Ok(signature)
    }
}

#[async_trait]
impl Settlement for SolanaSettlement {
    async fn release_from_vault(
        &self,
        pool: &Pool,
        relayer: &Relayer,
        nullifier_hash: &Fr,
    ) -> Result<Signature, SettlementError> {
        let instruction =
            release_instruction(&self.program_id, pool, &relayer.pubkey(), nullifier_hash);
        self.submit(instruction, relayer.keypair()).await
    }

    async fn transfer(
        &self,
        from: &Relayer,
        to: &Pubkey,
        lamports: u64,
    ) -> Result<Signature, SettlementError> {
        let instruction = system_instruction::transfer(&from.pubkey(), to, lamports);
        self.submit(instruction, from.keypair()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_instruction_layout() {
        let program_id = Pubkey::new_unique();
        let pool = Pool {
            id: 1,
            denomination: 1_000_000_000,
            account: Pubkey::new_unique(),
            vault: Pubkey::new_unique(),
        };
        let relayer = Pubkey::new_unique();
        let ix = release_instruction(&program_id, &pool, &relayer, &Fr::from(258u64));

        assert_eq!(ix.program_id, program_id);
        assert_eq!(ix.data.len(), 40);
        assert_eq!(&ix.data[..8], &RELEASE_DISCRIMINATOR);
        assert!(ix.data[8..38].iter().all(|b| *b == 0));
        assert_eq!(&ix.data[38..], &[1, 2]);

        let metas: Vec<_> = ix
            .accounts
            .iter()
            .map(|m| (m.pubkey, m.is_signer, m.is_writable))
            .collect();
        assert_eq!(
            metas,
            vec![
                (pool.account, false, true),
                (pool.vault, false, true),
                (relayer, false, true),
                (relayer, true, true),
                (system_program::id(), false, false),
            ]
        );
    }
}
