//! Relayer configuration.

use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use shadow_accumulator::DEFAULT_DEPTH;
use solana_sdk::{native_token::LAMPORTS_PER_SOL, pubkey::Pubkey};

use crate::{
    executor::{DEFAULT_HOP_DELAY_MAX, DEFAULT_HOP_DELAY_MIN},
    poller::DEFAULT_POLL_INTERVAL,
    pool::{Pool, PoolId},
    queue::DEFAULT_MAX_COMPLETED_HISTORY,
};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3002";
pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
pub const DEFAULT_PROGRAM_ID: &str = "2PcmHz9KZ3RMwru56PthFJx7vyxe7cqJUgaE7QBFKvc4";
pub const DEFAULT_VERIFICATION_KEY: &str = "./zk/verification_key.json";
pub const DEFAULT_WALLET_DIR: &str = "./wallets";
pub const DEFAULT_RELAYER_COUNT: usize = 5;

/// (id, denomination in lamports, pool account, vault account)
const DEFAULT_POOLS: [(PoolId, u64, &str, &str); 3] = [
    (
        0,
        LAMPORTS_PER_SOL / 10,
        "83SKixTFPBaENxEGhWSiSmxRHmTkXDWEJbfUt8iaSL8t",
        "7Z7Tzi5mecDXsXyFVZMiCjYkbLBnZJyb1pVo5q7EchNX",
    ),
    (
        1,
        LAMPORTS_PER_SOL,
        "34LMAtaxeTuiXAri9fH7jf1XUHjKhH51oZDoFfACgDw9",
        "35vdWyyLuthLWgLLZTksFyBZ7kGdVzW8zgXXtk54Rvms",
    ),
    (
        2,
        10 * LAMPORTS_PER_SOL,
        "cGhg9GRPoH3rfdiFiWQesPPGftbHQCLStQNM7yWrkRY",
        "2iWRhhSTmdxacoAAfzrfrUuntKT2CucNneX36FowYWvR",
    ),
];

/// Relayer configuration.
#[derive(Clone, Debug)]
pub struct RelayerConfig {
    /// HTTP bind address.
    pub listen_addr: SocketAddr,
    /// Solana JSON-RPC endpoint.
    pub rpc_url: String,
    /// Pool program that owns the vaults.
    pub program_id: Pubkey,
    /// snarkjs `verification_key.json`.
    pub verification_key_path: PathBuf,
    /// Directory holding `relayer<i>.json` keypairs.
    pub wallet_dir: PathBuf,
    /// Number of relayer key files probed.
    pub relayer_count: usize,
    pub poll_interval: Duration,
    pub hop_delay_min: Duration,
    pub hop_delay_max: Duration,
    pub max_completed_history: usize,
    pub merkle_depth: usize,
    pub pools: Vec<Pool>,
}

impl RelayerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`RelayerConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = parse_var(&lookup, "SHADOW_LISTEN_ADDR", DEFAULT_LISTEN_ADDR)?;
        let rpc_url = lookup("SHADOW_RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        let program_id = parse_var(&lookup, "SHADOW_PROGRAM_ID", DEFAULT_PROGRAM_ID)?;

        let verification_key_path = lookup("SHADOW_VERIFICATION_KEY")
            .unwrap_or_else(|| DEFAULT_VERIFICATION_KEY.to_string())
            .into();
        let wallet_dir = lookup("SHADOW_WALLET_DIR")
            .unwrap_or_else(|| DEFAULT_WALLET_DIR.to_string())
            .into();

        let relayer_count = parse_var(
            &lookup,
            "SHADOW_RELAYER_COUNT",
            &DEFAULT_RELAYER_COUNT.to_string(),
        )?;
        let poll_interval_secs: u64 = parse_var(
            &lookup,
            "SHADOW_POLL_INTERVAL_SECS",
            &DEFAULT_POLL_INTERVAL.as_secs().to_string(),
        )?;
        if poll_interval_secs == 0 {
            bail!("SHADOW_POLL_INTERVAL_SECS must be at least 1");
        }

        let hop_delay_min_ms: u64 = parse_var(
            &lookup,
            "SHADOW_HOP_DELAY_MIN_MS",
            &DEFAULT_HOP_DELAY_MIN.as_millis().to_string(),
        )?;
        let hop_delay_max_ms: u64 = parse_var(
            &lookup,
            "SHADOW_HOP_DELAY_MAX_MS",
            &DEFAULT_HOP_DELAY_MAX.as_millis().to_string(),
        )?;
        if hop_delay_min_ms > hop_delay_max_ms {
            bail!(
                "SHADOW_HOP_DELAY_MIN_MS ({}) exceeds SHADOW_HOP_DELAY_MAX_MS ({})",
                hop_delay_min_ms,
                hop_delay_max_ms
            );
        }

        let max_completed_history = parse_var(
            &lookup,
            "SHADOW_MAX_COMPLETED_HISTORY",
            &DEFAULT_MAX_COMPLETED_HISTORY.to_string(),
        )?;

        let pools = DEFAULT_POOLS
            .iter()
            .map(|(id, denomination, account, vault)| -> Result<Pool> {
                Ok(Pool {
                    id: *id,
                    denomination: *denomination,
                    account: parse_var(&lookup, &format!("SHADOW_POOL_{}_ACCOUNT", id), account)?,
                    vault: parse_var(&lookup, &format!("SHADOW_POOL_{}_VAULT", id), vault)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            listen_addr,
            rpc_url,
            program_id,
            verification_key_path,
            wallet_dir,
            relayer_count,
            poll_interval: Duration::from_secs(poll_interval_secs),
            hop_delay_min: Duration::from_millis(hop_delay_min_ms),
            hop_delay_max: Duration::from_millis(hop_delay_max_ms),
            max_completed_history,
            merkle_depth: DEFAULT_DEPTH,
            pools,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("{} has an invalid value '{}'", key, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Result<RelayerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let config = config_with(&[]).unwrap();
        assert_eq!(config.listen_addr.port(), 3002);
        assert_eq!(config.program_id.to_string(), DEFAULT_PROGRAM_ID);
        assert_eq!(config.relayer_count, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.hop_delay_min, Duration::from_millis(2_000));
        assert_eq!(config.hop_delay_max, Duration::from_millis(5_000));
        assert_eq!(config.merkle_depth, 20);

        let denominations: Vec<_> = config.pools.iter().map(|p| p.denomination).collect();
        assert_eq!(
            denominations,
            vec![100_000_000, 1_000_000_000, 10_000_000_000]
        );
        assert_eq!(
            config.pools[1].vault.to_string(),
            "35vdWyyLuthLWgLLZTksFyBZ7kGdVzW8zgXXtk54Rvms"
        );
    }

    #[test]
    fn overrides_are_applied() {
        let vault = Pubkey::new_unique();
        let config = config_with(&[
            ("SHADOW_LISTEN_ADDR", "127.0.0.1:8080"),
            ("SHADOW_RELAYER_COUNT", "2"),
            ("SHADOW_HOP_DELAY_MIN_MS", "0"),
            ("SHADOW_HOP_DELAY_MAX_MS", "10"),
            ("SHADOW_POOL_2_VAULT", &vault.to_string()),
        ])
        .unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.relayer_count, 2);
        assert_eq!(config.hop_delay_max, Duration::from_millis(10));
        assert_eq!(config.pools[2].vault, vault);
    }

    #[test]
    fn invalid_values_are_startup_errors() {
        assert!(config_with(&[("SHADOW_PROGRAM_ID", "not-a-key")]).is_err());
        assert!(config_with(&[("SHADOW_POOL_0_ACCOUNT", "xyz")]).is_err());
        assert!(config_with(&[("SHADOW_RELAYER_COUNT", "five")]).is_err());
        assert!(config_with(&[("SHADOW_POLL_INTERVAL_SECS", "0")]).is_err());
        assert!(config_with(&[
            ("SHADOW_HOP_DELAY_MIN_MS", "6000"),
            ("SHADOW_HOP_DELAY_MAX_MS", "5000"),
        ])
        .is_err());
    }
}
