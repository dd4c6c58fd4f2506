use crate::core::Amount;
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Deserializer};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
pub const DIFFICULTY_KEY: &str = "LEDGER_DIFFICULTY";
pub const MINING_REWARD_KEY: &str = "LEDGER_MINING_REWARD";

/// Hex digits in a SHA-256 hash; no difficulty above this can ever be met
pub const MAX_DIFFICULTY: u32 = 64;

static DEFAULT_DATA_DIR: &str = "data";
static DEFAULT_POOL_WALLET: &str = "deduction_pool";

/// Immutable settings handed to every component at construction time
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub data_dir: PathBuf,
    pub mining: MiningConfig,
    pub deduction: DeductionConfig,
    pub vault: VaultConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Leading zero hex characters required of a block hash
    pub difficulty: u32,
    /// Paid to the miner wallet in every block; zero disables the reward
    #[serde(deserialize_with = "amount_from_str")]
    pub reward: Amount,
    pub max_nonce: u64,
    /// Nonces tried between two checks of the abort predicate
    pub abort_check_interval: u64,
    pub max_assembly_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeductionConfig {
    /// 250 basis points = 2.5% of the balance
    pub rate_bps: u64,
    pub pool_wallet_id: String,
    /// Deductions below this amount are skipped
    #[serde(deserialize_with = "amount_from_str")]
    pub min_amount: Amount,
    /// How often the scheduler wakes up to check whether a run is due
    pub interval_secs: u64,
    pub day_of_month: u32,
    pub hour: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Argon2id memory cost
    pub memory_kib: u32,
    /// Argon2id time cost
    pub iterations: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            mining: MiningConfig::default(),
            deduction: DeductionConfig::default(),
            vault: VaultConfig::default(),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        MiningConfig {
            difficulty: 4,
            reward: Amount::ZERO,
            max_nonce: u64::MAX,
            abort_check_interval: 1024,
            max_assembly_attempts: 5,
        }
    }
}

impl Default for DeductionConfig {
    fn default() -> Self {
        DeductionConfig {
            rate_bps: 250,
            pool_wallet_id: DEFAULT_POOL_WALLET.to_string(),
            min_amount: Amount::from_units(1_000_000),
            interval_secs: 86_400,
            day_of_month: 1,
            hour: 0,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        VaultConfig {
            memory_kib: 65_536,
            iterations: 3,
        }
    }
}

impl LedgerConfig {
    /// Defaults, then the optional TOML file, then `LEDGER_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<LedgerConfig> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| {
                    LedgerError::Config(format!("Failed to read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&raw)?
            }
            None => LedgerConfig::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<LedgerConfig> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(difficulty) = lookup(DIFFICULTY_KEY) {
            self.mining.difficulty = difficulty.trim().parse().map_err(|e| {
                LedgerError::Config(format!("{DIFFICULTY_KEY}='{difficulty}': {e}"))
            })?;
        }
        if let Some(reward) = lookup(MINING_REWARD_KEY) {
            self.mining.reward = Amount::parse(&reward)
                .map_err(|e| LedgerError::Config(format!("{MINING_REWARD_KEY}: {e}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mining.difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::Config(format!(
                "mining.difficulty must be at most {MAX_DIFFICULTY}, got {}",
                self.mining.difficulty
            )));
        }
        if self.mining.abort_check_interval == 0 {
            return Err(LedgerError::Config(
                "mining.abort_check_interval must be positive".to_string(),
            ));
        }
        if self.mining.max_assembly_attempts == 0 {
            return Err(LedgerError::Config(
                "mining.max_assembly_attempts must be positive".to_string(),
            ));
        }
        if self.deduction.rate_bps > crate::core::monetary::BPS_DENOMINATOR {
            return Err(LedgerError::Config(format!(
                "deduction.rate_bps must be at most 10000, got {}",
                self.deduction.rate_bps
            )));
        }
        if self.deduction.pool_wallet_id.trim().is_empty() {
            return Err(LedgerError::Config(
                "deduction.pool_wallet_id must not be empty".to_string(),
            ));
        }
        if !(1..=28).contains(&self.deduction.day_of_month) {
            return Err(LedgerError::Config(format!(
                "deduction.day_of_month must be within 1..=28, got {}",
                self.deduction.day_of_month
            )));
        }
        if self.deduction.hour > 23 {
            return Err(LedgerError::Config(format!(
                "deduction.hour must be within 0..=23, got {}",
                self.deduction.hour
            )));
        }
        if self.deduction.interval_secs == 0 {
            return Err(LedgerError::Config(
                "deduction.interval_secs must be positive".to_string(),
            ));
        }
        if self.vault.memory_kib < 8 || self.vault.iterations == 0 {
            return Err(LedgerError::Config(
                "vault.memory_kib must be at least 8 and vault.iterations positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Location of the sled database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }
}

fn amount_from_str<'de, D>(deserializer: D) -> std::result::Result<Amount, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Amount::parse(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.mining.difficulty, 4);
        assert_eq!(config.mining.reward, Amount::ZERO);
        assert_eq!(config.deduction.rate_bps, 250);
        assert_eq!(config.deduction.pool_wallet_id, "deduction_pool");
        assert_eq!(config.deduction.min_amount.to_string(), "0.01000000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LedgerConfig::from_toml_str(
            r#"
            data_dir = "/var/lib/ledger"

            [mining]
            difficulty = 2
            reward = "1.5"

            [deduction]
            pool_wallet_id = "charity"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/ledger"));
        assert_eq!(config.mining.difficulty, 2);
        assert_eq!(config.mining.reward, Amount::from_units(150_000_000));
        assert_eq!(config.mining.max_assembly_attempts, 5);
        assert_eq!(config.deduction.pool_wallet_id, "charity");
        assert_eq!(config.deduction.rate_bps, 250);
        assert_eq!(config.vault, VaultConfig::default());
    }

    #[test]
    fn test_bad_reward_is_config_error() {
        let result = LedgerConfig::from_toml_str("[mining]\nreward = \"-1\"\n");
        assert!(matches!(result, Err(LedgerError::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (DATA_DIR_KEY, "/tmp/ledger"),
            (DIFFICULTY_KEY, "3"),
            (MINING_REWARD_KEY, "50"),
        ]);
        let mut config = LedgerConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/ledger"));
        assert_eq!(config.mining.difficulty, 3);
        assert_eq!(config.mining.reward, Amount::from_coins(50).unwrap());
    }

    #[test]
    fn test_invalid_override() {
        let mut config = LedgerConfig::default();
        let result = config.apply_overrides(|key| {
            (key == DIFFICULTY_KEY).then(|| "hard".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_impossible_values() {
        let mut config = LedgerConfig::default();
        config.mining.difficulty = 65;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.deduction.day_of_month = 31;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.mining.abort_check_interval = 0;
        assert!(config.validate().is_err());
    }
}
