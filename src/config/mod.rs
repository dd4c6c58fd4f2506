//! Configuration management
//!
//! Settings are loaded once (defaults, optional TOML file, `LEDGER_*` environment
//! variables) and passed explicitly into the ledger, the assembler and the scheduler.

pub mod settings;

pub use settings::{
    DeductionConfig, LedgerConfig, MiningConfig, VaultConfig, DATA_DIR_KEY, DIFFICULTY_KEY,
    MAX_DIFFICULTY, MINING_REWARD_KEY,
};
