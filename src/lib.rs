//! # Custody Ledger - Custodial Wallet Ledger on a Proof-of-Work Chain
//!
//! A single-operator ledger that keeps custodial wallet balances as UTXOs and
//! records every movement in hash-linked, proof-of-work sealed blocks.
//!
//! ## What It Does
//! - **UTXO Model**: balances are unspent outputs, claimed by a lock at creation and
//!   by a spend at block commit, so one output can never fund two transfers
//! - **Signed Transfers**: ECDSA P-256 signatures over the transfer payload, with the
//!   signer bound to the sender wallet's registered key
//! - **Block Assembly**: merkle root, leading-zero proof-of-work and an atomic commit
//!   that retries when another assembler moves the tip
//! - **Key Vault**: private keys sealed with AES-256-GCM under an Argon2id key
//! - **Deductions**: a monthly percentage moved to a pool wallet by a scheduled job,
//!   with a per-period record for reporting
//! - **Queries**: transaction lookup, wallet history and chain statistics
//!
//! ## How The Code Is Organized
//! - `core/`: amounts, transactions, blocks, builder, assembler, validator, `Ledger`
//! - `storage/`: the `LedgerStore` contract, sled and in-memory stores, pending pool
//! - `wallet/`: key pairs, signing keys and the key vault
//! - `scheduler/`: recurring task runner and the deduction job
//! - `audit/`: structured audit events and sinks
//! - `config/`: TOML and environment configuration
//! - `utils/`: hashing, signing and serialization helpers
//! - `cli/`: command-line interface

pub mod audit;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod scheduler;
pub mod storage;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for convenience
pub use audit::{AuditEvent, AuditRecord, AuditSink, LogSink, MemorySink};
pub use cli::{Command, Opt};
pub use config::LedgerConfig;
pub use core::{
    merkle_root, Amount, Block, CallerContext, CancellationToken, ChainStatus, InvalidReason,
    Ledger, OutPoint, ProofOfWork, Transaction, TransactionKind,
};
pub use error::{ErrorCategory, LedgerError, Result};
pub use scheduler::{DeductionJob, DeductionReport};
pub use storage::{
    DeductionRecord, LedgerStore, MemoryStore, PendingEntry, PendingStatus, SledStore, Utxo,
};
pub use wallet::{KeyVault, SigningKey, Wallet};
