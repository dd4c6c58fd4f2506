//! Error handling for the ledger engine
//!
//! Every fallible operation in the crate returns [`LedgerError`]. Variants are grouped
//! into categories so callers (HTTP layer, scheduler) can decide whether a failure is
//! worth resubmitting.

use crate::core::Amount;
use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Broad classes of failure, used by callers to pick a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input; rejected synchronously and never retried.
    Validation,
    /// Lost a race for a UTXO, the chain tip or a job slot; the caller may resubmit.
    Contention,
    /// Signature or key material problems; fatal to the attempt.
    Cryptographic,
    /// No block was produced; pending entries stay pending.
    Mining,
    /// Storage, serialization, configuration or I/O failures.
    Internal,
}

#[derive(Debug, Clone)]
pub enum LedgerError {
    /// Database-related errors
    Database(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Key vault sealing/opening errors
    Encryption(String),
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
    /// Unknown sender or receiver wallet
    WalletNotFound(String),
    /// Zero, unparsable or overflowing amount
    InvalidAmount(String),
    /// Sender and receiver are the same wallet
    SelfTransfer(String),
    /// Not enough unspent, unlocked value to cover the amount
    InsufficientFunds { required: Amount, available: Amount },
    /// A pending entry with the same id already exists
    DuplicateTransaction(String),
    /// No pending entry with this id
    TransactionNotFound(String),
    /// Outputs, id or kind do not match what the transaction claims to do
    MalformedTransaction { tx_id: String, reason: String },
    /// Signing failed or the signature did not verify against the stored key
    SignatureError(String),
    /// A transaction's signature failed re-verification
    InvalidSignature { tx_id: String },
    /// A UTXO claim was lost to a concurrent transaction
    LockConflict { tx_id: String, outpoint: String },
    /// An input is already spent, missing, or referenced twice
    DoubleSpend { tx_id: String, outpoint: String },
    /// Every pending entry failed validation
    NoValidTransactions,
    /// Proof-of-work stopped before finding a hash
    MiningInterrupted(String),
    /// The chain tip kept moving while this assembler was mining
    TipContention { attempts: u32 },
    /// A singleton job is already running
    JobAlreadyRunning(String),
}

impl LedgerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LedgerError::WalletNotFound(_)
            | LedgerError::InvalidAmount(_)
            | LedgerError::SelfTransfer(_)
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::DuplicateTransaction(_)
            | LedgerError::TransactionNotFound(_)
            | LedgerError::MalformedTransaction { .. } => ErrorCategory::Validation,
            LedgerError::LockConflict { .. }
            | LedgerError::DoubleSpend { .. }
            | LedgerError::TipContention { .. }
            | LedgerError::JobAlreadyRunning(_) => ErrorCategory::Contention,
            LedgerError::SignatureError(_)
            | LedgerError::InvalidSignature { .. }
            | LedgerError::Crypto(_)
            | LedgerError::Encryption(_) => ErrorCategory::Cryptographic,
            LedgerError::NoValidTransactions | LedgerError::MiningInterrupted(_) => {
                ErrorCategory::Mining
            }
            LedgerError::Database(_)
            | LedgerError::Serialization(_)
            | LedgerError::Config(_)
            | LedgerError::Io(_) => ErrorCategory::Internal,
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Database(msg) => write!(f, "Database error: {msg}"),
            LedgerError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            LedgerError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            LedgerError::Encryption(msg) => write!(f, "Encryption error: {msg}"),
            LedgerError::Config(msg) => write!(f, "Configuration error: {msg}"),
            LedgerError::Io(msg) => write!(f, "I/O error: {msg}"),
            LedgerError::WalletNotFound(id) => write!(f, "Wallet not found: {id}"),
            LedgerError::InvalidAmount(msg) => write!(f, "Invalid amount: {msg}"),
            LedgerError::SelfTransfer(id) => {
                write!(f, "Sender and receiver are the same wallet: {id}")
            }
            LedgerError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            LedgerError::DuplicateTransaction(id) => {
                write!(f, "Transaction already pending: {id}")
            }
            LedgerError::TransactionNotFound(id) => write!(f, "Transaction not found: {id}"),
            LedgerError::MalformedTransaction { tx_id, reason } => {
                write!(f, "Malformed transaction {tx_id}: {reason}")
            }
            LedgerError::SignatureError(msg) => write!(f, "Signature error: {msg}"),
            LedgerError::InvalidSignature { tx_id } => {
                write!(f, "Invalid transaction signature: {tx_id}")
            }
            LedgerError::LockConflict { tx_id, outpoint } => {
                write!(f, "UTXO {outpoint} already claimed, transaction {tx_id} rejected")
            }
            LedgerError::DoubleSpend { tx_id, outpoint } => {
                write!(f, "Double spend of {outpoint} in transaction {tx_id}")
            }
            LedgerError::NoValidTransactions => write!(f, "No valid transactions to mine"),
            LedgerError::MiningInterrupted(msg) => write!(f, "Mining interrupted: {msg}"),
            LedgerError::TipContention { attempts } => {
                write!(f, "Chain tip moved during {attempts} assembly attempts")
            }
            LedgerError::JobAlreadyRunning(name) => write!(f, "Job already running: {name}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for LedgerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for LedgerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            LedgerError::InvalidAmount("0".to_string()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            LedgerError::LockConflict {
                tx_id: "t".to_string(),
                outpoint: "o:0".to_string()
            }
            .category(),
            ErrorCategory::Contention
        );
        assert_eq!(
            LedgerError::InvalidSignature {
                tx_id: "t".to_string()
            }
            .category(),
            ErrorCategory::Cryptographic
        );
        assert_eq!(
            LedgerError::NoValidTransactions.category(),
            ErrorCategory::Mining
        );
        assert_eq!(
            LedgerError::Database("x".to_string()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_insufficient_funds_display() {
        let err = LedgerError::InsufficientFunds {
            required: Amount::from_units(4_000_000_000),
            available: Amount::from_units(100_000_000),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: required 40.00000000, available 1.00000000"
        );
    }
}
