//! Data storage and persistence
//!
//! Everything the ledger persists goes through [`LedgerStore`]: UTXOs with their lock
//! and spend claims, the block sequence and its tip, pending entries, and wallet records.
//! Two implementations ship: [`MemoryStore`] and the sled-backed [`SledStore`].

pub mod memory;
pub mod pending_pool;
pub mod sled_store;

pub use memory::MemoryStore;
pub use pending_pool::PendingPool;
pub use sled_store::SledStore;

use crate::core::{Amount, Block, OutPoint, Transaction};
use crate::error::Result;
use crate::wallet::SealedKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One spendable (or spent) output and its claim state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Utxo {
    pub tx_id: String,
    pub output_index: u32,
    pub owner_wallet_id: String,
    pub amount: Amount,
    pub spent: bool,
    pub spent_in_tx: Option<String>,
    pub locked: bool,
    pub locked_by: Option<String>,
    pub origin_block_index: u64,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_id.clone(), self.output_index)
    }

    pub fn key(&self) -> String {
        self.outpoint().key()
    }

    /// Unspent and not claimed by any in-flight transaction
    pub fn is_available(&self) -> bool {
        !self.spent && !self.locked
    }

    /// May `tx_id` spend this output inside a block? Only the holder of the lock taken
    /// when the transaction was built can.
    pub fn spendable_by(&self, tx_id: &str) -> bool {
        !self.spent && self.locked && self.locked_by.as_deref() == Some(tx_id)
    }

    /// Store order: oldest block first, then by outpoint.
    pub fn sort_key(&self) -> (u64, &str, u32) {
        (
            self.origin_block_index,
            self.tx_id.as_str(),
            self.output_index,
        )
    }
}

/// UTXOs created by `tx` once it lands in block `block_index`
pub fn utxos_from_outputs(tx: &Transaction, block_index: u64) -> Vec<Utxo> {
    tx.get_outputs()
        .iter()
        .enumerate()
        .map(|(idx, output)| Utxo {
            tx_id: tx.get_id().to_string(),
            output_index: idx as u32,
            owner_wallet_id: output.get_owner_wallet_id().to_string(),
            amount: output.get_value(),
            spent: false,
            spent_in_tx: None,
            locked: false,
            locked_by: None,
            origin_block_index: block_index,
        })
        .collect()
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Mining,
    Mined,
    Failed,
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Mining => "mining",
            PendingStatus::Mined => "mined",
            PendingStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A signed transaction waiting for a block; `id` equals the transaction id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct PendingEntry {
    pub id: String,
    pub transaction: Transaction,
    pub created_at: i64,
    pub status: PendingStatus,
}

impl PendingEntry {
    pub fn new(transaction: Transaction, created_at: i64) -> PendingEntry {
        PendingEntry {
            id: transaction.get_id().to_string(),
            transaction,
            created_at,
            status: PendingStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct WalletRecord {
    pub wallet_id: String,
    pub public_key: Vec<u8>,
    pub created_at: i64,
    /// Custodial private key; `None` for ledger-owned wallets such as the deduction pool
    pub sealed_key: Option<SealedKey>,
    /// Last period (`YYYY-MM`) in which a deduction was taken
    pub last_deduction_period: Option<String>,
}

/// One wallet's deduction for one period, kept for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct DeductionRecord {
    pub period: String,
    pub wallet_id: String,
    pub tx_id: String,
    pub amount: Amount,
    /// Spendable balance the amount was computed from
    pub balance_at_deduction: Amount,
    pub created_at: i64,
}

impl DeductionRecord {
    /// `period:wallet_id`, so records of one period sort together
    pub fn key(&self) -> String {
        format!("{}:{}", self.period, self.wallet_id)
    }
}

/// Result of an atomic block commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Another block was appended first; nothing was written
    TipMoved { current_tip_hash: String },
    /// An input is missing, spent, or not locked by its spender; nothing was written
    InputConflict { tx_id: String, outpoint: OutPoint },
    /// An output the block would create already exists; nothing was written
    OutputExists { tx_id: String, outpoint: OutPoint },
}

/// Persistence contract consumed by the ledger
///
/// `conditional_lock`, `conditional_mark_spent` and `commit_block` must be atomic: of two
/// concurrent callers racing for the same key, exactly one observes success.
pub trait LedgerStore: Send + Sync {
    /// Unspent, unlocked outputs of `wallet_id` in store order
    fn find_unspent_unlocked(&self, wallet_id: &str) -> Result<Vec<Utxo>>;
    /// Unspent outputs of `wallet_id` (locked or not) in store order
    fn find_unspent(&self, wallet_id: &str) -> Result<Vec<Utxo>>;
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>>;

    /// Lock the output for `locker_id` only if it is unspent and unlocked
    fn conditional_lock(&self, outpoint: &OutPoint, locker_id: &str) -> Result<bool>;
    fn unlock(&self, outpoint: &OutPoint) -> Result<()>;
    /// Release every lock held by `locker_id`; returns how many were released
    fn unlock_by_locker(&self, locker_id: &str) -> Result<usize>;
    /// Mark the output spent only if it is not already spent
    fn conditional_mark_spent(&self, outpoint: &OutPoint, spending_tx_id: &str) -> Result<bool>;

    fn create_utxos_from_outputs(&self, tx: &Transaction, block_index: u64) -> Result<()>;
    /// Remove every output created by `tx_id`; returns how many were removed
    fn delete_utxos_by_tx(&self, tx_id: &str) -> Result<usize>;

    /// Append only if the current tip hash equals `expected_prev_hash`
    fn append_block_if_tip_matches(&self, block: &Block, expected_prev_hash: &str)
        -> Result<bool>;
    /// Append the block, spend its inputs, create its outputs and mark its pending
    /// entries mined, all or nothing. Every input must be locked by the transaction
    /// spending it, and no created output may already exist.
    fn commit_block(&self, block: &Block, expected_prev_hash: &str) -> Result<CommitOutcome>;
    /// Store `genesis` if the chain is empty; returns the block at index 0
    fn ensure_genesis(&self, genesis: &Block) -> Result<Block>;
    fn get_tip(&self) -> Result<Option<Block>>;
    fn get_all_blocks(&self) -> Result<Vec<Block>>;
    fn get_block(&self, index: u64) -> Result<Option<Block>>;

    /// Insert only if no entry with the same id exists
    fn insert_pending_entry(&self, entry: &PendingEntry) -> Result<bool>;
    fn upsert_pending_entry(&self, entry: &PendingEntry) -> Result<()>;
    /// Move an entry from `from` to `to`; false if it is missing or in another state
    fn transition_pending_status(
        &self,
        id: &str,
        from: PendingStatus,
        to: PendingStatus,
    ) -> Result<bool>;
    fn delete_pending_entry(&self, id: &str) -> Result<bool>;
    fn get_pending_entry(&self, id: &str) -> Result<Option<PendingEntry>>;
    /// Entries oldest first; all of them when `status` is `None`
    fn list_pending_entries(&self, status: Option<PendingStatus>) -> Result<Vec<PendingEntry>>;

    /// Insert only if the wallet id is new
    fn register_wallet(&self, record: &WalletRecord) -> Result<bool>;
    fn get_wallet(&self, wallet_id: &str) -> Result<Option<WalletRecord>>;
    fn update_wallet(&self, record: &WalletRecord) -> Result<()>;
    fn list_wallets(&self) -> Result<Vec<WalletRecord>>;

    /// Insert only if the wallet has no record for that period yet
    fn insert_deduction_record(&self, record: &DeductionRecord) -> Result<bool>;
    /// Records ordered by period then wallet; all periods when `period` is `None`
    fn list_deduction_records(&self, period: Option<&str>) -> Result<Vec<DeductionRecord>>;
}

fn sort_utxos(utxos: &mut [Utxo]) {
    utxos.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

fn sort_pending(entries: &mut [PendingEntry]) {
    entries.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
