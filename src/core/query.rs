// Read-side views over the chain and the pending pool: where a transaction stands, what a
// wallet sent and received, and chain-wide counts

use crate::core::{Amount, Block, Transaction, TransactionKind};
use crate::storage::{DeductionRecord, PendingEntry, PendingStatus};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Mining,
    Failed,
    Confirmed { block_index: u64, block_hash: String },
}

impl From<PendingStatus> for TransactionStatus {
    fn from(status: PendingStatus) -> TransactionStatus {
        match status {
            PendingStatus::Pending => TransactionStatus::Pending,
            // Mined entries are found in the chain before the pool is consulted
            PendingStatus::Mining | PendingStatus::Mined => TransactionStatus::Mining,
            PendingStatus::Failed => TransactionStatus::Failed,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => f.write_str("pending"),
            TransactionStatus::Mining => f.write_str("mining"),
            TransactionStatus::Failed => f.write_str("failed"),
            TransactionStatus::Confirmed { block_index, .. } => {
                write!(f, "confirmed in block {block_index}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub transaction: Transaction,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sent => f.write_str("sent"),
            Direction::Received => f.write_str("received"),
        }
    }
}

/// One line of a wallet's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub direction: Direction,
    pub transaction: Transaction,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStats {
    pub blocks: usize,
    pub transactions: usize,
    pub deductions: usize,
    /// Entries waiting for or undergoing assembly
    pub pending: usize,
    pub wallets: usize,
    pub difficulty: u32,
    pub tip_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductionLine {
    pub record: DeductionRecord,
    /// `None` once the deduction was cancelled before being mined
    pub status: Option<TransactionStatus>,
}

/// Deductions of one period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductionSummary {
    pub period: String,
    pub lines: Vec<DeductionLine>,
    pub total: Amount,
    /// Part of `total` already in a block
    pub confirmed: Amount,
}

/// Look `tx_id` up in the chain first, then among unmined entries.
pub fn find_transaction(
    blocks: &[Block],
    pending: &[PendingEntry],
    tx_id: &str,
) -> Option<TransactionRecord> {
    for block in blocks {
        if let Some(tx) = block.get_transactions().iter().find(|tx| tx.get_id() == tx_id) {
            return Some(TransactionRecord {
                transaction: tx.clone(),
                status: TransactionStatus::Confirmed {
                    block_index: block.get_index(),
                    block_hash: block.get_hash().to_string(),
                },
            });
        }
    }
    pending
        .iter()
        .find(|entry| entry.id == tx_id)
        .map(|entry| TransactionRecord {
            transaction: entry.transaction.clone(),
            status: entry.status.into(),
        })
}

fn direction_of(tx: &Transaction, wallet_id: &str) -> Option<Direction> {
    if tx.get_sender_wallet_id() == wallet_id {
        Some(Direction::Sent)
    } else if tx.get_receiver_wallet_id() == wallet_id {
        Some(Direction::Received)
    } else {
        None
    }
}

/// Everything `wallet_id` sent or received: chain order, then unmined entries oldest first.
pub fn wallet_history(
    blocks: &[Block],
    pending: &[PendingEntry],
    wallet_id: &str,
) -> Vec<HistoryEntry> {
    let mut history = vec![];
    for block in blocks {
        for tx in block.get_transactions() {
            if let Some(direction) = direction_of(tx, wallet_id) {
                history.push(HistoryEntry {
                    direction,
                    transaction: tx.clone(),
                    status: TransactionStatus::Confirmed {
                        block_index: block.get_index(),
                        block_hash: block.get_hash().to_string(),
                    },
                });
            }
        }
    }
    for entry in pending.iter().filter(|e| e.status != PendingStatus::Mined) {
        if let Some(direction) = direction_of(&entry.transaction, wallet_id) {
            history.push(HistoryEntry {
                direction,
                transaction: entry.transaction.clone(),
                status: entry.status.into(),
            });
        }
    }
    history
}

pub fn chain_stats(
    blocks: &[Block],
    pending: &[PendingEntry],
    wallets: usize,
    difficulty: u32,
) -> ChainStats {
    let transactions = blocks.iter().flat_map(Block::get_transactions);
    ChainStats {
        blocks: blocks.len(),
        transactions: transactions.clone().count(),
        deductions: transactions
            .filter(|tx| tx.get_kind() == TransactionKind::Deduction)
            .count(),
        pending: pending
            .iter()
            .filter(|e| matches!(e.status, PendingStatus::Pending | PendingStatus::Mining))
            .count(),
        wallets,
        difficulty,
        tip_hash: blocks
            .last()
            .map(|b| b.get_hash().to_string())
            .unwrap_or_default(),
    }
}
