use crate::core::{Block, OutPoint, Transaction};
use crate::error::{LedgerError, Result};
use crate::storage::{
    sort_pending, sort_utxos, utxos_from_outputs, CommitOutcome, DeductionRecord, LedgerStore,
    PendingEntry, PendingStatus, Utxo, WalletRecord,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct MemoryState {
    blocks: Vec<Block>,
    // K -> "txId:index"
    utxos: BTreeMap<String, Utxo>,
    pending: HashMap<String, PendingEntry>,
    wallets: BTreeMap<String, WalletRecord>,
    // K -> "period:walletId"
    deductions: BTreeMap<String, DeductionRecord>,
}

/// In-process store; every conditional operation runs under one write guard
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.inner.read().map_err(|_| {
            log::error!("Failed to acquire read lock on memory store");
            LedgerError::Database("memory store lock poisoned".to_string())
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.inner.write().map_err(|_| {
            log::error!("Failed to acquire write lock on memory store");
            LedgerError::Database("memory store lock poisoned".to_string())
        })
    }

    fn unspent<F>(&self, wallet_id: &str, filter: F) -> Result<Vec<Utxo>>
    where
        F: Fn(&Utxo) -> bool,
    {
        let state = self.read()?;
        let mut utxos: Vec<Utxo> = state
            .utxos
            .values()
            .filter(|u| u.owner_wallet_id == wallet_id && !u.spent && filter(u))
            .cloned()
            .collect();
        sort_utxos(&mut utxos);
        Ok(utxos)
    }
}

fn tip_hash(state: &MemoryState) -> &str {
    state.blocks.last().map(Block::get_hash).unwrap_or_default()
}

impl LedgerStore for MemoryStore {
    fn find_unspent_unlocked(&self, wallet_id: &str) -> Result<Vec<Utxo>> {
        self.unspent(wallet_id, |u| !u.locked)
    }

    fn find_unspent(&self, wallet_id: &str) -> Result<Vec<Utxo>> {
        self.unspent(wallet_id, |_| true)
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>> {
        Ok(self.read()?.utxos.get(&outpoint.key()).cloned())
    }

    fn conditional_lock(&self, outpoint: &OutPoint, locker_id: &str) -> Result<bool> {
        let mut state = self.write()?;
        match state.utxos.get_mut(&outpoint.key()) {
            Some(utxo) if utxo.is_available() => {
                utxo.locked = true;
                utxo.locked_by = Some(locker_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn unlock(&self, outpoint: &OutPoint) -> Result<()> {
        let mut state = self.write()?;
        if let Some(utxo) = state.utxos.get_mut(&outpoint.key()) {
            utxo.locked = false;
            utxo.locked_by = None;
        }
        Ok(())
    }

    fn unlock_by_locker(&self, locker_id: &str) -> Result<usize> {
        let mut state = self.write()?;
        let mut released = 0;
        for utxo in state.utxos.values_mut() {
            if utxo.locked_by.as_deref() == Some(locker_id) {
                utxo.locked = false;
                utxo.locked_by = None;
                released += 1;
            }
        }
        Ok(released)
    }

    fn conditional_mark_spent(&self, outpoint: &OutPoint, spending_tx_id: &str) -> Result<bool> {
        let mut state = self.write()?;
        match state.utxos.get_mut(&outpoint.key()) {
            Some(utxo) if !utxo.spent => {
                utxo.spent = true;
                utxo.spent_in_tx = Some(spending_tx_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn create_utxos_from_outputs(&self, tx: &Transaction, block_index: u64) -> Result<()> {
        let mut state = self.write()?;
        for utxo in utxos_from_outputs(tx, block_index) {
            state.utxos.insert(utxo.key(), utxo);
        }
        Ok(())
    }

    fn delete_utxos_by_tx(&self, tx_id: &str) -> Result<usize> {
        let mut state = self.write()?;
        let before = state.utxos.len();
        state.utxos.retain(|_, utxo| utxo.tx_id != tx_id);
        Ok(before - state.utxos.len())
    }

    fn append_block_if_tip_matches(
        &self,
        block: &Block,
        expected_prev_hash: &str,
    ) -> Result<bool> {
        let mut state = self.write()?;
        if state.blocks.is_empty() || tip_hash(&state) != expected_prev_hash {
            return Ok(false);
        }
        state.blocks.push(block.clone());
        Ok(true)
    }

    fn commit_block(&self, block: &Block, expected_prev_hash: &str) -> Result<CommitOutcome> {
        let mut state = self.write()?;
        let current = tip_hash(&state);
        if state.blocks.is_empty() || current != expected_prev_hash {
            return Ok(CommitOutcome::TipMoved {
                current_tip_hash: current.to_string(),
            });
        }

        // Check every claim before touching anything
        let mut claimed: Vec<String> = Vec::new();
        for tx in block.get_transactions() {
            for outpoint in tx.outpoints() {
                let key = outpoint.key();
                let ok = !claimed.contains(&key)
                    && state
                        .utxos
                        .get(&key)
                        .is_some_and(|utxo| utxo.spendable_by(tx.get_id()));
                if !ok {
                    return Ok(CommitOutcome::InputConflict {
                        tx_id: tx.get_id().to_string(),
                        outpoint,
                    });
                }
                claimed.push(key);
            }
            for utxo in utxos_from_outputs(tx, block.get_index()) {
                if state.utxos.contains_key(&utxo.key()) {
                    return Ok(CommitOutcome::OutputExists {
                        tx_id: tx.get_id().to_string(),
                        outpoint: utxo.outpoint(),
                    });
                }
            }
        }

        for tx in block.get_transactions() {
            for outpoint in tx.outpoints() {
                if let Some(utxo) = state.utxos.get_mut(&outpoint.key()) {
                    utxo.spent = true;
                    utxo.spent_in_tx = Some(tx.get_id().to_string());
                    utxo.locked = false;
                    utxo.locked_by = None;
                }
            }
            for utxo in utxos_from_outputs(tx, block.get_index()) {
                state.utxos.insert(utxo.key(), utxo);
            }
            if let Some(entry) = state.pending.get_mut(tx.get_id()) {
                entry.status = PendingStatus::Mined;
            }
        }
        state.blocks.push(block.clone());
        Ok(CommitOutcome::Committed)
    }

    fn ensure_genesis(&self, genesis: &Block) -> Result<Block> {
        let mut state = self.write()?;
        if state.blocks.is_empty() {
            state.blocks.push(genesis.clone());
        }
        Ok(state.blocks[0].clone())
    }

    fn get_tip(&self) -> Result<Option<Block>> {
        Ok(self.read()?.blocks.last().cloned())
    }

    fn get_all_blocks(&self) -> Result<Vec<Block>> {
        Ok(self.read()?.blocks.clone())
    }

    fn get_block(&self, index: u64) -> Result<Option<Block>> {
        let state = self.read()?;
        let position = usize::try_from(index).ok();
        Ok(position.and_then(|i| state.blocks.get(i)).cloned())
    }

    fn insert_pending_entry(&self, entry: &PendingEntry) -> Result<bool> {
        let mut state = self.write()?;
        if state.pending.contains_key(&entry.id) {
            return Ok(false);
        }
        state.pending.insert(entry.id.clone(), entry.clone());
        Ok(true)
    }

    fn upsert_pending_entry(&self, entry: &PendingEntry) -> Result<()> {
        self.write()?
            .pending
            .insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    fn transition_pending_status(
        &self,
        id: &str,
        from: PendingStatus,
        to: PendingStatus,
    ) -> Result<bool> {
        let mut state = self.write()?;
        match state.pending.get_mut(id) {
            Some(entry) if entry.status == from => {
                entry.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_pending_entry(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.pending.remove(id).is_some())
    }

    fn get_pending_entry(&self, id: &str) -> Result<Option<PendingEntry>> {
        Ok(self.read()?.pending.get(id).cloned())
    }

    fn list_pending_entries(&self, status: Option<PendingStatus>) -> Result<Vec<PendingEntry>> {
        let state = self.read()?;
        let mut entries: Vec<PendingEntry> = state
            .pending
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        sort_pending(&mut entries);
        Ok(entries)
    }

    fn register_wallet(&self, record: &WalletRecord) -> Result<bool> {
        let mut state = self.write()?;
        if state.wallets.contains_key(&record.wallet_id) {
            return Ok(false);
        }
        state
            .wallets
            .insert(record.wallet_id.clone(), record.clone());
        Ok(true)
    }

    fn get_wallet(&self, wallet_id: &str) -> Result<Option<WalletRecord>> {
        Ok(self.read()?.wallets.get(wallet_id).cloned())
    }

    fn update_wallet(&self, record: &WalletRecord) -> Result<()> {
        let mut state = self.write()?;
        match state.wallets.get_mut(&record.wallet_id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(LedgerError::WalletNotFound(record.wallet_id.clone())),
        }
    }

    fn list_wallets(&self) -> Result<Vec<WalletRecord>> {
        Ok(self.read()?.wallets.values().cloned().collect())
    }

    fn insert_deduction_record(&self, record: &DeductionRecord) -> Result<bool> {
        let mut state = self.write()?;
        if state.deductions.contains_key(&record.key()) {
            return Ok(false);
        }
        state.deductions.insert(record.key(), record.clone());
        Ok(true)
    }

    fn list_deduction_records(&self, period: Option<&str>) -> Result<Vec<DeductionRecord>> {
        Ok(self
            .read()?
            .deductions
            .values()
            .filter(|r| period.map_or(true, |p| r.period == p))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract_tests;
    use std::sync::Arc;

    #[test]
    fn test_lock_is_exclusive() {
        contract_tests::lock_is_exclusive(&MemoryStore::new());
    }

    #[test]
    fn test_spend_is_final() {
        contract_tests::spend_is_final(&MemoryStore::new());
    }

    #[test]
    fn test_concurrent_lock_has_one_winner() {
        contract_tests::concurrent_lock_has_one_winner(Arc::new(MemoryStore::new()));
    }

    #[test]
    fn test_chain_append() {
        contract_tests::chain_append(&MemoryStore::new());
    }

    #[test]
    fn test_commit_is_atomic() {
        contract_tests::commit_is_atomic(&MemoryStore::new());
    }

    #[test]
    fn test_pending_entries() {
        contract_tests::pending_entries(&MemoryStore::new());
    }

    #[test]
    fn test_wallets() {
        contract_tests::wallets(&MemoryStore::new());
    }

    #[test]
    fn test_existing_outputs_are_kept() {
        contract_tests::existing_outputs_are_kept(&MemoryStore::new());
    }

    #[test]
    fn test_deduction_records() {
        contract_tests::deduction_records(&MemoryStore::new());
    }

    #[test]
    fn test_rollback_outputs() {
        contract_tests::rollback_outputs(&MemoryStore::new());
    }
}
