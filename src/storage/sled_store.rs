// Sled-backed ledger store
// Each concern lives in its own tree; every conditional write runs as a sled transaction
// so concurrent claims on one key serialize, and a block commit spans all the trees it touches

use crate::core::{Block, OutPoint, Transaction};
use crate::error::{LedgerError, Result};
use crate::storage::{
    sort_pending, sort_utxos, utxos_from_outputs, CommitOutcome, DeductionRecord, LedgerStore,
    PendingEntry, PendingStatus, Utxo, WalletRecord,
};
use crate::utils::{deserialize, serialize};
use log::info;
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{Db, Transactional, Tree};
use std::path::Path;

const BLOCKS_TREE: &str = "blocks"; // K -> big-endian block index
const META_TREE: &str = "meta";
const UTXO_TREE: &str = "chainstate"; // K -> "txId:index"
const PENDING_TREE: &str = "pending"; // K -> transaction id
const WALLETS_TREE: &str = "wallets"; // K -> wallet id
const DEDUCTIONS_TREE: &str = "deductions"; // K -> "period:walletId"

const TIP_KEY: &str = "tip";

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct ChainTip {
    index: u64,
    hash: String,
}

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    blocks: Tree,
    meta: Tree,
    utxos: Tree,
    pending: Tree,
    wallets: Tree,
    deductions: Tree,
}

fn abort(e: LedgerError) -> ConflictableTransactionError<LedgerError> {
    ConflictableTransactionError::Abort(e)
}

fn from_tx_error(e: TransactionError<LedgerError>) -> LedgerError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => LedgerError::Database(format!("Transaction failed: {e}")),
    }
}

fn decode_in_tx<T>(bytes: &[u8]) -> ConflictableTransactionResult<T, LedgerError>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    deserialize(bytes).map_err(abort)
}

impl SledStore {
    pub fn open(path: &Path) -> Result<SledStore> {
        let db = sled::open(path)
            .map_err(|e| LedgerError::Database(format!("Failed to open database: {e}")))?;
        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> Result<SledStore> {
        let open = |name: &str| {
            db.open_tree(name)
                .map_err(|e| LedgerError::Database(format!("Failed to open {name} tree: {e}")))
        };
        Ok(SledStore {
            blocks: open(BLOCKS_TREE)?,
            meta: open(META_TREE)?,
            utxos: open(UTXO_TREE)?,
            pending: open(PENDING_TREE)?,
            wallets: open(WALLETS_TREE)?,
            deductions: open(DEDUCTIONS_TREE)?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| LedgerError::Database(format!("Failed to flush database: {e}")))?;
        Ok(())
    }

    fn scan_utxos<F>(&self, filter: F) -> Result<Vec<Utxo>>
    where
        F: Fn(&Utxo) -> bool,
    {
        let mut utxos = vec![];
        for item in self.utxos.iter() {
            let (_, v) = item
                .map_err(|e| LedgerError::Database(format!("Failed to iterate UTXO tree: {e}")))?;
            let utxo: Utxo = deserialize(v.as_ref())?;
            if filter(&utxo) {
                utxos.push(utxo);
            }
        }
        sort_utxos(&mut utxos);
        Ok(utxos)
    }

    fn current_tip(&self) -> Result<Option<ChainTip>> {
        match self.meta.get(TIP_KEY)? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Apply `change` to the UTXO under `outpoint` if `guard` accepts it.
    fn update_utxo_if<G, C>(&self, outpoint: &OutPoint, guard: G, change: C) -> Result<bool>
    where
        G: Fn(&Utxo) -> bool,
        C: Fn(&mut Utxo),
    {
        let key = outpoint.key();
        self.utxos
            .transaction(|tx_tree| {
                let Some(bytes) = tx_tree.get(key.as_bytes())? else {
                    return Ok(false);
                };
                let mut utxo: Utxo = decode_in_tx(&bytes)?;
                if !guard(&utxo) {
                    return Ok(false);
                }
                change(&mut utxo);
                tx_tree.insert(key.as_bytes(), serialize(&utxo).map_err(abort)?)?;
                Ok(true)
            })
            .map_err(from_tx_error)
    }
}

impl LedgerStore for SledStore {
    fn find_unspent_unlocked(&self, wallet_id: &str) -> Result<Vec<Utxo>> {
        self.scan_utxos(|u| u.owner_wallet_id == wallet_id && u.is_available())
    }

    fn find_unspent(&self, wallet_id: &str) -> Result<Vec<Utxo>> {
        self.scan_utxos(|u| u.owner_wallet_id == wallet_id && !u.spent)
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>> {
        match self.utxos.get(outpoint.key().as_bytes())? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn conditional_lock(&self, outpoint: &OutPoint, locker_id: &str) -> Result<bool> {
        self.update_utxo_if(outpoint, Utxo::is_available, |utxo| {
            utxo.locked = true;
            utxo.locked_by = Some(locker_id.to_string());
        })
    }

    fn unlock(&self, outpoint: &OutPoint) -> Result<()> {
        self.update_utxo_if(
            outpoint,
            |utxo| utxo.locked,
            |utxo| {
                utxo.locked = false;
                utxo.locked_by = None;
            },
        )?;
        Ok(())
    }

    fn unlock_by_locker(&self, locker_id: &str) -> Result<usize> {
        let held = self.scan_utxos(|u| u.locked_by.as_deref() == Some(locker_id))?;
        let mut released = 0;
        for utxo in held {
            let still_held = self.update_utxo_if(
                &utxo.outpoint(),
                |u| u.locked_by.as_deref() == Some(locker_id),
                |u| {
                    u.locked = false;
                    u.locked_by = None;
                },
            )?;
            if still_held {
                released += 1;
            }
        }
        Ok(released)
    }

    fn conditional_mark_spent(&self, outpoint: &OutPoint, spending_tx_id: &str) -> Result<bool> {
        self.update_utxo_if(
            outpoint,
            |utxo| !utxo.spent,
            |utxo| {
                utxo.spent = true;
                utxo.spent_in_tx = Some(spending_tx_id.to_string());
            },
        )
    }

    fn create_utxos_from_outputs(&self, tx: &Transaction, block_index: u64) -> Result<()> {
        let mut batch = sled::Batch::default();
        for utxo in utxos_from_outputs(tx, block_index) {
            batch.insert(utxo.key().as_bytes(), serialize(&utxo)?);
        }
        self.utxos
            .apply_batch(batch)
            .map_err(|e| LedgerError::Database(format!("Failed to insert UTXOs: {e}")))
    }

    fn delete_utxos_by_tx(&self, tx_id: &str) -> Result<usize> {
        let prefix = format!("{tx_id}:");
        let mut removed = 0;
        for item in self.utxos.scan_prefix(prefix.as_bytes()) {
            let (k, _) = item
                .map_err(|e| LedgerError::Database(format!("Failed to iterate UTXO tree: {e}")))?;
            if self.utxos.remove(k)?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn append_block_if_tip_matches(
        &self,
        block: &Block,
        expected_prev_hash: &str,
    ) -> Result<bool> {
        let block_bytes = serialize(block)?;
        let tip_bytes = serialize(&ChainTip {
            index: block.get_index(),
            hash: block.get_hash().to_string(),
        })?;

        (&self.blocks, &self.meta)
            .transaction(|(blocks, meta)| {
                let Some(current) = meta.get(TIP_KEY)? else {
                    return Ok(false);
                };
                let current: ChainTip = decode_in_tx(&current)?;
                if current.hash != expected_prev_hash {
                    return Ok(false);
                }
                blocks.insert(block.get_index().to_be_bytes().to_vec(), block_bytes.as_slice())?;
                meta.insert(TIP_KEY, tip_bytes.as_slice())?;
                Ok(true)
            })
            .map_err(from_tx_error)
    }

    fn commit_block(&self, block: &Block, expected_prev_hash: &str) -> Result<CommitOutcome> {
        let block_bytes = serialize(block)?;
        let tip_bytes = serialize(&ChainTip {
            index: block.get_index(),
            hash: block.get_hash().to_string(),
        })?;
        let mut created = vec![];
        for tx in block.get_transactions() {
            for utxo in utxos_from_outputs(tx, block.get_index()) {
                created.push((tx.get_id(), utxo.outpoint(), serialize(&utxo)?));
            }
        }

        let outcome = (&self.blocks, &self.meta, &self.utxos, &self.pending)
            .transaction(|(blocks, meta, utxos, pending)| {
                let current = match meta.get(TIP_KEY)? {
                    Some(bytes) => decode_in_tx::<ChainTip>(&bytes)?.hash,
                    None => String::new(),
                };
                if current.is_empty() || current != expected_prev_hash {
                    return Ok(CommitOutcome::TipMoved {
                        current_tip_hash: current,
                    });
                }

                // Check every claim before writing anything
                let mut spends: Vec<(String, Utxo)> = vec![];
                for tx in block.get_transactions() {
                    for outpoint in tx.outpoints() {
                        let key = outpoint.key();
                        let utxo = match utxos.get(key.as_bytes())? {
                            Some(bytes) => Some(decode_in_tx::<Utxo>(&bytes)?),
                            None => None,
                        };
                        let claimed_twice = spends.iter().any(|(k, _)| *k == key);
                        match utxo {
                            Some(utxo) if !claimed_twice && utxo.spendable_by(tx.get_id()) => {
                                spends.push((key, utxo));
                            }
                            _ => {
                                return Ok(CommitOutcome::InputConflict {
                                    tx_id: tx.get_id().to_string(),
                                    outpoint,
                                })
                            }
                        }
                    }
                }
                for (tx_id, outpoint, _) in &created {
                    if utxos.get(outpoint.key().as_bytes())?.is_some() {
                        return Ok(CommitOutcome::OutputExists {
                            tx_id: tx_id.to_string(),
                            outpoint: outpoint.clone(),
                        });
                    }
                }

                for tx in block.get_transactions() {
                    for outpoint in tx.outpoints() {
                        let key = outpoint.key();
                        if let Some((_, utxo)) = spends.iter_mut().find(|(k, _)| *k == key) {
                            utxo.spent = true;
                            utxo.spent_in_tx = Some(tx.get_id().to_string());
                            utxo.locked = false;
                            utxo.locked_by = None;
                            utxos.insert(key.as_bytes(), serialize(&*utxo).map_err(abort)?)?;
                        }
                    }
                    if let Some(bytes) = pending.get(tx.get_id().as_bytes())? {
                        let mut entry: PendingEntry = decode_in_tx(&bytes)?;
                        entry.status = PendingStatus::Mined;
                        pending.insert(tx.get_id().as_bytes(), serialize(&entry).map_err(abort)?)?;
                    }
                }
                for (_, outpoint, bytes) in &created {
                    utxos.insert(outpoint.key().as_bytes(), bytes.as_slice())?;
                }
                blocks.insert(block.get_index().to_be_bytes().to_vec(), block_bytes.as_slice())?;
                meta.insert(TIP_KEY, tip_bytes.as_slice())?;
                Ok(CommitOutcome::Committed)
            })
            .map_err(from_tx_error)?;

        if outcome == CommitOutcome::Committed {
            info!(
                "Committed block {} ({}) to sled",
                block.get_index(),
                block.get_hash()
            );
        }
        Ok(outcome)
    }

    fn ensure_genesis(&self, genesis: &Block) -> Result<Block> {
        let block_bytes = serialize(genesis)?;
        let tip_bytes = serialize(&ChainTip {
            index: genesis.get_index(),
            hash: genesis.get_hash().to_string(),
        })?;

        (&self.blocks, &self.meta)
            .transaction(|(blocks, meta)| {
                if meta.get(TIP_KEY)?.is_none() {
                    blocks.insert(0u64.to_be_bytes().to_vec(), block_bytes.as_slice())?;
                    meta.insert(TIP_KEY, tip_bytes.as_slice())?;
                }
                Ok::<_, ConflictableTransactionError<LedgerError>>(())
            })
            .map_err(from_tx_error)?;

        self.get_block(0)?
            .ok_or_else(|| LedgerError::Database("Genesis block missing".to_string()))
    }

    fn get_tip(&self) -> Result<Option<Block>> {
        match self.current_tip()? {
            Some(tip) => self.get_block(tip.index),
            None => Ok(None),
        }
    }

    fn get_all_blocks(&self) -> Result<Vec<Block>> {
        let mut blocks = vec![];
        for item in self.blocks.iter() {
            let (_, v) = item
                .map_err(|e| LedgerError::Database(format!("Failed to iterate blocks: {e}")))?;
            blocks.push(Block::deserialize(v.as_ref())?);
        }
        Ok(blocks)
    }

    fn get_block(&self, index: u64) -> Result<Option<Block>> {
        match self.blocks.get(index.to_be_bytes())? {
            Some(bytes) => Ok(Some(Block::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn insert_pending_entry(&self, entry: &PendingEntry) -> Result<bool> {
        let inserted = self.pending.compare_and_swap(
            entry.id.as_bytes(),
            None as Option<&[u8]>,
            Some(serialize(entry)?),
        )?;
        Ok(inserted.is_ok())
    }

    fn upsert_pending_entry(&self, entry: &PendingEntry) -> Result<()> {
        self.pending.insert(entry.id.as_bytes(), serialize(entry)?)?;
        Ok(())
    }

    fn transition_pending_status(
        &self,
        id: &str,
        from: PendingStatus,
        to: PendingStatus,
    ) -> Result<bool> {
        self.pending
            .transaction(|tx_tree| {
                let Some(bytes) = tx_tree.get(id.as_bytes())? else {
                    return Ok(false);
                };
                let mut entry: PendingEntry = decode_in_tx(&bytes)?;
                if entry.status != from {
                    return Ok(false);
                }
                entry.status = to;
                tx_tree.insert(id.as_bytes(), serialize(&entry).map_err(abort)?)?;
                Ok(true)
            })
            .map_err(from_tx_error)
    }

    fn delete_pending_entry(&self, id: &str) -> Result<bool> {
        Ok(self.pending.remove(id.as_bytes())?.is_some())
    }

    fn get_pending_entry(&self, id: &str) -> Result<Option<PendingEntry>> {
        match self.pending.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn list_pending_entries(&self, status: Option<PendingStatus>) -> Result<Vec<PendingEntry>> {
        let mut entries = vec![];
        for item in self.pending.iter() {
            let (_, v) = item.map_err(|e| {
                LedgerError::Database(format!("Failed to iterate pending entries: {e}"))
            })?;
            let entry: PendingEntry = deserialize(v.as_ref())?;
            if status.map_or(true, |s| entry.status == s) {
                entries.push(entry);
            }
        }
        sort_pending(&mut entries);
        Ok(entries)
    }

    fn register_wallet(&self, record: &WalletRecord) -> Result<bool> {
        let inserted = self.wallets.compare_and_swap(
            record.wallet_id.as_bytes(),
            None as Option<&[u8]>,
            Some(serialize(record)?),
        )?;
        Ok(inserted.is_ok())
    }

    fn get_wallet(&self, wallet_id: &str) -> Result<Option<WalletRecord>> {
        match self.wallets.get(wallet_id.as_bytes())? {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn update_wallet(&self, record: &WalletRecord) -> Result<()> {
        let bytes = serialize(record)?;
        self.wallets
            .transaction(|tx_tree| {
                if tx_tree.get(record.wallet_id.as_bytes())?.is_none() {
                    return Err(abort(LedgerError::WalletNotFound(record.wallet_id.clone())));
                }
                tx_tree.insert(record.wallet_id.as_bytes(), bytes.as_slice())?;
                Ok(())
            })
            .map_err(from_tx_error)
    }

    fn list_wallets(&self) -> Result<Vec<WalletRecord>> {
        let mut wallets = vec![];
        for item in self.wallets.iter() {
            let (_, v) = item
                .map_err(|e| LedgerError::Database(format!("Failed to iterate wallets: {e}")))?;
            wallets.push(deserialize(v.as_ref())?);
        }
        Ok(wallets)
    }

    fn insert_deduction_record(&self, record: &DeductionRecord) -> Result<bool> {
        let inserted = self.deductions.compare_and_swap(
            record.key().as_bytes(),
            None as Option<&[u8]>,
            Some(serialize(record)?),
        )?;
        Ok(inserted.is_ok())
    }

    fn list_deduction_records(&self, period: Option<&str>) -> Result<Vec<DeductionRecord>> {
        let prefix = period.map(|p| format!("{p}:")).unwrap_or_default();
        let mut records = vec![];
        for item in self.deductions.scan_prefix(prefix.as_bytes()) {
            let (_, v) = item.map_err(|e| {
                LedgerError::Database(format!("Failed to iterate deduction records: {e}"))
            })?;
            records.push(deserialize(v.as_ref())?);
        }
        Ok(records)
    }
}
