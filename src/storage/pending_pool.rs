use crate::error::{LedgerError, Result};
use crate::storage::{LedgerStore, PendingEntry, PendingStatus};
use log::warn;
use std::sync::Arc;

/// Signed transactions waiting for a block, with their UTXOs locked
///
/// ( K -> tx id, V -> PendingEntry ), persisted through the store so that locks and
/// entries share one source of truth.
#[derive(Clone)]
pub struct PendingPool {
    store: Arc<dyn LedgerStore>,
}

impl PendingPool {
    pub fn new(store: Arc<dyn LedgerStore>) -> PendingPool {
        PendingPool { store }
    }

    /// Add a new entry; an id already in the pool is rejected.
    pub fn admit(&self, entry: &PendingEntry) -> Result<()> {
        if !self.store.insert_pending_entry(entry)? {
            return Err(LedgerError::DuplicateTransaction(entry.id.clone()));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<PendingEntry>> {
        self.store.get_pending_entry(id)
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Entries waiting for a block, oldest first
    pub fn pending(&self) -> Result<Vec<PendingEntry>> {
        self.store.list_pending_entries(Some(PendingStatus::Pending))
    }

    pub fn get_all(&self) -> Result<Vec<PendingEntry>> {
        self.store.list_pending_entries(None)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.pending()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Move entries from pending to mining; entries another assembler already took are
    /// dropped from the result.
    pub fn claim(&self, entries: Vec<PendingEntry>) -> Result<Vec<PendingEntry>> {
        let mut claimed = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if self.store.transition_pending_status(
                &entry.id,
                PendingStatus::Pending,
                PendingStatus::Mining,
            )? {
                entry.status = PendingStatus::Mining;
                claimed.push(entry);
            }
        }
        Ok(claimed)
    }

    /// Hand mining entries back to the pool after an interrupted attempt.
    pub fn release(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.store
                .transition_pending_status(id, PendingStatus::Mining, PendingStatus::Pending)?;
        }
        Ok(())
    }

    /// Mark an entry failed and release every UTXO it locked; it is never retried.
    pub fn fail(&self, id: &str) -> Result<()> {
        if let Some(mut entry) = self.store.get_pending_entry(id)? {
            entry.status = PendingStatus::Failed;
            self.store.upsert_pending_entry(&entry)?;
        }
        let released = self.store.unlock_by_locker(id)?;
        warn!("Pending transaction {id} failed, released {released} UTXO lock(s)");
        Ok(())
    }

    /// Drop an unmined entry and its locks. Entries an assembler holds and mined entries
    /// are refused.
    pub fn remove(&self, id: &str) -> Result<PendingEntry> {
        let entry = self
            .store
            .get_pending_entry(id)?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;
        // Withdraw first so no assembler can claim the entry while its locks go
        let withdrawn = match entry.status {
            PendingStatus::Failed => true,
            PendingStatus::Pending => self.store.transition_pending_status(
                id,
                PendingStatus::Pending,
                PendingStatus::Failed,
            )?,
            PendingStatus::Mining | PendingStatus::Mined => false,
        };
        if !withdrawn {
            let status = self
                .store
                .get_pending_entry(id)?
                .map_or(entry.status, |e| e.status);
            return Err(LedgerError::MalformedTransaction {
                tx_id: id.to_string(),
                reason: format!("cannot remove a {status} transaction"),
            });
        }
        self.store.unlock_by_locker(id)?;
        self.store.delete_pending_entry(id)?;
        Ok(entry)
    }
}
