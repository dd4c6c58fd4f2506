use crate::audit::{AuditEvent, AuditRecord, AuditSink};
use crate::config::LedgerConfig;
use crate::core::query::{self, DeductionLine};
use crate::core::{
    validate_chain, Amount, Block, BlockAssembler, CallerContext, CancellationToken,
    ChainStats, ChainStatus, DeductionSummary, HistoryEntry, Transaction, TransactionBuilder,
    TransactionKind, TransactionRecord, TransactionStatus, TransferRequest,
};
use crate::error::{LedgerError, Result};
use crate::storage::{
    DeductionRecord, LedgerStore, PendingEntry, PendingPool, SledStore, Utxo, WalletRecord,
};
use crate::utils::current_timestamp;
use crate::wallet::{KeyVault, SigningKey, Wallet};
use log::{error, info, warn};
use std::sync::Arc;

/// Entry point tying the store, the pending pool, the builder and the assembler together
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    config: LedgerConfig,
    audit: Arc<dyn AuditSink>,
    pool: PendingPool,
    builder: TransactionBuilder,
    assembler: BlockAssembler,
}

impl Ledger {
    /// Wrap `store`, writing the genesis block if the chain is empty.
    pub fn open(
        store: Arc<dyn LedgerStore>,
        config: LedgerConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Ledger> {
        let genesis = store.ensure_genesis(&Block::genesis(current_timestamp()?))?;
        info!("Opened ledger, genesis {}", genesis.get_hash());

        Ok(Ledger {
            pool: PendingPool::new(Arc::clone(&store)),
            builder: TransactionBuilder::new(Arc::clone(&store), Arc::clone(&audit)),
            assembler: BlockAssembler::new(
                Arc::clone(&store),
                config.mining.clone(),
                Arc::clone(&audit),
            ),
            store,
            config,
            audit,
        })
    }

    /// Open the sled database under the configured data directory.
    pub fn open_sled(config: LedgerConfig, audit: Arc<dyn AuditSink>) -> Result<Ledger> {
        let store = SledStore::open(&config.db_path())?;
        Ledger::open(Arc::new(store), config, audit)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn LedgerStore> {
        Arc::clone(&self.store)
    }

    pub fn record_audit(&self, ctx: &CallerContext, event: AuditEvent) {
        self.audit.record(AuditRecord::new(ctx, event));
    }

    /// Generate a key pair, seal the private key and register the wallet.
    pub fn register_wallet(&self, ctx: &CallerContext, vault: &KeyVault) -> Result<Wallet> {
        let wallet = Wallet::generate()?;
        let record = WalletRecord {
            wallet_id: wallet.wallet_id().to_string(),
            public_key: wallet.public_key().to_vec(),
            created_at: current_timestamp()?,
            sealed_key: Some(vault.seal(wallet.signing_key())?),
            last_deduction_period: None,
        };
        if !self.store.register_wallet(&record)? {
            return Err(LedgerError::Database(format!(
                "wallet {} already exists",
                record.wallet_id
            )));
        }
        self.audit.record(AuditRecord::new(
            ctx,
            AuditEvent::WalletRegistered {
                wallet_id: record.wallet_id.clone(),
            },
        ));
        Ok(wallet)
    }

    /// Register a key-less wallet owned by the ledger itself; a no-op if it exists.
    pub fn register_system_wallet(&self, ctx: &CallerContext, wallet_id: &str) -> Result<()> {
        let record = WalletRecord {
            wallet_id: wallet_id.to_string(),
            public_key: vec![],
            created_at: current_timestamp()?,
            sealed_key: None,
            last_deduction_period: None,
        };
        if self.store.register_wallet(&record)? {
            self.audit.record(AuditRecord::new(
                ctx,
                AuditEvent::WalletRegistered {
                    wallet_id: wallet_id.to_string(),
                },
            ));
        }
        Ok(())
    }

    pub fn wallet(&self, wallet_id: &str) -> Result<WalletRecord> {
        self.store
            .get_wallet(wallet_id)?
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))
    }

    pub fn wallets(&self) -> Result<Vec<WalletRecord>> {
        self.store.list_wallets()
    }

    /// Unseal the custodial key of `wallet_id`.
    pub fn signing_key(&self, wallet_id: &str, vault: &KeyVault) -> Result<SigningKey> {
        let record = self.wallet(wallet_id)?;
        let sealed = record.sealed_key.ok_or_else(|| {
            LedgerError::Encryption(format!("wallet {wallet_id} has no custodial key"))
        })?;
        vault.open(&sealed)
    }

    /// Mark the wallet as deducted for the record's period and keep the record.
    pub fn record_deduction(&self, deduction: &DeductionRecord) -> Result<()> {
        let mut record = self.wallet(&deduction.wallet_id)?;
        record.last_deduction_period = Some(deduction.period.clone());
        self.store.update_wallet(&record)?;
        if !self.store.insert_deduction_record(deduction)? {
            warn!(
                "Deduction for {} in {} was already recorded",
                deduction.wallet_id, deduction.period
            );
        }
        Ok(())
    }

    /// Deduction records ordered by period then wallet; every period when `None`
    pub fn deduction_records(&self, period: Option<&str>) -> Result<Vec<DeductionRecord>> {
        self.store.list_deduction_records(period)
    }

    pub fn deduction_report(&self, period: &str) -> Result<DeductionSummary> {
        let blocks = self.store.get_all_blocks()?;
        let pending = self.pool.get_all()?;
        let mut summary = DeductionSummary {
            period: period.to_string(),
            lines: vec![],
            total: Amount::ZERO,
            confirmed: Amount::ZERO,
        };

        for record in self.store.list_deduction_records(Some(period))? {
            let status =
                query::find_transaction(&blocks, &pending, &record.tx_id).map(|r| r.status);
            let overflow = || LedgerError::InvalidAmount("deduction total overflows".to_string());
            summary.total = summary
                .total
                .checked_add(record.amount)
                .ok_or_else(overflow)?;
            if matches!(status, Some(TransactionStatus::Confirmed { .. })) {
                summary.confirmed = summary
                    .confirmed
                    .checked_add(record.amount)
                    .ok_or_else(overflow)?;
            }
            summary.lines.push(DeductionLine { record, status });
        }
        Ok(summary)
    }

    pub fn create_transaction(
        &self,
        ctx: &CallerContext,
        sender_wallet_id: &str,
        receiver_wallet_id: &str,
        amount: Amount,
        note: &str,
        signing_key: &SigningKey,
    ) -> Result<Transaction> {
        self.builder.create_transaction(
            ctx,
            TransferRequest::transfer(sender_wallet_id, receiver_wallet_id, amount, note),
            signing_key,
        )
    }

    /// Build a transfer of any kind through the same selection, signing and locking path.
    pub fn create_special_transaction(
        &self,
        ctx: &CallerContext,
        request: TransferRequest<'_>,
        signing_key: &SigningKey,
    ) -> Result<Transaction> {
        self.builder.create_transaction(ctx, request, signing_key)
    }

    /// Mint `amount` to a wallet; the issuance waits in the pool like any transfer.
    pub fn issue(
        &self,
        ctx: &CallerContext,
        receiver_wallet_id: &str,
        amount: Amount,
        note: &str,
    ) -> Result<Transaction> {
        self.wallet(receiver_wallet_id)?;
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }
        let timestamp = current_timestamp()?;
        let tx = Transaction::new_system(
            TransactionKind::Issuance,
            receiver_wallet_id,
            amount,
            note,
            timestamp,
        )?;
        self.pool.admit(&PendingEntry::new(tx.clone(), timestamp))?;

        info!("Issued {amount} to {receiver_wallet_id} in {}", tx.get_id());
        self.audit.record(AuditRecord::new(
            ctx,
            AuditEvent::TransactionCreated {
                tx_id: tx.get_id().to_string(),
                sender_wallet_id: tx.get_sender_wallet_id().to_string(),
                receiver_wallet_id: receiver_wallet_id.to_string(),
                amount: amount.to_string(),
                kind: tx.get_kind().to_string(),
            },
        ));
        Ok(tx)
    }

    /// Mine every pending entry; the reward, if any, goes to a registered wallet.
    pub fn assemble_block(
        &self,
        ctx: &CallerContext,
        miner_wallet_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Block> {
        if let Some(miner) = miner_wallet_id {
            self.wallet(miner)?;
        }
        self.assembler.assemble(ctx, miner_wallet_id, cancel)
    }

    pub fn assemble_entries(
        &self,
        ctx: &CallerContext,
        entries: Vec<PendingEntry>,
        miner_wallet_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Block> {
        if let Some(miner) = miner_wallet_id {
            self.wallet(miner)?;
        }
        self.assembler
            .assemble_entries(ctx, entries, miner_wallet_id, cancel)
    }

    pub fn validate_chain(&self, ctx: &CallerContext) -> Result<ChainStatus> {
        let status = validate_chain(&self.store.get_all_blocks()?);
        let event = match &status {
            ChainStatus::Valid => AuditEvent::ChainValidated {
                valid: true,
                at_index: None,
                reason: None,
            },
            ChainStatus::Invalid { at_index, reason } => {
                error!("Chain is invalid at {at_index}: {reason}");
                AuditEvent::ChainValidated {
                    valid: false,
                    at_index: Some(*at_index),
                    reason: Some(reason.to_string()),
                }
            }
        };
        self.audit.record(AuditRecord::new(ctx, event));
        Ok(status)
    }

    /// Sum of the wallet's unspent outputs, including ones locked by pending transfers
    pub fn get_balance(&self, wallet_id: &str) -> Result<Amount> {
        self.wallet(wallet_id)?;
        Amount::sum(self.store.find_unspent(wallet_id)?.iter().map(|u| u.amount))
    }

    /// Drop an unmined transaction and release its locks.
    pub fn cancel_transaction(&self, ctx: &CallerContext, tx_id: &str) -> Result<PendingEntry> {
        let entry = self.pool.remove(tx_id)?;
        info!("Cancelled pending transaction {tx_id}");
        self.audit.record(AuditRecord::new(
            ctx,
            AuditEvent::TransactionCancelled {
                tx_id: tx_id.to_string(),
            },
        ));
        Ok(entry)
    }

    pub fn utxos(&self, wallet_id: &str) -> Result<Vec<Utxo>> {
        self.store.find_unspent(wallet_id)
    }

    pub fn blocks(&self) -> Result<Vec<Block>> {
        self.store.get_all_blocks()
    }

    pub fn pending(&self) -> Result<Vec<PendingEntry>> {
        self.pool.get_all()
    }

    /// Find a transaction in the chain or the pending pool.
    pub fn find_transaction(&self, tx_id: &str) -> Result<TransactionRecord> {
        let blocks = self.store.get_all_blocks()?;
        query::find_transaction(&blocks, &self.pool.get_all()?, tx_id)
            .ok_or_else(|| LedgerError::TransactionNotFound(tx_id.to_string()))
    }

    /// Transactions the wallet sent or received, mined ones first.
    pub fn history(&self, wallet_id: &str) -> Result<Vec<HistoryEntry>> {
        self.wallet(wallet_id)?;
        let blocks = self.store.get_all_blocks()?;
        Ok(query::wallet_history(
            &blocks,
            &self.pool.get_all()?,
            wallet_id,
        ))
    }

    pub fn stats(&self) -> Result<ChainStats> {
        let blocks = self.store.get_all_blocks()?;
        Ok(query::chain_stats(
            &blocks,
            &self.pool.get_all()?,
            self.store.list_wallets()?.len(),
            self.config.mining.difficulty,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::config::{MiningConfig, VaultConfig};
    use crate::storage::{MemoryStore, PendingStatus};

    fn ledger() -> (Ledger, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let config = LedgerConfig {
            mining: MiningConfig {
                difficulty: 1,
                ..MiningConfig::default()
            },
            ..LedgerConfig::default()
        };
        let ledger = Ledger::open(Arc::new(MemoryStore::new()), config, sink.clone()).unwrap();
        (ledger, sink)
    }

    fn vault() -> KeyVault {
        KeyVault::new(
            "correct horse battery",
            &VaultConfig {
                memory_kib: 64,
                iterations: 1,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_open_writes_genesis_once() {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let first = Ledger::open(store.clone(), LedgerConfig::default(), Arc::new(MemorySink::new()))
            .unwrap();
        let second = Ledger::open(store, LedgerConfig::default(), Arc::new(MemorySink::new()))
            .unwrap();

        assert_eq!(first.blocks().unwrap(), second.blocks().unwrap());
        assert_eq!(second.blocks().unwrap().len(), 1);
    }

    #[test]
    fn test_issue_send_mine() {
        let (ledger, sink) = ledger();
        let ctx = CallerContext::system();
        let vault = vault();
        let alice = ledger.register_wallet(&ctx, &vault).unwrap();
        let bob = ledger.register_wallet(&ctx, &vault).unwrap();

        ledger
            .issue(&ctx, alice.wallet_id(), Amount::from_coins(100).unwrap(), "")
            .unwrap();
        ledger
            .assemble_block(&ctx, None, &CancellationToken::new())
            .unwrap();

        let key = ledger.signing_key(alice.wallet_id(), &vault).unwrap();
        ledger
            .create_transaction(
                &ctx,
                alice.wallet_id(),
                bob.wallet_id(),
                Amount::from_coins(40).unwrap(),
                "rent",
                &key,
            )
            .unwrap();
        ledger
            .assemble_block(&ctx, None, &CancellationToken::new())
            .unwrap();

        assert_eq!(
            ledger.get_balance(alice.wallet_id()).unwrap(),
            Amount::from_coins(60).unwrap()
        );
        assert_eq!(
            ledger.get_balance(bob.wallet_id()).unwrap(),
            Amount::from_coins(40).unwrap()
        );
        assert!(ledger.validate_chain(&ctx).unwrap().is_valid());
        assert!(matches!(
            sink.events().last(),
            Some(AuditEvent::ChainValidated { valid: true, .. })
        ));
    }

    #[test]
    fn test_cancel_releases_funds() {
        let (ledger, _) = ledger();
        let ctx = CallerContext::system();
        let vault = vault();
        let alice = ledger.register_wallet(&ctx, &vault).unwrap();
        let bob = ledger.register_wallet(&ctx, &vault).unwrap();
        ledger
            .issue(&ctx, alice.wallet_id(), Amount::from_coins(10).unwrap(), "")
            .unwrap();
        ledger
            .assemble_block(&ctx, None, &CancellationToken::new())
            .unwrap();

        let tx = ledger
            .create_transaction(
                &ctx,
                alice.wallet_id(),
                bob.wallet_id(),
                Amount::from_coins(4).unwrap(),
                "",
                alice.signing_key(),
            )
            .unwrap();
        assert!(ledger.utxos(alice.wallet_id()).unwrap()[0].locked);

        let cancelled = ledger.cancel_transaction(&ctx, tx.get_id()).unwrap();
        assert_eq!(cancelled.status, PendingStatus::Pending);
        assert!(!ledger.utxos(alice.wallet_id()).unwrap()[0].locked);
        assert!(ledger.pending().unwrap().is_empty());
        assert!(matches!(
            ledger.cancel_transaction(&ctx, tx.get_id()),
            Err(LedgerError::TransactionNotFound(_))
        ));
    }

    #[test]
    fn test_mined_transaction_cannot_be_cancelled() {
        let (ledger, _) = ledger();
        let ctx = CallerContext::system();
        let alice = ledger.register_wallet(&ctx, &vault()).unwrap();
        let tx = ledger
            .issue(&ctx, alice.wallet_id(), Amount::from_coins(1).unwrap(), "")
            .unwrap();
        ledger
            .assemble_block(&ctx, None, &CancellationToken::new())
            .unwrap();

        assert!(ledger.cancel_transaction(&ctx, tx.get_id()).is_err());
    }

    #[test]
    fn test_unknown_miner_is_refused() {
        let (ledger, _) = ledger();
        let ctx = CallerContext::system();
        let alice = ledger.register_wallet(&ctx, &vault()).unwrap();
        ledger
            .issue(&ctx, alice.wallet_id(), Amount::from_coins(1).unwrap(), "")
            .unwrap();

        assert!(matches!(
            ledger.assemble_block(&ctx, Some("nobody"), &CancellationToken::new()),
            Err(LedgerError::WalletNotFound(_))
        ));
        // The entry was never claimed
        assert_eq!(ledger.pending().unwrap()[0].status, PendingStatus::Pending);
        assert!(ledger
            .assemble_block(&ctx, Some(alice.wallet_id()), &CancellationToken::new())
            .is_ok());
    }

    #[test]
    fn test_lookup_history_and_stats() {
        let (ledger, _) = ledger();
        let ctx = CallerContext::system();
        let vault = vault();
        let alice = ledger.register_wallet(&ctx, &vault).unwrap();
        let bob = ledger.register_wallet(&ctx, &vault).unwrap();
        let funding = ledger
            .issue(&ctx, alice.wallet_id(), Amount::from_coins(10).unwrap(), "")
            .unwrap();
        let block = ledger
            .assemble_block(&ctx, None, &CancellationToken::new())
            .unwrap();
        let transfer = ledger
            .create_transaction(
                &ctx,
                alice.wallet_id(),
                bob.wallet_id(),
                Amount::from_coins(3).unwrap(),
                "",
                alice.signing_key(),
            )
            .unwrap();

        assert_eq!(
            ledger.find_transaction(funding.get_id()).unwrap().status,
            TransactionStatus::Confirmed {
                block_index: 1,
                block_hash: block.get_hash().to_string(),
            }
        );
        assert_eq!(
            ledger.find_transaction(transfer.get_id()).unwrap().status,
            TransactionStatus::Pending
        );
        assert!(matches!(
            ledger.find_transaction("missing"),
            Err(LedgerError::TransactionNotFound(_))
        ));

        let history = ledger.history(alice.wallet_id()).unwrap();
        let directions: Vec<_> = history.iter().map(|h| h.direction).collect();
        assert_eq!(
            directions,
            vec![crate::core::Direction::Received, crate::core::Direction::Sent]
        );
        assert_eq!(ledger.history(bob.wallet_id()).unwrap().len(), 1);
        assert!(matches!(
            ledger.history("nobody"),
            Err(LedgerError::WalletNotFound(_))
        ));

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.transactions, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.wallets, 2);
        assert_eq!(stats.difficulty, 1);
        assert_eq!(stats.tip_hash, block.get_hash());
    }

    #[test]
    fn test_system_wallet_has_no_key() {
        let (ledger, _) = ledger();
        let ctx = CallerContext::system();
        ledger.register_system_wallet(&ctx, "deduction_pool").unwrap();
        ledger.register_system_wallet(&ctx, "deduction_pool").unwrap();

        assert!(matches!(
            ledger.signing_key("deduction_pool", &vault()),
            Err(LedgerError::Encryption(_))
        ));
        assert!(matches!(
            ledger.get_balance("nobody"),
            Err(LedgerError::WalletNotFound(_))
        ));
    }
}
