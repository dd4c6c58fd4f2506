// Block assembly: claim pending entries, re-check them, mine a block on the current tip
// and commit it atomically, retrying when another assembler wins the race

use crate::audit::{AuditEvent, AuditRecord, AuditSink};
use crate::config::MiningConfig;
use crate::core::{
    merkle_root, Amount, Block, BlockHeader, CallerContext, OutPoint, ProofOfWork,
    SignatureCheck, Transaction, TransactionKind, SYSTEM_WALLET_ID,
};
use crate::error::{LedgerError, Result};
use crate::storage::{CommitOutcome, LedgerStore, PendingEntry, PendingPool};
use crate::utils::current_timestamp;
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag that stops a running nonce search
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum MiningResult {
    Mined(Block),
    TipMoved,
}

pub struct BlockAssembler {
    store: Arc<dyn LedgerStore>,
    pool: PendingPool,
    mining: MiningConfig,
    audit: Arc<dyn AuditSink>,
}

impl BlockAssembler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        mining: MiningConfig,
        audit: Arc<dyn AuditSink>,
    ) -> BlockAssembler {
        BlockAssembler {
            pool: PendingPool::new(Arc::clone(&store)),
            store,
            mining,
            audit,
        }
    }

    /// Mine every pending entry into one block.
    pub fn assemble(
        &self,
        ctx: &CallerContext,
        miner_wallet_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Block> {
        let entries = self.pool.pending()?;
        self.assemble_entries(ctx, entries, miner_wallet_id, cancel)
    }

    /// Mine exactly `entries`; entries another assembler already claimed are skipped.
    pub fn assemble_entries(
        &self,
        ctx: &CallerContext,
        entries: Vec<PendingEntry>,
        miner_wallet_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Block> {
        let claimed = self.pool.claim(entries)?;
        let claimed_ids: Vec<String> = claimed.iter().map(|e| e.id.clone()).collect();

        let result = self
            .screen(ctx, claimed)
            .and_then(|accepted| self.mine_and_commit(ctx, accepted, miner_wallet_id, cancel));

        if let Err(e) = &result {
            // Only entries still marked mining go back; failed ones stay failed
            self.pool.release(&claimed_ids)?;
            if let LedgerError::MiningInterrupted(reason) = e {
                self.audit.record(AuditRecord::new(
                    ctx,
                    AuditEvent::MiningInterrupted {
                        reason: reason.clone(),
                    },
                ));
            }
        }
        result
    }

    fn mine_and_commit(
        &self,
        ctx: &CallerContext,
        mut accepted: Vec<Transaction>,
        miner_wallet_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Block> {
        let attempts = self.mining.max_assembly_attempts;
        for attempt in 1..=attempts {
            if accepted.is_empty() {
                return Err(LedgerError::NoValidTransactions);
            }
            let tip = self
                .store
                .get_tip()?
                .ok_or_else(|| LedgerError::Database("chain has no genesis block".to_string()))?;

            let block = match self.mine_on(&tip, &accepted, miner_wallet_id, cancel)? {
                MiningResult::Mined(block) => block,
                MiningResult::TipMoved => {
                    self.contention(ctx, attempt)?;
                    continue;
                }
            };

            match self.store.commit_block(&block, tip.get_hash())? {
                CommitOutcome::Committed => {
                    info!(
                        "Committed block {} ({}) with {} transaction(s)",
                        block.get_index(),
                        block.get_hash(),
                        block.get_transactions().len()
                    );
                    self.audit.record(AuditRecord::new(
                        ctx,
                        AuditEvent::BlockMined {
                            index: block.get_index(),
                            hash: block.get_hash().to_string(),
                            nonce: block.get_nonce(),
                            transactions: block.get_transactions().len(),
                        },
                    ));
                    return Ok(block);
                }
                CommitOutcome::TipMoved { current_tip_hash } => {
                    warn!(
                        "Tip moved to {current_tip_hash} before block {} was committed",
                        block.get_index()
                    );
                    self.audit.record(AuditRecord::new(
                        ctx,
                        AuditEvent::TipContention {
                            attempt,
                            current_tip_hash,
                        },
                    ));
                }
                CommitOutcome::InputConflict { tx_id, outpoint } => {
                    let reason = LedgerError::DoubleSpend {
                        tx_id: tx_id.clone(),
                        outpoint: outpoint.to_string(),
                    };
                    self.reject(ctx, &tx_id, &reason.to_string())?;
                    accepted.retain(|tx| tx.get_id() != tx_id);
                }
                CommitOutcome::OutputExists { tx_id, outpoint } => {
                    if !accepted.iter().any(|tx| tx.get_id() == tx_id) {
                        // The reward collided; nothing in the pool is at fault
                        error!("Block {} would overwrite output {outpoint}", block.get_index());
                        return Err(LedgerError::DuplicateTransaction(tx_id));
                    }
                    let reason = format!("output {outpoint} already exists");
                    self.reject(ctx, &tx_id, &reason)?;
                    accepted.retain(|tx| tx.get_id() != tx_id);
                }
            }
        }

        warn!("Gave up assembling after {attempts} attempt(s)");
        Err(LedgerError::TipContention { attempts })
    }

    fn contention(&self, ctx: &CallerContext, attempt: u32) -> Result<()> {
        let current_tip_hash = self
            .store
            .get_tip()?
            .map(|tip| tip.get_hash().to_string())
            .unwrap_or_default();
        warn!("Tip moved to {current_tip_hash} while mining, restarting");
        self.audit.record(AuditRecord::new(
            ctx,
            AuditEvent::TipContention {
                attempt,
                current_tip_hash,
            },
        ));
        Ok(())
    }

    fn mine_on(
        &self,
        tip: &Block,
        accepted: &[Transaction],
        miner_wallet_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<MiningResult> {
        let index = tip.get_index() + 1;
        // Strictly increasing, so a miner's reward ids never repeat
        let timestamp = current_timestamp()?.max(tip.get_timestamp() + 1);

        let mut transactions = accepted.to_vec();
        if let Some(miner) = miner_wallet_id {
            if !self.mining.reward.is_zero() {
                transactions.push(Transaction::new_system(
                    TransactionKind::MiningReward,
                    miner,
                    self.mining.reward,
                    &format!("block {index}"),
                    timestamp,
                )?);
            }
        }

        let ids: Vec<&str> = transactions.iter().map(Transaction::get_id).collect();
        let header = BlockHeader {
            index,
            timestamp,
            prev_hash: tip.get_hash().to_string(),
            merkle_root: merkle_root(&ids),
            difficulty: self.mining.difficulty,
            miner_wallet_id: miner_wallet_id.map(str::to_string),
        };

        let mut tip_moved = false;
        let pow = ProofOfWork::new(header, &self.mining)?;
        let mined = pow.mine_block(transactions, || {
            if cancel.is_cancelled() {
                return true;
            }
            tip_moved = match self.store.get_tip() {
                Ok(Some(current)) => current.get_hash() != tip.get_hash(),
                _ => false,
            };
            tip_moved
        });

        match mined {
            Ok(block) => Ok(MiningResult::Mined(block)),
            Err(LedgerError::MiningInterrupted(_)) if tip_moved => Ok(MiningResult::TipMoved),
            Err(e) => Err(e),
        }
    }

    /// Re-run the admission checks on claimed entries; failures are marked failed and
    /// their locks released.
    fn screen(&self, ctx: &CallerContext, entries: Vec<PendingEntry>) -> Result<Vec<Transaction>> {
        let mut seen: HashSet<OutPoint> = HashSet::new();
        let mut accepted = vec![];

        for entry in entries {
            let tx = entry.transaction;
            match self.check(ctx, &tx, &seen)? {
                Ok(()) => {
                    seen.extend(tx.outpoints());
                    accepted.push(tx);
                }
                Err(reason) => self.reject(ctx, tx.get_id(), &reason)?,
            }
        }

        if accepted.is_empty() {
            return Err(LedgerError::NoValidTransactions);
        }
        Ok(accepted)
    }

    fn reject(&self, ctx: &CallerContext, tx_id: &str, reason: &str) -> Result<()> {
        warn!("Excluding transaction {tx_id}: {reason}");
        self.pool.fail(tx_id)?;
        self.audit.record(AuditRecord::new(
            ctx,
            AuditEvent::EntryFailed {
                tx_id: tx_id.to_string(),
                reason: reason.to_string(),
            },
        ));
        Ok(())
    }

    /// Outer `Result` is a store failure, inner `Err` the reason the entry is rejected
    fn check(
        &self,
        ctx: &CallerContext,
        tx: &Transaction,
        seen: &HashSet<OutPoint>,
    ) -> Result<std::result::Result<(), String>> {
        if tx.compute_id() != tx.get_id() {
            return Ok(Err("id does not match the transaction contents".to_string()));
        }
        let first = match tx.get_outputs().first() {
            Some(output) => output,
            None => return Ok(Err("transaction has no outputs".to_string())),
        };
        if first.get_owner_wallet_id() != tx.get_receiver_wallet_id()
            || first.get_value() != tx.get_amount()
        {
            return Ok(Err("first output does not pay the receiver".to_string()));
        }
        let total_out = match tx.total_output() {
            Ok(total) => total,
            Err(e) => return Ok(Err(e.to_string())),
        };

        match tx.verify_signature() {
            Err(_) => {
                self.signature_invalid(ctx, tx);
                Ok(Err("signature does not verify".to_string()))
            }
            Ok(SignatureCheck::ExemptNoInputs) => {
                self.audit.record(AuditRecord::new(
                    ctx,
                    AuditEvent::SignatureExempt {
                        tx_id: tx.get_id().to_string(),
                    },
                ));
                if tx.get_sender_wallet_id() != SYSTEM_WALLET_ID
                    || tx.get_kind() != TransactionKind::Issuance
                {
                    return Ok(Err("only issuance may carry no inputs".to_string()));
                }
                if tx.get_outputs().len() != 1 || total_out != tx.get_amount() {
                    return Ok(Err("issuance must have a single output".to_string()));
                }
                Ok(Ok(()))
            }
            Ok(SignatureCheck::Verified) => {
                let bound = self
                    .store
                    .get_wallet(tx.get_sender_wallet_id())?
                    .is_some_and(|wallet| tx.is_signed_by(&wallet.public_key));
                if !bound {
                    self.signature_invalid(ctx, tx);
                    return Ok(Err("signer is not the sender's registered key".to_string()));
                }
                if tx.get_outputs()[1..]
                    .iter()
                    .any(|o| o.get_owner_wallet_id() != tx.get_sender_wallet_id())
                {
                    return Ok(Err("change must return to the sender".to_string()));
                }
                self.check_inputs(tx, seen, total_out)
            }
        }
    }

    fn check_inputs(
        &self,
        tx: &Transaction,
        seen: &HashSet<OutPoint>,
        total_out: Amount,
    ) -> Result<std::result::Result<(), String>> {
        let mut own = HashSet::new();
        let mut total_in = Amount::ZERO;

        for outpoint in tx.outpoints() {
            if seen.contains(&outpoint) || !own.insert(outpoint.clone()) {
                return Ok(Err(format!("input {outpoint} is spent twice in this block")));
            }
            let utxo = match self.store.get_utxo(&outpoint)? {
                Some(utxo) => utxo,
                None => return Ok(Err(format!("input {outpoint} does not exist"))),
            };
            if utxo.owner_wallet_id != tx.get_sender_wallet_id() {
                return Ok(Err(format!("input {outpoint} is not owned by the sender")));
            }
            if utxo.spent {
                let reason = LedgerError::DoubleSpend {
                    tx_id: tx.get_id().to_string(),
                    outpoint: outpoint.to_string(),
                };
                return Ok(Err(reason.to_string()));
            }
            if !utxo.spendable_by(tx.get_id()) {
                let reason = LedgerError::LockConflict {
                    tx_id: tx.get_id().to_string(),
                    outpoint: outpoint.to_string(),
                };
                return Ok(Err(reason.to_string()));
            }
            total_in = match total_in.checked_add(utxo.amount) {
                Some(total) => total,
                None => return Ok(Err("input total overflows".to_string())),
            };
        }

        if total_in != total_out {
            return Ok(Err(format!(
                "inputs ({total_in}) do not equal outputs ({total_out})"
            )));
        }
        Ok(Ok(()))
    }

    fn signature_invalid(&self, ctx: &CallerContext, tx: &Transaction) {
        error!("Invalid signature on transaction {}", tx.get_id());
        self.audit.record(AuditRecord::new(
            ctx,
            AuditEvent::SignatureInvalid {
                tx_id: tx.get_id().to_string(),
            },
        ));
    }
}
