// Transaction construction: pick the sender's outputs, sign, claim the picked outputs so
// no other transaction can use them, then park the result in the pending pool

use crate::audit::{AuditEvent, AuditRecord, AuditSink};
use crate::core::{
    Amount, CallerContext, OutPoint, Transaction, TransactionKind, TransferDraft,
};
use crate::error::{LedgerError, Result};
use crate::storage::{LedgerStore, PendingEntry, PendingPool, Utxo};
use crate::utils::current_timestamp;
use crate::wallet::SigningKey;
use log::{error, info, warn};
use std::sync::Arc;

/// What a caller asks to move
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    pub sender_wallet_id: &'a str,
    pub receiver_wallet_id: &'a str,
    pub amount: Amount,
    pub note: &'a str,
    pub kind: TransactionKind,
}

impl<'a> TransferRequest<'a> {
    pub fn transfer(
        sender_wallet_id: &'a str,
        receiver_wallet_id: &'a str,
        amount: Amount,
        note: &'a str,
    ) -> TransferRequest<'a> {
        TransferRequest {
            sender_wallet_id,
            receiver_wallet_id,
            amount,
            note,
            kind: TransactionKind::Transfer,
        }
    }
}

/// Outputs picked to cover an amount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub utxos: Vec<Utxo>,
    pub total: Amount,
    pub change: Amount,
}

/// Accumulate available outputs in the given order until they cover `amount`.
pub fn select_utxos(candidates: &[Utxo], amount: Amount) -> Result<Selection> {
    let mut utxos = vec![];
    let mut total = Amount::ZERO;

    for utxo in candidates.iter().filter(|u| u.is_available()) {
        if total >= amount {
            break;
        }
        total = total
            .checked_add(utxo.amount)
            .ok_or_else(|| LedgerError::InvalidAmount("UTXO total overflows".to_string()))?;
        utxos.push(utxo.clone());
    }

    let change = total
        .checked_sub(amount)
        .ok_or(LedgerError::InsufficientFunds {
            required: amount,
            available: total,
        })?;

    Ok(Selection {
        utxos,
        total,
        change,
    })
}

pub struct TransactionBuilder {
    store: Arc<dyn LedgerStore>,
    pool: PendingPool,
    audit: Arc<dyn AuditSink>,
}

impl TransactionBuilder {
    pub fn new(store: Arc<dyn LedgerStore>, audit: Arc<dyn AuditSink>) -> TransactionBuilder {
        TransactionBuilder {
            pool: PendingPool::new(Arc::clone(&store)),
            store,
            audit,
        }
    }

    pub fn create_transaction(
        &self,
        ctx: &CallerContext,
        request: TransferRequest<'_>,
        signing_key: &SigningKey,
    ) -> Result<Transaction> {
        match self.build(ctx, request, signing_key) {
            Ok(tx) => Ok(tx),
            Err(e) => {
                self.audit.record(AuditRecord::new(
                    ctx,
                    AuditEvent::TransactionRejected {
                        sender_wallet_id: request.sender_wallet_id.to_string(),
                        reason: e.to_string(),
                    },
                ));
                Err(e)
            }
        }
    }

    fn build(
        &self,
        ctx: &CallerContext,
        request: TransferRequest<'_>,
        signing_key: &SigningKey,
    ) -> Result<Transaction> {
        if request.amount.is_zero() {
            return Err(LedgerError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }
        if request.sender_wallet_id == request.receiver_wallet_id {
            return Err(LedgerError::SelfTransfer(
                request.sender_wallet_id.to_string(),
            ));
        }
        let sender = self
            .store
            .get_wallet(request.sender_wallet_id)?
            .ok_or_else(|| LedgerError::WalletNotFound(request.sender_wallet_id.to_string()))?;
        if self.store.get_wallet(request.receiver_wallet_id)?.is_none() {
            return Err(LedgerError::WalletNotFound(
                request.receiver_wallet_id.to_string(),
            ));
        }

        let candidates = self.store.find_unspent_unlocked(request.sender_wallet_id)?;
        let selection = select_utxos(&candidates, request.amount)?;

        let timestamp = current_timestamp()?;
        let tx = TransferDraft {
            kind: request.kind,
            sender_wallet_id: request.sender_wallet_id.to_string(),
            receiver_wallet_id: request.receiver_wallet_id.to_string(),
            amount: request.amount,
            change: selection.change,
            note: request.note.to_string(),
            timestamp,
            spends: selection.utxos.iter().map(Utxo::outpoint).collect(),
        }
        .sign(signing_key)?;

        // The key must be the one registered for the sender, and the signature must hold
        if !tx.is_signed_by(&sender.public_key) || tx.verify_signature().is_err() {
            return Err(LedgerError::SignatureError(format!(
                "signature does not verify against the key of wallet {}",
                request.sender_wallet_id
            )));
        }

        // Assemblers only spend inputs locked by the spender, so the entry must not be
        // visible before every claim is held
        let mut claimed = Vec::with_capacity(selection.utxos.len());
        for utxo in &selection.utxos {
            let outpoint = utxo.outpoint();
            match self.store.conditional_lock(&outpoint, tx.get_id()) {
                Ok(true) => claimed.push(outpoint),
                Ok(false) => {
                    self.release(&claimed);
                    warn!(
                        "Transaction {} lost the claim on {outpoint}, rolled back",
                        tx.get_id()
                    );
                    self.audit.record(AuditRecord::new(
                        ctx,
                        AuditEvent::LockConflict {
                            tx_id: tx.get_id().to_string(),
                            outpoint: outpoint.to_string(),
                        },
                    ));
                    return Err(LedgerError::LockConflict {
                        tx_id: tx.get_id().to_string(),
                        outpoint: outpoint.to_string(),
                    });
                }
                Err(e) => {
                    self.release(&claimed);
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.pool.admit(&PendingEntry::new(tx.clone(), timestamp)) {
            self.release(&claimed);
            return Err(e);
        }

        info!(
            "Created {} transaction {}: {} -> {} ({})",
            tx.get_kind(),
            tx.get_id(),
            tx.get_sender_wallet_id(),
            tx.get_receiver_wallet_id(),
            tx.get_amount()
        );
        self.audit.record(AuditRecord::new(
            ctx,
            AuditEvent::TransactionCreated {
                tx_id: tx.get_id().to_string(),
                sender_wallet_id: tx.get_sender_wallet_id().to_string(),
                receiver_wallet_id: tx.get_receiver_wallet_id().to_string(),
                amount: tx.get_amount().to_string(),
                kind: tx.get_kind().to_string(),
            },
        ));
        Ok(tx)
    }

    /// Undo the locks taken by an aborted build. Only outputs this attempt locked are
    /// touched, an earlier entry with the same id keeps its own.
    fn release(&self, claimed: &[OutPoint]) {
        for outpoint in claimed {
            if let Err(e) = self.store.unlock(outpoint) {
                error!("Failed to release {outpoint} after an aborted build: {e}");
            }
        }
    }
}
