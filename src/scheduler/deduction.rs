// Periodic percentage deduction: every eligible wallet pays `rate_bps` of its spendable
// balance to the pool wallet once per calendar month

use crate::audit::AuditEvent;
use crate::config::DeductionConfig;
use crate::core::{
    Amount, Block, CallerContext, CancellationToken, Ledger, Transaction, TransactionKind,
    TransferRequest,
};
use crate::error::{ErrorCategory, Result};
use crate::scheduler::{RecurringTask, SingletonGuard, TaskHandle};
use crate::storage::{DeductionRecord, WalletRecord};
use crate::wallet::KeyVault;
use chrono::{DateTime, Datelike, Timelike, Utc};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

const JOB_NAME: &str = "deduction";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDeduction {
    pub wallet_id: String,
    pub tx_id: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDeduction {
    pub wallet_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct DeductionReport {
    pub period: String,
    pub applied: Vec<AppliedDeduction>,
    pub skipped: Vec<SkippedDeduction>,
    /// Block holding the applied deductions; `None` when nothing was applied
    pub block: Option<Block>,
}

enum Outcome {
    Applied(Transaction),
    Skipped(String),
}

/// `YYYY-MM` of `now`
pub fn period_of(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

pub struct DeductionJob {
    ledger: Arc<Ledger>,
    vault: Arc<KeyVault>,
    config: DeductionConfig,
    guard: SingletonGuard,
    cancel: CancellationToken,
}

impl DeductionJob {
    pub fn new(ledger: Arc<Ledger>, vault: Arc<KeyVault>) -> DeductionJob {
        let config = ledger.config().deduction.clone();
        DeductionJob {
            ledger,
            vault,
            config,
            guard: SingletonGuard::new(JOB_NAME),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancels the block assembly of an in-flight run
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Deduct from every eligible wallet for `period` and mine the result.
    pub fn run(&self, ctx: &CallerContext, period: &str) -> Result<DeductionReport> {
        let _permit = self.guard.try_acquire()?;
        info!("Running deduction for period {period}");
        self.ledger
            .register_system_wallet(ctx, &self.config.pool_wallet_id)?;

        let mut report = DeductionReport {
            period: period.to_string(),
            applied: vec![],
            skipped: vec![],
            block: None,
        };

        for wallet in self.ledger.wallets()? {
            match self.deduct(ctx, &wallet, period)? {
                Outcome::Applied(tx) => {
                    self.ledger.record_audit(
                        ctx,
                        AuditEvent::DeductionApplied {
                            wallet_id: wallet.wallet_id.clone(),
                            tx_id: tx.get_id().to_string(),
                            amount: tx.get_amount().to_string(),
                            period: period.to_string(),
                        },
                    );
                    report.applied.push(AppliedDeduction {
                        wallet_id: wallet.wallet_id,
                        tx_id: tx.get_id().to_string(),
                        amount: tx.get_amount(),
                    });
                }
                Outcome::Skipped(reason) => {
                    if wallet.wallet_id != self.config.pool_wallet_id {
                        self.ledger.record_audit(
                            ctx,
                            AuditEvent::DeductionSkipped {
                                wallet_id: wallet.wallet_id.clone(),
                                reason: reason.clone(),
                            },
                        );
                    }
                    report.skipped.push(SkippedDeduction {
                        wallet_id: wallet.wallet_id,
                        reason,
                    });
                }
            }
        }

        if !report.applied.is_empty() {
            let entries = self
                .ledger
                .pending()?
                .into_iter()
                .filter(|e| report.applied.iter().any(|a| a.tx_id == e.id))
                .collect();
            report.block = Some(
                self.ledger
                    .assemble_entries(ctx, entries, None, &self.cancel)?,
            );
        }

        info!(
            "Deduction for {period}: {} applied, {} skipped",
            report.applied.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Run for the current month when `now` falls on the configured day and hour.
    pub fn run_if_due(
        &self,
        ctx: &CallerContext,
        now: DateTime<Utc>,
    ) -> Result<Option<DeductionReport>> {
        if now.day() != self.config.day_of_month || now.hour() != self.config.hour {
            return Ok(None);
        }
        self.run(ctx, &period_of(now)).map(Some)
    }

    /// Check the calendar every `interval_secs` on a background thread.
    pub fn schedule(job: Arc<DeductionJob>) -> Result<TaskHandle> {
        let interval = Duration::from_secs(job.config.interval_secs);
        RecurringTask::new(JOB_NAME, interval).spawn(move || {
            job.run_if_due(&CallerContext::system(), Utc::now())
                .map(|_| ())
        })
    }

    fn deduct(&self, ctx: &CallerContext, wallet: &WalletRecord, period: &str) -> Result<Outcome> {
        if wallet.wallet_id == self.config.pool_wallet_id {
            return Ok(Outcome::Skipped("deduction pool".to_string()));
        }
        if wallet.sealed_key.is_none() {
            return Ok(Outcome::Skipped("no custodial key".to_string()));
        }
        if wallet.last_deduction_period.as_deref() == Some(period) {
            return Ok(Outcome::Skipped(format!("already deducted for {period}")));
        }

        let spendable = Amount::sum(
            self.ledger
                .store()
                .find_unspent_unlocked(&wallet.wallet_id)?
                .iter()
                .map(|u| u.amount),
        )?;
        let amount = spendable.percent_bps(self.config.rate_bps);
        if amount.is_zero() || amount < self.config.min_amount {
            return Ok(Outcome::Skipped(format!(
                "{amount} is below the minimum of {}",
                self.config.min_amount
            )));
        }

        let key = self.ledger.signing_key(&wallet.wallet_id, &self.vault)?;
        let note = format!("deduction {period}");
        let request = TransferRequest {
            sender_wallet_id: &wallet.wallet_id,
            receiver_wallet_id: &self.config.pool_wallet_id,
            amount,
            note: &note,
            kind: TransactionKind::Deduction,
        };
        match self.ledger.create_special_transaction(ctx, request, &key) {
            Ok(tx) => {
                self.ledger.record_deduction(&DeductionRecord {
                    period: period.to_string(),
                    wallet_id: wallet.wallet_id.clone(),
                    tx_id: tx.get_id().to_string(),
                    amount,
                    balance_at_deduction: spendable,
                    created_at: tx.get_timestamp(),
                })?;
                Ok(Outcome::Applied(tx))
            }
            Err(e) if e.category() != ErrorCategory::Internal => {
                warn!("Skipping deduction for {}: {e}", wallet.wallet_id);
                Ok(Outcome::Skipped(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use crate::config::{LedgerConfig, MiningConfig, VaultConfig};
    use crate::error::LedgerError;
    use crate::storage::MemoryStore;
    use crate::wallet::Wallet;
    use chrono::TimeZone;

    struct Fixture {
        ledger: Arc<Ledger>,
        job: DeductionJob,
        sink: Arc<MemorySink>,
        alice: Wallet,
        bob: Wallet,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(MemorySink::new());
        let config = LedgerConfig {
            mining: MiningConfig {
                difficulty: 1,
                ..MiningConfig::default()
            },
            ..LedgerConfig::default()
        };
        let ledger =
            Arc::new(Ledger::open(Arc::new(MemoryStore::new()), config, sink.clone()).unwrap());
        let vault = Arc::new(
            KeyVault::new(
                "correct horse battery",
                &VaultConfig {
                    memory_kib: 64,
                    iterations: 1,
                },
            )
            .unwrap(),
        );

        let ctx = CallerContext::system();
        let alice = ledger.register_wallet(&ctx, &vault).unwrap();
        let bob = ledger.register_wallet(&ctx, &vault).unwrap();
        ledger
            .issue(&ctx, alice.wallet_id(), Amount::from_coins(100).unwrap(), "")
            .unwrap();
        // 0.1 coin at 2.5% is below the 0.01 minimum
        ledger
            .issue(&ctx, bob.wallet_id(), Amount::parse("0.1").unwrap(), "")
            .unwrap();
        ledger
            .assemble_block(&ctx, None, &CancellationToken::new())
            .unwrap();

        Fixture {
            job: DeductionJob::new(Arc::clone(&ledger), vault),
            ledger,
            sink,
            alice,
            bob,
        }
    }

    #[test]
    fn test_run_deducts_and_mines() {
        let f = fixture();
        let ctx = CallerContext::system();
        let report = f.job.run(&ctx, "2026-10").unwrap();

        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].wallet_id, f.alice.wallet_id());
        assert_eq!(report.applied[0].amount, Amount::parse("2.5").unwrap());
        assert!(report
            .skipped
            .iter()
            .any(|s| s.wallet_id == f.bob.wallet_id()));

        let block = report.block.unwrap();
        assert_eq!(block.get_transactions().len(), 1);
        assert_eq!(
            block.get_transactions()[0].get_kind(),
            TransactionKind::Deduction
        );
        assert!(block.get_transactions()[0].is_special_transfer());

        assert_eq!(
            f.ledger.get_balance(f.alice.wallet_id()).unwrap(),
            Amount::parse("97.5").unwrap()
        );
        assert_eq!(
            f.ledger.get_balance("deduction_pool").unwrap(),
            Amount::parse("2.5").unwrap()
        );
        assert!(f
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, AuditEvent::DeductionApplied { .. })));
    }

    #[test]
    fn test_period_is_deducted_once() {
        let f = fixture();
        let ctx = CallerContext::system();
        f.job.run(&ctx, "2026-10").unwrap();
        let again = f.job.run(&ctx, "2026-10").unwrap();

        assert!(again.applied.is_empty());
        assert!(again.block.is_none());
        assert_eq!(
            f.ledger
                .wallet(f.alice.wallet_id())
                .unwrap()
                .last_deduction_period
                .as_deref(),
            Some("2026-10")
        );

        let next = f.job.run(&ctx, "2026-11").unwrap();
        assert_eq!(next.applied.len(), 1);
    }

    #[test]
    fn test_deductions_are_kept_per_period() {
        let f = fixture();
        let ctx = CallerContext::system();
        let report = f.job.run(&ctx, "2026-10").unwrap();

        let records = f.ledger.deduction_records(Some("2026-10")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].wallet_id, f.alice.wallet_id());
        assert_eq!(records[0].tx_id, report.applied[0].tx_id);
        assert_eq!(records[0].balance_at_deduction, Amount::from_coins(100).unwrap());
        assert!(f.ledger.deduction_records(Some("2026-11")).unwrap().is_empty());

        let summary = f.ledger.deduction_report("2026-10").unwrap();
        assert_eq!(summary.total, Amount::parse("2.5").unwrap());
        assert_eq!(summary.confirmed, summary.total);
        assert!(matches!(
            summary.lines[0].status,
            Some(crate::core::TransactionStatus::Confirmed { .. })
        ));
        assert_eq!(f.ledger.stats().unwrap().deductions, 1);
    }

    #[test]
    fn test_run_if_due_follows_calendar() {
        let f = fixture();
        let ctx = CallerContext::system();
        let not_due = Utc.with_ymd_and_hms(2026, 10, 2, 0, 0, 0).unwrap();
        let wrong_hour = Utc.with_ymd_and_hms(2026, 10, 1, 5, 0, 0).unwrap();
        let due = Utc.with_ymd_and_hms(2026, 10, 1, 0, 30, 0).unwrap();

        assert!(f.job.run_if_due(&ctx, not_due).unwrap().is_none());
        assert!(f.job.run_if_due(&ctx, wrong_hour).unwrap().is_none());
        let report = f.job.run_if_due(&ctx, due).unwrap().unwrap();
        assert_eq!(report.period, "2026-10");
    }

    #[test]
    fn test_overlapping_run_is_refused() {
        let f = fixture();
        let _permit = f.job.guard.try_acquire().unwrap();

        assert!(matches!(
            f.job.run(&CallerContext::system(), "2026-10"),
            Err(LedgerError::JobAlreadyRunning(_))
        ));
    }

    #[test]
    fn test_period_of() {
        let now = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        assert_eq!(period_of(now), "2026-03");
    }
}
