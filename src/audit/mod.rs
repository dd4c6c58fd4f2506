//! Structured audit trail
//!
//! Security-relevant ledger events form a closed set. Each one is wrapped in an
//! [`AuditRecord`] carrying the request id of the caller, then handed to an
//! [`AuditSink`]: [`LogSink`] writes JSON lines under the `audit` log target,
//! [`MemorySink`] keeps them for inspection.

use crate::core::CallerContext;
use crate::utils::current_timestamp;
use log::Level;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "audit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    WalletRegistered {
        wallet_id: String,
    },
    TransactionCreated {
        tx_id: String,
        sender_wallet_id: String,
        receiver_wallet_id: String,
        amount: String,
        kind: String,
    },
    TransactionRejected {
        sender_wallet_id: String,
        reason: String,
    },
    TransactionCancelled {
        tx_id: String,
    },
    SignatureExempt {
        tx_id: String,
    },
    SignatureInvalid {
        tx_id: String,
    },
    LockConflict {
        tx_id: String,
        outpoint: String,
    },
    EntryFailed {
        tx_id: String,
        reason: String,
    },
    BlockMined {
        index: u64,
        hash: String,
        nonce: u64,
        transactions: usize,
    },
    TipContention {
        attempt: u32,
        current_tip_hash: String,
    },
    MiningInterrupted {
        reason: String,
    },
    ChainValidated {
        valid: bool,
        at_index: Option<i64>,
        reason: Option<String>,
    },
    DeductionApplied {
        wallet_id: String,
        tx_id: String,
        amount: String,
        period: String,
    },
    DeductionSkipped {
        wallet_id: String,
        reason: String,
    },
}

impl AuditEvent {
    pub fn severity(&self) -> Level {
        match self {
            AuditEvent::SignatureInvalid { .. } => Level::Error,
            AuditEvent::ChainValidated { valid: false, .. } => Level::Error,
            AuditEvent::TransactionRejected { .. }
            | AuditEvent::LockConflict { .. }
            | AuditEvent::EntryFailed { .. }
            | AuditEvent::TipContention { .. }
            | AuditEvent::MiningInterrupted { .. }
            | AuditEvent::SignatureExempt { .. } => Level::Warn,
            _ => Level::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: i64,
    pub request_id: Uuid,
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    pub fn new(ctx: &CallerContext, event: AuditEvent) -> AuditRecord {
        AuditRecord {
            timestamp: current_timestamp().unwrap_or_default(),
            request_id: ctx.request_id,
            user_id: ctx.user_id.clone(),
            event,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Emits each record as one JSON line at the event's severity
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AuditSink for LogSink {
    fn record(&self, record: AuditRecord) {
        let level = record.event.severity();
        match serde_json::to_string(&record) {
            Ok(line) => log::log!(target: AUDIT_TARGET, level, "{line}"),
            Err(e) => log::error!(target: AUDIT_TARGET, "Failed to encode audit record: {e}"),
        }
    }
}

/// Collects records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(_) => {
                log::error!("Failed to acquire audit sink lock");
                Vec::new()
            }
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, record: AuditRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(_) => log::error!("Failed to acquire audit sink lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_flat_with_tag() {
        let ctx = CallerContext::system();
        let record = AuditRecord::new(
            &ctx,
            AuditEvent::SignatureInvalid {
                tx_id: "abc".to_string(),
            },
        );
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();

        assert_eq!(json["event"], "signature_invalid");
        assert_eq!(json["tx_id"], "abc");
        assert_eq!(json["request_id"], ctx.request_id.to_string());
    }

    #[test]
    fn test_severity() {
        assert_eq!(
            AuditEvent::SignatureInvalid {
                tx_id: String::new()
            }
            .severity(),
            Level::Error
        );
        assert_eq!(
            AuditEvent::ChainValidated {
                valid: true,
                at_index: None,
                reason: None
            }
            .severity(),
            Level::Info
        );
        assert_eq!(
            AuditEvent::ChainValidated {
                valid: false,
                at_index: Some(2),
                reason: None
            }
            .severity(),
            Level::Error
        );
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.record(AuditRecord::new(
            &CallerContext::system(),
            AuditEvent::WalletRegistered {
                wallet_id: "w".to_string(),
            },
        ));
        assert_eq!(sink.records().len(), 1);
        // LogSink must not panic without a logger installed
        LogSink.record(sink.records()[0].clone());
    }
}
