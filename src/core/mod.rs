//! Core ledger functionality
//!
//! Amounts, transactions, blocks, merkle roots and proof-of-work, plus the three
//! components that move value: the transaction builder, the block assembler and the
//! chain validator, tied together by the [`Ledger`] facade, which also answers the
//! read-side queries in [`query`].

pub mod assembler;
pub mod block;
pub mod builder;
pub mod context;
pub mod ledger;
pub mod merkle;
pub mod monetary;
pub mod proof_of_work;
pub mod query;
pub mod transaction;
pub mod validator;

pub use assembler::{BlockAssembler, CancellationToken};
pub use block::{Block, BlockHeader, GENESIS_PREV_HASH};
pub use builder::{select_utxos, Selection, TransactionBuilder, TransferRequest};
pub use context::CallerContext;
pub use ledger::Ledger;
pub use merkle::merkle_root;
pub use monetary::{Amount, BPS_DENOMINATOR, DECIMALS, UNITS_PER_COIN};
pub use proof_of_work::{meets_difficulty, ProofOfWork};
pub use query::{
    ChainStats, DeductionLine, DeductionSummary, Direction, HistoryEntry, TransactionRecord,
    TransactionStatus,
};
pub use transaction::{
    signing_payload, transaction_id, OutPoint, SignatureCheck, TXInput, TXOutput, Transaction,
    TransactionKind, TransferDraft, SYSTEM_WALLET_ID,
};
pub use validator::{validate_chain, ChainStatus, InvalidReason};
