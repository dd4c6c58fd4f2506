//! Ledger integration tests
//!
//! Drives the public `Ledger` facade against the sled store: transfers end to end,
//! tamper detection, and the races the UTXO claims exist for.

use custody_ledger::config::{LedgerConfig, MiningConfig, VaultConfig};
use custody_ledger::core::{
    validate_chain, Amount, Block, CallerContext, CancellationToken, ChainStatus,
    InvalidReason, Ledger, OutPoint, TransactionKind, TransactionStatus, TransferDraft,
};
use custody_ledger::storage::{PendingEntry, PendingStatus};
use custody_ledger::{AuditEvent, KeyVault, LedgerError, MemorySink, Wallet};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn config(dir: &Path) -> LedgerConfig {
    LedgerConfig {
        data_dir: dir.to_path_buf(),
        mining: MiningConfig {
            difficulty: 1,
            ..MiningConfig::default()
        },
        ..LedgerConfig::default()
    }
}

fn vault() -> KeyVault {
    KeyVault::new(
        "integration passphrase",
        &VaultConfig {
            memory_kib: 64,
            iterations: 1,
        },
    )
    .unwrap()
}

/// A ledger where `alice` owns a single mined UTXO of 100 coins
fn funded_ledger(dir: &Path) -> (Ledger, Arc<MemorySink>, Wallet, Wallet) {
    let sink = Arc::new(MemorySink::new());
    let ledger = Ledger::open_sled(config(dir), sink.clone()).unwrap();
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
    (ledger, sink, alice, bob)
}

#[test]
fn test_end_to_end_transfer() {
    let temp_dir = tempdir().unwrap();
    let (ledger, _, alice, bob) = funded_ledger(temp_dir.path());
    let ctx = CallerContext::for_wallet(alice.wallet_id());
    let original = ledger.utxos(alice.wallet_id()).unwrap()[0].outpoint();

    let tx = ledger
        .create_transaction(
            &ctx,
            alice.wallet_id(),
            bob.wallet_id(),
            Amount::from_coins(40).unwrap(),
            "",
            alice.signing_key(),
        )
        .unwrap();

    // Outputs: 40 to bob, 60 change to alice
    let outputs = tx.get_outputs();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].get_owner_wallet_id(), bob.wallet_id());
    assert_eq!(outputs[0].get_value(), Amount::from_coins(40).unwrap());
    assert_eq!(outputs[1].get_owner_wallet_id(), alice.wallet_id());
    assert_eq!(outputs[1].get_value(), Amount::from_coins(60).unwrap());

    let block = ledger
        .assemble_block(&ctx, None, &CancellationToken::new())
        .unwrap();
    assert_eq!(block.get_index(), 2);

    assert_eq!(
        ledger.get_balance(alice.wallet_id()).unwrap(),
        Amount::from_coins(60).unwrap()
    );
    assert_eq!(
        ledger.get_balance(bob.wallet_id()).unwrap(),
        Amount::from_coins(40).unwrap()
    );
    let spent = ledger.store().get_utxo(&original).unwrap().unwrap();
    assert!(spent.spent);
    assert_eq!(spent.spent_in_tx.as_deref(), Some(tx.get_id()));
    assert_eq!(ledger.validate_chain(&ctx).unwrap(), ChainStatus::Valid);
}

#[test]
fn test_flipped_hash_is_detected() {
    let temp_dir = tempdir().unwrap();
    let (ledger, _, _, _) = funded_ledger(temp_dir.path());
    let mut blocks = ledger.blocks().unwrap();
    assert_eq!(validate_chain(&blocks), ChainStatus::Valid);

    let mut json = serde_json::to_value(&blocks[1]).unwrap();
    let hash = json["hash"].as_str().unwrap().to_string();
    let flipped = if hash.starts_with('0') { "1" } else { "0" };
    json["hash"] = format!("{flipped}{}", &hash[1..]).into();
    blocks[1] = serde_json::from_value::<Block>(json).unwrap();

    assert_eq!(
        validate_chain(&blocks),
        ChainStatus::Invalid {
            at_index: 1,
            reason: InvalidReason::HashMismatch
        }
    );
}

#[test]
fn test_concurrent_transfers_claim_one_utxo_once() {
    let temp_dir = tempdir().unwrap();
    let (ledger, _, alice, bob) = funded_ledger(temp_dir.path());
    let ledger = Arc::new(ledger);

    let handles: Vec<_> = [30u64, 40u64]
        .into_iter()
        .map(|coins| {
            let ledger = Arc::clone(&ledger);
            let key = alice.signing_key().clone();
            let (from, to) = (alice.wallet_id().to_string(), bob.wallet_id().to_string());
            thread::spawn(move || {
                ledger.create_transaction(
                    &CallerContext::system(),
                    &from,
                    &to,
                    Amount::from_coins(coins).unwrap(),
                    "",
                    &key,
                )
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            failure,
            LedgerError::LockConflict { .. } | LedgerError::InsufficientFunds { .. }
        ));
    }
    assert_eq!(ledger.pending().unwrap().len(), 1);
}

#[test]
fn test_spent_output_cannot_be_mined_again() {
    let temp_dir = tempdir().unwrap();
    let (ledger, sink, alice, bob) = funded_ledger(temp_dir.path());
    let ctx = CallerContext::system();
    let original = ledger.utxos(alice.wallet_id()).unwrap()[0].clone();

    ledger
        .create_transaction(
            &ctx,
            alice.wallet_id(),
            bob.wallet_id(),
            Amount::from_coins(100).unwrap(),
            "first",
            alice.signing_key(),
        )
        .unwrap();
    ledger
        .assemble_block(&ctx, None, &CancellationToken::new())
        .unwrap();

    // Replay a correctly signed spend of the same output straight into the pool
    let replay = TransferDraft {
        kind: TransactionKind::Transfer,
        sender_wallet_id: alice.wallet_id().to_string(),
        receiver_wallet_id: bob.wallet_id().to_string(),
        amount: original.amount,
        change: Amount::ZERO,
        note: "again".to_string(),
        timestamp: 1,
        spends: vec![OutPoint::new(original.tx_id.clone(), original.output_index)],
    }
    .sign(alice.signing_key())
    .unwrap();
    ledger
        .store()
        .insert_pending_entry(&PendingEntry::new(replay.clone(), 1))
        .unwrap();

    assert!(matches!(
        ledger.assemble_block(&ctx, None, &CancellationToken::new()),
        Err(LedgerError::NoValidTransactions)
    ));
    assert_eq!(
        ledger
            .store()
            .get_pending_entry(replay.get_id())
            .unwrap()
            .unwrap()
            .status,
        PendingStatus::Failed
    );
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, AuditEvent::EntryFailed { tx_id, .. } if tx_id == replay.get_id())));
    assert_eq!(
        ledger.get_balance(bob.wallet_id()).unwrap(),
        Amount::from_coins(100).unwrap()
    );
}

#[test]
fn test_concurrent_assemblers_mine_one_block() {
    let temp_dir = tempdir().unwrap();
    let (ledger, _, alice, bob) = funded_ledger(temp_dir.path());
    ledger
        .create_transaction(
            &CallerContext::system(),
            alice.wallet_id(),
            bob.wallet_id(),
            Amount::from_coins(10).unwrap(),
            "",
            alice.signing_key(),
        )
        .unwrap();
    let ledger = Arc::new(ledger);

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                ledger.assemble_block(&CallerContext::system(), None, &CancellationToken::new())
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(ledger.blocks().unwrap().len(), 3);
    assert_eq!(
        ledger.get_balance(bob.wallet_id()).unwrap(),
        Amount::from_coins(10).unwrap()
    );
    assert!(ledger
        .validate_chain(&CallerContext::system())
        .unwrap()
        .is_valid());
}

#[test]
fn test_ledger_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    let (alice_id, tip_hash) = {
        let (ledger, _, alice, _) = funded_ledger(temp_dir.path());
        let tip = ledger.blocks().unwrap().last().unwrap().get_hash().to_string();
        (alice.wallet_id().to_string(), tip)
    };

    let ledger = Ledger::open_sled(config(temp_dir.path()), Arc::new(MemorySink::new())).unwrap();
    assert_eq!(
        ledger.get_balance(&alice_id).unwrap(),
        Amount::from_coins(100).unwrap()
    );
    assert_eq!(ledger.blocks().unwrap().last().unwrap().get_hash(), tip_hash);
    // The sealed key opens with the same passphrase
    assert!(ledger.signing_key(&alice_id, &vault()).is_ok());
    assert!(ledger
        .validate_chain(&CallerContext::system())
        .unwrap()
        .is_valid());
}

#[test]
fn test_transfers_racing_an_assembler_conserve_funds() {
    let temp_dir = tempdir().unwrap();
    let (ledger, _, alice, bob) = funded_ledger(temp_dir.path());
    let ledger = Arc::new(ledger);

    let miner = {
        let ledger = Arc::clone(&ledger);
        thread::spawn(move || {
            for _ in 0..20 {
                let _ =
                    ledger.assemble_block(&CallerContext::system(), None, &CancellationToken::new());
            }
        })
    };
    let sender = {
        let ledger = Arc::clone(&ledger);
        let key = alice.signing_key().clone();
        let (from, to) = (alice.wallet_id().to_string(), bob.wallet_id().to_string());
        thread::spawn(move || {
            (0..20)
                .map(|i| {
                    ledger.create_transaction(
                        &CallerContext::system(),
                        &from,
                        &to,
                        Amount::from_coins(1).unwrap(),
                        &format!("payment {i}"),
                        &key,
                    )
                })
                .collect::<Vec<_>>()
        })
    };
    miner.join().unwrap();
    let results = sender.join().unwrap();
    // Whatever is still waiting goes into one last block
    let _ = ledger.assemble_block(&CallerContext::system(), None, &CancellationToken::new());

    let created: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    for tx in &created {
        assert!(matches!(
            ledger.find_transaction(tx.get_id()).unwrap().status,
            TransactionStatus::Confirmed { .. }
        ));
    }
    // Funds are locked until the change is mined; ids repeat within one millisecond
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            failure,
            LedgerError::InsufficientFunds { .. } | LedgerError::DuplicateTransaction(_)
        ));
    }

    let paid = Amount::from_coins(created.len() as u64).unwrap();
    let alice_balance = ledger.get_balance(alice.wallet_id()).unwrap();
    let bob_balance = ledger.get_balance(bob.wallet_id()).unwrap();
    assert_eq!(bob_balance, paid);
    assert_eq!(
        alice_balance.checked_add(bob_balance).unwrap(),
        Amount::from_coins(100).unwrap()
    );
    assert_eq!(ledger.stats().unwrap().pending, 0);
    assert!(ledger
        .validate_chain(&CallerContext::system())
        .unwrap()
        .is_valid());
}
