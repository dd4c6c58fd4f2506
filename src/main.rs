// Entry point for the custody-ledger CLI
use chrono::Utc;
use clap::Parser;
use custody_ledger::cli::VAULT_PASSPHRASE_KEY;
use custody_ledger::core::Direction;
use custody_ledger::scheduler::period_of;
use custody_ledger::{
    CallerContext, CancellationToken, ChainStatus, Command, DeductionJob, KeyVault, Ledger,
    LedgerConfig, LogSink, Opt, Result,
};
use log::{error, LevelFilter};
use std::io::BufRead;
use std::sync::Arc;
use std::{env, io, process};

fn main() {
    // Info level shows block and mining progress plus the audit trail
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn vault(config: &LedgerConfig) -> Result<KeyVault> {
    let passphrase = env::var(VAULT_PASSPHRASE_KEY).map_err(|_| {
        custody_ledger::LedgerError::Config(format!("{VAULT_PASSPHRASE_KEY} is not set"))
    })?;
    KeyVault::new(&passphrase, &config.vault)
}

fn run_command(opt: Opt) -> Result<()> {
    let config = LedgerConfig::load(opt.config.as_deref())?;
    let ledger = Ledger::open_sled(config.clone(), Arc::new(LogSink))?;
    let ctx = CallerContext::system();

    match opt.command {
        Command::Init => {
            ledger.register_system_wallet(&ctx, &config.deduction.pool_wallet_id)?;
            let blocks = ledger.blocks()?;
            if let Some(genesis) = blocks.first() {
                println!("Genesis block: {}", genesis.get_hash());
            }
            println!("Done!");
        }
        Command::CreateWallet => {
            let wallet = ledger.register_wallet(&ctx, &vault(&config)?)?;
            println!("Your new wallet: {}", wallet.wallet_id());
        }
        Command::Balance { wallet } => {
            let balance = ledger.get_balance(&wallet)?;
            println!("Balance of {wallet}: {balance}");
        }
        Command::Utxos { wallet } => {
            for utxo in ledger.utxos(&wallet)? {
                let state = match &utxo.locked_by {
                    Some(locker) => format!("locked by {locker}"),
                    None => "available".to_string(),
                };
                println!(
                    "{} value = {}, block = {}, {state}",
                    utxo.key(),
                    utxo.amount,
                    utxo.origin_block_index
                );
            }
        }
        Command::Issue {
            wallet,
            amount,
            note,
            mine,
        } => {
            let tx = ledger.issue(&ctx, &wallet, amount, &note)?;
            println!("Pending issuance: {}", tx.get_id());
            if mine {
                let block = ledger.assemble_block(&ctx, None, &CancellationToken::new())?;
                println!("Mined block {}: {}", block.get_index(), block.get_hash());
            }
        }
        Command::Send {
            from,
            to,
            amount,
            note,
            mine,
        } => {
            let key = ledger.signing_key(&from, &vault(&config)?)?;
            let tx = ledger.create_transaction(&ctx, &from, &to, amount, &note, &key)?;
            println!("Pending transaction: {}", tx.get_id());
            if mine {
                let block = ledger.assemble_block(&ctx, None, &CancellationToken::new())?;
                println!("Mined block {}: {}", block.get_index(), block.get_hash());
            }
        }
        Command::Mine { miner } => {
            let block =
                ledger.assemble_block(&ctx, miner.as_deref(), &CancellationToken::new())?;
            println!(
                "Mined block {} with {} transaction(s): {}",
                block.get_index(),
                block.get_transactions().len(),
                block.get_hash()
            );
        }
        Command::Pending => {
            for entry in ledger.pending()? {
                let tx = &entry.transaction;
                println!(
                    "{} [{}] {} {} -> {}: {}",
                    entry.id,
                    entry.status,
                    tx.get_kind(),
                    tx.get_sender_wallet_id(),
                    tx.get_receiver_wallet_id(),
                    tx.get_amount()
                );
            }
        }
        Command::Cancel { tx_id } => {
            ledger.cancel_transaction(&ctx, &tx_id)?;
            println!("Cancelled {tx_id}");
        }
        Command::Transaction { tx_id } => {
            let record = ledger.find_transaction(&tx_id)?;
            let tx = &record.transaction;
            println!("Transaction {} ({})", tx.get_id(), tx.get_kind());
            println!("Status: {}", record.status);
            println!(
                "{} -> {}: {}",
                tx.get_sender_wallet_id(),
                tx.get_receiver_wallet_id(),
                tx.get_amount()
            );
            if !tx.get_note().is_empty() {
                println!("Note: {}", tx.get_note());
            }
        }
        Command::History { wallet } => {
            for entry in ledger.history(&wallet)? {
                let tx = &entry.transaction;
                let counterparty = match entry.direction {
                    Direction::Sent => tx.get_receiver_wallet_id(),
                    Direction::Received => tx.get_sender_wallet_id(),
                };
                println!(
                    "{} {} {} {counterparty} [{}] {}",
                    tx.get_id(),
                    entry.direction,
                    tx.get_amount(),
                    entry.status,
                    tx.get_kind()
                );
            }
        }
        Command::Deductions { period } => {
            let period = period.unwrap_or_else(|| period_of(Utc::now()));
            let summary = ledger.deduction_report(&period)?;
            for line in &summary.lines {
                let status = line
                    .status
                    .as_ref()
                    .map_or_else(|| "cancelled".to_string(), ToString::to_string);
                println!(
                    "{} {} of {} in {} [{status}]",
                    line.record.wallet_id,
                    line.record.amount,
                    line.record.balance_at_deduction,
                    line.record.tx_id
                );
            }
            println!(
                "Period {}: {} deduction(s), total {}, confirmed {}",
                summary.period,
                summary.lines.len(),
                summary.total,
                summary.confirmed
            );
        }
        Command::Stats => {
            let stats = ledger.stats()?;
            println!("Blocks: {}", stats.blocks);
            println!("Transactions: {}", stats.transactions);
            println!("Deductions: {}", stats.deductions);
            println!("Pending: {}", stats.pending);
            println!("Wallets: {}", stats.wallets);
            println!("Difficulty: {}", stats.difficulty);
            println!("Tip: {}", stats.tip_hash);
        }
        Command::Validate => match ledger.validate_chain(&ctx)? {
            ChainStatus::Valid => println!("Chain is valid"),
            ChainStatus::Invalid { at_index, reason } => {
                println!("Chain is invalid at block {at_index}: {reason}");
                // Close the database before exiting
                drop(ledger);
                process::exit(2);
            }
        },
        Command::Printchain => {
            for block in ledger.blocks()?.iter().rev() {
                println!("Block {}", block.get_index());
                println!("Pre block hash: {}", block.get_prev_hash());
                println!("Cur block hash: {}", block.get_hash());
                println!("Merkle root: {}", block.get_merkle_root());
                println!("Timestamp: {}", block.get_timestamp());
                println!(
                    "Nonce: {}, difficulty: {}",
                    block.get_nonce(),
                    block.get_difficulty()
                );
                for tx in block.get_transactions() {
                    println!("- Transaction {} ({})", tx.get_id(), tx.get_kind());
                    for input in tx.get_inputs() {
                        println!("-- Input {}", input.outpoint());
                    }
                    for output in tx.get_outputs() {
                        println!(
                            "-- Output value = {}, to = {}",
                            output.get_value(),
                            output.get_owner_wallet_id()
                        );
                    }
                }
                println!()
            }
        }
        Command::Deduct { period } => {
            let job = DeductionJob::new(Arc::new(ledger), Arc::new(vault(&config)?));
            let period = period.unwrap_or_else(|| period_of(Utc::now()));
            let report = job.run(&ctx, &period)?;
            for applied in &report.applied {
                println!("Deducted {} from {}", applied.amount, applied.wallet_id);
            }
            for skipped in &report.skipped {
                println!("Skipped {}: {}", skipped.wallet_id, skipped.reason);
            }
            if let Some(block) = &report.block {
                println!("Mined block {}: {}", block.get_index(), block.get_hash());
            }
        }
        Command::Scheduler => {
            let job = Arc::new(DeductionJob::new(
                Arc::new(ledger),
                Arc::new(vault(&config)?),
            ));
            let cancel = job.cancel_token();
            let handle = DeductionJob::schedule(job)?;
            println!("Scheduler running, press Enter to stop");

            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            cancel.cancel();
            handle.stop()?;
        }
    }
    Ok(())
}
