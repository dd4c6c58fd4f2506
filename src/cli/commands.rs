use crate::core::Amount;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Environment variable holding the key vault passphrase
pub const VAULT_PASSPHRASE_KEY: &str = "LEDGER_VAULT_PASSPHRASE";

#[derive(Debug, Parser)]
#[command(name = "custody-ledger")]
pub struct Opt {
    #[arg(long = "config", global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "init", about = "Create the ledger database and genesis block")]
    Init,
    #[command(name = "create-wallet", about = "Create a custodial wallet")]
    CreateWallet,
    #[command(name = "balance", about = "Get the balance of a wallet")]
    Balance {
        #[arg(help = "The wallet id")]
        wallet: String,
    },
    #[command(name = "utxos", about = "List the unspent outputs of a wallet")]
    Utxos {
        #[arg(help = "The wallet id")]
        wallet: String,
    },
    #[command(name = "issue", about = "Mint new funds to a wallet")]
    Issue {
        #[arg(help = "Receiving wallet id")]
        wallet: String,
        #[arg(help = "Amount in coins, up to 8 decimals")]
        amount: Amount,
        #[arg(long, default_value = "", help = "Free-form note")]
        note: String,
        #[arg(long, help = "Mine a block right away")]
        mine: bool,
    },
    #[command(name = "send", about = "Send funds between wallets")]
    Send {
        #[arg(help = "Source wallet id")]
        from: String,
        #[arg(help = "Destination wallet id")]
        to: String,
        #[arg(help = "Amount in coins, up to 8 decimals")]
        amount: Amount,
        #[arg(long, default_value = "", help = "Free-form note")]
        note: String,
        #[arg(long, help = "Mine a block right away")]
        mine: bool,
    },
    #[command(name = "mine", about = "Mine the pending transactions into a block")]
    Mine {
        #[arg(long, help = "Wallet receiving the mining reward")]
        miner: Option<String>,
    },
    #[command(name = "pending", about = "List pending transactions")]
    Pending,
    #[command(name = "cancel", about = "Cancel an unmined transaction")]
    Cancel {
        #[arg(help = "Transaction id")]
        tx_id: String,
    },
    #[command(name = "transaction", about = "Show a transaction and where it stands")]
    Transaction {
        #[arg(help = "Transaction id")]
        tx_id: String,
    },
    #[command(name = "history", about = "List what a wallet sent and received")]
    History {
        #[arg(help = "The wallet id")]
        wallet: String,
    },
    #[command(name = "deductions", about = "Report the deductions of a period")]
    Deductions {
        #[arg(long, help = "Period as YYYY-MM, defaults to the current month")]
        period: Option<String>,
    },
    #[command(name = "stats", about = "Print chain statistics")]
    Stats,
    #[command(name = "validate", about = "Validate the whole chain")]
    Validate,
    #[command(name = "printchain", about = "Print all blocks in the chain")]
    Printchain,
    #[command(name = "deduct", about = "Run the deduction job now")]
    Deduct {
        #[arg(long, help = "Period as YYYY-MM, defaults to the current month")]
        period: Option<String>,
    },
    #[command(name = "scheduler", about = "Run the deduction scheduler until Enter is pressed")]
    Scheduler,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let opt = Opt::try_parse_from([
            "custody-ledger",
            "send",
            "alice",
            "bob",
            "12.5",
            "--note",
            "rent",
            "--mine",
        ])
        .unwrap();

        match opt.command {
            Command::Send {
                from,
                to,
                amount,
                note,
                mine,
            } => {
                assert_eq!(from, "alice");
                assert_eq!(to, "bob");
                assert_eq!(amount, Amount::from_units(1_250_000_000));
                assert_eq!(note, "rent");
                assert!(mine);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_amount() {
        assert!(Opt::try_parse_from(["custody-ledger", "issue", "alice", "1.123456789"]).is_err());
    }

    #[test]
    fn test_parse_queries() {
        let opt = Opt::try_parse_from(["custody-ledger", "deductions", "--period", "2026-10"])
            .unwrap();
        assert!(matches!(
            opt.command,
            Command::Deductions { period: Some(p) } if p == "2026-10"
        ));
        let opt = Opt::try_parse_from(["custody-ledger", "transaction", "abc"]).unwrap();
        assert!(matches!(opt.command, Command::Transaction { tx_id } if tx_id == "abc"));
        assert!(matches!(
            Opt::try_parse_from(["custody-ledger", "stats"]).unwrap().command,
            Command::Stats
        ));
    }

    #[test]
    fn test_global_config_flag() {
        let opt =
            Opt::try_parse_from(["custody-ledger", "validate", "--config", "ledger.toml"]).unwrap();
        assert_eq!(opt.config, Some(PathBuf::from("ledger.toml")));
        assert!(matches!(opt.command, Command::Validate));
    }
}
