use crate::config::{MiningConfig, MAX_DIFFICULTY};
use crate::core::{Block, BlockHeader};
use crate::error::{LedgerError, Result};
use log::{debug, info};

/// True when `hash` starts with `difficulty` `'0'` hex characters.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let required = difficulty as usize;
    hash.len() >= required && hash.bytes().take(required).all(|b| b == b'0')
}

/// Nonce search over a fixed header
pub struct ProofOfWork {
    header: BlockHeader,
    max_nonce: u64,
    abort_check_interval: u64,
}

impl ProofOfWork {
    pub fn new(header: BlockHeader, mining: &MiningConfig) -> Result<ProofOfWork> {
        if header.difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::Config(format!(
                "Difficulty {} can never be met by a {MAX_DIFFICULTY}-digit hash",
                header.difficulty
            )));
        }
        Ok(ProofOfWork {
            header,
            max_nonce: mining.max_nonce,
            abort_check_interval: mining.abort_check_interval.max(1),
        })
    }

    /// Validate a sealed block's hash and difficulty
    pub fn validate(block: &Block) -> bool {
        block.calculate_hash() == block.get_hash()
            && meets_difficulty(block.get_hash(), block.get_difficulty())
    }

    pub fn run(&self) -> Result<(u64, String)> {
        self.run_until(|| false)
    }

    /// Search nonces from 0 upward; `should_abort` is polled every
    /// `abort_check_interval` nonces, starting before the first hash.
    pub fn run_until<F>(&self, mut should_abort: F) -> Result<(u64, String)>
    where
        F: FnMut() -> bool,
    {
        let difficulty = self.header.difficulty;
        info!(
            "Mining block {} at difficulty {difficulty}",
            self.header.index
        );

        let mut nonce: u64 = 0;
        loop {
            if nonce % self.abort_check_interval == 0 && should_abort() {
                debug!("Mining of block {} aborted at nonce {nonce}", self.header.index);
                return Err(LedgerError::MiningInterrupted(format!(
                    "aborted at nonce {nonce}"
                )));
            }

            let hash = self.header.hash_with_nonce(nonce);
            if meets_difficulty(&hash, difficulty) {
                info!("Found nonce {nonce} for block {}: {hash}", self.header.index);
                return Ok((nonce, hash));
            }

            if nonce >= self.max_nonce {
                return Err(LedgerError::MiningInterrupted(format!(
                    "nonce space exhausted at {}",
                    self.max_nonce
                )));
            }
            nonce += 1;
        }
    }

    /// Run to completion and seal the header into a block.
    pub fn mine_block(
        &self,
        transactions: Vec<crate::core::Transaction>,
        should_abort: impl FnMut() -> bool,
    ) -> Result<Block> {
        let (nonce, _) = self.run_until(should_abort)?;
        Ok(Block::from_header(self.header.clone(), transactions, nonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(difficulty: u32) -> BlockHeader {
        BlockHeader {
            index: 1,
            timestamp: 1_700_000_000_000,
            prev_hash: "prev".to_string(),
            merkle_root: String::new(),
            difficulty,
            miner_wallet_id: None,
        }
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("00ab", 2));
        assert!(!meets_difficulty("0a0b", 2));
        assert!(meets_difficulty("abc", 0));
        assert!(!meets_difficulty("00", 3));
    }

    #[test]
    fn test_easy_difficulty_terminates() {
        let pow = ProofOfWork::new(header(1), &MiningConfig::default()).unwrap();
        let (nonce, hash) = pow.run().unwrap();

        assert!(hash.starts_with('0'));
        assert_eq!(hash, header(1).hash_with_nonce(nonce));
    }

    #[test]
    fn test_mined_block_validates() {
        let pow = ProofOfWork::new(header(2), &MiningConfig::default()).unwrap();
        let block = pow.mine_block(vec![], || false).unwrap();

        assert!(ProofOfWork::validate(&block));
        assert!(block.get_hash().starts_with("00"));
    }

    #[test]
    fn test_abort_predicate_stops_search() {
        let pow = ProofOfWork::new(header(64), &MiningConfig::default()).unwrap();
        let mut calls = 0;
        let result = pow.run_until(|| {
            calls += 1;
            calls > 3
        });

        assert!(matches!(result, Err(LedgerError::MiningInterrupted(_))));
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_nonce_exhaustion() {
        let mining = MiningConfig {
            max_nonce: 10,
            ..MiningConfig::default()
        };
        let pow = ProofOfWork::new(header(64), &mining).unwrap();

        assert!(matches!(
            pow.run(),
            Err(LedgerError::MiningInterrupted(_))
        ));
    }

    #[test]
    fn test_rejects_unreachable_difficulty() {
        assert!(ProofOfWork::new(header(65), &MiningConfig::default()).is_err());
    }
}
