use crate::core::{merkle_root, Transaction};
use crate::error::Result;
use crate::utils::{deserialize, serialize, sha256_hex};
use serde::{Deserialize, Serialize};

/// Previous-hash value of the genesis block
pub const GENESIS_PREV_HASH: &str = "0";

/// Everything that goes into a block hash except the nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub index: u64,
    pub timestamp: i64,
    pub prev_hash: String,
    pub merkle_root: String,
    pub difficulty: u32,
    pub miner_wallet_id: Option<String>,
}

impl BlockHeader {
    /// `SHA256(index‖timestamp‖prevHash‖merkleRoot‖nonce‖miner)`, integers in decimal,
    /// a missing miner hashed as the empty string.
    pub fn hash_with_nonce(&self, nonce: u64) -> String {
        let miner = self.miner_wallet_id.as_deref().unwrap_or_default();
        sha256_hex(&format!(
            "{}{}{}{}{}{}",
            self.index, self.timestamp, self.prev_hash, self.merkle_root, nonce, miner
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    index: u64,
    timestamp: i64,
    transactions: Vec<Transaction>,
    prev_hash: String,
    hash: String,
    nonce: u64,
    difficulty: u32,
    merkle_root: String,
    miner_wallet_id: Option<String>,
}

impl Block {
    /// Index 0, previous hash `"0"`, no transactions, difficulty 0.
    pub fn genesis(timestamp: i64) -> Block {
        let header = BlockHeader {
            index: 0,
            timestamp,
            prev_hash: GENESIS_PREV_HASH.to_string(),
            merkle_root: String::new(),
            difficulty: 0,
            miner_wallet_id: None,
        };
        Block::from_header(header, vec![], 0)
    }

    /// Seal a header with the nonce found by proof-of-work.
    pub fn from_header(header: BlockHeader, transactions: Vec<Transaction>, nonce: u64) -> Block {
        let hash = header.hash_with_nonce(nonce);
        Block {
            index: header.index,
            timestamp: header.timestamp,
            transactions,
            prev_hash: header.prev_hash,
            hash,
            nonce,
            difficulty: header.difficulty,
            merkle_root: header.merkle_root,
            miner_wallet_id: header.miner_wallet_id,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            index: self.index,
            timestamp: self.timestamp,
            prev_hash: self.prev_hash.clone(),
            merkle_root: self.merkle_root.clone(),
            difficulty: self.difficulty,
            miner_wallet_id: self.miner_wallet_id.clone(),
        }
    }

    /// Hash recomputed from the stored fields, for comparison with `get_hash`
    pub fn calculate_hash(&self) -> String {
        self.header().hash_with_nonce(self.nonce)
    }

    /// Merkle root recomputed from the stored transactions
    pub fn calculate_merkle_root(&self) -> String {
        let ids: Vec<&str> = self.transactions.iter().map(Transaction::get_id).collect();
        merkle_root(&ids)
    }

    pub fn get_index(&self) -> u64 {
        self.index
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_prev_hash(&self) -> &str {
        self.prev_hash.as_str()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_merkle_root(&self) -> &str {
        self.merkle_root.as_str()
    }

    pub fn get_miner_wallet_id(&self) -> Option<&str> {
        self.miner_wallet_id.as_deref()
    }
}
