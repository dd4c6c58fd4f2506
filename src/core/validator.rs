use crate::core::proof_of_work::meets_difficulty;
use crate::core::Block;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    EmptyChain,
    IndexMismatch { expected: u64, found: u64 },
    PrevHashMismatch,
    HashMismatch,
    PowFailure,
    MerkleRootMismatch,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::EmptyChain => write!(f, "chain is empty"),
            InvalidReason::IndexMismatch { expected, found } => {
                write!(f, "index mismatch: expected {expected}, found {found}")
            }
            InvalidReason::PrevHashMismatch => write!(f, "previous hash mismatch"),
            InvalidReason::HashMismatch => write!(f, "hash mismatch"),
            InvalidReason::PowFailure => write!(f, "proof of work not met"),
            InvalidReason::MerkleRootMismatch => write!(f, "merkle root mismatch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Valid,
    /// `at_index` is the position of the first bad block, -1 for an empty chain
    Invalid { at_index: i64, reason: InvalidReason },
}

impl ChainStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainStatus::Valid)
    }
}

fn invalid(position: usize, reason: InvalidReason) -> ChainStatus {
    ChainStatus::Invalid {
        at_index: position as i64,
        reason,
    }
}

/// Walk the chain from genesis and report the first broken link.
pub fn validate_chain(blocks: &[Block]) -> ChainStatus {
    let Some(genesis) = blocks.first() else {
        return ChainStatus::Invalid {
            at_index: -1,
            reason: InvalidReason::EmptyChain,
        };
    };
    if genesis.calculate_hash() != genesis.get_hash() {
        return invalid(0, InvalidReason::HashMismatch);
    }
    if genesis.calculate_merkle_root() != genesis.get_merkle_root() {
        return invalid(0, InvalidReason::MerkleRootMismatch);
    }

    for (position, pair) in blocks.windows(2).enumerate() {
        let (prev, block) = (&pair[0], &pair[1]);
        let position = position + 1;

        let expected = prev.get_index() + 1;
        if block.get_index() != expected {
            return invalid(
                position,
                InvalidReason::IndexMismatch {
                    expected,
                    found: block.get_index(),
                },
            );
        }
        if block.get_prev_hash() != prev.get_hash() {
            return invalid(position, InvalidReason::PrevHashMismatch);
        }
        if block.calculate_hash() != block.get_hash() {
            return invalid(position, InvalidReason::HashMismatch);
        }
        if !meets_difficulty(block.get_hash(), block.get_difficulty()) {
            return invalid(position, InvalidReason::PowFailure);
        }
        if block.calculate_merkle_root() != block.get_merkle_root() {
            return invalid(position, InvalidReason::MerkleRootMismatch);
        }
    }
    ChainStatus::Valid
}
