// Transactions move value between custodial wallets using the UTXO model
// Each transfer consumes whole outputs owned by the sender and creates new ones:
// the receiver's amount plus change back to the sender

use crate::core::Amount;
use crate::error::{LedgerError, Result};
use crate::utils::{ecdsa_p256_sha256_verify, sha256_hex};
use crate::wallet::SigningKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sender id used by transactions that consume no inputs
pub const SYSTEM_WALLET_ID: &str = "system";

// Names one output of one transaction: the key of a UTXO
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct OutPoint {
    pub tx_id: String,
    pub output_index: u32,
}

impl OutPoint {
    pub fn new(tx_id: impl Into<String>, output_index: u32) -> OutPoint {
        OutPoint {
            tx_id: tx_id.into(),
            output_index,
        }
    }

    /// Storage key, `"<txId>:<index>"`
    pub fn key(&self) -> String {
        format!("{}:{}", self.tx_id, self.output_index)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.output_index)
    }
}

// A reference to a previous output plus the proof that the sender may spend it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXInput {
    tx_id: String,
    output_index: u32,
    signature: Vec<u8>,
    signer_public_key: Vec<u8>,
}

impl TXInput {
    pub fn get_tx_id(&self) -> &str {
        self.tx_id.as_str()
    }

    pub fn get_output_index(&self) -> u32 {
        self.output_index
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_signer_public_key(&self) -> &[u8] {
        self.signer_public_key.as_slice()
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx_id.clone(), self.output_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: Amount,
    owner_wallet_id: String,
    spent: bool,
}

impl TXOutput {
    pub fn new(value: Amount, owner_wallet_id: &str) -> Result<TXOutput> {
        if value.is_zero() {
            return Err(LedgerError::InvalidAmount(
                "Output value must be positive".to_string(),
            ));
        }
        Ok(TXOutput {
            value,
            owner_wallet_id: owner_wallet_id.to_string(),
            spent: false,
        })
    }

    pub fn get_value(&self) -> Amount {
        self.value
    }

    pub fn get_owner_wallet_id(&self) -> &str {
        self.owner_wallet_id.as_str()
    }

    pub fn is_spent(&self) -> bool {
        self.spent
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer,
    Deduction,
    MiningReward,
    Issuance,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::Transfer => "transfer",
            TransactionKind::Deduction => "deduction",
            TransactionKind::MiningReward => "mining_reward",
            TransactionKind::Issuance => "issuance",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful signature check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Verified,
    /// The transaction has no inputs, so there is nothing to sign for
    ExemptNoInputs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: String,
    inputs: Vec<TXInput>,
    outputs: Vec<TXOutput>,
    timestamp: i64,
    sender_wallet_id: String,
    receiver_wallet_id: String,
    amount: Amount,
    note: String,
    is_special_transfer: bool,
    kind: TransactionKind,
}

/// The exact bytes a sender signs: `sender‖receiver‖amount‖timestamp‖note`
pub fn signing_payload(
    sender_wallet_id: &str,
    receiver_wallet_id: &str,
    amount: Amount,
    timestamp: i64,
    note: &str,
) -> String {
    format!("{sender_wallet_id}{receiver_wallet_id}{amount}{timestamp}{note}")
}

/// `SHA256(sender‖receiver‖amount‖timestamp)` as lowercase hex
pub fn transaction_id(
    sender_wallet_id: &str,
    receiver_wallet_id: &str,
    amount: Amount,
    timestamp: i64,
) -> String {
    sha256_hex(&format!(
        "{sender_wallet_id}{receiver_wallet_id}{amount}{timestamp}"
    ))
}

/// An unsigned wallet-to-wallet transfer, produced by UTXO selection
#[derive(Debug, Clone)]
pub struct TransferDraft {
    pub kind: TransactionKind,
    pub sender_wallet_id: String,
    pub receiver_wallet_id: String,
    pub amount: Amount,
    pub change: Amount,
    pub note: String,
    pub timestamp: i64,
    pub spends: Vec<OutPoint>,
}

impl TransferDraft {
    pub fn payload(&self) -> String {
        signing_payload(
            &self.sender_wallet_id,
            &self.receiver_wallet_id,
            self.amount,
            self.timestamp,
            &self.note,
        )
    }

    /// Sign the payload and lay out the outputs: receiver first, then change if any.
    pub fn sign(self, signing_key: &SigningKey) -> Result<Transaction> {
        if self.spends.is_empty() {
            return Err(LedgerError::InvalidAmount(
                "A transfer must spend at least one output".to_string(),
            ));
        }
        let payload = self.payload();
        let signature = signing_key.sign(payload.as_bytes())?;
        let public_key = signing_key.public_key().to_vec();

        let inputs = self
            .spends
            .iter()
            .map(|outpoint| TXInput {
                tx_id: outpoint.tx_id.clone(),
                output_index: outpoint.output_index,
                signature: signature.clone(),
                signer_public_key: public_key.clone(),
            })
            .collect();

        let mut outputs = vec![TXOutput::new(self.amount, &self.receiver_wallet_id)?];
        if !self.change.is_zero() {
            outputs.push(TXOutput::new(self.change, &self.sender_wallet_id)?);
        }

        Ok(Transaction {
            id: transaction_id(
                &self.sender_wallet_id,
                &self.receiver_wallet_id,
                self.amount,
                self.timestamp,
            ),
            inputs,
            outputs,
            timestamp: self.timestamp,
            sender_wallet_id: self.sender_wallet_id,
            receiver_wallet_id: self.receiver_wallet_id,
            amount: self.amount,
            note: self.note,
            is_special_transfer: self.kind != TransactionKind::Transfer,
            kind: self.kind,
        })
    }
}

impl Transaction {
    /// A zero-input transaction minted by the ledger itself (issuance or mining reward).
    pub fn new_system(
        kind: TransactionKind,
        receiver_wallet_id: &str,
        amount: Amount,
        note: &str,
        timestamp: i64,
    ) -> Result<Transaction> {
        let output = TXOutput::new(amount, receiver_wallet_id)?;
        Ok(Transaction {
            id: transaction_id(SYSTEM_WALLET_ID, receiver_wallet_id, amount, timestamp),
            inputs: vec![],
            outputs: vec![output],
            timestamp,
            sender_wallet_id: SYSTEM_WALLET_ID.to_string(),
            receiver_wallet_id: receiver_wallet_id.to_string(),
            amount,
            note: note.to_string(),
            is_special_transfer: true,
            kind,
        })
    }

    pub fn signing_payload(&self) -> String {
        signing_payload(
            &self.sender_wallet_id,
            &self.receiver_wallet_id,
            self.amount,
            self.timestamp,
            &self.note,
        )
    }

    /// Recompute the id from the signed fields
    pub fn compute_id(&self) -> String {
        transaction_id(
            &self.sender_wallet_id,
            &self.receiver_wallet_id,
            self.amount,
            self.timestamp,
        )
    }

    /// Re-verify every input's signature against the key it declares.
    pub fn verify_signature(&self) -> Result<SignatureCheck> {
        if self.inputs.is_empty() {
            return Ok(SignatureCheck::ExemptNoInputs);
        }
        let payload = self.signing_payload();
        let all_valid = self.inputs.iter().all(|input| {
            ecdsa_p256_sha256_verify(
                input.signer_public_key.as_slice(),
                input.signature.as_slice(),
                payload.as_bytes(),
            )
        });
        if !all_valid {
            return Err(LedgerError::InvalidSignature {
                tx_id: self.id.clone(),
            });
        }
        Ok(SignatureCheck::Verified)
    }

    /// True when every input was signed with `public_key`.
    pub fn is_signed_by(&self, public_key: &[u8]) -> bool {
        !self.inputs.is_empty()
            && self
                .inputs
                .iter()
                .all(|input| input.signer_public_key.as_slice() == public_key)
    }

    pub fn is_system(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn total_output(&self) -> Result<Amount> {
        Amount::sum(self.outputs.iter().map(TXOutput::get_value))
    }

    pub fn outpoints(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.inputs.iter().map(TXInput::outpoint)
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn get_inputs(&self) -> &[TXInput] {
        self.inputs.as_slice()
    }

    pub fn get_outputs(&self) -> &[TXOutput] {
        self.outputs.as_slice()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_sender_wallet_id(&self) -> &str {
        self.sender_wallet_id.as_str()
    }

    pub fn get_receiver_wallet_id(&self) -> &str {
        self.receiver_wallet_id.as_str()
    }

    pub fn get_amount(&self) -> Amount {
        self.amount
    }

    pub fn get_note(&self) -> &str {
        self.note.as_str()
    }

    pub fn is_special_transfer(&self) -> bool {
        self.is_special_transfer
    }

    pub fn get_kind(&self) -> TransactionKind {
        self.kind
    }
}
