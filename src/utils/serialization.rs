// Bincode layer for values stored in sled trees
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Serialize data using bincode 2.0 with standard configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| LedgerError::Serialization(format!("Serialization failed: {e}")))
}

/// Deserialize data using bincode 2.0 with standard configuration
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, _) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| LedgerError::Serialization(format!("Deserialization failed: {e}")))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Amount, Transaction, TransactionKind};

    #[test]
    fn test_transaction_survives_storage_encoding() {
        let tx = Transaction::new_system(
            TransactionKind::Issuance,
            "wallet-a",
            Amount::from_units(100),
            "opening balance",
            1_700_000_000_000,
        )
        .unwrap();

        let bytes = serialize(&tx).expect("Serialization should work");
        let decoded: Transaction = deserialize(&bytes).expect("Deserialization should work");

        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let invalid_bytes = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<Transaction> = deserialize(&invalid_bytes);
        assert!(result.is_err());
    }
}
