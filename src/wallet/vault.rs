use crate::config::VaultConfig;
use crate::error::{LedgerError, Result};
use crate::wallet::cipher::{random_bytes, Aes256GcmCipher, SecureKey, KEY_LENGTH};
use crate::wallet::SigningKey;
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

const SALT_LENGTH: usize = 16;
const MIN_PASSPHRASE_LENGTH: usize = 8;

/// A private key encrypted at rest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct SealedKey {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Seals custodial private keys with AES-256-GCM under an Argon2id key derived from
/// the operator's passphrase. Every sealed key gets its own salt.
pub struct KeyVault {
    passphrase: SecureKey,
    params: Params,
}

impl KeyVault {
    pub fn new(passphrase: &str, config: &VaultConfig) -> Result<KeyVault> {
        if passphrase.len() < MIN_PASSPHRASE_LENGTH {
            return Err(LedgerError::Encryption(format!(
                "Vault passphrase must be at least {MIN_PASSPHRASE_LENGTH} characters long"
            )));
        }
        let params = Params::new(config.memory_kib, config.iterations, 1, Some(KEY_LENGTH))
            .map_err(|e| LedgerError::Encryption(format!("Invalid Argon2 parameters: {e}")))?;

        Ok(KeyVault {
            passphrase: SecureKey::new(passphrase.as_bytes().to_vec()),
            params,
        })
    }

    pub fn seal(&self, key: &SigningKey) -> Result<SealedKey> {
        let salt = random_bytes(SALT_LENGTH);
        let cipher = Aes256GcmCipher::new(&self.derive_key(&salt)?)?;
        let (nonce, ciphertext) = cipher.encrypt(key.get_pkcs8())?;
        Ok(SealedKey {
            salt,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt a sealed key; a wrong passphrase fails GCM authentication.
    pub fn open(&self, sealed: &SealedKey) -> Result<SigningKey> {
        let cipher = Aes256GcmCipher::new(&self.derive_key(&sealed.salt)?)?;
        let pkcs8 = cipher.decrypt(&sealed.ciphertext, &sealed.nonce)?;
        SigningKey::from_pkcs8(pkcs8.as_bytes())
    }

    fn derive_key(&self, salt: &[u8]) -> Result<SecureKey> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let mut key = vec![0u8; KEY_LENGTH];
        argon2
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| LedgerError::Encryption(format!("Key derivation failed: {e}")))?;
        Ok(SecureKey::new(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    // Keep argon2 cheap in tests
    fn fast_config() -> VaultConfig {
        VaultConfig {
            memory_kib: 64,
            iterations: 1,
        }
    }

    #[test]
    fn test_seal_and_open() {
        let vault = KeyVault::new("correct horse", &fast_config()).unwrap();
        let wallet = Wallet::generate().unwrap();

        let sealed = vault.seal(wallet.signing_key()).unwrap();
        assert_ne!(sealed.ciphertext.as_slice(), wallet.signing_key().get_pkcs8());

        let opened = vault.open(&sealed).unwrap();
        assert_eq!(opened.public_key(), wallet.public_key());
    }

    #[test]
    fn test_each_seal_uses_fresh_salt() {
        let vault = KeyVault::new("correct horse", &fast_config()).unwrap();
        let wallet = Wallet::generate().unwrap();

        let first = vault.seal(wallet.signing_key()).unwrap();
        let second = vault.seal(wallet.signing_key()).unwrap();
        assert_ne!(first.salt, second.salt);
    }

    #[test]
    fn test_wrong_passphrase() {
        let vault = KeyVault::new("correct horse", &fast_config()).unwrap();
        let intruder = KeyVault::new("battery staple", &fast_config()).unwrap();
        let sealed = vault
            .seal(Wallet::generate().unwrap().signing_key())
            .unwrap();

        assert!(matches!(
            intruder.open(&sealed),
            Err(LedgerError::Encryption(_))
        ));
    }

    #[test]
    fn test_short_passphrase_rejected() {
        assert!(KeyVault::new("short", &fast_config()).is_err());
    }
}
