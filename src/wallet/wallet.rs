use crate::error::{LedgerError, Result};
use crate::utils::{ecdsa_p256_sha256_sign, new_key_pair, public_key_from_pkcs8, sha256_digest};
use data_encoding::HEXLOWER;
use zeroize::ZeroizeOnDrop;

/// A wallet id is the lowercase hex SHA-256 of its public key.
pub fn wallet_id_for(public_key: &[u8]) -> String {
    HEXLOWER.encode(&sha256_digest(public_key))
}

/// PKCS#8 private key, wiped from memory when dropped
#[derive(Clone, ZeroizeOnDrop)]
pub struct SigningKey {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl SigningKey {
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<SigningKey> {
        let public_key = public_key_from_pkcs8(pkcs8)
            .map_err(|e| LedgerError::SignatureError(format!("Unusable private key: {e}")))?;
        Ok(SigningKey {
            pkcs8: pkcs8.to_vec(),
            public_key,
        })
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        ecdsa_p256_sha256_sign(&self.pkcs8, message)
            .map_err(|e| LedgerError::SignatureError(e.to_string()))
    }

    pub fn public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("public_key", &HEXLOWER.encode(&self.public_key))
            .finish()
    }
}

/// A freshly generated custodial key pair and the id derived from it
#[derive(Debug, Clone)]
pub struct Wallet {
    wallet_id: String,
    signing_key: SigningKey,
}

impl Wallet {
    pub fn generate() -> Result<Wallet> {
        let pkcs8 = new_key_pair()?;
        Self::from_signing_key(SigningKey::from_pkcs8(&pkcs8)?)
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Result<Wallet> {
        Ok(Wallet {
            wallet_id: wallet_id_for(signing_key.public_key()),
            signing_key,
        })
    }

    pub fn wallet_id(&self) -> &str {
        self.wallet_id.as_str()
    }

    pub fn public_key(&self) -> &[u8] {
        self.signing_key.public_key()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}
