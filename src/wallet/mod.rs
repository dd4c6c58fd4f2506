//! Custodial keys
//!
//! Key pair generation, signing, and the vault that keeps private keys sealed at rest.

pub mod cipher;
pub mod vault;
#[allow(clippy::module_inception)]
pub mod wallet;

pub use vault::{KeyVault, SealedKey};
pub use wallet::{wallet_id_for, SigningKey, Wallet};
