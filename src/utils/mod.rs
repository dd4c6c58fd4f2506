//! Utility functions and helpers
//!
//! Hashing, signing and timestamp helpers, plus the bincode layer used by the sled store.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    current_timestamp, ecdsa_p256_sha256_sign, ecdsa_p256_sha256_verify, new_key_pair,
    public_key_from_pkcs8, sha256_digest, sha256_hex,
};

pub use serialization::{deserialize, serialize};
