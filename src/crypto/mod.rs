//! Cryptographic capabilities for thunder

pub mod hash;

pub use hash::{Credential, CredentialHasher, HashError};
