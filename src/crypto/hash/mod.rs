//! Versioned password hashing with pluggable algorithms
//!
//! Credentials are self-describing: a stored record carries the algorithm
//! tag and every parameter needed to verify it, so records generated under
//! older settings keep verifying after a configuration change.

use argon2::{Algorithm as Argon2Algorithm, Argon2, Params as Argon2Params, Version};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::{HashAlgorithmKind, HashingConfig};

/// Hashing error type
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("Invalid hash parameters: {0}")]
    InvalidParams(String),

    #[error("Malformed credential: {0}")]
    Malformed(String),
}

/// Algorithm-specific parameter record stored alongside a digest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashParams {
    /// Hex-encoded salt
    pub salt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,

    /// Argon2id memory cost in KiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_kib: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
}

/// A stored, self-describing password hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Algorithm tag
    pub algorithm: HashAlgorithmKind,

    /// Hex-encoded digest
    pub digest: String,

    /// Parameters the digest was computed under
    pub params: HashParams,
}

/// Process-wide credential hasher.
///
/// The configured algorithm is used for generation; verification refuses
/// references produced under a different algorithm.
pub struct CredentialHasher {
    config: HashingConfig,
}

impl CredentialHasher {
    pub fn new(config: HashingConfig) -> Self {
        Self { config }
    }

    /// Selected algorithm for new credentials.
    pub fn algorithm(&self) -> HashAlgorithmKind {
        self.config.algorithm
    }

    /// Hash a plaintext under the configured algorithm with a fresh salt.
    pub fn generate(&self, plaintext: &str) -> Result<Credential, HashError> {
        let salt_len = match self.config.algorithm {
            HashAlgorithmKind::Sha256 => self.config.sha256.salt_len,
            HashAlgorithmKind::Pbkdf2 => self.config.pbkdf2.salt_len,
            HashAlgorithmKind::Argon2id => self.config.argon2id.salt_len,
        };

        let mut salt = vec![0u8; salt_len];
        rand::thread_rng().fill_bytes(&mut salt);

        let params = match self.config.algorithm {
            HashAlgorithmKind::Sha256 => HashParams {
                salt: hex::encode(&salt),
                ..Default::default()
            },
            HashAlgorithmKind::Pbkdf2 => HashParams {
                salt: hex::encode(&salt),
                iterations: Some(self.config.pbkdf2.iterations),
                key_size: Some(self.config.pbkdf2.key_size as u32),
                ..Default::default()
            },
            HashAlgorithmKind::Argon2id => HashParams {
                salt: hex::encode(&salt),
                iterations: Some(self.config.argon2id.iterations),
                memory_kib: Some(self.config.argon2id.memory_kib),
                parallelism: Some(self.config.argon2id.parallelism),
                key_size: Some(self.config.argon2id.key_size as u32),
            },
        };

        let digest = compute_digest(self.config.algorithm, plaintext, &salt, &params)?;

        Ok(Credential {
            algorithm: self.config.algorithm,
            digest: hex::encode(digest),
            params,
        })
    }

    /// Verify a plaintext against a stored reference.
    ///
    /// A reference produced under a different algorithm never verifies,
    /// regardless of digest contents.
    pub fn verify(&self, plaintext: &str, reference: &Credential) -> Result<bool, HashError> {
        if reference.algorithm != self.config.algorithm {
            tracing::warn!(
                stored = ?reference.algorithm,
                configured = ?self.config.algorithm,
                "credential algorithm does not match configured algorithm"
            );
            return Ok(false);
        }

        let salt = hex::decode(&reference.params.salt)
            .map_err(|e| HashError::Malformed(format!("salt is not valid hex: {e}")))?;
        let expected = hex::decode(&reference.digest)
            .map_err(|e| HashError::Malformed(format!("digest is not valid hex: {e}")))?;

        let computed = compute_digest(reference.algorithm, plaintext, &salt, &reference.params)?;

        Ok(computed.ct_eq(&expected).into())
    }
}

/// Compute the raw digest for the given algorithm and parameter record.
fn compute_digest(
    algorithm: HashAlgorithmKind,
    plaintext: &str,
    salt: &[u8],
    params: &HashParams,
) -> Result<Vec<u8>, HashError> {
    match algorithm {
        HashAlgorithmKind::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(salt);
            hasher.update(plaintext.as_bytes());
            Ok(hasher.finalize().to_vec())
        }
        HashAlgorithmKind::Pbkdf2 => {
            let iterations = params
                .iterations
                .ok_or_else(|| HashError::Malformed("pbkdf2 record missing iterations".into()))?;
            let key_size = params
                .key_size
                .ok_or_else(|| HashError::Malformed("pbkdf2 record missing key_size".into()))?;
            if iterations == 0 || key_size == 0 {
                return Err(HashError::InvalidParams(
                    "pbkdf2 iterations and key_size must be positive".into(),
                ));
            }

            let mut out = vec![0u8; key_size as usize];
            pbkdf2_hmac::<Sha256>(plaintext.as_bytes(), salt, iterations, &mut out);
            Ok(out)
        }
        HashAlgorithmKind::Argon2id => {
            let iterations = params
                .iterations
                .ok_or_else(|| HashError::Malformed("argon2id record missing iterations".into()))?;
            let memory_kib = params
                .memory_kib
                .ok_or_else(|| HashError::Malformed("argon2id record missing memory_kib".into()))?;
            let parallelism = params.parallelism.ok_or_else(|| {
                HashError::Malformed("argon2id record missing parallelism".into())
            })?;
            let key_size = params
                .key_size
                .ok_or_else(|| HashError::Malformed("argon2id record missing key_size".into()))?;

            let argon_params =
                Argon2Params::new(memory_kib, iterations, parallelism, Some(key_size as usize))
                    .map_err(|e| HashError::InvalidParams(e.to_string()))?;
            let argon = Argon2::new(Argon2Algorithm::Argon2id, Version::V0x13, argon_params);

            let mut out = vec![0u8; key_size as usize];
            argon
                .hash_password_into(plaintext.as_bytes(), salt, &mut out)
                .map_err(|e| HashError::InvalidParams(e.to_string()))?;
            Ok(out)
        }
    }
}
