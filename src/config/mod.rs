//! Configuration types and parsing for thunder

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration error type
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Token issuance configuration
    pub token: TokenConfig,

    /// Multi-level cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Cryptographic configuration
    #[serde(default)]
    pub crypto: CryptoConfig,

    /// Resource store configuration
    #[serde(default)]
    pub stores: StoresConfig,

    /// External OIDC identity providers
    #[serde(default)]
    pub identity_providers: Vec<IdpConfig>,

    /// Token event logging configuration
    #[serde(default)]
    pub events: EventsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

/// Token issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Issuer (iss claim) stamped on every minted token
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// HS256 signing secret for access and refresh tokens
    pub signing_secret: String,

    /// Access token lifetime in seconds
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
}

fn default_issuer() -> String {
    "thunder".to_string()
}

fn default_access_ttl() -> u64 {
    3600
}

fn default_refresh_ttl() -> u64 {
    86400
}

/// Multi-level cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// L1 in-process cache settings
    #[serde(default)]
    pub l1: L1Config,

    /// Promotion pipeline settings
    #[serde(default)]
    pub promotion: PromotionConfig,

    /// Expired-entry sweep interval in seconds (-1 disables the sweeper)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: i64,
}

/// L1 cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1Config {
    /// Whether the L1 level is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of entries before eviction
    #[serde(default = "default_l1_max_size")]
    pub max_size: usize,

    /// Default TTL for entries in seconds
    #[serde(default = "default_l1_ttl")]
    pub default_ttl_secs: u64,

    /// Eviction policy applied when the cache is full
    #[serde(default)]
    pub eviction_policy: EvictionPolicy,

    /// Whether L2 hits are asynchronously promoted into L1
    #[serde(default = "default_true")]
    pub enable_promotion: bool,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_l1_max_size(),
            default_ttl_secs: default_l1_ttl(),
            eviction_policy: EvictionPolicy::default(),
            enable_promotion: true,
        }
    }
}

/// Eviction policy for the L1 cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
    Fifo,
}

/// Promotion pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Capacity of the bounded promotion queue
    #[serde(default = "default_promotion_queue")]
    pub queue_size: usize,

    /// Number of background promotion workers
    #[serde(default = "default_promotion_workers")]
    pub workers: usize,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            queue_size: default_promotion_queue(),
            workers: default_promotion_workers(),
        }
    }
}

fn default_l1_max_size() -> usize {
    1000
}

fn default_l1_ttl() -> u64 {
    300
}

fn default_cleanup_interval() -> i64 {
    60
}

fn default_promotion_queue() -> usize {
    1000
}

fn default_promotion_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// Cryptographic configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Password hashing settings
    #[serde(default)]
    pub password_hashing: HashingConfig,
}

/// Password hashing algorithm selection and parameters.
///
/// Algorithm selection is process-wide; stored credentials carry their own
/// parameters so older records remain verifiable after a parameter change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashingConfig {
    /// Selected algorithm
    #[serde(default)]
    pub algorithm: HashAlgorithmKind,

    /// SHA-256 parameters
    #[serde(default)]
    pub sha256: Sha256Params,

    /// PBKDF2 parameters (SHA-256 PRF)
    #[serde(default)]
    pub pbkdf2: Pbkdf2Params,

    /// Argon2id parameters
    #[serde(default)]
    pub argon2id: Argon2idParams,
}

/// Supported hash algorithms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithmKind {
    Sha256,
    Pbkdf2,
    #[default]
    Argon2id,
}

/// SHA-256 salted hash parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sha256Params {
    #[serde(default = "default_salt_len")]
    pub salt_len: usize,
}

impl Default for Sha256Params {
    fn default() -> Self {
        Self {
            salt_len: default_salt_len(),
        }
    }
}

/// PBKDF2 parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pbkdf2Params {
    #[serde(default = "default_salt_len")]
    pub salt_len: usize,

    #[serde(default = "default_pbkdf2_iterations")]
    pub iterations: u32,

    #[serde(default = "default_key_size")]
    pub key_size: usize,
}

impl Default for Pbkdf2Params {
    fn default() -> Self {
        Self {
            salt_len: default_salt_len(),
            iterations: default_pbkdf2_iterations(),
            key_size: default_key_size(),
        }
    }
}

/// Argon2id parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argon2idParams {
    #[serde(default = "default_salt_len")]
    pub salt_len: usize,

    #[serde(default = "default_argon2_iterations")]
    pub iterations: u32,

    /// Memory cost in KiB
    #[serde(default = "default_argon2_memory")]
    pub memory_kib: u32,

    #[serde(default = "default_argon2_parallelism")]
    pub parallelism: u32,

    #[serde(default = "default_key_size")]
    pub key_size: usize,
}

impl Default for Argon2idParams {
    fn default() -> Self {
        Self {
            salt_len: default_salt_len(),
            iterations: default_argon2_iterations(),
            memory_kib: default_argon2_memory(),
            parallelism: default_argon2_parallelism(),
            key_size: default_key_size(),
        }
    }
}

fn default_salt_len() -> usize {
    16
}

fn default_pbkdf2_iterations() -> u32 {
    600_000
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_memory() -> u32 {
    65536
}

fn default_argon2_parallelism() -> u32 {
    4
}

fn default_key_size() -> usize {
    32
}

/// Resource store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoresConfig {
    /// Backing mode for overlay-capable resources (themes, user schemas, ...)
    #[serde(default)]
    pub mode: StoreMode,

    /// Directory holding declarative resource YAML files
    #[serde(default)]
    pub declarative_dir: Option<PathBuf>,

    /// Hard cap on merged composite list results
    #[serde(default = "default_max_composite_records")]
    pub max_composite_records: usize,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            mode: StoreMode::default(),
            declarative_dir: None,
            max_composite_records: default_max_composite_records(),
        }
    }
}

/// Store backing mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    #[default]
    Mutable,
    Declarative,
    Composite,
}

fn default_max_composite_records() -> usize {
    1000
}

/// External OIDC identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// Internal identifier for this IdP
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Client ID registered with the upstream IdP
    pub client_id: String,

    /// Client secret registered with the upstream IdP
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Authorization endpoint URL
    #[serde(default)]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// UserInfo endpoint URL
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,

    /// JWKS endpoint URL (ID tokens from JWKS-less IdPs are trusted as-is)
    #[serde(default)]
    pub jwks_endpoint: Option<String>,

    /// Redirect URI for the authorization code flow
    #[serde(default)]
    pub redirect_uri: String,

    /// Scopes requested from the upstream IdP
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Per-call HTTP timeout toward this IdP, in seconds
    #[serde(default = "default_idp_timeout")]
    pub http_timeout_secs: u64,
}

fn default_idp_timeout() -> u64 {
    5
}

/// Token event logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Enable event logging
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log events to stdout
    #[serde(default = "default_true")]
    pub stdout: bool,

    /// Log events to a file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stdout: true,
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;

        let config: Config = if path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
        {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.signing_secret.is_empty() {
            return Err(ConfigError::Validation(
                "token.signing_secret cannot be empty".to_string(),
            ));
        }

        if self.cache.l1.max_size == 0 {
            return Err(ConfigError::Validation(
                "cache.l1.max_size must be positive".to_string(),
            ));
        }

        if self.cache.l1.default_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "cache.l1.default_ttl_secs must be positive".to_string(),
            ));
        }

        if self.cache.promotion.queue_size == 0 || self.cache.promotion.workers == 0 {
            return Err(ConfigError::Validation(
                "cache.promotion queue_size and workers must be positive".to_string(),
            ));
        }

        self.crypto.password_hashing.validate()?;

        if self.stores.max_composite_records == 0 {
            return Err(ConfigError::Validation(
                "stores.max_composite_records must be positive".to_string(),
            ));
        }

        if self.stores.mode != StoreMode::Mutable && self.stores.declarative_dir.is_none() {
            return Err(ConfigError::Validation(format!(
                "stores.declarative_dir is required for {:?} mode",
                self.stores.mode
            )));
        }

        for idp in &self.identity_providers {
            idp.validate()?;
        }

        Ok(())
    }
}

impl HashingConfig {
    /// Validate hashing parameters at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sha256.salt_len == 0 {
            return Err(ConfigError::Validation(
                "crypto.password_hashing.sha256.salt_len must be positive".to_string(),
            ));
        }

        if self.pbkdf2.salt_len == 0 || self.pbkdf2.iterations == 0 || self.pbkdf2.key_size == 0 {
            return Err(ConfigError::Validation(
                "crypto.password_hashing.pbkdf2 parameters must be positive".to_string(),
            ));
        }

        let a = &self.argon2id;
        if a.salt_len == 0
            || a.iterations == 0
            || a.memory_kib == 0
            || a.parallelism == 0
            || a.key_size == 0
        {
            return Err(ConfigError::Validation(
                "crypto.password_hashing.argon2id parameters must be positive".to_string(),
            ));
        }

        if a.parallelism > 255 {
            return Err(ConfigError::Validation(
                "crypto.password_hashing.argon2id.parallelism must be at most 255".to_string(),
            ));
        }

        if a.key_size > u32::MAX as usize {
            return Err(ConfigError::Validation(
                "crypto.password_hashing.argon2id.key_size out of range".to_string(),
            ));
        }

        Ok(())
    }
}

impl IdpConfig {
    /// Validate an identity provider record
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::Validation(
                "identity provider 'id' cannot be empty".to_string(),
            ));
        }

        if self.client_id.is_empty() {
            return Err(ConfigError::Validation(format!(
                "identity provider '{}' client_id cannot be empty",
                self.id
            )));
        }

        if self.token_endpoint.is_empty() {
            return Err(ConfigError::Validation(format!(
                "identity provider '{}' token_endpoint cannot be empty",
                self.id
            )));
        }

        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "identity provider '{}' http_timeout_secs must be positive",
                self.id
            )));
        }

        Ok(())
    }
}
