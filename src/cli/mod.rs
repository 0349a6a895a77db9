//! Command-line interface for thunder

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Thunder - OAuth 2.0 / OIDC identity provider core
#[derive(Parser, Debug)]
#[command(name = "thunder", version, about)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "thunder.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a starter configuration file
    Init {
        /// Output format: toml or yaml
        #[arg(long, default_value = "toml")]
        format: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Hash a client secret with the configured algorithm
    HashSecret {
        /// The plaintext secret
        secret: String,
    },

    /// Run the server
    Run {
        /// Override the configured host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Starter configuration in the requested format
pub fn generate_config(format: &str) -> String {
    if format == "yaml" {
        YAML_TEMPLATE.to_string()
    } else {
        TOML_TEMPLATE.to_string()
    }
}

const TOML_TEMPLATE: &str = r#"[server]
host = "127.0.0.1"
port = 8090

[token]
issuer = "thunder"
# Replace with a strong secret of at least 32 characters
signing_secret = "change-me-change-me-change-me-!!"
access_token_ttl_secs = 3600
refresh_token_ttl_secs = 86400

[cache.l1]
enabled = true
max_size = 1000
default_ttl_secs = 300
eviction_policy = "lru"
enable_promotion = true

[cache.promotion]
queue_size = 1000
workers = 4

[cache]
cleanup_interval_secs = 60

[crypto.password_hashing]
algorithm = "argon2id"

[stores]
mode = "mutable"
max_composite_records = 1000

[events]
enabled = true
stdout = true
"#;

const YAML_TEMPLATE: &str = r#"server:
  host: "127.0.0.1"
  port: 8090

token:
  issuer: "thunder"
  # Replace with a strong secret of at least 32 characters
  signing_secret: "change-me-change-me-change-me-!!"
  access_token_ttl_secs: 3600
  refresh_token_ttl_secs: 86400

cache:
  l1:
    enabled: true
    max_size: 1000
    default_ttl_secs: 300
    eviction_policy: lru
    enable_promotion: true
  promotion:
    queue_size: 1000
    workers: 4
  cleanup_interval_secs: 60

crypto:
  password_hashing:
    algorithm: argon2id

stores:
  mode: mutable
  max_composite_records: 1000

events:
  enabled: true
  stdout: true
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_toml_template_is_valid_config() {
        let config: Config = toml::from_str(TOML_TEMPLATE).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8090);
    }

    #[test]
    fn test_yaml_template_is_valid_config() {
        let config: Config = serde_yaml::from_str(YAML_TEMPLATE).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.l1.max_size, 1000);
    }
}
