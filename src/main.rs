//! Thunder - OAuth 2.0 / OIDC identity provider core

use std::sync::Arc;

use thunder::{
    cli::{generate_config, Cli, Commands},
    config::Config,
    crypto::CredentialHasher,
    observability::init_tracing,
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { format, force } => {
            let filename = if format == "yaml" {
                "thunder.yaml"
            } else {
                "thunder.toml"
            };

            let path = std::path::Path::new(filename);
            if path.exists() && !force {
                eprintln!("Error: {} already exists. Use --force to overwrite.", filename);
                std::process::exit(1);
            }

            std::fs::write(filename, generate_config(&format))?;
            println!("Created configuration file: {}", filename);
        }

        Commands::Validate => match Config::from_file(&cli.config) {
            Ok(_) => {
                println!("Configuration is valid: {}", cli.config.display());
            }
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                std::process::exit(1);
            }
        },

        Commands::HashSecret { secret } => {
            let config = Config::from_file(&cli.config)?;
            let hasher = CredentialHasher::new(config.crypto.password_hashing);
            let credential = hasher.generate(&secret)?;
            println!("{}", serde_json::to_string_pretty(&credential)?);
        }

        Commands::Run { host, port } => {
            let mut config = Config::from_file(&cli.config)?;

            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }

            let state = Arc::new(AppState::from_config(config)?);
            server::run(state).await?;
        }
    }

    Ok(())
}
