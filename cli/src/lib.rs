mod poll_cmd;
mod source_token_cmd;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use dodgeball_core::DodgeballConfig;

pub use poll_cmd::PollArgs;

/// Command-line driver for the Dodgeball verification engine.
#[derive(Debug, Parser)]
#[command(name = "dodgeball", version)]
pub struct Cli {
    /// Public key identifying the calling application.
    #[arg(long = "public-key", env = "DODGEBALL_PUBLIC_KEY", global = true, hide_env_values = true)]
    pub public_key: Option<String>,

    /// TOML client configuration.
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Overrides `api_url` from the configuration.
    #[arg(long = "api-url", value_name = "URL", global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Follow a verification until it resolves.
    Poll(PollArgs),
    /// Print a source token for this host.
    SourceToken,
}

impl Cli {
    pub fn load_config(&self) -> Result<DodgeballConfig> {
        let mut config = match &self.config {
            Some(path) => DodgeballConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => DodgeballConfig::default(),
        };
        if let Some(api_url) = &self.api_url {
            config.api_url = api_url.clone();
        }
        Ok(config)
    }
}

pub async fn run(cli: Cli, config: DodgeballConfig) -> Result<ExitCode> {
    let Cli {
        public_key,
        command,
        ..
    } = cli;
    let public_key = public_key
        .context("a public key is required; pass --public-key or set DODGEBALL_PUBLIC_KEY")?;
    match command {
        Command::Poll(args) => poll_cmd::run(&public_key, config, args).await,
        Command::SourceToken => source_token_cmd::run(&public_key, config).await,
    }
}
