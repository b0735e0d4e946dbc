use std::process::ExitCode;

use anyhow::Result;
use dodgeball_core::Dodgeball;
use dodgeball_core::DodgeballConfig;

pub(crate) async fn run(public_key: &str, config: DodgeballConfig) -> Result<ExitCode> {
    let dodgeball = Dodgeball::new(public_key, config)?;
    let token = dodgeball.get_source_token().await?;
    println!("{token}");
    Ok(ExitCode::SUCCESS)
}
