use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use index_deploy::cli::{Cli, Command};
use index_deploy::commands;

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();

	match &cli.command {
		Command::Deploy { target, overrides } => commands::deploy::deploy(&cli, target, overrides).await,
		Command::Upgrade { target } => commands::deploy::upgrade(&cli, target).await,
		Command::Resolve { target, overrides } => commands::deploy::resolve(&cli, target, overrides),
		Command::SetMinter {
			token,
			factory,
			network,
			also,
		} => commands::minter::set_minter(&cli, token, factory, network, also).await,
		Command::Registry { command } => commands::registry::run(&cli, command),
	}
}
