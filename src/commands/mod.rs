pub mod deploy;
pub mod minter;
pub mod registry;

use std::path::PathBuf;

use anyhow::{Context as _, Result};

use crate::artifacts::ArtifactStore;
use crate::cli::Cli;
use crate::config::{Config, NetworkProfile};
use crate::executor::Executor;
use crate::registry::Registry;
use crate::rpc::RpcClient;

/// Load config from the CLI flag / env or the default location.
pub fn load_config(cli: &Cli) -> Result<Config> {
	Config::load(cli.config.as_deref())
}

/// Registry path from CLI flag or config.
pub fn resolve_registry(cli: &Cli, config: &Config) -> PathBuf {
	cli.registry
		.clone()
		.unwrap_or_else(|| config.paths.registry.clone())
}

pub fn open_registry(cli: &Cli, config: &Config) -> Result<Registry> {
	let path = resolve_registry(cli, config);
	Registry::open(&path).with_context(|| format!("opening registry {}", path.display()))
}

/// Network profile with the CLI's RPC override applied.
pub fn resolve_profile(cli: &Cli, config: &Config, network: &str) -> Result<NetworkProfile> {
	let mut profile = config.profile(network)?;
	if let Some(url) = &cli.rpc_url {
		profile.rpc_url = url.clone();
	}
	Ok(profile)
}

/// Executor talking JSON-RPC to the profile's endpoint.
pub fn build_executor(cli: &Cli, config: &Config, profile: NetworkProfile) -> Executor<RpcClient> {
	let artifacts = cli
		.artifacts
		.clone()
		.unwrap_or_else(|| config.paths.artifacts.clone());
	Executor::new(
		RpcClient::new(&profile.rpc_url),
		ArtifactStore::new(artifacts),
		config.paths.proxy_artifact.clone(),
		config.deploy.clone(),
		profile,
	)
}
