use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub paths: PathsConfig,
	#[serde(default)]
	pub deploy: DeploySettings,
	#[serde(default)]
	pub networks: BTreeMap<String, NetworkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
	/// Address registry file.
	pub registry: PathBuf,
	/// Directory holding compiled contract artifacts.
	pub artifacts: PathBuf,
	/// Artifact name of the ERC-1967 proxy used for proxied deployments.
	pub proxy_artifact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
	pub confirmation_timeout_secs: u64,
	pub poll_interval_ms: u64,
	/// Blocks a receipt must have on top (1 = included).
	pub confirmations: u64,
	/// Submission attempts, counting the first one.
	pub max_attempts: u32,
	pub backoff_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
	pub rpc_url: Option<String>,
	pub chain_id: u64,
	/// Account the node signs with.
	pub deployer: Option<Address>,
}

/// A fully resolved target chain. Built once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
	pub name: String,
	pub rpc_url: String,
	pub chain_id: u64,
	pub deployer: Address,
}

impl Default for PathsConfig {
	fn default() -> Self {
		Self {
			registry: PathBuf::from("deployments/registry.toml"),
			artifacts: PathBuf::from("artifacts"),
			proxy_artifact: "ERC1967Proxy".into(),
		}
	}
}

impl Default for DeploySettings {
	fn default() -> Self {
		Self {
			confirmation_timeout_secs: 300,
			poll_interval_ms: 2_000,
			confirmations: 1,
			max_attempts: 3,
			backoff_ms: 500,
		}
	}
}

impl DeploySettings {
	pub fn confirmation_timeout(&self) -> Duration {
		Duration::from_secs(self.confirmation_timeout_secs)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn backoff(&self) -> Duration {
		Duration::from_millis(self.backoff_ms)
	}
}

impl Default for Config {
	fn default() -> Self {
		let networks = [
			("goerli", None, 5),
			("polygon", None, 137),
			("localhost", Some("http://127.0.0.1:8545"), 31337),
		]
		.into_iter()
		.map(|(name, rpc, chain_id)| {
			(
				name.to_owned(),
				NetworkConfig {
					rpc_url: rpc.map(str::to_owned),
					chain_id,
					deployer: None,
				},
			)
		})
		.collect();

		Self {
			paths: PathsConfig::default(),
			deploy: DeploySettings::default(),
			networks,
		}
	}
}

impl Config {
	/// Directory where tool state is stored (~/.index-deploy/).
	pub fn dir() -> PathBuf {
		dirs::home_dir()
			.unwrap_or_else(|| PathBuf::from("."))
			.join(".index-deploy")
	}

	/// Path to the default config file.
	pub fn path() -> PathBuf {
		Self::dir().join("config.toml")
	}

	/// Load config from `path` (or the default location), falling back to
	/// defaults if no file exists.
	pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
		let path = path.map(Path::to_path_buf).unwrap_or_else(Self::path);
		if path.exists() {
			let content = std::fs::read_to_string(&path)
				.with_context(|| format!("reading {}", path.display()))?;
			toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
		} else {
			Ok(Self::default())
		}
	}

	/// Build the profile for `network`, letting the environment override the
	/// RPC endpoint (`<NETWORK>_RPC_URL`) and signing account
	/// (`<NETWORK>_DEPLOYER`, then `DEPLOYER_ADDRESS`).
	pub fn profile(&self, network: &str) -> anyhow::Result<NetworkProfile> {
		self.profile_with(network, |key| std::env::var(key).ok())
	}

	fn profile_with(
		&self,
		network: &str,
		env: impl Fn(&str) -> Option<String>,
	) -> anyhow::Result<NetworkProfile> {
		let net = self.networks.get(network).ok_or_else(|| {
			let known: Vec<&str> = self.networks.keys().map(String::as_str).collect();
			anyhow!("unknown network `{network}`, configured: {}", known.join(", "))
		})?;
		let prefix = env_prefix(network);

		let rpc_url = env(&format!("{prefix}_RPC_URL"))
			.or_else(|| net.rpc_url.clone())
			.ok_or_else(|| anyhow!("no RPC URL for {network}: set {prefix}_RPC_URL"))?;

		let deployer = match env(&format!("{prefix}_DEPLOYER")).or_else(|| env("DEPLOYER_ADDRESS")) {
			Some(raw) => Address::from_str(raw.trim())
				.map_err(|e| anyhow!("invalid deployer address `{raw}`: {e}"))?,
			None => net.deployer.ok_or_else(|| {
				anyhow!("no deployer account for {network}: set {prefix}_DEPLOYER or DEPLOYER_ADDRESS")
			})?,
		};

		Ok(NetworkProfile {
			name: network.to_owned(),
			rpc_url,
			chain_id: net.chain_id,
			deployer,
		})
	}
}

fn env_prefix(network: &str) -> String {
	network
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
		.collect()
}
