use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
	name = "index-deploy",
	about = "Deploy, upgrade and wire index protocol contracts across networks.",
	version
)]
pub struct Cli {
	/// Config file (default: ~/.index-deploy/config.toml).
	#[arg(long, env = "INDEX_DEPLOY_CONFIG", global = true)]
	pub config: Option<PathBuf>,

	/// Override the address registry file.
	#[arg(long, global = true)]
	pub registry: Option<PathBuf>,

	/// Override the artifacts directory.
	#[arg(long, global = true)]
	pub artifacts: Option<PathBuf>,

	/// Override RPC endpoint URL.
	#[arg(long, global = true)]
	pub rpc_url: Option<String>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
	/// Deploy a contract and record its address.
	Deploy {
		#[command(flatten)]
		target: TargetArgs,

		/// Initializer arguments as key=value.
		overrides: Vec<String>,
	},

	/// Point an existing proxy at a freshly deployed implementation.
	Upgrade {
		#[command(flatten)]
		target: TargetArgs,
	},

	/// Print the arguments a deploy would use, without touching the chain.
	Resolve {
		#[command(flatten)]
		target: TargetArgs,

		/// Initializer arguments as key=value.
		overrides: Vec<String>,
	},

	/// Grant a factory the minter role on a token.
	SetMinter {
		/// Registry name of the token.
		token: String,

		/// Factory address or registry name.
		factory: String,

		/// Network the contracts live on.
		network: String,

		/// Further registry entries that get the same minter (e.g. the
		/// request NFT).
		#[arg(long)]
		also: Vec<String>,
	},

	/// Inspect or edit the address registry.
	Registry {
		#[command(subcommand)]
		command: RegistryCommand,
	},
}

#[derive(Args)]
pub struct TargetArgs {
	/// Contract (artifact) name, or a registry name for upgrades.
	pub contract: String,

	/// Network to deploy to.
	pub network: String,

	/// Initializer version when the contract has several (e.g. v2).
	#[arg(long, value_name = "VERSION")]
	pub abi_version: Option<String>,

	/// Record under this registry name instead of the contract name.
	#[arg(long = "as", value_name = "NAME")]
	pub alias: Option<String>,
}

// -- Registry subcommands --

#[derive(Subcommand)]
pub enum RegistryCommand {
	/// List recorded contracts.
	List {
		/// Only this network.
		network: Option<String>,
	},

	/// Show one record and the network's external entries.
	Show {
		name: String,
		network: String,
	},

	/// Forget a record. The contract on chain is left alone.
	Remove {
		name: String,
		network: String,
	},
}
