use std::str::FromStr;

use alloy_primitives::Address;
use anyhow::{anyhow, Result};
use tracing::info;

use crate::cli::Cli;
use crate::commands::{build_executor, load_config, open_registry, resolve_profile};

/// `setMinter(factory)` on the token and on every `--also` entry, in order.
/// Stops at the first failure.
pub async fn set_minter(
	cli: &Cli,
	token: &str,
	factory: &str,
	network: &str,
	also: &[String],
) -> Result<()> {
	let config = load_config(cli)?;
	let registry = open_registry(cli, &config)?;
	let profile = resolve_profile(cli, &config, network)?;

	let minter = match Address::from_str(factory) {
		Ok(a) => a,
		Err(_) => registry
			.address_of(factory, network)
			.ok_or_else(|| anyhow!("`{factory}` is neither an address nor a known name on {network}"))?,
	};

	let executor = build_executor(cli, &config, profile);
	for target in std::iter::once(token).chain(also.iter().map(String::as_str)) {
		info!(target, %minter, network, "setting minter");
		match executor
			.call_with_address(&registry, target, "setMinter", minter)
			.await
		{
			Ok(call) => {
				println!("{}.setMinter({minter})", call.target);
				println!("  Address: {}", call.address);
				println!("  Tx:      {}", call.transaction_hash);
				println!("  Block:   {}", call.block_number);
			}
			Err(e) => {
				println!("{target}.setMinter({minter})");
				println!("  Status:  Failed");
				println!("  Kind:    {}", e.kind());
				return Err(e.into());
			}
		}
	}
	Ok(())
}
