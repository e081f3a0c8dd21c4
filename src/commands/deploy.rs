use anyhow::{bail, Result};

use crate::cli::{Cli, TargetArgs};
use crate::commands::{build_executor, load_config, open_registry, resolve_profile};
use crate::executor::DeploymentResult;
use crate::registry::Registry;
use crate::resolver::{DeploymentDescriptor, Mode, Overrides, Resolver, Target};

pub async fn deploy(cli: &Cli, args: &TargetArgs, overrides: &[String]) -> Result<()> {
	run(cli, args, Mode::Deploy, overrides).await
}

pub async fn upgrade(cli: &Cli, args: &TargetArgs) -> Result<()> {
	run(cli, args, Mode::Upgrade, &[]).await
}

/// Dry run: resolve and print the descriptor.
pub fn resolve(cli: &Cli, args: &TargetArgs, overrides: &[String]) -> Result<()> {
	let config = load_config(cli)?;
	let registry = open_registry(cli, &config)?;
	let profile = resolve_profile(cli, &config, &args.network)?;
	let overrides = Overrides::parse(overrides)?;

	let target = target_for(args, &registry, Mode::Deploy);
	let descriptor = Resolver::new(&registry, &profile).resolve(&target, Mode::Deploy, &overrides);
	match descriptor {
		Ok(d) => {
			print!("{d}");
			Ok(())
		}
		Err(e) => {
			println!("Kind:     {}", e.kind());
			bail!(e)
		}
	}
}

async fn run(cli: &Cli, args: &TargetArgs, mode: Mode, overrides: &[String]) -> Result<()> {
	let config = load_config(cli)?;
	let mut registry = open_registry(cli, &config)?;
	let profile = resolve_profile(cli, &config, &args.network)?;
	let overrides = Overrides::parse(overrides)?;

	let target = target_for(args, &registry, mode);
	let descriptor = match Resolver::new(&registry, &profile).resolve(&target, mode, &overrides) {
		Ok(d) => d,
		Err(e) => {
			println!("Status:   Failed (rejected before submit)");
			println!("Kind:     {}", e.kind());
			bail!(e)
		}
	};

	println!("{descriptor}");
	let shown = descriptor.clone();
	let executor = build_executor(cli, &config, profile);
	let result = executor.execute(&mut registry, descriptor).await;
	report(&result, &shown, &registry)
}

/// Upgrades may name a registry entry (e.g. `AnfiFactory`); its recorded
/// artifact is the contract to build.
fn target_for(args: &TargetArgs, registry: &Registry, mode: Mode) -> Target {
	let mut target = Target::new(&args.contract);
	if mode == Mode::Upgrade && args.alias.is_none() {
		if let Some(record) = registry.lookup(&args.contract, &args.network) {
			if record.artifact != args.contract {
				target = Target::new(record.artifact).alias(&args.contract);
			}
		}
	}
	if let Some(v) = &args.abi_version {
		target = target.version(v);
	}
	if let Some(a) = &args.alias {
		target = target.alias(a);
	}
	target
}

fn report(result: &DeploymentResult, descriptor: &DeploymentDescriptor, registry: &Registry) -> Result<()> {
	println!("Contract: {}", result.contract_name);
	println!("Network:  {}", result.network);
	println!("Stage:    {:?}", result.stage);
	if let Some(address) = result.address {
		println!("Address:  {address}");
	}
	if let Some(implementation) = result.implementation {
		println!("Impl:     {implementation}");
	}
	if let Some(tx) = result.transaction_hash {
		println!("Tx:       {tx}");
	}
	if let Some(block) = result.block_number {
		println!("Block:    {block}");
	}

	if result.is_success() {
		println!("Status:   Success");
		println!("Recorded in {}", registry.path().display());
		return Ok(());
	}

	println!("Status:   Failed");
	if let Some(kind) = result.error_kind {
		println!("Kind:     {kind}");
	}
	eprint!("Descriptor: {descriptor}");
	bail!(
		"{} on {} failed: {}",
		result.contract_name,
		result.network,
		result.error.as_deref().unwrap_or("unknown error")
	)
}
