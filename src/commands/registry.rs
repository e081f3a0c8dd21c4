use anyhow::{bail, Result};

use crate::cli::{Cli, RegistryCommand};
use crate::commands::{load_config, open_registry};
use crate::registry::ContractRecord;

pub fn run(cli: &Cli, cmd: &RegistryCommand) -> Result<()> {
	let config = load_config(cli)?;
	let mut registry = open_registry(cli, &config)?;

	match cmd {
		RegistryCommand::List { network } => {
			let records = registry.records(network.as_deref());
			if records.is_empty() {
				println!("No records in {}.", registry.path().display());
				return Ok(());
			}
			for r in &records {
				println!(
					"{:<10} {:<22} {:<14} {} {}",
					r.network,
					r.contract_name,
					format!("{}@{}", r.artifact, r.abi_version),
					r.address,
					if r.implementation.is_some() { "(proxy)" } else { "" }
				);
			}
			Ok(())
		}
		RegistryCommand::Show { name, network } => {
			match registry.lookup(name, network) {
				Some(r) => print_record(&r),
				None => println!("No record for {name} on {network}."),
			}
			let externals = registry.externals(network);
			if !externals.is_empty() {
				println!("External ({network}):");
				for (key, value) in externals {
					println!("  {key:<16} {value}");
				}
			}
			Ok(())
		}
		RegistryCommand::Remove { name, network } => {
			let _guard = registry.lock_key(name, network)?;
			match registry.remove(name, network)? {
				Some(r) => {
					println!("Removed {} ({}) from {network}.", r.contract_name, r.address);
					Ok(())
				}
				None => bail!("no record for {name} on {network}"),
			}
		}
	}
}

fn print_record(r: &ContractRecord) {
	println!("Contract:  {}", r.contract_name);
	println!("Network:   {}", r.network);
	println!("Artifact:  {}@{}", r.artifact, r.abi_version);
	println!("Address:   {}", r.address);
	if let Some(i) = r.implementation {
		println!("Impl:      {i}");
	}
	if let Some(tx) = r.transaction_hash {
		println!("Tx:        {tx}");
	}
	if let Some(b) = r.block_number {
		println!("Block:     {b}");
	}
	if let Some(at) = r.updated_at {
		println!("Updated:   {}", at.to_rfc3339());
	}
}
