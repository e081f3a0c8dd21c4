use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DeployError;

const REGISTRY_LOCK_ATTEMPTS: u32 = 50;
const REGISTRY_LOCK_BACKOFF: std::time::Duration = std::time::Duration::from_millis(20);

/// A deployed contract instance known on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractRecord {
	/// Registry name; the artifact name unless deployed under an alias.
	pub contract_name: String,
	pub network: String,
	/// Compiled artifact the instance was built from.
	pub artifact: String,
	pub address: Address,
	pub abi_version: String,
	/// Logic contract behind the proxy, for proxied deployments.
	pub implementation: Option<Address>,
	pub transaction_hash: Option<B256>,
	pub block_number: Option<u64>,
	pub updated_at: Option<DateTime<Utc>>,
}

// -- On-disk layout --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
	#[serde(default)]
	networks: BTreeMap<String, NetworkEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NetworkEntry {
	/// Fixed addresses and identifiers this tool never writes.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	external: BTreeMap<String, String>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	contracts: BTreeMap<String, StoredRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredRecord {
	artifact: String,
	abi_version: String,
	address: Address,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	implementation: Option<Address>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	transaction_hash: Option<B256>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	block_number: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	updated_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
	fn into_record(self, contract_name: &str, network: &str) -> ContractRecord {
		ContractRecord {
			contract_name: contract_name.to_owned(),
			network: network.to_owned(),
			artifact: self.artifact,
			address: self.address,
			abi_version: self.abi_version,
			implementation: self.implementation,
			transaction_hash: self.transaction_hash,
			block_number: self.block_number,
			updated_at: self.updated_at,
		}
	}
}

impl From<&ContractRecord> for StoredRecord {
	fn from(r: &ContractRecord) -> Self {
		Self {
			artifact: r.artifact.clone(),
			abi_version: r.abi_version.clone(),
			address: r.address,
			implementation: r.implementation,
			transaction_hash: r.transaction_hash,
			block_number: r.block_number,
			updated_at: r.updated_at,
		}
	}
}

/// Durable map from (name, network) to [`ContractRecord`], plus the
/// read-only external table of every network.
///
/// Backed by a human-diffable TOML file. Every write re-reads the file under
/// a registry-wide lock, merges one change and atomically replaces the file,
/// so concurrent writers touching different keys never lose each other's
/// records.
#[derive(Debug)]
pub struct Registry {
	path: PathBuf,
	file: RegistryFile,
}

impl Registry {
	/// Load the registry at `path`. A missing file is an empty registry.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, DeployError> {
		let path = path.into();
		let file = read_file(&path)?;
		Ok(Self { path, file })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn lookup(&self, contract_name: &str, network: &str) -> Option<ContractRecord> {
		self.file
			.networks
			.get(network)?
			.contracts
			.get(contract_name)
			.cloned()
			.map(|r| r.into_record(contract_name, network))
	}

	/// Raw value of a fixed external entry (token, oracle, job id...).
	pub fn external_value(&self, name: &str, network: &str) -> Option<&str> {
		self.file
			.networks
			.get(network)?
			.external
			.get(name)
			.map(String::as_str)
	}

	/// Fixed external entry interpreted as an address.
	pub fn external_address(&self, name: &str, network: &str) -> Option<Address> {
		let raw = self.external_value(name, network)?;
		match Address::from_str(raw) {
			Ok(a) => Some(a),
			Err(e) => {
				warn!(name, network, "external entry is not an address: {e}");
				None
			}
		}
	}

	/// Registry name or external name to an address on `network`.
	pub fn address_of(&self, name: &str, network: &str) -> Option<Address> {
		self.lookup(name, network)
			.map(|r| r.address)
			.or_else(|| self.external_address(name, network))
	}

	/// All records, optionally restricted to one network, sorted by network
	/// then name.
	pub fn records(&self, network: Option<&str>) -> Vec<ContractRecord> {
		self.file
			.networks
			.iter()
			.filter(|(name, _)| network.map_or(true, |n| n == name.as_str()))
			.flat_map(|(net, entry)| {
				entry
					.contracts
					.iter()
					.map(move |(name, r)| r.clone().into_record(name, net))
			})
			.collect()
	}

	/// External table of a network, sorted by key.
	pub fn externals(&self, network: &str) -> Vec<(&str, &str)> {
		self.file
			.networks
			.get(network)
			.map(|e| {
				e.external
					.iter()
					.map(|(k, v)| (k.as_str(), v.as_str()))
					.collect()
			})
			.unwrap_or_default()
	}

	/// Store `record`, replacing any record with the same key. Either the
	/// whole record is durable when this returns `Ok`, or nothing changed.
	pub fn upsert(&mut self, record: ContractRecord) -> Result<(), DeployError> {
		let stored = StoredRecord::from(&record);
		self.modify(|file| {
			file.networks
				.entry(record.network.clone())
				.or_default()
				.contracts
				.insert(record.contract_name.clone(), stored);
		})?;
		debug!(
			contract = %record.contract_name,
			network = %record.network,
			address = %record.address,
			"registry record written"
		);
		Ok(())
	}

	/// Explicitly invalidate a record. Returns the removed record, if any.
	pub fn remove(
		&mut self,
		contract_name: &str,
		network: &str,
	) -> Result<Option<ContractRecord>, DeployError> {
		let mut removed = None;
		self.modify(|file| {
			if let Some(entry) = file.networks.get_mut(network) {
				removed = entry
					.contracts
					.remove(contract_name)
					.map(|r| r.into_record(contract_name, network));
			}
		})?;
		Ok(removed)
	}

	/// Take the exclusive lock for one (name, network) key. Held until the
	/// guard is dropped or the process exits.
	pub fn lock_key(&self, contract_name: &str, network: &str) -> Result<KeyLock, DeployError> {
		check_key_part("network", network)?;
		check_key_part("contract name", contract_name)?;
		KeyLock::acquire(&self.lock_dir(), &format!("{network}.{contract_name}"))
	}

	fn lock_dir(&self) -> PathBuf {
		self.path
			.parent()
			.map(Path::to_path_buf)
			.unwrap_or_default()
			.join(".locks")
	}

	/// Writes are short, so contention on the file itself is waited out
	/// briefly instead of failing the caller.
	fn registry_lock(&self) -> Result<KeyLock, DeployError> {
		let dir = self.lock_dir();
		let mut attempts = 0;
		loop {
			match KeyLock::acquire(&dir, "registry") {
				Err(DeployError::Locked { .. }) if attempts < REGISTRY_LOCK_ATTEMPTS => {
					attempts += 1;
					std::thread::sleep(REGISTRY_LOCK_BACKOFF);
				}
				other => return other,
			}
		}
	}

	fn modify(&mut self, change: impl FnOnce(&mut RegistryFile)) -> Result<(), DeployError> {
		let _guard = self.registry_lock().map_err(|e| match e {
			DeployError::Locked { path, .. } => DeployError::Persistence(format!(
				"{}: still being written by another process (lock {path})",
				self.path.display()
			)),
			other => other,
		})?;
		let mut fresh = read_file(&self.path)?;
		change(&mut fresh);
		write_atomic(&self.path, &fresh)?;
		self.file = fresh;
		Ok(())
	}
}

fn read_file(path: &Path) -> Result<RegistryFile, DeployError> {
	match fs::read_to_string(path) {
		Ok(content) => toml::from_str(&content)
			.map_err(|e| DeployError::Persistence(format!("{}: {e}", path.display()))),
		Err(e) if e.kind() == IoErrorKind::NotFound => Ok(RegistryFile::default()),
		Err(e) => Err(DeployError::Persistence(format!("{}: {e}", path.display()))),
	}
}

/// Write-temp-then-rename in the target directory.
fn write_atomic(path: &Path, file: &RegistryFile) -> Result<(), DeployError> {
	let persist_err = |e: &dyn std::fmt::Display| {
		DeployError::Persistence(format!("{}: {e}", path.display()))
	};

	let content = toml::to_string_pretty(file).map_err(|e| persist_err(&e))?;
	let dir = match path.parent() {
		Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
		_ => PathBuf::from("."),
	};
	fs::create_dir_all(&dir).map_err(|e| persist_err(&e))?;

	let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| persist_err(&e))?;
	tmp.write_all(content.as_bytes()).map_err(|e| persist_err(&e))?;
	tmp.as_file().sync_all().map_err(|e| persist_err(&e))?;
	tmp.persist(path).map_err(|e| persist_err(&e.error))?;
	Ok(())
}

/// Registry names and networks end up in lock file names, so they are kept
/// to `[A-Za-z0-9_-]`.
pub fn check_key_part(what: &str, value: &str) -> Result<(), DeployError> {
	let valid = !value.is_empty()
		&& value
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
	if valid {
		Ok(())
	} else {
		Err(DeployError::InvalidArgument {
			param: what.to_owned(),
			reason: format!("`{value}` may only contain letters, digits, `_` and `-`"),
		})
	}
}

// -- Key locks --

/// Exclusive lock on a registry key: an OS advisory lock on
/// `<dir>/<key>.lock`, so it holds across processes and dies with the
/// holder. The file itself stays behind and carries no meaning unlocked.
#[derive(Debug)]
pub struct KeyLock {
	file: File,
}

impl KeyLock {
	fn acquire(dir: &Path, key: &str) -> Result<Self, DeployError> {
		fs::create_dir_all(dir)
			.map_err(|e| DeployError::Persistence(format!("{}: {e}", dir.display())))?;
		let path = dir.join(format!("{key}.lock"));
		let persist_err = |e: std::io::Error| DeployError::Persistence(format!("{}: {e}", path.display()));

		let mut file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(false)
			.open(&path)
			.map_err(persist_err)?;
		match file.try_lock() {
			Ok(()) => {}
			Err(TryLockError::WouldBlock) => {
				return Err(DeployError::Locked {
					key: key.to_owned(),
					path: path.display().to_string(),
				})
			}
			Err(TryLockError::Error(e)) => return Err(persist_err(e)),
		}

		// Owner info for whoever finds the key busy.
		if let Err(e) = file
			.set_len(0)
			.and_then(|()| writeln!(file, "pid={} at={}", std::process::id(), Utc::now().to_rfc3339()))
		{
			debug!(path = %path.display(), "could not write lock owner: {e}");
		}
		Ok(Self { file })
	}
}

impl Drop for KeyLock {
	fn drop(&mut self) {
		if let Err(e) = self.file.unlock() {
			warn!("failed to release lock: {e}");
		}
	}
}
