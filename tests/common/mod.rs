//! In-memory chain and fixtures shared by the orchestrator tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use alloy_primitives::{keccak256, Address, Bytes, B256};
use async_trait::async_trait;

use index_deploy::artifacts::ArtifactStore;
use index_deploy::chain::{Chain, ChainError, Receipt, TxRequest, IMPLEMENTATION_SLOT};
use index_deploy::config::{DeploySettings, NetworkProfile};
use index_deploy::executor::Executor;
use index_deploy::registry::Registry;

pub const CHAIN_ID: u64 = 1337;
pub const NETWORK: &str = "test1";

/// Creation code of the fixture ERC1967Proxy.
const PROXY_CODE: &str = "0x6080604052348015600f57600080fd5b50ee01";

pub fn deployer() -> Address {
	Address::repeat_byte(0xde)
}

pub fn profile() -> NetworkProfile {
	NetworkProfile {
		name: NETWORK.into(),
		rpc_url: "http://mock".into(),
		chain_id: CHAIN_ID,
		deployer: deployer(),
	}
}

pub fn fast_settings() -> DeploySettings {
	DeploySettings {
		confirmation_timeout_secs: 1,
		poll_interval_ms: 10,
		confirmations: 1,
		max_attempts: 3,
		backoff_ms: 5,
	}
}

pub fn fixtures() -> PathBuf {
	Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/artifacts")
}

pub fn executor(chain: Arc<MockChain>) -> Executor<Arc<MockChain>> {
	Executor::new(
		chain,
		ArtifactStore::new(fixtures()),
		"ERC1967Proxy",
		fast_settings(),
		profile(),
	)
}

/// Fresh registry in its own temp dir, optionally seeded with `content`.
pub fn registry(dir: &tempfile::TempDir, content: &str) -> Registry {
	let path = dir.path().join("registry.toml");
	std::fs::write(&path, content).unwrap();
	Registry::open(path).unwrap()
}

pub fn selector(signature: &str) -> [u8; 4] {
	let hash = keccak256(signature);
	[hash[0], hash[1], hash[2], hash[3]]
}

// -- Mock chain --

#[derive(Default)]
struct State {
	nonces: HashMap<Address, u64>,
	head: u64,
	code: HashMap<Address, Bytes>,
	storage: HashMap<(Address, B256), B256>,
	receipts: HashMap<B256, Receipt>,
	signed: HashMap<B256, TxRequest>,
	accepted: Vec<TxRequest>,
	send_attempts: usize,
	/// Upcoming sends that fail with a transport error before reaching the
	/// node.
	failing_sends: usize,
	/// Upcoming sends the node accepts but whose response is lost.
	lost_responses: usize,
	revert: bool,
	withhold_receipts: bool,
}

/// Dev-node stand-in: contract creation at `Address::create`, an EIP-1967
/// slot written by proxy constructors and `upgradeToAndCall`, instant mining.
pub struct MockChain {
	chain_id: u64,
	proxy_code: Bytes,
	state: Mutex<State>,
}

impl MockChain {
	pub fn new() -> Arc<Self> {
		Self::with_chain_id(CHAIN_ID)
	}

	pub fn with_chain_id(chain_id: u64) -> Arc<Self> {
		Arc::new(Self {
			chain_id,
			proxy_code: Bytes::from_str(PROXY_CODE).unwrap(),
			state: Mutex::new(State::default()),
		})
	}

	pub fn fail_next_sends(&self, n: usize) {
		self.state.lock().unwrap().failing_sends = n;
	}

	pub fn lose_next_responses(&self, n: usize) {
		self.state.lock().unwrap().lost_responses = n;
	}

	pub fn revert_all(&self) {
		self.state.lock().unwrap().revert = true;
	}

	pub fn withhold_receipts(&self) {
		self.state.lock().unwrap().withhold_receipts = true;
	}

	/// Transactions the node accepted, in order.
	pub fn accepted(&self) -> Vec<TxRequest> {
		self.state.lock().unwrap().accepted.clone()
	}

	pub fn send_attempts(&self) -> usize {
		self.state.lock().unwrap().send_attempts
	}

	pub fn implementation_of(&self, proxy: Address) -> Address {
		let state = self.state.lock().unwrap();
		let word = state
			.storage
			.get(&(proxy, IMPLEMENTATION_SLOT))
			.copied()
			.unwrap_or_default();
		Address::from_word(word)
	}
}

#[async_trait]
impl Chain for MockChain {
	async fn chain_id(&self) -> Result<u64, ChainError> {
		Ok(self.chain_id)
	}

	async fn block_number(&self) -> Result<u64, ChainError> {
		Ok(self.state.lock().unwrap().head)
	}

	async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
		Ok(self.state.lock().unwrap().nonces.get(&address).copied().unwrap_or(0))
	}

	async fn sign_transaction(&self, tx: &TxRequest) -> Result<Bytes, ChainError> {
		let raw = Bytes::from(serde_json::to_vec(tx).unwrap());
		self.state
			.lock()
			.unwrap()
			.signed
			.insert(keccak256(&raw), tx.clone());
		Ok(raw)
	}

	async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError> {
		let mut state = self.state.lock().unwrap();
		state.send_attempts += 1;
		if state.failing_sends > 0 {
			state.failing_sends -= 1;
			return Err(ChainError::Transport("connection reset by peer".into()));
		}

		let hash = keccak256(raw);
		let tx = state
			.signed
			.get(&hash)
			.cloned()
			.ok_or_else(|| ChainError::Rpc { code: -32000, message: "invalid signature".into() })?;

		let nonce = state.nonces.get(&tx.from).copied().unwrap_or(0);
		match tx.nonce {
			Some(n) if n < nonce && state.receipts.contains_key(&hash) => {
				return Err(ChainError::AlreadyKnown("already known".into()))
			}
			Some(n) if n < nonce => return Err(ChainError::AlreadyKnown("nonce too low".into())),
			Some(n) if n > nonce => {
				return Err(ChainError::Rpc {
					code: -32000,
					message: format!("nonce too high: expected {nonce}, got {n}"),
				})
			}
			_ => {}
		}
		state.nonces.insert(tx.from, nonce + 1);
		state.head += 1;
		let status = !state.revert;

		let contract_address = match tx.to {
			None => {
				let created = tx.from.create(nonce);
				if status {
					if let Some(args) = tx.data.strip_prefix(&self.proxy_code[..]) {
						let word = B256::from_slice(&args[..32]);
						state.storage.insert((created, IMPLEMENTATION_SLOT), word);
					}
					state.code.insert(created, tx.data.clone());
				}
				Some(created)
			}
			Some(to) => {
				let upgrade = selector("upgradeToAndCall(address,bytes)");
				if status && tx.data.len() >= 36 && tx.data[..4] == upgrade {
					let word = B256::from_slice(&tx.data[4..36]);
					state.storage.insert((to, IMPLEMENTATION_SLOT), word);
				}
				None
			}
		};

		let receipt = Receipt {
			transaction_hash: hash,
			block_number: state.head,
			status,
			contract_address: if status { contract_address } else { None },
		};
		state.receipts.insert(hash, receipt);
		state.accepted.push(tx);

		if state.lost_responses > 0 {
			state.lost_responses -= 1;
			return Err(ChainError::Transport("connection reset by peer".into()));
		}
		Ok(hash)
	}

	async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError> {
		let state = self.state.lock().unwrap();
		if state.withhold_receipts {
			return Ok(None);
		}
		Ok(state.receipts.get(&hash).cloned())
	}

	async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError> {
		Ok(self
			.state
			.lock()
			.unwrap()
			.storage
			.get(&(address, slot))
			.copied()
			.unwrap_or_default())
	}

	async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
		Ok(self
			.state
			.lock()
			.unwrap()
			.code
			.get(&address)
			.cloned()
			.unwrap_or_default())
	}
}
