use std::time::Duration;

use alloy_primitives::{keccak256, Address, Bytes, B256};
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::artifacts::{Artifact, ArtifactStore};
use crate::chain::{Chain, ChainError, Receipt, TxRequest, IMPLEMENTATION_SLOT};
use crate::config::{DeploySettings, NetworkProfile};
use crate::error::{DeployError, ErrorKind};
use crate::registry::{ContractRecord, Registry};
use crate::resolver::{DeploymentDescriptor, Mode};
use crate::schema::{ArgValue, DeployKind};

/// Lifecycle of one run.
///
/// A failed run ends in `RejectedBeforeSubmit` (nothing can have reached the
/// node), `Reverted` (the outstanding transaction reverted) or `Aborted`
/// (something failed after a transaction may have been broadcast: timeout,
/// exhausted retries, verification or persistence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
	Pending,
	Submitted,
	Confirmed,
	Reverted,
	RejectedBeforeSubmit,
	Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeploymentStatus {
	Success,
	Failed,
}

/// Terminal artifact of a run.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
	pub contract_name: String,
	pub network: String,
	/// Proxy (or plain contract) address once known.
	pub address: Option<Address>,
	pub implementation: Option<Address>,
	/// Last transaction broadcast by the run, confirmed or not.
	pub transaction_hash: Option<B256>,
	pub status: DeploymentStatus,
	/// Block of that transaction, once mined.
	pub block_number: Option<u64>,
	pub stage: Stage,
	pub error_kind: Option<ErrorKind>,
	pub error: Option<String>,
}

impl DeploymentResult {
	pub fn is_success(&self) -> bool {
		self.status == DeploymentStatus::Success
	}
}

/// Outcome of a confirmed method call.
#[derive(Debug, Clone, Serialize)]
pub struct CallResult {
	pub target: String,
	pub address: Address,
	pub method: String,
	pub transaction_hash: B256,
	pub block_number: u64,
}

/// Submits deploy/upgrade/call transactions and waits for them.
///
/// The only writer of deployment records: a record is stored after every
/// transaction of the run is confirmed and verified, never before.
pub struct Executor<C> {
	chain: C,
	artifacts: ArtifactStore,
	proxy_artifact: String,
	settings: DeploySettings,
	profile: NetworkProfile,
}

/// Progress of one run, folded into the [`DeploymentResult`].
struct Run {
	stage: Stage,
	/// Some send may have reached the node.
	sent: bool,
	address: Option<Address>,
	implementation: Option<Address>,
	hash: Option<B256>,
	block_number: Option<u64>,
}

impl Run {
	fn new() -> Self {
		Self {
			stage: Stage::Pending,
			sent: false,
			address: None,
			implementation: None,
			hash: None,
			block_number: None,
		}
	}

	/// A send of `hash` may have reached the node.
	fn submitted(&mut self, hash: B256) {
		if self.hash != Some(hash) {
			self.hash = Some(hash);
			self.block_number = None;
		}
		self.sent = true;
		self.stage = Stage::Submitted;
	}

	fn fail_stage(&self, err: &DeployError) -> Stage {
		match err {
			DeployError::TransactionReverted(_) if self.stage == Stage::Submitted => Stage::Reverted,
			_ if !self.sent => Stage::RejectedBeforeSubmit,
			_ => Stage::Aborted,
		}
	}
}

impl<C: Chain> Executor<C> {
	pub fn new(
		chain: C,
		artifacts: ArtifactStore,
		proxy_artifact: impl Into<String>,
		settings: DeploySettings,
		profile: NetworkProfile,
	) -> Self {
		Self {
			chain,
			artifacts,
			proxy_artifact: proxy_artifact.into(),
			settings,
			profile,
		}
	}

	pub fn chain(&self) -> &C {
		&self.chain
	}

	/// Carry out `descriptor` and, on success, record the result.
	///
	/// Consumes the descriptor: a descriptor drives at most one
	/// initialization.
	pub async fn execute(
		&self,
		registry: &mut Registry,
		descriptor: DeploymentDescriptor,
	) -> DeploymentResult {
		let mut run = Run::new();
		info!(
			contract = %descriptor.contract_name,
			network = %descriptor.network,
			version = %descriptor.version,
			mode = ?descriptor.mode,
			"pending"
		);

		let outcome = match registry.lock_key(&descriptor.contract_name, &descriptor.network) {
			Ok(_guard) => self.run(registry, &descriptor, &mut run).await,
			Err(e) => Err(e),
		};

		let (status, error_kind, error) = match outcome {
			Ok(()) => (DeploymentStatus::Success, None, None),
			Err(e) => {
				run.stage = run.fail_stage(&e);
				warn!(
					contract = %descriptor.contract_name,
					network = %descriptor.network,
					stage = ?run.stage,
					kind = %e.kind(),
					"{e}"
				);
				(DeploymentStatus::Failed, Some(e.kind()), Some(e.to_string()))
			}
		};

		DeploymentResult {
			contract_name: descriptor.contract_name,
			network: descriptor.network,
			address: run.address,
			implementation: run.implementation,
			transaction_hash: run.hash,
			status,
			block_number: run.block_number,
			stage: run.stage,
			error_kind,
			error,
		}
	}

	async fn run(
		&self,
		registry: &mut Registry,
		d: &DeploymentDescriptor,
		run: &mut Run,
	) -> Result<(), DeployError> {
		if d.network != self.profile.name {
			return Err(DeployError::InvalidArgument {
				param: "network".into(),
				reason: format!(
					"descriptor targets {}, executor is connected to {}",
					d.network, self.profile.name
				),
			});
		}

		// Everything that can be checked locally happens before the first
		// transaction.
		let schema = d.schema();
		let artifact = self.artifacts.load(schema.artifact)?;
		artifact.check_schema(schema)?;

		let record = match d.mode {
			Mode::Deploy => {
				let plan = self.plan_deploy(&artifact, d)?;
				self.verify_chain_id().await?;
				self.deploy(&artifact, plan, d, run).await?
			}
			Mode::Upgrade => {
				let current = registry
					.lookup(&d.contract_name, &d.network)
					.ok_or_else(|| DeployError::UnknownProxy {
						contract: d.contract_name.clone(),
						network: d.network.clone(),
					})?;
				if current.artifact != schema.artifact {
					return Err(DeployError::schema(
						schema.artifact,
						format!(
							"{} on {} was built from {}",
							d.contract_name, d.network, current.artifact
						),
					));
				}
				if schema.kind != DeployKind::Proxy {
					return Err(DeployError::NotUpgradeable {
						contract: d.contract_name.clone(),
					});
				}
				artifact.encode_upgrade(Address::ZERO)?;
				self.verify_chain_id().await?;

				// Records seeded by hand carry no implementation; the proxy
				// slot is authoritative.
				let slot = self
					.with_retry(|| self.chain.storage_at(current.address, IMPLEMENTATION_SLOT))
					.await?;
				let previous = Address::from_word(slot);
				if previous.is_zero() {
					return Err(DeployError::NotUpgradeable {
						contract: d.contract_name.clone(),
					});
				}
				info!(contract = %d.contract_name, proxy = %current.address, %previous, "upgrading");
				self.upgrade(&artifact, current, d, run).await?
			}
		};

		registry.upsert(record)?;
		info!(
			contract = %d.contract_name,
			network = %d.network,
			address = ?run.address,
			"recorded"
		);
		Ok(())
	}

	// -- Deploy --

	fn plan_deploy(&self, artifact: &Artifact, d: &DeploymentDescriptor) -> Result<DeployPlan, DeployError> {
		let values = d.values();
		match d.schema().kind {
			DeployKind::Plain => {
				let sol: Vec<_> = values.iter().map(ArgValue::to_sol).collect();
				Ok(DeployPlan::Plain(artifact.encode_deployment(&sol)?))
			}
			DeployKind::Proxy => {
				let init = artifact.encode_initializer(d.schema(), &values)?;
				let proxy = self.artifacts.load(&self.proxy_artifact)?;
				// Fail on a bad proxy artifact now, not after the
				// implementation is already on chain.
				proxy.encode_proxy_deployment(Address::ZERO, &init)?;
				Ok(DeployPlan::Proxy {
					implementation: artifact.encode_deployment(&[])?,
					proxy,
					init,
				})
			}
		}
	}

	async fn deploy(
		&self,
		artifact: &Artifact,
		plan: DeployPlan,
		d: &DeploymentDescriptor,
		run: &mut Run,
	) -> Result<ContractRecord, DeployError> {
		match plan {
			DeployPlan::Plain(data) => {
				let receipt = self.transact(None, data, d, run).await?;
				run.address = Some(created_address(&receipt)?);
			}
			DeployPlan::Proxy {
				implementation,
				proxy,
				init,
			} => {
				let receipt = self.transact(None, implementation, d, run).await?;
				let implementation = created_address(&receipt)?;
				run.implementation = Some(implementation);
				info!(contract = %d.contract_name, %implementation, "implementation deployed");

				// initialize runs inside the proxy constructor, exactly once.
				let data = proxy.encode_proxy_deployment(implementation, &init)?;
				let receipt = self.transact(None, data, d, run).await.inspect_err(|_| {
					warn!(%implementation, "implementation left without a proxy");
				})?;
				let proxy_address = created_address(&receipt)?;
				run.address = Some(proxy_address);
				self.verify_implementation(&artifact.contract_name, proxy_address, implementation)
					.await?;
			}
		}

		let address = run.address.ok_or_else(|| DeployError::Rpc("no contract address".into()))?;
		Ok(self.record(d, address, run))
	}

	// -- Upgrade --

	async fn upgrade(
		&self,
		artifact: &Artifact,
		current: ContractRecord,
		d: &DeploymentDescriptor,
		run: &mut Run,
	) -> Result<ContractRecord, DeployError> {
		let proxy = current.address;
		run.address = Some(proxy);

		let receipt = self
			.transact(None, artifact.encode_deployment(&[])?, d, run)
			.await?;
		let implementation = created_address(&receipt)?;
		run.implementation = Some(implementation);
		info!(contract = %d.contract_name, %implementation, "new implementation deployed");

		let data = artifact.encode_upgrade(implementation)?;
		self.transact(Some(proxy), data, d, run).await?;
		self.verify_implementation(&d.contract_name, proxy, implementation)
			.await?;

		Ok(self.record(d, proxy, run))
	}

	// -- Calls --

	/// Call `method(arg)` on the registry entry `target` and wait for it.
	/// The registry is not modified.
	pub async fn call_with_address(
		&self,
		registry: &Registry,
		target: &str,
		method: &str,
		arg: Address,
	) -> Result<CallResult, DeployError> {
		let network = self.profile.name.clone();
		let record = registry
			.lookup(target, &network)
			.ok_or_else(|| DeployError::UnknownProxy {
				contract: target.to_owned(),
				network: network.clone(),
			})?;
		let _guard = registry.lock_key(target, &network)?;

		let artifact = self.artifacts.load(&record.artifact)?;
		let data = artifact.encode_address_call(method, arg)?;
		self.verify_chain_id().await?;

		let mut run = Run::new();
		let receipt = self
			.send_and_confirm(Some(record.address), data, target, &mut run)
			.await?;
		Ok(CallResult {
			target: target.to_owned(),
			address: record.address,
			method: method.to_owned(),
			transaction_hash: receipt.transaction_hash,
			block_number: receipt.block_number,
		})
	}

	// -- Shared steps --

	fn record(&self, d: &DeploymentDescriptor, address: Address, run: &Run) -> ContractRecord {
		ContractRecord {
			contract_name: d.contract_name.clone(),
			network: d.network.clone(),
			artifact: d.schema().artifact.to_owned(),
			address,
			abi_version: d.schema().version.to_owned(),
			implementation: run.implementation,
			transaction_hash: run.hash,
			block_number: run.block_number,
			updated_at: Some(Utc::now()),
		}
	}

	async fn transact(
		&self,
		to: Option<Address>,
		data: Bytes,
		d: &DeploymentDescriptor,
		run: &mut Run,
	) -> Result<Receipt, DeployError> {
		self.send_and_confirm(to, data, &d.contract_name, run).await
	}

	async fn send_and_confirm(
		&self,
		to: Option<Address>,
		data: Bytes,
		label: &str,
		run: &mut Run,
	) -> Result<Receipt, DeployError> {
		let nonce = self
			.with_retry(|| self.chain.transaction_count(self.profile.deployer))
			.await?;
		let tx = TxRequest {
			from: self.profile.deployer,
			to,
			data,
			nonce: Some(nonce),
		};

		// Signed once: every resend carries the same bytes, so the hash is
		// known before the first broadcast.
		let raw = self.with_retry(|| self.chain.sign_transaction(&tx)).await?;
		let hash = keccak256(&raw);

		self.broadcast(&raw, hash, run).await?;
		info!(contract = %label, network = %self.profile.name, tx = %hash, nonce, "submitted");

		let receipt = self.wait_for_confirmation(hash).await?;
		run.block_number = Some(receipt.block_number);
		if !receipt.status {
			return Err(DeployError::TransactionReverted(format!(
				"{hash} reverted in block {}",
				receipt.block_number
			)));
		}
		run.stage = Stage::Confirmed;
		info!(
			contract = %label,
			tx = %hash,
			block = receipt.block_number,
			"confirmed"
		);
		Ok(receipt)
	}

	/// Broadcast `raw`, retrying transport failures. After an attempt that
	/// may have reached the node, a resend answered with "already known" or
	/// "nonce too low" means the earlier attempt landed.
	async fn broadcast(&self, raw: &Bytes, hash: B256, run: &mut Run) -> Result<(), DeployError> {
		let max = self.settings.max_attempts.max(1);
		let mut attempt = 1;
		loop {
			match self.chain.send_raw_transaction(raw).await {
				Ok(returned) => {
					run.submitted(hash);
					if returned != hash {
						warn!(tx = %hash, %returned, "node reported a different transaction hash");
					}
					return Ok(());
				}
				Err(ChainError::AlreadyKnown(message)) if run.sent && run.hash == Some(hash) => {
					info!(tx = %hash, "resend already known to the node: {message}");
					return Ok(());
				}
				Err(ChainError::Transport(message)) => {
					run.submitted(hash);
					if attempt >= max {
						return Err(DeployError::TransientNetwork {
							attempts: attempt,
							message,
						});
					}
					let delay = backoff_delay(self.settings.backoff(), attempt);
					warn!(tx = %hash, attempt, max, ?delay, "broadcast failed, resending: {message}");
					tokio::time::sleep(delay).await;
					attempt += 1;
				}
				Err(ChainError::Reverted(message)) => {
					return Err(DeployError::TransactionReverted(message))
				}
				Err(e) => return Err(DeployError::Rpc(e.to_string())),
			}
		}
	}

	/// Run `op`, retrying transport failures with exponential backoff plus
	/// jitter. Anything else is returned at once. Only for requests that
	/// change nothing on chain.
	async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, DeployError>
	where
		F: FnMut() -> Fut,
		Fut: std::future::Future<Output = Result<T, ChainError>>,
	{
		let max = self.settings.max_attempts.max(1);
		let mut attempt = 1;
		loop {
			match op().await {
				Ok(v) => return Ok(v),
				Err(e) if e.is_transient() && attempt < max => {
					let delay = backoff_delay(self.settings.backoff(), attempt);
					warn!(attempt, max, ?delay, "transient network error, retrying: {e}");
					tokio::time::sleep(delay).await;
					attempt += 1;
				}
				Err(ChainError::Transport(message)) => {
					return Err(DeployError::TransientNetwork {
						attempts: attempt,
						message,
					})
				}
				Err(ChainError::Reverted(message)) => {
					return Err(DeployError::TransactionReverted(message))
				}
				Err(e) => return Err(DeployError::Rpc(e.to_string())),
			}
		}
	}

	async fn wait_for_confirmation(&self, hash: B256) -> Result<Receipt, DeployError> {
		let timeout = self.settings.confirmation_timeout();
		let poll = async {
			loop {
				match self.confirmed_receipt(hash).await {
					Ok(Some(receipt)) => return Ok(receipt),
					Ok(None) => {}
					Err(e) if e.is_transient() => warn!(tx = %hash, "receipt poll failed: {e}"),
					Err(e) => return Err(DeployError::Rpc(e.to_string())),
				}
				tokio::time::sleep(self.settings.poll_interval()).await;
			}
		};

		tokio::time::timeout(timeout, poll)
			.await
			.map_err(|_| DeployError::ConfirmationTimeout { tx_hash: hash, timeout })?
	}

	/// The receipt once it has the configured number of confirmations.
	async fn confirmed_receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError> {
		let Some(receipt) = self.chain.transaction_receipt(hash).await? else {
			return Ok(None);
		};
		if self.settings.confirmations <= 1 || !receipt.status {
			return Ok(Some(receipt));
		}
		let tip = self.chain.block_number().await?;
		let depth = tip.saturating_sub(receipt.block_number) + 1;
		Ok((depth >= self.settings.confirmations).then_some(receipt))
	}

	async fn verify_chain_id(&self) -> Result<(), DeployError> {
		let actual = self.with_retry(|| self.chain.chain_id()).await?;
		if actual != self.profile.chain_id {
			return Err(DeployError::NetworkMismatch {
				network: self.profile.name.clone(),
				expected: self.profile.chain_id,
				actual,
			});
		}
		Ok(())
	}

	/// The proxy's EIP-1967 slot must name `expected`, and that address
	/// must hold code.
	async fn verify_implementation(
		&self,
		contract: &str,
		proxy: Address,
		expected: Address,
	) -> Result<(), DeployError> {
		let slot = self
			.with_retry(|| self.chain.storage_at(proxy, IMPLEMENTATION_SLOT))
			.await?;
		let actual = Address::from_word(slot);
		if actual != expected {
			return Err(DeployError::schema(
				contract,
				format!("proxy {proxy} points at {actual}, expected {expected}"),
			));
		}
		let code = self.with_retry(|| self.chain.code_at(expected)).await?;
		if code.is_empty() {
			return Err(DeployError::schema(
				contract,
				format!("implementation {expected} has no code"),
			));
		}
		Ok(())
	}
}

enum DeployPlan {
	Plain(Bytes),
	Proxy {
		implementation: Bytes,
		proxy: Artifact,
		init: Bytes,
	},
}

fn created_address(receipt: &Receipt) -> Result<Address, DeployError> {
	receipt.contract_address.ok_or_else(|| {
		DeployError::Rpc(format!(
			"receipt of {} has no contract address",
			receipt.transaction_hash
		))
	})
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
	let exp = base.saturating_mul(1 << (attempt - 1).min(16));
	let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64 / 2);
	exp + Duration::from_millis(jitter_ms)
}
