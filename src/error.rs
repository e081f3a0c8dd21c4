use std::time::Duration;

use alloy_primitives::B256;
use serde::Serialize;
use thiserror::Error;

/// Everything that can stop a resolve, deploy, upgrade or call.
#[derive(Debug, Error)]
pub enum DeployError {
	#[error("unresolved dependency for {contract}: no override, registry entry or default for {}", .params.join(", "))]
	UnresolvedDependency { contract: String, params: Vec<String> },

	#[error("schema mismatch for {contract}: {reason}")]
	SchemaMismatch { contract: String, reason: String },

	#[error("unknown proxy: no {contract} record on {network}")]
	UnknownProxy { contract: String, network: String },

	#[error("{contract} is deployed without a proxy and cannot be upgraded")]
	NotUpgradeable { contract: String },

	#[error("registry persistence failed: {0}")]
	Persistence(String),

	#[error("transaction {tx_hash} not confirmed within {}s", .timeout.as_secs())]
	ConfirmationTimeout { tx_hash: B256, timeout: Duration },

	#[error("transaction reverted: {0}")]
	TransactionReverted(String),

	#[error("network unreachable after {attempts} attempt(s): {message}")]
	TransientNetwork { attempts: u32, message: String },

	#[error("unknown contract `{0}`")]
	UnknownContract(String),

	#[error("invalid value for `{param}`: {reason}")]
	InvalidArgument { param: String, reason: String },

	#[error("network {network} expects chain id {expected}, node reports {actual}")]
	NetworkMismatch { network: String, expected: u64, actual: u64 },

	#[error("artifact error: {0}")]
	Artifact(String),

	#[error("node rejected request: {0}")]
	Rpc(String),

	#[error("registry key {key} is held by another operation (lock file {path})")]
	Locked { key: String, path: String },
}

/// Copyable tag of a [`DeployError`], printed in results and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
	UnresolvedDependency,
	SchemaMismatch,
	UnknownProxy,
	NotUpgradeable,
	PersistenceError,
	ConfirmationTimeout,
	TransactionReverted,
	TransientNetworkError,
	UnknownContract,
	InvalidArgument,
	NetworkMismatch,
	ArtifactError,
	RpcError,
	Locked,
}

impl DeployError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::UnresolvedDependency { .. } => ErrorKind::UnresolvedDependency,
			Self::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
			Self::UnknownProxy { .. } => ErrorKind::UnknownProxy,
			Self::NotUpgradeable { .. } => ErrorKind::NotUpgradeable,
			Self::Persistence(_) => ErrorKind::PersistenceError,
			Self::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
			Self::TransactionReverted(_) => ErrorKind::TransactionReverted,
			Self::TransientNetwork { .. } => ErrorKind::TransientNetworkError,
			Self::UnknownContract(_) => ErrorKind::UnknownContract,
			Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
			Self::NetworkMismatch { .. } => ErrorKind::NetworkMismatch,
			Self::Artifact(_) => ErrorKind::ArtifactError,
			Self::Rpc(_) => ErrorKind::RpcError,
			Self::Locked { .. } => ErrorKind::Locked,
		}
	}

	pub(crate) fn schema(contract: &str, reason: impl Into<String>) -> Self {
		Self::SchemaMismatch {
			contract: contract.to_owned(),
			reason: reason.into(),
		}
	}
}

impl std::fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{self:?}")
	}
}
