use alloy_primitives::{Address, Bytes, B256};
use serde::Serialize;
use thiserror::Error;

/// EIP-1967 implementation slot: `keccak256("eip1967.proxy.implementation") - 1`.
pub const IMPLEMENTATION_SLOT: B256 = B256::new([
	0x36, 0x08, 0x94, 0xa1, 0x3b, 0xa1, 0xa3, 0x21, 0x06, 0x67, 0xc8, 0x28, 0x49, 0x2d, 0xb9, 0x8d,
	0xca, 0x3e, 0x20, 0x76, 0xcc, 0x37, 0x35, 0xa9, 0x20, 0xa3, 0xca, 0x50, 0x5d, 0x38, 0x2b, 0xbc,
]);

/// A transaction for the node to sign with the `from` account. Gas, fee and
/// chain id are filled in by the `Chain` when signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxRequest {
	pub from: Address,
	/// `None` creates a contract.
	pub to: Option<Address>,
	pub data: Bytes,
	pub nonce: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
	pub transaction_hash: B256,
	pub block_number: u64,
	/// `false` when execution reverted.
	pub status: bool,
	pub contract_address: Option<Address>,
}

#[derive(Debug, Error)]
pub enum ChainError {
	/// Connection refused, timeouts, rate limits, 5xx: worth retrying.
	#[error("transport: {0}")]
	Transport(String),
	/// The node refused because execution reverts.
	#[error("execution reverted: {0}")]
	Reverted(String),
	/// A resend of a transaction the node already has, or whose nonce is
	/// already used.
	#[error("already known: {0}")]
	AlreadyKnown(String),
	#[error("rpc error {code}: {message}")]
	Rpc { code: i64, message: String },
	#[error("malformed response: {0}")]
	Decode(String),
}

impl ChainError {
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Transport(_))
	}
}

/// The slice of a chain node the executor needs.
///
/// Signing stays with the node (or whatever the RPC endpoint fronts); this
/// tool never holds keys.
#[async_trait::async_trait]
pub trait Chain: Send + Sync {
	async fn chain_id(&self) -> Result<u64, ChainError>;

	async fn block_number(&self) -> Result<u64, ChainError>;

	/// Next nonce of `address`, counting pending transactions.
	async fn transaction_count(&self, address: Address) -> Result<u64, ChainError>;

	/// Sign `tx` with the node-held `from` key and return the raw
	/// transaction. Nothing is broadcast.
	async fn sign_transaction(&self, tx: &TxRequest) -> Result<Bytes, ChainError>;

	/// Broadcast a signed transaction. Its hash is `keccak256(raw)`.
	async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError>;

	/// `None` while the transaction is not yet mined.
	async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError>;

	async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError>;

	async fn code_at(&self, address: Address) -> Result<Bytes, ChainError>;
}

#[async_trait::async_trait]
impl<C: Chain + ?Sized> Chain for std::sync::Arc<C> {
	async fn chain_id(&self) -> Result<u64, ChainError> {
		(**self).chain_id().await
	}

	async fn block_number(&self) -> Result<u64, ChainError> {
		(**self).block_number().await
	}

	async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
		(**self).transaction_count(address).await
	}

	async fn sign_transaction(&self, tx: &TxRequest) -> Result<Bytes, ChainError> {
		(**self).sign_transaction(tx).await
	}

	async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError> {
		(**self).send_raw_transaction(raw).await
	}

	async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError> {
		(**self).transaction_receipt(hash).await
	}

	async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError> {
		(**self).storage_at(address, slot).await
	}

	async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
		(**self).code_at(address).await
	}
}
