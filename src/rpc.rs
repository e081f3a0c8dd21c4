use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{Address, Bytes, B256};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::chain::{Chain, ChainError, Receipt, TxRequest};

/// Thin JSON-RPC client over HTTP for an Ethereum node.
///
/// Transactions are signed by the endpoint (`eth_signTransaction`) and then
/// broadcast raw, so the endpoint must manage the `from` account: a dev node,
/// a signer proxy such as Clef, or a wallet-backed gateway.
pub struct RpcClient {
	url: String,
	http: reqwest::Client,
	next_id: AtomicU64,
}

impl RpcClient {
	pub fn new(url: &str) -> Self {
		Self {
			url: url.to_owned(),
			http: reqwest::Client::new(),
			next_id: AtomicU64::new(1),
		}
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	/// Run one JSON-RPC call and return its `result`.
	pub async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
		let body = json!({
			"id": self.next_id.fetch_add(1, Ordering::Relaxed),
			"jsonrpc": "2.0",
			"method": method,
			"params": params,
		});

		let resp = self
			.http
			.post(&self.url)
			.json(&body)
			.send()
			.await
			.map_err(|e| ChainError::Transport(format!("{method}: {e}")))?;

		let status = resp.status();
		if status.as_u16() == 429 || status.is_server_error() {
			return Err(ChainError::Transport(format!("{method}: HTTP {status}")));
		}

		let resp: Value = resp
			.json()
			.await
			.map_err(|e| ChainError::Transport(format!("{method}: {e}")))?;

		if let Some(err) = resp.get("error") {
			return Err(classify_error(err));
		}
		resp.get("result")
			.cloned()
			.ok_or_else(|| ChainError::Decode(format!("{method}: response without result")))
	}
}

#[async_trait::async_trait]
impl Chain for RpcClient {
	async fn chain_id(&self) -> Result<u64, ChainError> {
		quantity(&self.request("eth_chainId", json!([])).await?)
	}

	async fn block_number(&self) -> Result<u64, ChainError> {
		quantity(&self.request("eth_blockNumber", json!([])).await?)
	}

	async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
		let v = self
			.request("eth_getTransactionCount", json!([address, "pending"]))
			.await?;
		quantity(&v)
	}

	async fn sign_transaction(&self, tx: &TxRequest) -> Result<Bytes, ChainError> {
		let mut obj = json!({ "from": tx.from, "data": tx.data });
		if let Some(to) = tx.to {
			obj["to"] = json!(to);
		}
		if let Some(nonce) = tx.nonce {
			obj["nonce"] = json!(format!("{nonce:#x}"));
		}

		// Signing endpoints do not fill gas fields; estimate with 20% headroom.
		let gas = quantity(&self.request("eth_estimateGas", json!([obj.clone()])).await?)?;
		obj["gas"] = json!(format!("{:#x}", gas.saturating_mul(6) / 5));
		obj["gasPrice"] = self.request("eth_gasPrice", json!([])).await?;
		obj["chainId"] = self.request("eth_chainId", json!([])).await?;

		// Geth answers `{ raw, tx }`, anvil the bare raw hex.
		let v = self.request("eth_signTransaction", json!([obj])).await?;
		parse_hex::<Bytes>(v.get("raw").unwrap_or(&v))
	}

	async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, ChainError> {
		let v = self.request("eth_sendRawTransaction", json!([raw])).await?;
		parse_hex::<B256>(&v)
	}

	async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError> {
		let v = self.request("eth_getTransactionReceipt", json!([hash])).await?;
		if v.is_null() {
			return Ok(None);
		}
		let raw: RawReceipt =
			serde_json::from_value(v).map_err(|e| ChainError::Decode(format!("receipt: {e}")))?;
		raw.into_receipt().map(Some)
	}

	async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, ChainError> {
		let v = self
			.request("eth_getStorageAt", json!([address, slot, "latest"]))
			.await?;
		parse_hex::<B256>(&v)
	}

	async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
		let v = self.request("eth_getCode", json!([address, "latest"])).await?;
		parse_hex::<Bytes>(&v)
	}
}

// -- Private helpers --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
	transaction_hash: B256,
	block_number: Option<String>,
	status: Option<String>,
	contract_address: Option<Address>,
}

impl RawReceipt {
	fn into_receipt(self) -> Result<Receipt, ChainError> {
		let block_number = match self.block_number {
			Some(b) => parse_quantity(&b)?,
			// Pending receipts from some nodes carry no block yet.
			None => return Err(ChainError::Decode("receipt without block number".into())),
		};
		// Pre-Byzantium receipts have no status; treat them as success.
		let status = match self.status {
			Some(s) => parse_quantity(&s)? == 1,
			None => true,
		};
		Ok(Receipt {
			transaction_hash: self.transaction_hash,
			block_number,
			status,
			contract_address: self.contract_address,
		})
	}
}

/// Map a JSON-RPC error object to a [`ChainError`].
///
/// Geth-style nodes report reverts with code 3 or an "execution reverted"
/// message; server-side overload codes are treated as transport trouble.
fn classify_error(err: &Value) -> ChainError {
	let code = err.get("code").and_then(Value::as_i64).unwrap_or_default();
	let message = err
		.get("message")
		.and_then(Value::as_str)
		.unwrap_or("unknown error")
		.to_owned();

	let lower = message.to_lowercase();
	if code == 3 || lower.contains("revert") {
		let data = err.get("data").map(|d| format!(" ({d})")).unwrap_or_default();
		return ChainError::Reverted(format!("{message}{data}"));
	}
	if ["already known", "known transaction", "nonce too low", "already imported"]
		.iter()
		.any(|m| lower.contains(m))
	{
		return ChainError::AlreadyKnown(message);
	}
	if code == -32005 || lower.contains("rate limit") || lower.contains("timeout") {
		return ChainError::Transport(message);
	}
	ChainError::Rpc { code, message }
}

fn quantity(v: &Value) -> Result<u64, ChainError> {
	let s = v
		.as_str()
		.ok_or_else(|| ChainError::Decode(format!("expected hex quantity, got {v}")))?;
	parse_quantity(s)
}

fn parse_quantity(s: &str) -> Result<u64, ChainError> {
	let digits = s.strip_prefix("0x").unwrap_or(s);
	u64::from_str_radix(digits, 16).map_err(|e| ChainError::Decode(format!("`{s}`: {e}")))
}

fn parse_hex<T: FromStr>(v: &Value) -> Result<T, ChainError>
where
	T::Err: std::fmt::Display,
{
	let s = v
		.as_str()
		.ok_or_else(|| ChainError::Decode(format!("expected hex string, got {v}")))?;
	T::from_str(s).map_err(|e| ChainError::Decode(format!("`{s}`: {e}")))
}
