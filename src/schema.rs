use std::fmt;
use std::str::FromStr;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256, U256};
use serde::{Serialize, Serializer};

use crate::error::DeployError;

/// Solidity types that appear in the deployable initializers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
	Address,
	Uint256,
	String,
	Bytes32,
}

impl ParamType {
	/// Canonical Solidity spelling, as found in ABI `inputs[].type`.
	pub fn solidity(&self) -> &'static str {
		match self {
			Self::Address => "address",
			Self::Uint256 => "uint256",
			Self::String => "string",
			Self::Bytes32 => "bytes32",
		}
	}
}

/// Where a parameter falls back to when the caller gives no override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
	/// The signing account of the network profile.
	Deployer,
	/// Address of a record in the registry, by registry name.
	Deployed(&'static str),
	/// Entry of the network's fixed external table.
	External(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
	pub name: &'static str,
	pub ty: ParamType,
	pub source: Option<Source>,
	pub default: Option<&'static str>,
}

const fn param(name: &'static str, ty: ParamType) -> ParamSpec {
	ParamSpec { name, ty, source: None, default: None }
}

const fn sourced(name: &'static str, ty: ParamType, source: Source) -> ParamSpec {
	ParamSpec { name, ty, source: Some(source), default: None }
}

const fn defaulted(name: &'static str, ty: ParamType, default: &'static str) -> ParamSpec {
	ParamSpec { name, ty, source: None, default: Some(default) }
}

/// How a contract lands on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeployKind {
	/// Logic contract behind an ERC-1967 proxy, set up through `initialize`.
	Proxy,
	/// Plain contract set up through its constructor.
	Plain,
}

#[derive(Debug)]
pub struct ContractSchema {
	pub artifact: &'static str,
	pub version: &'static str,
	pub kind: DeployKind,
	pub params: &'static [ParamSpec],
}

impl ContractSchema {
	/// Name of the ABI entry that receives the arguments.
	pub fn entry_point(&self) -> &'static str {
		match self.kind {
			DeployKind::Proxy => "initialize",
			DeployKind::Plain => "constructor",
		}
	}

	pub fn param(&self, name: &str) -> Option<&ParamSpec> {
		self.params.iter().find(|p| p.name == name)
	}
}

// -- Schemas --

const INDEX_TOKEN_V1: ContractSchema = ContractSchema {
	artifact: "IndexToken",
	version: "v1",
	kind: DeployKind::Proxy,
	params: &[
		param("name", ParamType::String),
		param("symbol", ParamType::String),
		defaulted("decimals", ParamType::Uint256, "18"),
		sourced("feeReceiver", ParamType::Address, Source::Deployer),
		param("supplyLimit", ParamType::Uint256),
	],
};

const INDEX_FACTORY_V1: ContractSchema = ContractSchema {
	artifact: "IndexFactory",
	version: "v1",
	kind: DeployKind::Proxy,
	params: &[
		sourced("custodianWallet", ParamType::Address, Source::Deployer),
		sourced("issuerWallet", ParamType::Address, Source::Deployer),
		sourced("token", ParamType::Address, Source::Deployed("IndexToken")),
		sourced("usdt", ParamType::Address, Source::External("usdt")),
		defaulted("usdtDecimals", ParamType::Uint256, "18"),
		sourced("nft", ParamType::Address, Source::Deployed("RequestNFT")),
	],
};

const INDEX_FACTORY_V2: ContractSchema = ContractSchema {
	artifact: "IndexFactory",
	version: "v2",
	kind: DeployKind::Proxy,
	params: &[
		sourced("custodianWallet", ParamType::Address, Source::Deployer),
		sourced("issuerWallet", ParamType::Address, Source::Deployer),
		sourced("token", ParamType::Address, Source::Deployed("IndexToken")),
		sourced("usdt", ParamType::Address, Source::External("usdt")),
		defaulted("usdtDecimals", ParamType::Uint256, "18"),
		sourced("nft", ParamType::Address, Source::Deployed("RequestNFT")),
		sourced("chainlinkToken", ParamType::Address, Source::External("link")),
		sourced("oracle", ParamType::Address, Source::External("oracle")),
		sourced("externalJobId", ParamType::Bytes32, Source::External("externalJobId")),
	],
};

const REQUEST_NFT_V1: ContractSchema = ContractSchema {
	artifact: "RequestNFT",
	version: "v1",
	kind: DeployKind::Plain,
	params: &[
		param("name", ParamType::String),
		param("symbol", ParamType::String),
		sourced("owner", ParamType::Address, Source::Deployer),
	],
};

/// Every deployable (contract, initializer shape) pair.
///
/// Versions of one contract whose initializers differ are distinct variants,
/// so an argument list is always built against exactly one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractVersion {
	IndexTokenV1,
	IndexFactoryV1,
	IndexFactoryV2,
	RequestNftV1,
}

impl ContractVersion {
	pub const ALL: [ContractVersion; 4] = [
		Self::IndexTokenV1,
		Self::IndexFactoryV1,
		Self::IndexFactoryV2,
		Self::RequestNftV1,
	];

	pub fn schema(&self) -> &'static ContractSchema {
		match self {
			Self::IndexTokenV1 => &INDEX_TOKEN_V1,
			Self::IndexFactoryV1 => &INDEX_FACTORY_V1,
			Self::IndexFactoryV2 => &INDEX_FACTORY_V2,
			Self::RequestNftV1 => &REQUEST_NFT_V1,
		}
	}

	/// Pick the variant for an artifact name and an optional version label.
	///
	/// The label may be omitted only when the contract has a single version.
	pub fn select(contract: &str, version: Option<&str>) -> Result<Self, DeployError> {
		let candidates: Vec<Self> = Self::ALL
			.into_iter()
			.filter(|v| v.schema().artifact == contract)
			.collect();
		if candidates.is_empty() {
			return Err(DeployError::UnknownContract(contract.to_owned()));
		}

		match version {
			Some(label) => candidates
				.iter()
				.copied()
				.find(|v| v.schema().version == label)
				.ok_or_else(|| {
					DeployError::schema(
						contract,
						format!("no version `{label}`, known: {}", labels(&candidates)),
					)
				}),
			None if candidates.len() == 1 => Ok(candidates[0]),
			None => Err(DeployError::schema(
				contract,
				format!(
					"initializer differs between versions {}; choose one explicitly",
					labels(&candidates)
				),
			)),
		}
	}
}

impl fmt::Display for ContractVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = self.schema();
		write!(f, "{}@{}", s.artifact, s.version)
	}
}

impl Serialize for ContractVersion {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

fn labels(versions: &[ContractVersion]) -> String {
	versions
		.iter()
		.map(|v| v.schema().version)
		.collect::<Vec<_>>()
		.join(", ")
}

// -- Argument values --

/// A typed initializer/constructor argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
	Address(Address),
	Uint(U256),
	String(String),
	Bytes32(B256),
}

impl ArgValue {
	/// Parse a raw string as `ty`. Errors carry a human-readable reason.
	pub fn parse(ty: ParamType, raw: &str) -> Result<Self, String> {
		let raw = raw.trim();
		match ty {
			ParamType::Address => Address::from_str(raw)
				.map(Self::Address)
				.map_err(|e| format!("not an address: {e}")),
			ParamType::Uint256 => parse_uint(raw).map(Self::Uint),
			ParamType::String => Ok(Self::String(raw.to_owned())),
			ParamType::Bytes32 => parse_bytes32(raw).map(Self::Bytes32),
		}
	}

	pub fn param_type(&self) -> ParamType {
		match self {
			Self::Address(_) => ParamType::Address,
			Self::Uint(_) => ParamType::Uint256,
			Self::String(_) => ParamType::String,
			Self::Bytes32(_) => ParamType::Bytes32,
		}
	}

	pub fn to_sol(&self) -> DynSolValue {
		match self {
			Self::Address(a) => DynSolValue::Address(*a),
			Self::Uint(v) => DynSolValue::Uint(*v, 256),
			Self::String(s) => DynSolValue::String(s.clone()),
			Self::Bytes32(b) => DynSolValue::FixedBytes(*b, 32),
		}
	}
}

impl fmt::Display for ArgValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Address(a) => write!(f, "{a}"),
			Self::Uint(v) => write!(f, "{v}"),
			Self::String(s) => write!(f, "{s:?}"),
			Self::Bytes32(b) => write!(f, "{b}"),
		}
	}
}

impl Serialize for ArgValue {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			Self::String(s) => serializer.serialize_str(s),
			other => serializer.collect_str(other),
		}
	}
}

/// Decimal, `0x` hex, `_` separators and `<mantissa>e<exp>` notation,
/// e.g. `1_000_000e18` or `1.5e18`.
fn parse_uint(raw: &str) -> Result<U256, String> {
	let cleaned: String = raw.chars().filter(|c| *c != '_').collect();
	if cleaned.is_empty() {
		return Err("empty number".into());
	}

	if let Some(hex) = cleaned
		.strip_prefix("0x")
		.or_else(|| cleaned.strip_prefix("0X"))
	{
		return U256::from_str_radix(hex, 16).map_err(|e| format!("bad hex number: {e}"));
	}

	let (mantissa, exp) = match cleaned.split_once(['e', 'E']) {
		Some((m, e)) => (m, e.parse::<u32>().map_err(|e| format!("bad exponent: {e}"))?),
		None => (cleaned.as_str(), 0),
	};
	let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
	let frac_len = frac_part.len() as u32;
	if frac_len > exp {
		return Err(format!("`{raw}` is not an integer"));
	}

	let digits = format!("{int_part}{frac_part}");
	if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
		return Err(format!("`{raw}` is not a number"));
	}
	let base = U256::from_str_radix(&digits, 10).map_err(|e| format!("bad number: {e}"))?;
	U256::from(10u8)
		.checked_pow(U256::from(exp - frac_len))
		.and_then(|scale| base.checked_mul(scale))
		.ok_or_else(|| format!("`{raw}` overflows uint256"))
}

/// `0x` + 64 hex digits, or an ASCII string of at most 32 bytes stored
/// left-aligned and zero padded.
fn parse_bytes32(raw: &str) -> Result<B256, String> {
	if raw.starts_with("0x") {
		return B256::from_str(raw).map_err(|e| format!("bad bytes32: {e}"));
	}
	let bytes = raw.as_bytes();
	if bytes.len() > 32 {
		return Err(format!("`{raw}` is longer than 32 bytes"));
	}
	let mut word = [0u8; 32];
	word[..bytes.len()].copy_from_slice(bytes);
	Ok(B256::from(word))
}
