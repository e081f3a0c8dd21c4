use std::fs;
use std::path::{Path, PathBuf};

use alloy_dyn_abi::{DynSolValue, JsonAbiExt};
use alloy_json_abi::{JsonAbi, Param};
use alloy_primitives::{Address, Bytes};
use serde::Deserialize;

use crate::error::DeployError;
use crate::schema::{ArgValue, ContractSchema, DeployKind};

/// Compiled contract output as written by Hardhat or Foundry.
///
/// Hardhat stores bytecode as a hex string, Foundry as
/// `{"object": "0x..", "sourceMap": ..}`; both are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
	#[serde(default)]
	pub contract_name: String,
	pub abi: JsonAbi,
	#[serde(deserialize_with = "bytecode")]
	pub bytecode: Bytes,
	#[serde(default, deserialize_with = "bytecode")]
	pub deployed_bytecode: Bytes,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BytecodeField {
	Hex(Bytes),
	Object { object: Bytes },
}

fn bytecode<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
	D: serde::Deserializer<'de>,
{
	Ok(match BytecodeField::deserialize(deserializer)? {
		BytecodeField::Hex(code) | BytecodeField::Object { object: code } => code,
	})
}

/// Read-only view over an artifacts directory.
///
/// `<Name>` is looked up as `<root>/<Name>.json` first, then as the nested
/// `<root>/**/<Name>.sol/<Name>.json` layout Hardhat and Foundry emit.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
	root: PathBuf,
}

impl ArtifactStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn load(&self, name: &str) -> Result<Artifact, DeployError> {
		let path = self.locate(name).ok_or_else(|| {
			DeployError::Artifact(format!("{name} not found under {}", self.root.display()))
		})?;
		let content = fs::read_to_string(&path)
			.map_err(|e| DeployError::Artifact(format!("{}: {e}", path.display())))?;
		let mut artifact: Artifact = serde_json::from_str(&content)
			.map_err(|e| DeployError::Artifact(format!("{}: {e}", path.display())))?;
		if artifact.contract_name.is_empty() {
			artifact.contract_name = name.to_owned();
		}
		if artifact.bytecode.is_empty() {
			return Err(DeployError::Artifact(format!(
				"{name} has no bytecode (abstract contract or interface?)"
			)));
		}
		Ok(artifact)
	}

	fn locate(&self, name: &str) -> Option<PathBuf> {
		let flat = self.root.join(format!("{name}.json"));
		if flat.is_file() {
			return Some(flat);
		}
		find_nested(&self.root, &format!("{name}.sol"), &format!("{name}.json"))
	}
}

fn find_nested(dir: &Path, sol_dir: &str, file: &str) -> Option<PathBuf> {
	let entries = fs::read_dir(dir).ok()?;
	for entry in entries.flatten() {
		let path = entry.path();
		if !path.is_dir() {
			continue;
		}
		if entry.file_name().to_str() == Some(sol_dir) {
			let candidate = path.join(file);
			if candidate.is_file() {
				return Some(candidate);
			}
		}
		if let Some(found) = find_nested(&path, sol_dir, file) {
			return Some(found);
		}
	}
	None
}

impl Artifact {
	/// Compare the ABI entry point's inputs with the schema's parameters.
	pub fn check_schema(&self, schema: &ContractSchema) -> Result<(), DeployError> {
		let inputs = self.entry_inputs(schema)?;
		let found: Vec<&str> = inputs.iter().map(|p| p.ty.as_str()).collect();
		let expected: Vec<&str> = schema.params.iter().map(|p| p.ty.solidity()).collect();
		if found != expected {
			return Err(DeployError::schema(
				schema.artifact,
				format!(
					"{} {} expects ({}), artifact declares ({})",
					schema.version,
					schema.entry_point(),
					expected.join(","),
					found.join(",")
				),
			));
		}
		Ok(())
	}

	/// Calldata for `initialize(args)`.
	pub fn encode_initializer(
		&self,
		schema: &ContractSchema,
		args: &[ArgValue],
	) -> Result<Bytes, DeployError> {
		self.check_schema(schema)?;
		let function = self
			.matching_function("initialize", &types_of(schema))
			.ok_or_else(|| DeployError::schema(schema.artifact, "no matching initialize"))?;
		let values: Vec<DynSolValue> = args.iter().map(ArgValue::to_sol).collect();
		function
			.abi_encode_input(&values)
			.map(Bytes::from)
			.map_err(|e| DeployError::schema(schema.artifact, format!("encoding initialize: {e}")))
	}

	/// Creation code followed by the ABI-encoded constructor arguments.
	pub fn encode_deployment(&self, values: &[DynSolValue]) -> Result<Bytes, DeployError> {
		let args = match (self.abi.constructor(), values.is_empty()) {
			(None, true) => Vec::new(),
			(None, false) => {
				return Err(DeployError::schema(
					&self.contract_name,
					"constructor arguments given but the ABI has no constructor",
				))
			}
			(Some(constructor), _) => constructor.abi_encode_input(values).map_err(|e| {
				DeployError::schema(&self.contract_name, format!("encoding constructor: {e}"))
			})?,
		};
		Ok(self.bytecode.iter().copied().chain(args).collect())
	}

	/// Deployment data for `ERC1967Proxy(implementation, init_data)`.
	pub fn encode_proxy_deployment(
		&self,
		implementation: Address,
		init_data: &Bytes,
	) -> Result<Bytes, DeployError> {
		self.encode_deployment(&[
			DynSolValue::Address(implementation),
			DynSolValue::Bytes(init_data.to_vec()),
		])
	}

	/// Calldata for a single-address method such as `setMinter(address)`.
	pub fn encode_address_call(&self, method: &str, arg: Address) -> Result<Bytes, DeployError> {
		let function = self.matching_function(method, &["address"]).ok_or_else(|| {
			DeployError::schema(&self.contract_name, format!("ABI has no {method}(address)"))
		})?;
		function
			.abi_encode_input(&[DynSolValue::Address(arg)])
			.map(Bytes::from)
			.map_err(|e| DeployError::schema(&self.contract_name, format!("encoding {method}: {e}")))
	}

	/// Calldata pointing a UUPS proxy at `implementation`. Prefers
	/// `upgradeToAndCall(address,bytes)` with empty data and falls back to
	/// the older `upgradeTo(address)`.
	pub fn encode_upgrade(&self, implementation: Address) -> Result<Bytes, DeployError> {
		if let Some(f) = self.matching_function("upgradeToAndCall", &["address", "bytes"]) {
			return f
				.abi_encode_input(&[
					DynSolValue::Address(implementation),
					DynSolValue::Bytes(Vec::new()),
				])
				.map(Bytes::from)
				.map_err(|e| DeployError::schema(&self.contract_name, e.to_string()));
		}
		self.encode_address_call("upgradeTo", implementation)
			.map_err(|_| DeployError::NotUpgradeable {
				contract: self.contract_name.clone(),
			})
	}

	fn entry_inputs(&self, schema: &ContractSchema) -> Result<&[Param], DeployError> {
		match schema.kind {
			DeployKind::Plain => Ok(self
				.abi
				.constructor()
				.map(|c| c.inputs.as_slice())
				.unwrap_or_default()),
			DeployKind::Proxy => {
				let overloads = self.abi.function("initialize").ok_or_else(|| {
					DeployError::schema(schema.artifact, "artifact has no initialize function")
				})?;
				// With overloads, prefer the one matching the schema.
				let wanted = types_of(schema);
				Ok(overloads
					.iter()
					.find(|f| input_types(&f.inputs) == wanted)
					.or_else(|| overloads.first())
					.map(|f| f.inputs.as_slice())
					.unwrap_or_default())
			}
		}
	}

	fn matching_function(&self, name: &str, types: &[&str]) -> Option<&alloy_json_abi::Function> {
		self.abi
			.function(name)?
			.iter()
			.find(|f| input_types(&f.inputs) == types)
	}
}

fn types_of(schema: &ContractSchema) -> Vec<&'static str> {
	schema.params.iter().map(|p| p.ty.solidity()).collect()
}

fn input_types(inputs: &[Param]) -> Vec<&str> {
	inputs.iter().map(|p| p.ty.as_str()).collect()
}
