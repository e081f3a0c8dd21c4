use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::config::NetworkProfile;
use crate::error::DeployError;
use crate::registry::{check_key_part, Registry};
use crate::schema::{ArgValue, ContractSchema, ContractVersion, DeployKind, ParamType, Source};

/// Caller-supplied argument values, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides(BTreeMap<String, String>);

impl Overrides {
	/// Parse `key=value` pairs as given on the command line.
	/// A key given twice is rejected rather than silently overwritten.
	pub fn parse<S: AsRef<str>>(pairs: &[S]) -> Result<Self, DeployError> {
		let mut map = BTreeMap::new();
		for pair in pairs {
			let pair = pair.as_ref();
			let (k, v) = pair.split_once('=').ok_or_else(|| DeployError::InvalidArgument {
				param: pair.to_owned(),
				reason: "expected key=value".into(),
			})?;
			let key = k.trim().to_owned();
			if map.contains_key(&key) {
				return Err(DeployError::InvalidArgument {
					param: key,
					reason: "given more than once".into(),
				});
			}
			map.insert(key, v.to_owned());
		}
		Ok(Self(map))
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Overrides {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
	Deploy,
	Upgrade,
}

/// What to deploy: an artifact, its initializer version and the registry
/// name the result is recorded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
	pub contract: String,
	pub version: Option<String>,
	pub alias: Option<String>,
}

impl Target {
	pub fn new(contract: impl Into<String>) -> Self {
		Self {
			contract: contract.into(),
			version: None,
			alias: None,
		}
	}

	pub fn version(mut self, version: impl Into<String>) -> Self {
		self.version = Some(version.into());
		self
	}

	pub fn alias(mut self, alias: impl Into<String>) -> Self {
		self.alias = Some(alias.into());
		self
	}

	pub fn registry_name(&self) -> &str {
		self.alias.as_deref().unwrap_or(&self.contract)
	}
}

/// Where a resolved argument came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgOrigin {
	Override,
	Registry(String),
	External(String),
	Deployer,
	Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedArg {
	pub name: String,
	pub value: ArgValue,
	pub origin: ArgOrigin,
}

/// A fully resolved, single-use deployment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentDescriptor {
	/// Registry name the result is recorded under.
	pub contract_name: String,
	pub network: String,
	pub version: ContractVersion,
	pub mode: Mode,
	/// Initializer/constructor arguments in ABI order. Empty for upgrades.
	pub args: Vec<ResolvedArg>,
}

impl DeploymentDescriptor {
	pub fn schema(&self) -> &'static ContractSchema {
		self.version.schema()
	}

	pub fn values(&self) -> Vec<ArgValue> {
		self.args.iter().map(|a| a.value.clone()).collect()
	}
}

impl fmt::Display for DeploymentDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(
			f,
			"{:?} {} as {} on {}",
			self.mode, self.version, self.contract_name, self.network
		)?;
		for arg in &self.args {
			writeln!(f, "  {} = {}  ({:?})", arg.name, arg.value, arg.origin)?;
		}
		Ok(())
	}
}

/// Builds descriptors from the registry and the network profile. Pure: it
/// never touches the chain.
pub struct Resolver<'a> {
	registry: &'a Registry,
	profile: &'a NetworkProfile,
}

impl<'a> Resolver<'a> {
	pub fn new(registry: &'a Registry, profile: &'a NetworkProfile) -> Self {
		Self { registry, profile }
	}

	/// Resolve `target` on the profile's network.
	///
	/// Precedence per parameter: override, then registry/external/deployer
	/// source, then static default. Every missing parameter is reported at
	/// once as `UnresolvedDependency`.
	pub fn resolve(
		&self,
		target: &Target,
		mode: Mode,
		overrides: &Overrides,
	) -> Result<DeploymentDescriptor, DeployError> {
		check_key_part("network", &self.profile.name)?;
		check_key_part("contract name", target.registry_name())?;
		let version = ContractVersion::select(&target.contract, target.version.as_deref())?;
		let schema = version.schema();
		let network = &self.profile.name;

		let args = match mode {
			Mode::Deploy => self.resolve_args(schema, overrides)?,
			Mode::Upgrade => {
				if schema.kind != DeployKind::Proxy {
					return Err(DeployError::NotUpgradeable {
						contract: target.contract.clone(),
					});
				}
				if let Some(key) = overrides.keys().next() {
					return Err(DeployError::schema(
						schema.artifact,
						format!("upgrades take no initializer arguments, got `{key}`"),
					));
				}
				Vec::new()
			}
		};

		Ok(DeploymentDescriptor {
			contract_name: target.registry_name().to_owned(),
			network: network.clone(),
			version,
			mode,
			args,
		})
	}

	fn resolve_args(
		&self,
		schema: &ContractSchema,
		overrides: &Overrides,
	) -> Result<Vec<ResolvedArg>, DeployError> {
		if let Some(unknown) = overrides.keys().find(|k| schema.param(k).is_none()) {
			let expected: Vec<&str> = schema.params.iter().map(|p| p.name).collect();
			return Err(DeployError::schema(
				schema.artifact,
				format!(
					"{} takes no `{unknown}`; parameters are {}",
					schema.version,
					expected.join(", ")
				),
			));
		}

		let mut args = Vec::with_capacity(schema.params.len());
		let mut missing = Vec::new();

		for spec in schema.params {
			let found = match overrides.get(spec.name) {
				Some(raw) => Some((self.parse(spec.name, spec.ty, raw)?, ArgOrigin::Override)),
				None => self.from_source(spec.name, spec.ty, spec.source)?,
			};
			let found = match (found, spec.default) {
				(Some(f), _) => Some(f),
				(None, Some(default)) => {
					Some((self.parse(spec.name, spec.ty, default)?, ArgOrigin::Default))
				}
				(None, None) => None,
			};

			match found {
				Some((value, origin)) => args.push(ResolvedArg {
					name: spec.name.to_owned(),
					value,
					origin,
				}),
				None => missing.push(spec.name.to_owned()),
			}
		}

		if !missing.is_empty() {
			return Err(DeployError::UnresolvedDependency {
				contract: schema.artifact.to_owned(),
				params: missing,
			});
		}

		check_shape(schema, &args)?;
		Ok(args)
	}

	fn from_source(
		&self,
		param: &str,
		ty: ParamType,
		source: Option<Source>,
	) -> Result<Option<(ArgValue, ArgOrigin)>, DeployError> {
		let network = self.profile.name.as_str();
		Ok(match source {
			None => None,
			Some(Source::Deployer) => {
				Some((ArgValue::Address(self.profile.deployer), ArgOrigin::Deployer))
			}
			Some(Source::Deployed(name)) => self.registry.lookup(name, network).map(|r| {
				(
					ArgValue::Address(r.address),
					ArgOrigin::Registry(name.to_owned()),
				)
			}),
			Some(Source::External(key)) => match self.registry.external_value(key, network) {
				Some(raw) => Some((
					self.parse(param, ty, raw)?,
					ArgOrigin::External(key.to_owned()),
				)),
				None => None,
			},
		})
	}

	/// Address arguments also accept a registry or external name on the
	/// same network, so targets are selected by name instead of pasted hex.
	fn parse(&self, param: &str, ty: ParamType, raw: &str) -> Result<ArgValue, DeployError> {
		if ty == ParamType::Address && !raw.trim_start().starts_with("0x") {
			return self
				.registry
				.address_of(raw.trim(), &self.profile.name)
				.map(ArgValue::Address)
				.ok_or_else(|| DeployError::InvalidArgument {
					param: param.to_owned(),
					reason: format!("`{raw}` is neither an address nor a known name on {}", self.profile.name),
				});
		}
		ArgValue::parse(ty, raw).map_err(|reason| DeployError::InvalidArgument {
			param: param.to_owned(),
			reason,
		})
	}
}

/// Guard against building an argument list of the wrong shape.
fn check_shape(schema: &ContractSchema, args: &[ResolvedArg]) -> Result<(), DeployError> {
	if args.len() != schema.params.len() {
		return Err(DeployError::schema(
			schema.artifact,
			format!(
				"{} expects {} arguments, resolved {}",
				schema.version,
				schema.params.len(),
				args.len()
			),
		));
	}
	for (spec, arg) in schema.params.iter().zip(args) {
		if spec.name != arg.name || spec.ty != arg.value.param_type() {
			return Err(DeployError::schema(
				schema.artifact,
				format!(
					"argument `{}` resolved as {}, expected `{}` {}",
					arg.name,
					arg.value.param_type().solidity(),
					spec.name,
					spec.ty.solidity()
				),
			));
		}
	}
	Ok(())
}
