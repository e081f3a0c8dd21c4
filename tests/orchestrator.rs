//! Resolve + execute flows against an in-memory chain.

mod common;

use alloy_primitives::{Address, U256};

use common::{deployer, executor, profile, registry, selector, MockChain, NETWORK};
use index_deploy::error::{DeployError, ErrorKind};
use index_deploy::executor::{DeploymentStatus, Stage};
use index_deploy::registry::Registry;
use index_deploy::resolver::{Mode, Overrides, Resolver, Target};
use index_deploy::schema::ArgValue;

const USDT: &str = "0x636b346942ee09Ee6383C22290e89742b55797c5";

fn token_overrides() -> Overrides {
	[
		("name", "X Index"),
		("symbol", "XI"),
		("decimals", "18"),
		("supplyLimit", "1_000_000e18"),
	]
	.into_iter()
	.collect()
}

fn resolve(reg: &Registry, target: Target, mode: Mode, overrides: &Overrides) -> Result<index_deploy::resolver::DeploymentDescriptor, DeployError> {
	Resolver::new(reg, &profile()).resolve(&target, mode, overrides)
}

#[tokio::test]
async fn index_token_deploys_behind_a_proxy_and_is_recorded() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(&dir, "");
	let chain = MockChain::new();
	let exec = executor(chain.clone());

	let d = resolve(&reg, Target::new("IndexToken"), Mode::Deploy, &token_overrides()).unwrap();
	assert_eq!(d.args[4].value, ArgValue::Uint(U256::from(10u8).pow(U256::from(24u8))));

	let result = exec.execute(&mut reg, d).await;
	assert!(result.is_success(), "{:?}", result.error);
	assert_eq!(result.status, DeploymentStatus::Success);
	assert_eq!(result.stage, Stage::Confirmed);

	// Implementation, then the proxy whose constructor runs initialize.
	let sent = chain.accepted();
	assert_eq!(sent.len(), 2);
	assert!(sent.iter().all(|tx| tx.to.is_none() && tx.from == deployer()));
	assert_eq!(sent[0].nonce, Some(0));
	assert_eq!(sent[1].nonce, Some(1));
	let init = selector("initialize(string,string,uint256,address,uint256)");
	assert!(sent[1].data.windows(4).any(|w| w == init));

	let proxy = result.address.unwrap();
	let implementation = result.implementation.unwrap();
	assert_eq!(proxy, deployer().create(1));
	assert_eq!(implementation, deployer().create(0));
	assert_eq!(chain.implementation_of(proxy), implementation);

	let record = reg.lookup("IndexToken", NETWORK).unwrap();
	assert_eq!(record.address, proxy);
	assert_eq!(record.implementation, Some(implementation));
	assert_eq!(record.abi_version, "v1");
	assert_eq!(record.transaction_hash, result.transaction_hash);

	// Durable: a fresh handle sees the same record.
	let reopened = Registry::open(reg.path()).unwrap();
	assert_eq!(reopened.lookup("IndexToken", NETWORK), Some(record));
}

#[tokio::test]
async fn factory_without_oracle_wiring_is_rejected_before_any_submission() {
	let dir = tempfile::tempdir().unwrap();
	let reg = registry(
		&dir,
		&format!(
			r#"
[networks.test1.external]
usdt = "{USDT}"

[networks.test1.contracts.IndexToken]
artifact = "IndexToken"
abi_version = "v1"
address = "0x1111111111111111111111111111111111111111"

[networks.test1.contracts.RequestNFT]
artifact = "RequestNFT"
abi_version = "v1"
address = "0x2222222222222222222222222222222222222222"
"#
		),
	);
	let chain = MockChain::new();

	let err = resolve(
		&reg,
		Target::new("IndexFactory").version("v2"),
		Mode::Deploy,
		&Overrides::default(),
	)
	.unwrap_err();

	match err {
		DeployError::UnresolvedDependency { params, .. } => {
			assert_eq!(params, ["chainlinkToken", "oracle", "externalJobId"]);
		}
		other => panic!("expected UnresolvedDependency, got {other}"),
	}
	assert_eq!(chain.send_attempts(), 0);
	assert!(reg.lookup("IndexFactory", NETWORK).is_none());
}

#[tokio::test]
async fn upgrading_an_unknown_proxy_changes_nothing() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(&dir, "[networks.test1.external]\nusdt = \"0x0000000000000000000000000000000000000001\"\n");
	let before = std::fs::read(reg.path()).unwrap();
	let chain = MockChain::new();
	let exec = executor(chain.clone());

	let d = resolve(&reg, Target::new("IndexToken"), Mode::Upgrade, &Overrides::default()).unwrap();
	let result = exec.execute(&mut reg, d).await;

	assert_eq!(result.status, DeploymentStatus::Failed);
	assert_eq!(result.error_kind, Some(ErrorKind::UnknownProxy));
	assert_eq!(result.stage, Stage::RejectedBeforeSubmit);
	assert_eq!(chain.send_attempts(), 0);
	assert_eq!(std::fs::read(reg.path()).unwrap(), before);
}

#[tokio::test]
async fn transient_send_failures_are_retried_into_one_record() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(&dir, "");
	let chain = MockChain::new();
	chain.fail_next_sends(2);
	let exec = executor(chain.clone());

	let d = resolve(&reg, Target::new("IndexToken"), Mode::Deploy, &token_overrides()).unwrap();
	let result = exec.execute(&mut reg, d).await;

	assert!(result.is_success(), "{:?}", result.error);
	assert_eq!(chain.send_attempts(), 4);
	let nonces: Vec<_> = chain.accepted().iter().map(|tx| tx.nonce).collect();
	assert_eq!(nonces, [Some(0), Some(1)]);
	assert_eq!(reg.records(Some(NETWORK)).len(), 1);
}

#[tokio::test]
async fn lost_broadcast_response_is_not_resent_as_a_new_deployment() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(&dir, "");
	let chain = MockChain::new();
	// The node accepts the implementation deployment but the reply never
	// arrives; the resend is answered with "already known".
	chain.lose_next_responses(1);
	let exec = executor(chain.clone());

	let d = resolve(&reg, Target::new("IndexToken"), Mode::Deploy, &token_overrides()).unwrap();
	let result = exec.execute(&mut reg, d).await;

	assert!(result.is_success(), "{:?}", result.error);
	assert_eq!(result.status, DeploymentStatus::Success);
	assert_eq!(result.stage, Stage::Confirmed);
	assert_eq!(chain.send_attempts(), 3);
	let nonces: Vec<_> = chain.accepted().iter().map(|tx| tx.nonce).collect();
	assert_eq!(nonces, [Some(0), Some(1)]);
	assert_eq!(reg.records(Some(NETWORK)).len(), 1);
	let record = reg.lookup("IndexToken", NETWORK).unwrap();
	assert_eq!(record.implementation, Some(deployer().create(0)));
	assert_eq!(record.address, deployer().create(1));
}

#[tokio::test]
async fn exhausted_retries_report_transient_network_error() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(&dir, "");
	let chain = MockChain::new();
	chain.fail_next_sends(100);
	let exec = executor(chain.clone());

	let d = resolve(&reg, Target::new("IndexToken"), Mode::Deploy, &token_overrides()).unwrap();
	let result = exec.execute(&mut reg, d).await;

	assert_eq!(result.error_kind, Some(ErrorKind::TransientNetworkError));
	assert_eq!(result.stage, Stage::Aborted);
	assert!(result.transaction_hash.is_some());
	assert_eq!(chain.send_attempts(), 3);
	assert!(chain.accepted().is_empty());
	assert!(reg.records(None).is_empty());
}

#[tokio::test]
async fn reverted_deployment_leaves_registry_untouched() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(&dir, "");
	let chain = MockChain::new();
	chain.revert_all();
	let exec = executor(chain.clone());

	let d = resolve(&reg, Target::new("IndexToken"), Mode::Deploy, &token_overrides()).unwrap();
	let result = exec.execute(&mut reg, d).await;

	assert_eq!(result.error_kind, Some(ErrorKind::TransactionReverted));
	assert_eq!(result.stage, Stage::Reverted);
	assert!(result.transaction_hash.is_some());
	assert!(result.block_number.is_some());
	assert!(reg.lookup("IndexToken", NETWORK).is_none());
}

#[tokio::test]
async fn missing_receipt_times_out() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(&dir, "");
	let chain = MockChain::new();
	chain.withhold_receipts();
	let exec = executor(chain.clone());

	let d = resolve(&reg, Target::new("IndexToken"), Mode::Deploy, &token_overrides()).unwrap();
	let result = exec.execute(&mut reg, d).await;

	assert_eq!(result.error_kind, Some(ErrorKind::ConfirmationTimeout));
	assert_eq!(result.stage, Stage::Aborted);
	assert!(result.transaction_hash.is_some());
	assert_eq!(result.block_number, None);
	assert_eq!(chain.accepted().len(), 1);
	assert!(reg.records(None).is_empty());
}

#[tokio::test]
async fn version_not_matching_the_artifact_is_rejected_before_submit() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(
		&dir,
		&format!("[networks.test1.external]\nusdt = \"{USDT}\"\n"),
	);
	let chain = MockChain::new();
	let exec = executor(chain.clone());

	// The fixture factory has the nine-argument (v2) initializer.
	let overrides: Overrides = [
		("token", "0x1111111111111111111111111111111111111111"),
		("nft", "0x2222222222222222222222222222222222222222"),
	]
	.into_iter()
	.collect();
	let d = resolve(&reg, Target::new("IndexFactory").version("v1"), Mode::Deploy, &overrides).unwrap();
	let result = exec.execute(&mut reg, d).await;

	assert_eq!(result.error_kind, Some(ErrorKind::SchemaMismatch));
	assert_eq!(result.stage, Stage::RejectedBeforeSubmit);
	assert_eq!(chain.send_attempts(), 0);
}

#[tokio::test]
async fn wrong_chain_is_rejected_before_submit() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(&dir, "");
	let chain = MockChain::with_chain_id(5);
	let exec = executor(chain.clone());

	let d = resolve(&reg, Target::new("IndexToken"), Mode::Deploy, &token_overrides()).unwrap();
	let result = exec.execute(&mut reg, d).await;

	assert_eq!(result.error_kind, Some(ErrorKind::NetworkMismatch));
	assert_eq!(chain.send_attempts(), 0);
}

#[tokio::test]
async fn held_key_lock_blocks_a_second_run() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(&dir, "");
	let chain = MockChain::new();
	let exec = executor(chain.clone());

	let _held = reg.lock_key("IndexToken", NETWORK).unwrap();
	let d = resolve(&reg, Target::new("IndexToken"), Mode::Deploy, &token_overrides()).unwrap();
	let result = exec.execute(&mut reg, d).await;

	assert_eq!(result.error_kind, Some(ErrorKind::Locked));
	assert_eq!(chain.send_attempts(), 0);
}

#[tokio::test]
async fn upgrade_swaps_the_implementation_and_keeps_the_proxy() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(&dir, "");
	let chain = MockChain::new();
	let exec = executor(chain.clone());

	let d = resolve(&reg, Target::new("IndexToken"), Mode::Deploy, &token_overrides()).unwrap();
	let deployed = exec.execute(&mut reg, d).await;
	assert!(deployed.is_success());

	let d = resolve(&reg, Target::new("IndexToken"), Mode::Upgrade, &Overrides::default()).unwrap();
	assert!(d.args.is_empty());
	let upgraded = exec.execute(&mut reg, d).await;
	assert!(upgraded.is_success(), "{:?}", upgraded.error);

	let proxy = deployed.address.unwrap();
	let new_impl = upgraded.implementation.unwrap();
	assert_eq!(upgraded.address, Some(proxy));
	assert_ne!(new_impl, deployed.implementation.unwrap());
	assert_eq!(chain.implementation_of(proxy), new_impl);

	let upgrade_tx = chain.accepted().pop().unwrap();
	assert_eq!(upgrade_tx.to, Some(proxy));
	assert_eq!(upgrade_tx.data[..4], selector("upgradeToAndCall(address,bytes)"));

	let record = reg.lookup("IndexToken", NETWORK).unwrap();
	assert_eq!(record.address, proxy);
	assert_eq!(record.implementation, Some(new_impl));
}

#[tokio::test]
async fn factory_wires_recorded_dependencies_and_aliases() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(
		&dir,
		&format!(
			r#"
[networks.test1.external]
usdt = "{USDT}"
link = "0x326C977E6efc84E512bB9C30f76E30c160eD06FB"
oracle = "0x58c31F5CDe37608DCb4d60322B6933b4376A622b"
externalJobId = "a44ea46524634eadab87b2745d720356"
"#
		),
	);
	let chain = MockChain::new();
	let exec = executor(chain.clone());

	let d = resolve(&reg, Target::new("IndexToken").alias("AnfiIndexToken"), Mode::Deploy, &token_overrides()).unwrap();
	assert!(exec.execute(&mut reg, d).await.is_success());

	let nft: Overrides = [("name", "ANFI Request"), ("symbol", "ANFIR")].into_iter().collect();
	let d = resolve(&reg, Target::new("RequestNFT").alias("AnfiNFT"), Mode::Deploy, &nft).unwrap();
	let nft_result = exec.execute(&mut reg, d).await;
	assert!(nft_result.is_success(), "{:?}", nft_result.error);
	assert!(nft_result.implementation.is_none());

	let overrides: Overrides = [("token", "AnfiIndexToken"), ("nft", "AnfiNFT")].into_iter().collect();
	let d = resolve(
		&reg,
		Target::new("IndexFactory").version("v2").alias("AnfiFactory"),
		Mode::Deploy,
		&overrides,
	)
	.unwrap();
	let token = reg.lookup("AnfiIndexToken", NETWORK).unwrap();
	assert_eq!(d.args[2].value, ArgValue::Address(token.address));

	let result = exec.execute(&mut reg, d).await;
	assert!(result.is_success(), "{:?}", result.error);

	let factory = reg.lookup("AnfiFactory", NETWORK).unwrap();
	assert_eq!(factory.artifact, "IndexFactory");
	assert_eq!(factory.abi_version, "v2");
	assert_eq!(reg.records(Some(NETWORK)).len(), 3);
}

#[tokio::test]
async fn set_minter_calls_the_token_without_touching_the_registry() {
	let dir = tempfile::tempdir().unwrap();
	let mut reg = registry(&dir, "");
	let chain = MockChain::new();
	let exec = executor(chain.clone());

	let d = resolve(&reg, Target::new("IndexToken"), Mode::Deploy, &token_overrides()).unwrap();
	let token = exec.execute(&mut reg, d).await.address.unwrap();
	let before = std::fs::read(reg.path()).unwrap();

	let factory = Address::repeat_byte(0xfa);
	let call = exec
		.call_with_address(&reg, "IndexToken", "setMinter", factory)
		.await
		.unwrap();
	assert_eq!(call.address, token);

	let tx = chain.accepted().pop().unwrap();
	assert_eq!(tx.to, Some(token));
	assert_eq!(tx.data[..4], selector("setMinter(address)"));
	assert_eq!(&tx.data[16..36], factory.as_slice());
	assert_eq!(std::fs::read(reg.path()).unwrap(), before);

	let err = exec
		.call_with_address(&reg, "Crypto5IndexToken", "setMinter", factory)
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::UnknownProxy);
}
