//! End-to-end harness lifecycle against the simulated node and wallet.

mod common;

use std::sync::Arc;
use std::thread;

use dcrharness::{
    ChainWithMatureOutputsSpawner, ConsoleNodeFactory, HarnessError, HarnessState, Network,
    WalletFactory,
};

const BASE_PORT: u16 = 42000;

#[test]
fn test_default_spawner_funds_wallet() {
    let setup = common::shared_setup(BASE_PORT);
    let harness = setup.obtain_harness("funded").unwrap();
    assert_eq!(harness.network(), Network::Regnet);
    assert_eq!(harness.state(), HarnessState::Running);

    let mature = harness.mature_outputs().unwrap();
    assert!(mature.len() >= 25, "only {} mature outputs", mature.len());
    assert!(mature.iter().all(|output| output.address == harness.mining_address()));

    let height = harness.node_rpc_client().unwrap().get_block_count().unwrap();
    let maturity = Network::Regnet.coinbase_maturity();
    assert!(height >= 25 + maturity, "height {height} too low for 25 mature outputs");
}

#[test]
fn test_same_name_yields_same_harness() {
    let setup = common::shared_setup(BASE_PORT);
    let handles: Vec<_> = (0..2)
        .map(|_| thread::spawn(move || setup.obtain_harness_with("shared", &setup.regnet0).unwrap()))
        .collect();
    let harnesses: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(Arc::ptr_eq(&harnesses[0], &harnesses[1]));

    // The first spawner wins; later requests ignore theirs.
    let again = setup.obtain_harness_with("shared", &setup.regnet5).unwrap();
    assert!(Arc::ptr_eq(&again, &harnesses[0]));
}

#[test]
fn test_harnesses_are_isolated() {
    let setup = common::shared_setup(BASE_PORT);
    let spawn = move |name: &'static str| {
        thread::spawn(move || setup.obtain_harness_with(name, &setup.regnet0).unwrap())
    };
    let (a, b) = (spawn("iso-a"), spawn("iso-b"));
    let (a, b) = (a.join().unwrap(), b.join().unwrap());

    assert!(!a.ports().overlaps(&b.ports()));
    assert_ne!(a.working_dir(), b.working_dir());
    assert!(a.working_dir().starts_with(setup.working_dir().path()));

    let rpc_a = a.node_rpc_client().unwrap();
    let rpc_b = b.node_rpc_client().unwrap();
    let height_b = rpc_b.get_block_count().unwrap();
    rpc_a.generate(3).unwrap();
    assert_eq!(rpc_b.get_block_count().unwrap(), height_b);
}

#[test]
fn test_console_wallet_harness() {
    let setup = common::shared_setup(BASE_PORT);
    let harness = setup.obtain_harness_with("console", &setup.simnet1).unwrap();
    assert_eq!(harness.network(), Network::Simnet);
    assert!(harness.mining_address().starts_with("Ss"));

    let (node_pid, wallet_pid) = harness.pids();
    assert!(node_pid.is_some());
    assert!(wallet_pid.is_some());
    assert!(!harness.mature_outputs().unwrap().is_empty());
}

#[test]
fn test_mainnet_harness_does_not_mine() {
    let setup = common::shared_setup(BASE_PORT);
    let harness = setup.obtain_harness_with("mainnet", &setup.mainnet0).unwrap();
    assert_eq!(harness.network(), Network::Mainnet);

    let rpc = harness.node_rpc_client().unwrap();
    assert_eq!(rpc.get_block_count().unwrap(), 0);
    assert!(harness.wallet_outputs().unwrap().is_empty());

    let err = rpc.generate(1).unwrap_err();
    assert!(!err.is_connection_failure());
}

#[test]
fn test_register_duplicate_name() {
    let setup = common::shared_setup(BASE_PORT);
    let first = setup.regnet0.spawn("registered").unwrap();
    let registered = setup.pool().register(first).unwrap();
    assert!(Arc::ptr_eq(
        &registered,
        &setup.pool().lookup("registered").unwrap()
    ));

    let second = setup.regnet0.spawn("registered").unwrap();
    let err = setup.pool().register(second).unwrap_err();
    assert!(matches!(err, HarnessError::DuplicateHarness(name) if name == "registered"));
    assert!(registered.is_running());
}

#[test]
fn test_teardown_stops_everything() {
    let setup = common::private_setup(43000);
    let harness = setup.obtain_harness_with("doomed", &setup.regnet0).unwrap();
    let rpc = harness.node_rpc_client().unwrap();
    rpc.get_best_block().unwrap();
    let dir = setup.working_dir().path().to_path_buf();

    setup.tear_down().unwrap();
    setup.tear_down().unwrap();

    assert_eq!(harness.state(), HarnessState::Stopped);
    assert!(rpc.get_best_block().unwrap_err().is_connection_failure());
    assert!(matches!(
        harness.node_rpc_client().unwrap_err(),
        HarnessError::NotRunning { .. }
    ));
    assert!(!dir.exists());
    assert!(matches!(
        setup.obtain_harness("late").unwrap_err(),
        HarnessError::PoolDisposed
    ));
}

#[test]
fn test_missing_node_executable() {
    let config = common::sim_config(43500).with_executables("/nonexistent/dcrd", common::SIM_WALLET);
    let setup = dcrharness::TestSetup::new(config).unwrap();
    let err = setup.obtain_harness("main").unwrap_err();
    assert!(matches!(err, HarnessError::ExecutableNotFound(_)));
    assert!(setup.pool().is_empty());
}

#[test]
fn test_node_exiting_at_startup() {
    let setup = common::private_setup(44000);
    let spawner = ChainWithMatureOutputsSpawner {
        node_factory: ConsoleNodeFactory::new("false"),
        wallet_factory: WalletFactory::memory(),
        ..setup.regnet0.clone()
    };
    let err = setup.obtain_harness_with("exits", &spawner).unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Stage {
            stage: HarnessState::NodeStarting,
            ..
        }
    ));
    assert!(matches!(
        err.root(),
        HarnessError::ProcessExited { .. } | HarnessError::NotReady { .. }
    ));
    assert!(setup.pool().is_empty());
}

#[test]
fn test_generation_bound() {
    let setup = common::private_setup(44500);
    let spawner = setup.regnet25.clone().with_generation_bounds(10, 5);
    let err = setup.obtain_harness_with("bounded", &spawner).unwrap_err();
    assert!(matches!(
        err,
        HarnessError::GenerationBoundExceeded {
            generated: 10,
            limit: 10,
            target: 25,
            ..
        }
    ));
}

#[test]
fn test_mainnet_funding_is_rejected() {
    let setup = common::shared_setup(BASE_PORT);
    let spawner = ChainWithMatureOutputsSpawner {
        num_mature_outputs: 5,
        ..setup.mainnet0.clone()
    };
    let err = setup.obtain_harness_with("mainnet-funded", &spawner).unwrap_err();
    assert!(matches!(err, HarnessError::Config(_)), "{err}");
    assert!(setup.pool().lookup("mainnet-funded").is_err());
}
