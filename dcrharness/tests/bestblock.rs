//! Best-block query against a live harness.

mod common;

use dcrharness::MAIN_HARNESS_NAME;

const BASE_PORT: u16 = 41000;

#[test]
fn test_get_best_block() {
    let setup = common::shared_setup(BASE_PORT);
    let harness = setup.obtain_harness(MAIN_HARNESS_NAME).unwrap();
    let rpc = harness.node_rpc_client().unwrap();

    let before = rpc.get_best_block().unwrap();
    let generated = rpc.generate(1).unwrap();
    assert_eq!(generated.len(), 1);

    let after = rpc.get_best_block().unwrap();
    assert_eq!(after.height, before.height + 1);
    assert_eq!(after.hash, generated[0]);
}

#[test]
fn test_get_best_block_without_outputs() {
    let setup = common::shared_setup(BASE_PORT);
    let harness = setup.obtain_harness_with("empty", &setup.regnet0).unwrap();
    let rpc = harness.node_rpc_client().unwrap();

    let before = rpc.get_best_block().unwrap();
    assert_eq!(before.height, 0);
    let generated = rpc.generate(1).unwrap();

    let after = rpc.get_best_block().unwrap();
    assert_eq!(after.height, 1);
    assert_eq!(after.hash, generated[0]);
    assert_eq!(rpc.get_block_hash(1).unwrap(), after.hash);
}
