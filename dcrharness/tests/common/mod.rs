//! Shared setup for integration tests.
//!
//! Harnesses run the simulated node and wallet binaries built alongside
//! the tests. Each test binary gets its own [`TestSetup`] on its own port
//! base; it is torn down when the process exits.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use dcrharness::{SetupConfig, TestSetup};
use dcrharness_common::testing::init_global_test_logging;

pub const SIM_NODE: &str = env!("CARGO_BIN_EXE_dcrharness-simnode");
pub const SIM_WALLET: &str = env!("CARGO_BIN_EXE_dcrharness-simwallet");

static SHARED: OnceLock<TestSetup> = OnceLock::new();

/// Config running the simulated binaries from `base_port` upwards.
pub fn sim_config(base_port: u16) -> SetupConfig {
    SetupConfig::default()
        .with_executables(SIM_NODE, SIM_WALLET)
        .with_base_port(base_port)
        .with_workdir_base(test_workdir_base())
        .with_ready_timeout(Duration::from_secs(20))
}

/// The setup shared by every test in this binary.
pub fn shared_setup(base_port: u16) -> &'static TestSetup {
    init_global_test_logging();
    SHARED.get_or_init(|| TestSetup::new(sim_config(base_port)).expect("shared test setup"))
}

/// A private setup, torn down when dropped.
pub fn private_setup(base_port: u16) -> TestSetup {
    init_global_test_logging();
    TestSetup::new(sim_config(base_port)).expect("private test setup")
}

fn test_workdir_base() -> PathBuf {
    std::env::temp_dir().join("dcrharness-it")
}

#[ctor::dtor]
fn tear_down_shared_setup() {
    if let Some(setup) = SHARED.get() {
        if let Err(err) = setup.tear_down() {
            eprintln!("dcrharness: shared test setup teardown failed: {err}");
        }
    }
}
