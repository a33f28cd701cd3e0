//! Test support shared by the harness crates.

mod log;

pub use log::init_global_test_logging;
