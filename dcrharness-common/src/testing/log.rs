//! Test logging.
//!
//! `init_global_test_logging()` is idempotent. It routes `tracing` events
//! from the harness crates to the libtest capture writer and to a JSONL
//! file named after the running test binary, so a failed CI job can be
//! inspected per binary:
//!
//! ```ignore
//! #[test]
//! fn test_example() {
//!     dcrharness_common::testing::init_global_test_logging();
//!     tracing::info!(harness = "main", "captured in JSONL");
//! }
//! ```
//!
//! `DCRHARNESS_TEST_LOG_FILE` overrides the file path and
//! `DCRHARNESS_TEST_LOG_LEVEL` the level (default `info`).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

static LOG_FILE: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Install the test subscriber once per process.
///
/// Returns the JSONL file path, or `None` when it could not be created.
pub fn init_global_test_logging() -> Option<&'static Path> {
    LOG_FILE
        .get_or_init(|| {
            let path = log_file_path();
            let file = open_log_file(&path);

            let file_layer = file.map(|file| {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(Mutex::new(file))
                    .with_span_events(FmtSpan::CLOSE)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
            });
            let has_file = file_layer.is_some();

            let stderr_layer = tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_target(true)
                .compact();

            let _ = tracing_subscriber::registry()
                .with(filter())
                .with(file_layer)
                .with(stderr_layer)
                .try_init();

            has_file.then_some(path)
        })
        .as_deref()
}

fn filter() -> EnvFilter {
    let level = std::env::var("DCRHARNESS_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    EnvFilter::try_new(format!("dcrharness={level},dcrharness_common={level}"))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn log_file_path() -> PathBuf {
    if let Ok(custom) = std::env::var("DCRHARNESS_TEST_LOG_FILE") {
        return PathBuf::from(custom);
    }
    let binary = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "dcrharness_tests".to_string());
    target_dir().join("test-logs").join(format!("{binary}.jsonl"))
}

fn open_log_file(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

/// `CARGO_TARGET_DIR`, else the nearest `target/` above the current dir.
fn target_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(dir);
    }
    let cwd = std::env::current_dir().unwrap_or_default();
    cwd.ancestors()
        .map(|dir| dir.join("target"))
        .find(|target| target.is_dir())
        .unwrap_or_else(|| PathBuf::from("target"))
}
