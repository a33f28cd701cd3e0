//! Error type for harness operations.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use dcrharness_common::RpcError;

use crate::harness::HarnessState;

/// Error type for harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("Process {name} failed to start: {reason}")]
    ProcessStartFailed { name: String, reason: String },

    #[error("Process {name} exited during startup with {status}")]
    ProcessExited { name: String, status: ExitStatus },

    #[error("{name} not ready after {timeout:?}: {last_error}")]
    NotReady {
        name: String,
        timeout: Duration,
        last_error: String,
    },

    #[error("Port space exhausted: base {base} with stride {stride} has no room for range #{offset}")]
    PortSpaceExhausted { base: u16, stride: u16, offset: u32 },

    #[error("Working directory {}: {source}", .path.display())]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    #[error(
        "Harness {harness} generated {generated} blocks (limit {limit}) but wallet holds only \
         {mature} of {target} mature outputs"
    )]
    GenerationBoundExceeded {
        harness: String,
        generated: u64,
        limit: u64,
        mature: usize,
        target: usize,
    },

    #[error("Harness {harness} failed while {stage}: {source}")]
    Stage {
        harness: String,
        stage: HarnessState,
        #[source]
        source: Box<HarnessError>,
    },

    #[error("Harness {harness} is {actual}, expected {expected}")]
    InvalidState {
        harness: String,
        expected: HarnessState,
        actual: HarnessState,
    },

    #[error("Harness {harness} is not running (state: {state})")]
    NotRunning { harness: String, state: HarnessState },

    #[error("Failed to stop harness {harness}: {}", summarize(.errors))]
    StopFailed {
        harness: String,
        errors: Vec<HarnessError>,
    },

    #[error("Teardown failed for {} harness(es): {}", .failures.len(), summarize_named(.failures))]
    TeardownFailed { failures: Vec<(String, HarnessError)> },

    #[error("Harness already registered: {0}")]
    DuplicateHarness(String),

    #[error("Harness not found: {0}")]
    HarnessNotFound(String),

    #[error("Wallet {0} is not attached to a node")]
    WalletDetached(String),

    #[error("Harness pool has been disposed")]
    PoolDisposed,

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Attach harness and lifecycle-stage context.
    pub fn at_stage(self, harness: &str, stage: HarnessState) -> Self {
        HarnessError::Stage {
            harness: harness.to_string(),
            stage,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping `Stage` wrappers.
    pub fn root(&self) -> &HarnessError {
        match self {
            HarnessError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

fn summarize(errors: &[HarnessError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn summarize_named(failures: &[(String, HarnessError)]) -> String {
    failures
        .iter()
        .map(|(name, err)| format!("{name}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
