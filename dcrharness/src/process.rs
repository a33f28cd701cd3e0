//! Console process management: launch, readiness polling, and
//! grace-then-kill termination.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use dcrharness_common::util::display_command_line;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};

/// Timeouts applied to every process a harness manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSettings {
    /// Upper bound on the readiness handshake after launch.
    pub ready_timeout: Duration,
    /// Time between SIGTERM and SIGKILL on stop.
    pub stop_grace: Duration,
    /// Per-call timeout of the RPC clients.
    pub rpc_timeout: Duration,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
            rpc_timeout: Duration::from_secs(10),
        }
    }
}

/// The capability shared by node and wallet handles.
///
/// The harness drives every handle through the same three steps:
/// `launch`, then `wait_ready`, and eventually `stop`.
pub trait ProcessHandle {
    fn name(&self) -> &str;

    /// Begin running. Returns once the process exists, not once it is usable.
    fn launch(&mut self) -> HarnessResult<()>;

    /// Block until the handle answers its readiness probe.
    fn wait_ready(&mut self) -> HarnessResult<()>;

    /// Stop and reap. Stopping a handle that never launched is a no-op.
    fn stop(&mut self) -> HarnessResult<()>;

    fn is_running(&mut self) -> bool;
}

/// Resolve an executable given either as a path or as a bare name on `PATH`.
pub fn resolve_executable(executable: &Path) -> HarnessResult<PathBuf> {
    if executable.components().count() > 1 || executable.is_absolute() {
        if executable.is_file() {
            return Ok(executable.to_path_buf());
        }
        return Err(HarnessError::ExecutableNotFound(executable.to_path_buf()));
    }
    which::which(executable).map_err(|err| {
        debug!(executable = %executable.display(), error = %err, "Executable lookup failed");
        HarnessError::ExecutableNotFound(executable.to_path_buf())
    })
}

/// An external process with its command line, log destination and child.
#[derive(Debug)]
pub struct ConsoleProcess {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    log_dir: PathBuf,
    debug_output: bool,
    child: Option<Child>,
}

impl ConsoleProcess {
    pub fn new(
        name: impl Into<String>,
        program: PathBuf,
        args: Vec<String>,
        log_dir: PathBuf,
        debug_output: bool,
    ) -> Self {
        Self {
            name: name.into(),
            program,
            args,
            log_dir,
            debug_output,
            child: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Masked command line, safe to log.
    pub fn command_line(&self) -> String {
        display_command_line(&self.program.to_string_lossy(), &self.args)
    }

    /// Spawn the process.
    ///
    /// With debug output on, stdout and stderr go to
    /// `<log_dir>/<name>.stdout.log` and `<name>.stderr.log`; otherwise they
    /// are discarded so a chatty child can never block on a full pipe.
    pub fn launch(&mut self) -> HarnessResult<u32> {
        if let Some(pid) = self.pid() {
            return Err(HarnessError::ProcessStartFailed {
                name: self.name.clone(),
                reason: format!("already running as pid {pid}"),
            });
        }

        let (stdout, stderr) = self.output_streams()?;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        info!(process = %self.name, command = %self.command_line(), "Spawning process");

        let child = cmd.spawn().map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => HarnessError::ExecutableNotFound(self.program.clone()),
            _ => HarnessError::ProcessStartFailed {
                name: self.name.clone(),
                reason: format!("{}: {err}", self.program.display()),
            },
        })?;

        let pid = child.id();
        self.child = Some(child);
        info!(process = %self.name, pid, "Process spawned");
        Ok(pid)
    }

    fn output_streams(&self) -> HarnessResult<(Stdio, Stdio)> {
        if !self.debug_output {
            return Ok((Stdio::null(), Stdio::null()));
        }
        std::fs::create_dir_all(&self.log_dir).map_err(|source| HarnessError::WorkingDir {
            path: self.log_dir.clone(),
            source,
        })?;
        let open = |suffix: &str| {
            let path = self.log_dir.join(format!("{}.{suffix}.log", self.name));
            File::create(&path).map_err(|source| HarnessError::WorkingDir { path, source })
        };
        Ok((Stdio::from(open("stdout")?), Stdio::from(open("stderr")?)))
    }

    /// Poll `probe` with exponential backoff until it succeeds.
    ///
    /// Starts at 10ms and doubles up to 500ms per iteration. Fails fast with
    /// `ProcessExited` if the child dies while we wait.
    pub fn wait_ready<F>(&mut self, timeout: Duration, mut probe: F) -> HarnessResult<()>
    where
        F: FnMut() -> Result<(), String>,
    {
        debug!(process = %self.name, ?timeout, "Waiting for readiness");

        let start = Instant::now();
        let mut delay = Duration::from_millis(10);
        let max_delay = Duration::from_millis(500);
        let mut last_error = String::from("no readiness probe completed");

        loop {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    self.child = None;
                    return Err(HarnessError::ProcessExited {
                        name: self.name.clone(),
                        status,
                    });
                }
            } else {
                return Err(HarnessError::ProcessStartFailed {
                    name: self.name.clone(),
                    reason: "process was never launched".to_string(),
                });
            }

            match probe() {
                Ok(()) => {
                    info!(process = %self.name, elapsed = ?start.elapsed(), "Process ready");
                    return Ok(());
                }
                Err(err) => last_error = err,
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!(process = %self.name, ?timeout, last_error = %last_error, "Readiness timeout");
                return Err(HarnessError::NotReady {
                    name: self.name.clone(),
                    timeout,
                    last_error,
                });
            }
            std::thread::sleep(delay.min(timeout - elapsed));
            delay = (delay * 2).min(max_delay);
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL and reap.
    pub fn terminate(&mut self, grace: Duration) -> HarnessResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let pid = child.id();

        if let Some(status) = child.try_wait()? {
            debug!(process = %self.name, pid, %status, "Process already exited");
            return Ok(());
        }

        info!(process = %self.name, pid, "Stopping process");
        if send_sigterm(pid) {
            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                if let Some(status) = child.try_wait()? {
                    debug!(process = %self.name, pid, %status, "Process exited");
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            warn!(process = %self.name, pid, ?grace, "Process ignored SIGTERM, killing");
        }

        if let Err(err) = child.kill() {
            // Exited between the last poll and the kill.
            if child.try_wait()?.is_none() {
                return Err(err.into());
            }
        }
        let status = child.wait()?;
        debug!(process = %self.name, pid, %status, "Process killed");
        Ok(())
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

impl Drop for ConsoleProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                warn!(process = %self.name, pid = child.id(), "Killing process left running");
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    match Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("Failed to send TERM signal to process {}: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, log_dir: PathBuf, debug_output: bool) -> ConsoleProcess {
        ConsoleProcess::new(
            "sh",
            PathBuf::from("/bin/sh"),
            vec!["-c".to_string(), script.to_string()],
            log_dir,
            debug_output,
        )
    }

    #[test]
    fn test_resolve_missing_executable() {
        let err = resolve_executable(Path::new("dcrharness-definitely-missing-binary")).unwrap_err();
        assert!(matches!(err, HarnessError::ExecutableNotFound(_)));

        let err = resolve_executable(Path::new("/nonexistent/dir/dcrd")).unwrap_err();
        assert!(matches!(err, HarnessError::ExecutableNotFound(_)));
    }

    #[test]
    fn test_resolve_on_path() {
        let resolved = resolve_executable(Path::new("sh")).unwrap();
        assert!(resolved.is_absolute());
    }

    #[test]
    fn test_launch_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = ConsoleProcess::new(
            "ghost",
            dir.path().join("ghost"),
            Vec::new(),
            dir.path().to_path_buf(),
            false,
        );
        let err = process.launch().unwrap_err();
        assert!(matches!(err, HarnessError::ExecutableNotFound(_)));
    }

    #[test]
    fn test_wait_ready_succeeds_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = sh("sleep 30", dir.path().to_path_buf(), false);
        process.launch().unwrap();

        let mut attempts = 0;
        process
            .wait_ready(Duration::from_secs(5), || {
                attempts += 1;
                if attempts >= 3 { Ok(()) } else { Err("not yet".to_string()) }
            })
            .unwrap();
        assert_eq!(attempts, 3);
        process.terminate(Duration::from_secs(2)).unwrap();
        assert!(!process.is_running());
    }

    #[test]
    fn test_wait_ready_reports_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = sh("exit 3", dir.path().to_path_buf(), false);
        process.launch().unwrap();

        let err = process
            .wait_ready(Duration::from_secs(5), || Err("refused".to_string()))
            .unwrap_err();
        assert!(matches!(err, HarnessError::ProcessExited { .. }), "{err}");
    }

    #[test]
    fn test_wait_ready_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = sh("sleep 30", dir.path().to_path_buf(), false);
        process.launch().unwrap();

        let err = process
            .wait_ready(Duration::from_millis(100), || Err("refused".to_string()))
            .unwrap_err();
        match err {
            HarnessError::NotReady { last_error, .. } => assert_eq!(last_error, "refused"),
            other => panic!("unexpected error: {other}"),
        }
        process.terminate(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_terminate_escalates_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = sh("trap '' TERM; sleep 30", dir.path().to_path_buf(), false);
        process.launch().unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        process.terminate(Duration::from_millis(200)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(process.pid().is_none());
        // Second stop is a no-op.
        process.terminate(Duration::from_millis(200)).unwrap();
    }

    #[test]
    fn test_sigterm_ends_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = sh("exec sleep 30", dir.path().to_path_buf(), false);
        let pid = process.launch().unwrap();

        assert!(send_sigterm(pid));
        let deadline = Instant::now() + Duration::from_secs(5);
        while process.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!process.is_running());
        assert!(!send_sigterm(0));
    }

    #[test]
    fn test_debug_output_goes_to_log_files() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let mut process = sh("echo hello; echo oops >&2", logs.clone(), true);
        process.launch().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while process.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        process.terminate(Duration::from_secs(1)).unwrap();

        let stdout = std::fs::read_to_string(logs.join("sh.stdout.log")).unwrap();
        let stderr = std::fs::read_to_string(logs.join("sh.stderr.log")).unwrap();
        assert_eq!(stdout.trim(), "hello");
        assert_eq!(stderr.trim(), "oops");
    }

    #[test]
    fn test_command_line_is_masked() {
        let process = ConsoleProcess::new(
            "node",
            PathBuf::from("dcrd"),
            vec!["--rpcpass=secret".to_string(), "--regnet".to_string()],
            PathBuf::from("/tmp"),
            false,
        );
        assert_eq!(process.command_line(), "dcrd --rpcpass=*** --regnet");
    }
}
