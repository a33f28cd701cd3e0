//! Temporary working directories shared by the harnesses of one setup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};

/// Directory under the system temp dir that holds every setup root.
pub const WORKDIR_BASE_NAME: &str = "dcrharness";

/// Roots older than this are swept when a new setup starts.
pub const STALE_WORKDIR_AGE: Duration = Duration::from_secs(3600);

/// A uniquely named directory removed on [`WorkingDir::dispose`].
#[derive(Debug)]
pub struct WorkingDir {
    path: PathBuf,
    keep: bool,
    disposed: AtomicBool,
}

impl WorkingDir {
    /// Create `<temp>/dcrharness/<prefix>_<timestamp>_<id>`.
    pub fn create(prefix: &str) -> HarnessResult<Self> {
        Self::create_in(&default_base_dir(), prefix)
    }

    /// Create a uniquely named root below `base`.
    pub fn create_in(base: &Path, prefix: &str) -> HarnessResult<Self> {
        cleanup_stale_artifacts(base, STALE_WORKDIR_AGE);

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let id = uuid::Uuid::new_v4().simple().to_string();
        let path = base.join(format!(
            "{}_{}_{}",
            sanitize_component(prefix),
            timestamp,
            &id[..8]
        ));

        std::fs::create_dir_all(&path).map_err(|source| HarnessError::WorkingDir {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "Created working directory");

        Ok(Self {
            path,
            keep: false,
            disposed: AtomicBool::new(false),
        })
    }

    /// Leave the directory on disk after dispose, for post-mortem inspection.
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create (if needed) and return a subdirectory.
    pub fn subdir(&self, name: &str) -> HarnessResult<PathBuf> {
        let dir = self.path.join(sanitize_component(name));
        std::fs::create_dir_all(&dir).map_err(|source| HarnessError::WorkingDir {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Remove the directory tree. Later calls are no-ops.
    pub fn dispose(&self) -> HarnessResult<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.keep {
            info!(path = %self.path.display(), "Keeping working directory");
            return Ok(());
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed working directory");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(HarnessError::WorkingDir {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// `<temp>/dcrharness`.
pub fn default_base_dir() -> PathBuf {
    std::env::temp_dir().join(WORKDIR_BASE_NAME)
}

/// Whether `name` has the `<prefix>_<YYYYmmdd_HHMMSS_fff>_<8 hex>` shape
/// of a root made by [`WorkingDir::create_in`].
pub fn is_working_dir_name(name: &str) -> bool {
    let mut parts = name.rsplitn(5, '_');
    let (Some(id), Some(millis), Some(time), Some(date), Some(prefix)) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let digits = |part: &str, len: usize| part.len() == len && part.bytes().all(|b| b.is_ascii_digit());

    !prefix.is_empty()
        && id.len() == 8
        && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        && digits(millis, 3)
        && digits(time, 6)
        && digits(date, 8)
        && chrono::NaiveDateTime::parse_from_str(&format!("{date}{time}"), "%Y%m%d%H%M%S").is_ok()
}

/// Remove working-directory roots under `base_dir` not modified within
/// `max_age`.
///
/// Harness processes killed with the test binary leave their roots behind;
/// sweeping them keeps `$TMPDIR` from growing without bound. Entries not
/// named like a root are never touched.
pub fn cleanup_stale_artifacts(base_dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(base_dir) else {
        return 0;
    };

    let now = SystemTime::now();
    let mut cleaned = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_root = entry.file_name().to_str().is_some_and(is_working_dir_name);
        if !is_root || !path.is_dir() {
            continue;
        }

        let is_stale = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > max_age);
        if !is_stale {
            continue;
        }

        match std::fs::remove_dir_all(&path) {
            Ok(()) => cleaned += 1,
            Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove stale working directory"),
        }
    }

    if cleaned > 0 {
        info!(count = cleaned, base = %base_dir.display(), "Removed stale working directories");
    }
    cleaned
}

pub(crate) fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "harness".to_string()
    } else {
        cleaned
    }
}
