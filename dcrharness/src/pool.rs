//! Registry of live harnesses keyed by name.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::harness::Harness;
use crate::spawner::ChainWithMatureOutputsSpawner;

type Slot = Arc<Mutex<Option<Arc<Harness>>>>;

#[derive(Debug, Default)]
struct Entries {
    /// Registration order; disposal walks it backwards.
    slots: Vec<(String, Slot)>,
    disposed: bool,
}

/// Named harnesses with lazy creation and bulk disposal.
///
/// Each name has its own slot lock: two callers obtaining the same name
/// get one harness, while different names spawn in parallel. The table
/// lock is never held while a slot lock is taken.
#[derive(Debug)]
pub struct HarnessPool {
    default_spawner: ChainWithMatureOutputsSpawner,
    entries: Mutex<Entries>,
}

impl HarnessPool {
    pub fn new(default_spawner: ChainWithMatureOutputsSpawner) -> Self {
        Self {
            default_spawner,
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn default_spawner(&self) -> &ChainWithMatureOutputsSpawner {
        &self.default_spawner
    }

    /// The harness called `name`, spawning it with the default spawner on
    /// first use.
    pub fn obtain(&self, name: &str) -> HarnessResult<Arc<Harness>> {
        self.obtain_with(name, &self.default_spawner)
    }

    /// The harness called `name`, spawning it with `spawner` on first use.
    ///
    /// An existing harness is returned as-is, whichever spawner built it.
    pub fn obtain_with(
        &self,
        name: &str,
        spawner: &ChainWithMatureOutputsSpawner,
    ) -> HarnessResult<Arc<Harness>> {
        let slot = {
            let mut entries = self.entries();
            if entries.disposed {
                return Err(HarnessError::PoolDisposed);
            }
            match find_slot(&entries, name) {
                Some(slot) => slot,
                None => {
                    let slot = Slot::default();
                    entries.slots.push((name.to_string(), Arc::clone(&slot)));
                    slot
                }
            }
        };

        let mut guard = lock_slot(&slot);
        if let Some(harness) = guard.as_ref() {
            return Ok(Arc::clone(harness));
        }
        if self.entries().disposed {
            return Err(HarnessError::PoolDisposed);
        }

        info!(harness = %name, network = %spawner.network, "Spawning harness");
        let harness = Arc::new(spawner.spawn(name)?);
        *guard = Some(Arc::clone(&harness));
        Ok(harness)
    }

    /// Add an already started harness. A taken name is `DuplicateHarness`.
    pub fn register(&self, harness: Harness) -> HarnessResult<Arc<Harness>> {
        let name = harness.name().to_string();
        let harness = Arc::new(harness);
        let existing = {
            let mut entries = self.entries();
            if entries.disposed {
                return Err(HarnessError::PoolDisposed);
            }
            match find_slot(&entries, &name) {
                Some(slot) => slot,
                None => {
                    let slot: Slot = Arc::new(Mutex::new(Some(Arc::clone(&harness))));
                    entries.slots.push((name, slot));
                    return Ok(harness);
                }
            }
        };

        // A slot left empty by a failed spawn can be claimed.
        let mut guard = lock_slot(&existing);
        if guard.is_some() {
            return Err(HarnessError::DuplicateHarness(name));
        }
        *guard = Some(Arc::clone(&harness));
        Ok(harness)
    }

    pub fn lookup(&self, name: &str) -> HarnessResult<Arc<Harness>> {
        let slot = find_slot(&self.entries(), name)
            .ok_or_else(|| HarnessError::HarnessNotFound(name.to_string()))?;
        let guard = lock_slot(&slot);
        guard
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| HarnessError::HarnessNotFound(name.to_string()))
    }

    /// Names of live harnesses in registration order.
    pub fn names(&self) -> Vec<String> {
        self.live().into_iter().map(|(name, _)| name).collect()
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.entries().disposed
    }

    /// Stop every harness, newest first, and close the pool.
    ///
    /// Every harness is attempted; failures are collected into
    /// `TeardownFailed`. Later calls return `Ok(())`.
    pub fn dispose_all(&self) -> HarnessResult<()> {
        let slots = {
            let mut entries = self.entries();
            if entries.disposed {
                return Ok(());
            }
            entries.disposed = true;
            std::mem::take(&mut entries.slots)
        };

        let mut failures = Vec::new();
        for (name, slot) in slots.into_iter().rev() {
            let Some(harness) = lock_slot(&slot).take() else {
                continue;
            };
            info!(harness = %name, "Disposing harness");
            if let Err(err) = harness.stop() {
                warn!(harness = %name, error = %err, "Failed to stop harness");
                failures.push((name, err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::TeardownFailed { failures })
        }
    }

    fn live(&self) -> Vec<(String, Arc<Harness>)> {
        let slots = self.entries().slots.clone();
        slots
            .into_iter()
            .filter_map(|(name, slot)| {
                let harness = lock_slot(&slot).as_ref().map(Arc::clone)?;
                Some((name, harness))
            })
            .collect()
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn find_slot(entries: &Entries, name: &str) -> Option<Slot> {
    entries
        .slots
        .iter()
        .find(|(existing, _)| existing == name)
        .map(|(_, slot)| Arc::clone(slot))
}

fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<Arc<Harness>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ConsoleNodeFactory;
    use crate::ports::PortAllocator;
    use crate::wallet::WalletFactory;
    use dcrharness_common::Network;

    fn missing_binary_pool() -> HarnessPool {
        HarnessPool::new(ChainWithMatureOutputsSpawner::new(
            Network::Regnet,
            0,
            ConsoleNodeFactory::new("/nonexistent/dcrd"),
            WalletFactory::memory(),
            Arc::new(PortAllocator::new(34000, 10)),
            std::env::temp_dir(),
        ))
    }

    #[test]
    fn test_failed_spawn_leaves_no_entry() {
        let pool = missing_binary_pool();
        let err = pool.obtain("main").unwrap_err();
        assert!(matches!(err, HarnessError::ExecutableNotFound(_)));
        assert!(pool.is_empty());
        assert!(pool.names().is_empty());
        assert!(matches!(
            pool.lookup("main").unwrap_err(),
            HarnessError::HarnessNotFound(_)
        ));
    }

    #[test]
    fn test_dispose_closes_pool() {
        let pool = missing_binary_pool();
        pool.dispose_all().unwrap();
        assert!(pool.is_disposed());
        assert!(matches!(
            pool.obtain("main").unwrap_err(),
            HarnessError::PoolDisposed
        ));
        pool.dispose_all().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_dispose_continues_past_failed_stop() {
        use crate::harness::HarnessState;
        use crate::harness::test_support::{pid_alive, running_harness, sim_node_server};

        let dir = tempfile::tempdir().unwrap();
        let server = sim_node_server();
        let pool = missing_binary_pool();
        let healthy = pool
            .register(running_harness("healthy", dir.path(), &server, false))
            .unwrap();
        // Registered last, so disposed first.
        let broken = pool
            .register(running_harness("broken", dir.path(), &server, true))
            .unwrap();
        let healthy_pid = healthy.pids().0.unwrap();
        let broken_pid = broken.pids().0.unwrap();

        let err = pool.dispose_all().unwrap_err();
        match &err {
            HarnessError::TeardownFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "broken");
                assert!(matches!(failures[0].1, HarnessError::StopFailed { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(healthy.state(), HarnessState::Stopped);
        assert_eq!(broken.state(), HarnessState::Stopped);
        assert!(!pid_alive(healthy_pid));
        assert!(!pid_alive(broken_pid));
        assert!(pool.is_empty());
        pool.dispose_all().unwrap();
    }

    #[test]
    fn test_lookup_unknown_name() {
        let pool = missing_binary_pool();
        assert!(matches!(
            pool.lookup("ghost").unwrap_err(),
            HarnessError::HarnessNotFound(name) if name == "ghost"
        ));
    }
}
