//! Persisted per-node formation state.
//!
//! The flags in [`LocalState`] guard one-time steps so that replaying events
//! after a restart never repeats completed work.

use crate::error::{ClusterError, ClusterResult};
use crate::registry::NodeRegistry;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Version written by this build.
pub const STATE_VERSION: u32 = 1;

/// Flags and peer records a node keeps across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    /// Layout version.
    pub version: u32,
    /// The local database instance has been set up with the shared password.
    #[serde(default)]
    pub initialized: bool,
    /// The shared master key and certificate are installed locally.
    #[serde(default)]
    pub master_cert_installed: bool,
    /// The mirroring endpoint has been created.
    #[serde(default)]
    pub mirroring_endpoint_ready: bool,
    /// This node created or joined the availability group.
    #[serde(default)]
    pub availability_group_joined: bool,
    /// Known peers, including this node.
    #[serde(default)]
    pub registry: NodeRegistry,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            initialized: false,
            master_cert_installed: false,
            mirroring_endpoint_ready: false,
            availability_group_joined: false,
            registry: NodeRegistry::default(),
        }
    }
}

/// Storage for [`LocalState`].
pub trait StateStore: Send + Sync {
    /// Load the last saved state, if any.
    fn load(&self) -> ClusterResult<Option<LocalState>>;

    /// Durably replace the saved state.
    fn save(&self, state: &LocalState) -> ClusterResult<()>;
}

/// JSON file store with atomic replacement.
///
/// Writes go to a temporary file that is synced and renamed over the target,
/// under an exclusive lock on a sibling `.lock` file.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    /// Store state at `path`, creating parent directories on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The state file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> ClusterResult<File> {
        let lock_path = self.path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(file)
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> ClusterResult<Option<LocalState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = File::open(&self.path)?;
        let state: LocalState = serde_json::from_reader(BufReader::new(file))?;
        if state.version != STATE_VERSION {
            return Err(ClusterError::UnsupportedStateVersion {
                found: state.version,
                expected: STATE_VERSION,
            });
        }
        Ok(Some(state))
    }

    fn save(&self, state: &LocalState) -> ClusterResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let lock = self.lock_file()?;

        let temp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, state)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        FileExt::unlock(&lock)?;
        tracing::trace!(path = %self.path.display(), "Saved formation state");
        Ok(())
    }
}

/// In-memory store. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    slot: Arc<Mutex<Option<LocalState>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last saved state.
    pub fn snapshot(&self) -> Option<LocalState> {
        self.slot.lock().clone()
    }

    /// Number of saves performed.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> ClusterResult<Option<LocalState>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, state: &LocalState) -> ClusterResult<()> {
        *self.slot.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlha_core::{MemoryResolver, NodeName};
    use tempfile::TempDir;

    fn sample_state() -> LocalState {
        let mut state = LocalState {
            initialized: true,
            master_cert_installed: true,
            ..LocalState::default()
        };
        state
            .registry
            .record_peer(&MemoryResolver::new(), &NodeName::new("n1"), "10.0.0.1", true, false);
        state
    }

    #[test]
    fn json_store_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = JsonStateStore::new(dir.path().join("nested/state.json"));

        assert!(store.load().unwrap().is_none());
        store.save(&sample_state()).unwrap();

        assert_eq!(store.load().unwrap(), Some(sample_state()));
        assert!(!dir.path().join("nested/state.tmp").exists());
    }

    #[test]
    fn json_store_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version": 99}"#).unwrap();

        let err = JsonStateStore::new(&path).load().unwrap_err();
        assert!(matches!(
            err,
            ClusterError::UnsupportedStateVersion { found: 99, expected: 1 }
        ));
    }

    #[test]
    fn missing_fields_default_to_false() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version": 1, "initialized": true}"#).unwrap();

        let state = JsonStateStore::new(&path).load().unwrap().unwrap();
        assert!(state.initialized);
        assert!(!state.availability_group_joined);
        assert!(state.registry.is_empty());
    }

    #[test]
    fn memory_store_clones_share_state() {
        let store = MemoryStateStore::new();
        let other = store.clone();

        store.save(&sample_state()).unwrap();

        assert_eq!(other.snapshot(), Some(sample_state()));
        assert_eq!(other.save_count(), 1);
    }
}
