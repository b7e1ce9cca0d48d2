//! Name resolution for replica hostnames.
//!
//! Availability-group replicas address each other by server name, so every
//! node needs a local mapping from peer names to addresses.

use crate::types::NodeName;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write as IoWrite};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while updating name resolution.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Reading or rewriting the hosts file failed.
    #[error("Hosts file {path}: {source}")]
    Io {
        /// File being updated.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The resolver refused the entry.
    #[error("Resolver rejected {name}: {reason}")]
    Rejected {
        /// Name being registered.
        name: String,
        /// Why.
        reason: String,
    },
}

/// Registers `address -> name` mappings.
pub trait NameResolver: Send + Sync {
    /// Make `name` resolve to `address`. Idempotent.
    fn register(&self, address: &str, name: &NodeName) -> Result<(), ResolverError>;
}

/// Maintains entries in a hosts(5) file.
///
/// Any existing line mentioning the name is replaced so a node that moved
/// addresses does not leave a stale mapping behind.
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
}

impl HostsFile {
    /// Manage entries in the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The system hosts file.
    pub fn system() -> Self {
        Self::new("/etc/hosts")
    }

    /// The file being managed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> ResolverError {
        ResolverError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn rewrite(&self, address: &str, name: &str) -> std::io::Result<bool> {
        let mut lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        lock.lock_exclusive()?;

        let mut current = String::new();
        lock.read_to_string(&mut current)?;

        let wanted = format!("{address} {name}");
        let mut lines = Vec::new();
        let mut present = false;
        for line in current.lines() {
            let mut fields = line.split('#').next().unwrap_or("").split_whitespace();
            let entry_address = fields.next();
            let mentions = fields.any(|alias| alias == name);
            if !mentions {
                lines.push(line.to_string());
            } else if entry_address == Some(address) && !present {
                present = true;
                lines.push(line.to_string());
            }
        }

        let unchanged = present && lines.len() == current.lines().count();
        if unchanged {
            FileExt::unlock(&lock)?;
            return Ok(false);
        }
        if !present {
            lines.push(wanted);
        }

        let temp_path = self.path.with_extension("sqlha.tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            for line in &lines {
                writeln!(writer, "{line}")?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        FileExt::unlock(&lock)?;
        Ok(true)
    }
}

impl NameResolver for HostsFile {
    fn register(&self, address: &str, name: &NodeName) -> Result<(), ResolverError> {
        let changed = self
            .rewrite(address, name.as_str())
            .map_err(|e| self.io_err(e))?;
        if changed {
            tracing::info!(name = %name, address, path = %self.path.display(), "Updated hosts entry");
        }
        Ok(())
    }
}

/// In-memory resolver for tests and simulation.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    entries: Mutex<BTreeMap<NodeName, String>>,
    reject: Mutex<bool>,
}

impl MemoryResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent registration fail.
    pub fn reject_all(&self, reject: bool) {
        *self.reject.lock() = reject;
    }

    /// Look up a registered address.
    pub fn resolve(&self, name: &str) -> Option<String> {
        self.entries.lock().get(name).cloned()
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl NameResolver for MemoryResolver {
    fn register(&self, address: &str, name: &NodeName) -> Result<(), ResolverError> {
        if *self.reject.lock() {
            return Err(ResolverError::Rejected {
                name: name.to_string(),
                reason: "resolver is read-only".to_string(),
            });
        }
        self.entries.lock().insert(name.clone(), address.to_string());
        Ok(())
    }
}
