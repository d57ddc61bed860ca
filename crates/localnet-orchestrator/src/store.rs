//! Network state store.
//!
//! Every network lives in its own directory under the store's base
//! directory:
//!
//! ```text
//! <base>/
//!   locks/<network>.lock
//!   <network>/
//!     network-keypairs/      owner-only
//!     libp2p-keypairs/       owner-only
//!     genesis_ledger.json
//!     docker-compose.yaml
//!     nginx.conf
//!     network.json           the NetworkRecord
//! ```
//!
//! `network.json` is the single source of truth across invocations; the other
//! artifacts are derived from it. All files are written atomically (temp file
//! then rename) and every command holds an exclusive advisory lock on the
//! network for its duration.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use localnet_core::node::validate_identifier;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::record::NetworkRecord;

/// File name of the persisted record inside a network directory.
pub const RECORD_FILE: &str = "network.json";

const LOCK_DIR: &str = "locks";

/// Filesystem-backed store of network records.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    base_dir: PathBuf,
}

impl NetworkStore {
    /// Creates a store rooted at `base_dir`. Nothing is created until the
    /// first write.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the storage root.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the directory of network `name`.
    pub fn network_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Returns true if a record for `name` is persisted.
    pub fn exists(&self, name: &str) -> bool {
        self.record_path(name).is_file()
    }

    /// Loads the record of `name`, failing with `NotFound` if there is none.
    pub fn load(&self, name: &str) -> Result<NetworkRecord> {
        let path = self.record_path(name);
        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OrchestratorError::not_found(name),
            _ => OrchestratorError::Io(e),
        })?;
        let record: NetworkRecord = serde_json::from_str(&content)?;
        debug!(network = %name, state = %record.state, "Loaded network record");
        Ok(record)
    }

    /// Persists `record`, replacing any previous version atomically.
    pub fn save(&self, record: &NetworkRecord) -> Result<()> {
        let dir = self.network_dir(&record.name);
        std::fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(record)?;
        write_atomic(&dir.join(RECORD_FILE), content.as_bytes())?;
        debug!(network = %record.name, state = %record.state, "Saved network record");
        Ok(())
    }

    /// Writes a derived artifact into the directory of network `name`.
    pub fn write_artifact(&self, name: &str, file_name: &str, content: &[u8]) -> Result<PathBuf> {
        let dir = self.network_dir(name);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(file_name);
        write_atomic(&path, content)?;
        Ok(path)
    }

    /// Removes the whole directory of network `name`. Missing is fine.
    pub fn remove(&self, name: &str) -> Result<()> {
        let dir = self.network_dir(name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(network = %name, path = %dir.display(), "Removed network directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists every persisted network, ordered by name. Directories without a
    /// readable record are skipped.
    pub fn list(&self) -> Result<Vec<NetworkRecord>> {
        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() || entry.file_name() == LOCK_DIR {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !self.exists(&name) {
                continue;
            }
            match self.load(&name) {
                Ok(record) => records.push(record),
                Err(e) => warn!(network = %name, error = %e, "Skipping unreadable network record"),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Takes the exclusive lock of network `name`. The lock is released when
    /// the returned guard is dropped.
    pub fn lock(&self, name: &str) -> Result<NetworkLock> {
        validate_network_name(name)?;
        let dir = self.base_dir.join(LOCK_DIR);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{name}.lock"));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|e| {
            OrchestratorError::lock(name, format!("{} ({})", e, path.display()))
        })?;

        debug!(network = %name, "Acquired network lock");
        Ok(NetworkLock {
            file,
            network: name.to_string(),
        })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.network_dir(name).join(RECORD_FILE)
    }
}

/// Guard holding a network's exclusive lock.
#[derive(Debug)]
pub struct NetworkLock {
    file: File,
    network: String,
}

impl Drop for NetworkLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(network = %self.network, error = %e, "Failed to release network lock");
        }
    }
}

/// Checks that `name` can name a network directory and its containers.
pub fn validate_network_name(name: &str) -> Result<()> {
    validate_identifier(name).map_err(|e| OrchestratorError::configuration(e.to_string()))?;
    if name == LOCK_DIR {
        return Err(OrchestratorError::configuration(format!(
            "network name {name:?} is reserved"
        )));
    }
    Ok(())
}

/// Writes `content` to a sibling temp file and renames it over `path`, so
/// readers see either the old or the new content and never a partial file.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
