//! Persisted install/enable state for one capability kind.
//!
//! The state file is a JSON object keyed by capability id:
//!
//! ```json
//! { "alpha": { "installed": true, "enabled": false, "install_path": "...",
//!              "installed_at": "...", "entry": { "kind": "out-of-process", ... } } }
//! ```
//!
//! Files carrying only `installed`/`enabled` still load. Reads are served
//! from an in-memory snapshot and never touch the disk. Every mutation
//! builds a new map, writes it atomically and then swaps the snapshot, so
//! readers never see a half-applied change.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use hangar_core::CapabilityId;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::descriptor::{InstallRecord, ResolvedEntry};
use crate::error::{StateError, StateResult};
use crate::fsutil::atomic_write;

/// All records of one kind, by id.
pub type RecordMap = BTreeMap<CapabilityId, InstallRecord>;

/// On-disk shape of one record (the id is the map key).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(default)]
    installed: bool,
    #[serde(default)]
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    install_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    installed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entry: Option<ResolvedEntry>,
}

impl StoredRecord {
    fn into_record(self, capability_id: CapabilityId) -> InstallRecord {
        InstallRecord {
            capability_id,
            installed: self.installed,
            enabled: self.enabled,
            install_path: self.install_path,
            installed_at: self.installed_at,
            entry: self.entry,
        }
    }
}

impl From<&InstallRecord> for StoredRecord {
    fn from(r: &InstallRecord) -> Self {
        Self {
            installed: r.installed,
            enabled: r.enabled,
            install_path: r.install_path.clone(),
            installed_at: r.installed_at,
            entry: r.entry.clone(),
        }
    }
}

/// Owner of one kind's state file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    snapshot: RwLock<Arc<RecordMap>>,
    writer: Mutex<()>,
    installing: Arc<Mutex<HashSet<CapabilityId>>>,
    corrupt_backup: Option<PathBuf>,
    discarded: Vec<String>,
}

impl StateStore {
    /// Load the state file at `path`.
    ///
    /// A missing file is an empty store. A file that cannot be parsed at
    /// all is moved aside to `<file>.corrupt` and the store starts empty;
    /// see [`recovered_from_corruption`](Self::recovered_from_corruption).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Persist`] if the file exists but cannot be
    /// read, or a corrupt file cannot be moved aside.
    pub fn open(path: impl Into<PathBuf>) -> StateResult<Self> {
        let path = path.into();
        let mut corrupt_backup = None;
        let mut discarded = Vec::new();

        let records = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&bytes) {
                Ok(raw) => parse_records(raw, &mut discarded),
                Err(e) => {
                    let backup = corrupt_path(&path);
                    warn!(
                        path = %path.display(),
                        backup = %backup.display(),
                        error = %e,
                        "State file is corrupt, starting empty"
                    );
                    std::fs::rename(&path, &backup).map_err(|e| StateError::Persist {
                        path: path.clone(),
                        message: format!("failed to move corrupt state file aside: {e}"),
                    })?;
                    corrupt_backup = Some(backup);
                    RecordMap::new()
                },
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RecordMap::new(),
            Err(e) => {
                return Err(StateError::Persist {
                    path,
                    message: format!("failed to read state file: {e}"),
                });
            },
        };

        for key in &discarded {
            warn!(path = %path.display(), %key, "Discarding unreadable state record");
        }
        debug!(path = %path.display(), records = records.len(), "Loaded state");

        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(records)),
            writer: Mutex::new(()),
            installing: Arc::new(Mutex::new(HashSet::new())),
            corrupt_backup,
            discarded,
        })
    }

    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a corrupt state file was moved, if loading had to start fresh.
    #[must_use]
    pub fn recovered_from_corruption(&self) -> Option<&Path> {
        self.corrupt_backup.as_deref()
    }

    /// Keys of individual records that could not be read and were dropped.
    #[must_use]
    pub fn discarded_records(&self) -> &[String] {
        &self.discarded
    }

    /// The record for `id`.
    #[must_use]
    pub fn get(&self, id: &CapabilityId) -> Option<InstallRecord> {
        self.read().get(id).cloned()
    }

    /// All records.
    #[must_use]
    pub fn list(&self) -> Arc<RecordMap> {
        self.read()
    }

    /// Whether an install of `id` is running.
    #[must_use]
    pub fn is_installing(&self, id: &CapabilityId) -> bool {
        self.installing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// Claim the in-progress flag for `id`. The flag is released when the
    /// guard drops.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InstallInProgress`] if another guard for `id`
    /// is alive.
    pub fn begin_install(&self, id: &CapabilityId) -> StateResult<InstallGuard> {
        let mut set = self
            .installing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !set.insert(id.clone()) {
            return Err(StateError::InstallInProgress(id.clone()));
        }
        Ok(InstallGuard {
            id: id.clone(),
            installing: Arc::clone(&self.installing),
        })
    }

    /// Record a completed install.
    ///
    /// `enabled` is preserved for an existing record. A brand-new record is
    /// enabled only when `enable_if_new` is set.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Persist`] if the state file cannot be written.
    pub fn set_installed(
        &self,
        id: &CapabilityId,
        install_path: &Path,
        entry: ResolvedEntry,
        enable_if_new: bool,
    ) -> StateResult<InstallRecord> {
        self.mutate(|map| {
            let record = map.entry(id.clone()).or_insert_with(|| {
                let mut fresh = InstallRecord::new(id.clone());
                fresh.enabled = enable_if_new;
                fresh
            });
            record.installed = true;
            record.install_path = Some(install_path.to_path_buf());
            record.installed_at = Some(Utc::now());
            record.entry = Some(entry);
            Ok(record.clone())
        })
    }

    /// Flip the enabled flag of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NoRecord`] if `id` was never installed, or
    /// [`StateError::Persist`] if the state file cannot be written.
    pub fn set_enabled(&self, id: &CapabilityId, enabled: bool) -> StateResult<InstallRecord> {
        self.mutate(|map| {
            let record = map
                .get_mut(id)
                .ok_or_else(|| StateError::NoRecord(id.clone()))?;
            record.enabled = enabled;
            Ok(record.clone())
        })
    }

    /// Mark a record as not installed (rolled-back install).
    ///
    /// No-op if there is no record.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Persist`] if the state file cannot be written.
    pub fn mark_not_installed(&self, id: &CapabilityId) -> StateResult<()> {
        if self.get(id).is_none_or(|r| !r.installed) {
            return Ok(());
        }
        self.mutate(|map| {
            if let Some(record) = map.get_mut(id) {
                record.installed = false;
                record.entry = None;
            }
            Ok(())
        })
    }

    fn read(&self) -> Arc<RecordMap> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply `f` to a copy of the records, persist, then publish.
    fn mutate<T>(&self, f: impl FnOnce(&mut RecordMap) -> StateResult<T>) -> StateResult<T> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_lock = self.lock_file()?;

        let mut next = (*self.read()).clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(out)
    }

    fn persist(&self, records: &RecordMap) -> StateResult<()> {
        let stored: BTreeMap<&str, StoredRecord> = records
            .iter()
            .map(|(id, r)| (id.as_str(), StoredRecord::from(r)))
            .collect();
        let bytes = serde_json::to_vec_pretty(&stored).map_err(|e| StateError::Persist {
            path: self.path.clone(),
            message: format!("failed to serialize state: {e}"),
        })?;
        atomic_write(&self.path, &bytes).map_err(|e| StateError::Persist {
            path: self.path.clone(),
            message: format!("failed to write state file: {e}"),
        })?;
        debug!(path = %self.path.display(), records = records.len(), "Saved state");
        Ok(())
    }

    /// Exclusive advisory lock on a `.lk` sibling, held across one write.
    fn lock_file(&self) -> StateResult<std::fs::File> {
        let lock_path = self.path.with_extension("lk");
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StateError::Persist {
                path: self.path.clone(),
                message: format!("failed to create state directory: {e}"),
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(&lock_path)
            .map_err(|e| StateError::Persist {
                path: self.path.clone(),
                message: format!("failed to open lock file: {e}"),
            })?;
        file.lock_exclusive().map_err(|e| StateError::Persist {
            path: self.path.clone(),
            message: format!("failed to acquire state lock: {e}"),
        })?;
        Ok(file)
    }
}

/// Holds the per-id in-progress flag; releases it on drop.
#[derive(Debug)]
pub struct InstallGuard {
    id: CapabilityId,
    installing: Arc<Mutex<HashSet<CapabilityId>>>,
}

impl InstallGuard {
    /// The id being installed.
    #[must_use]
    pub fn id(&self) -> &CapabilityId {
        &self.id
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        self.installing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

fn parse_records(
    raw: serde_json::Map<String, serde_json::Value>,
    discarded: &mut Vec<String>,
) -> RecordMap {
    let mut records = RecordMap::new();
    for (key, value) in raw {
        let Ok(id) = CapabilityId::new(key.as_str()) else {
            discarded.push(key);
            continue;
        };
        match serde_json::from_value::<StoredRecord>(value) {
            Ok(stored) => {
                records.insert(id.clone(), stored.into_record(id));
            },
            Err(_) => discarded.push(key),
        }
    }
    records
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}
