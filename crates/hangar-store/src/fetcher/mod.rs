//! Selective (sparse) fetch of one capability's subtree.
//!
//! Only the directory named by the descriptor's `subtree_path` is walked;
//! siblings are never listed or downloaded. The mirror is written into a
//! staging directory next to the destination and renamed into place only
//! when every file arrived, so a failed fetch leaves no destination
//! directory behind.

mod github;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::descriptor::{CapabilityDescriptor, normalize_subtree, safe_relative};
use crate::error::{FetchError, FetchResult};
use crate::fsutil::remove_dir_if_exists;

pub use github::GitHubContents;

/// Type of a remote listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteEntryType {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link (not mirrored).
    Symlink,
    /// Git submodule (not mirrored).
    Submodule,
    /// Anything the contents API adds later.
    #[serde(other)]
    Other,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Base name.
    pub name: String,
    /// Entry type.
    #[serde(rename = "type")]
    pub entry_type: RemoteEntryType,
    /// Path from the repository root.
    pub path: String,
    /// Direct download URL for files.
    #[serde(default)]
    pub download_url: Option<String>,
    /// Size in bytes, when the listing reports it.
    #[serde(default)]
    pub size: Option<u64>,
}

/// A remote repository that can list directories and download files.
#[async_trait]
pub trait ContentsSource: Send + Sync {
    /// List the directory at `path` (relative to the repository root).
    async fn list_dir(
        &self,
        repo_url: &str,
        git_ref: &str,
        path: &str,
    ) -> FetchResult<Vec<RemoteEntry>>;

    /// Download one file entry.
    async fn download(&self, entry: &RemoteEntry) -> FetchResult<Vec<u8>>;
}

/// An entry that was listed but not mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    /// Path from the repository root.
    pub path: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Outcome of a successful subtree fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    /// Files written.
    pub files: usize,
    /// Bytes written.
    pub bytes: u64,
    /// Entries skipped with a warning.
    pub skipped: Vec<SkippedEntry>,
}

/// Mirrors descriptor subtrees from a [`ContentsSource`].
#[derive(Clone)]
pub struct SelectiveFetcher {
    source: Arc<dyn ContentsSource>,
    default_ref: String,
    max_entries: usize,
}

impl SelectiveFetcher {
    /// Create a fetcher. `default_ref` is used for descriptors without a
    /// `git_ref`; `max_entries` bounds the walk.
    #[must_use]
    pub fn new(
        source: Arc<dyn ContentsSource>,
        default_ref: impl Into<String>,
        max_entries: usize,
    ) -> Self {
        Self {
            source,
            default_ref: default_ref.into(),
            max_entries,
        }
    }

    /// Mirror the descriptor's subtree into `dest_dir`.
    ///
    /// Any pre-existing `dest_dir` is removed first. On error `dest_dir`
    /// does not exist afterward.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] for an invalid subtree, a listing or
    /// download failure, an entry outside the subtree, a size cap, or a
    /// local I/O failure.
    pub async fn fetch_subtree(
        &self,
        descriptor: &CapabilityDescriptor,
        dest_dir: &Path,
    ) -> FetchResult<FetchReport> {
        let root = normalize_subtree(&descriptor.subtree_path).map_err(|reason| {
            FetchError::InvalidSubtree {
                path: descriptor.subtree_path.clone(),
                reason,
            }
        })?;
        let git_ref = descriptor
            .git_ref
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(&self.default_ref);

        remove_dir_if_exists(dest_dir).map_err(|e| io_error(dest_dir, e))?;
        let parent = dest_dir.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;

        // Dropping the TempDir on any early return removes the partial mirror.
        let staging = tempfile::Builder::new()
            .prefix(&format!(".staging-{}-", descriptor.id))
            .tempdir_in(parent)
            .map_err(|e| io_error(parent, e))?;

        let report = self
            .mirror(&descriptor.source_repo_url, git_ref, &root, staging.path())
            .await?;

        let staged = staging.keep();
        if let Err(e) = std::fs::rename(&staged, dest_dir) {
            let _ = std::fs::remove_dir_all(&staged);
            return Err(io_error(dest_dir, e));
        }

        info!(
            capability = %descriptor.id,
            subtree = %root,
            dest = %dest_dir.display(),
            files = report.files,
            skipped = report.skipped.len(),
            "Mirrored capability subtree"
        );
        Ok(report)
    }

    async fn mirror(
        &self,
        repo_url: &str,
        git_ref: &str,
        root: &str,
        staging: &Path,
    ) -> FetchResult<FetchReport> {
        let mut report = FetchReport::default();
        let mut queue = VecDeque::from([root.to_owned()]);
        let mut seen: usize = 0;

        while let Some(dir) = queue.pop_front() {
            debug!(%dir, "Listing remote directory");
            let listing = self.source.list_dir(repo_url, git_ref, &dir).await?;

            for entry in listing {
                seen = seen.saturating_add(1);
                if seen > self.max_entries {
                    return Err(FetchError::TooManyEntries {
                        limit: self.max_entries,
                    });
                }

                let rel = relative_to_root(root, &entry.path)?;
                let local = staging.join(&rel);

                match entry.entry_type {
                    RemoteEntryType::Dir => {
                        tokio::fs::create_dir_all(&local)
                            .await
                            .map_err(|e| io_error(&local, e))?;
                        queue.push_back(entry.path.clone());
                    },
                    RemoteEntryType::File if entry.download_url.is_none() => {
                        skip(&mut report, &entry, "file has no download url");
                    },
                    RemoteEntryType::File => {
                        let bytes = self.source.download(&entry).await?;
                        if let Some(parent) = local.parent() {
                            tokio::fs::create_dir_all(parent)
                                .await
                                .map_err(|e| io_error(parent, e))?;
                        }
                        tokio::fs::write(&local, &bytes)
                            .await
                            .map_err(|e| io_error(&local, e))?;
                        report.files = report.files.saturating_add(1);
                        report.bytes = report
                            .bytes
                            .saturating_add(u64::try_from(bytes.len()).unwrap_or(u64::MAX));
                    },
                    RemoteEntryType::Symlink => skip(&mut report, &entry, "symbolic links are not mirrored"),
                    RemoteEntryType::Submodule => skip(&mut report, &entry, "submodules are not mirrored"),
                    RemoteEntryType::Other => skip(&mut report, &entry, "unsupported entry type"),
                }
            }
        }

        Ok(report)
    }
}

impl std::fmt::Debug for SelectiveFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectiveFetcher")
            .field("default_ref", &self.default_ref)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

fn skip(report: &mut FetchReport, entry: &RemoteEntry, reason: &str) {
    warn!(path = %entry.path, reason, "Skipping remote entry");
    report.skipped.push(SkippedEntry {
        path: entry.path.clone(),
        reason: reason.to_owned(),
    });
}

/// Path of `remote` below `root`, rejecting anything outside it.
fn relative_to_root(root: &str, remote: &str) -> FetchResult<PathBuf> {
    let traversal = || FetchError::PathTraversal {
        path: remote.to_owned(),
    };
    let rest = remote
        .trim_start_matches('/')
        .strip_prefix(root)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(traversal)?;
    if rest.split('/').any(|part| part == "..") {
        return Err(traversal());
    }
    safe_relative(rest).ok_or_else(traversal)
}

fn io_error(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests;
