//! Error types for the capability store.
//!
//! Each component has its own error enum. [`StoreError`] wraps them at the
//! store boundary, and every error reduces to a serializable [`ErrorKind`]
//! that hosts can render without matching on error internals.

use std::fmt;
use std::path::PathBuf;

use hangar_core::{CapabilityId, CapabilityKind};
use serde::{Deserialize, Serialize};

/// Flat error taxonomy surfaced to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The registry could not be fetched; a cached or empty registry was used.
    RegistryFetchFailed,
    /// The registry has no entry with the requested id.
    UnknownCapability,
    /// Listing or downloading the capability's files failed.
    FetchError,
    /// The isolated dependency environment could not be created.
    EnvCreationFailed,
    /// The dependency manifest could not be installed into the environment.
    DependencyInstallFailed,
    /// No install record says the capability is installed.
    CapabilityNotInstalled,
    /// The capability is installed but disabled.
    CapabilityDisabled,
    /// The module, export or command declared by the entry could not be found.
    EntryPointNotFound,
    /// The invocation exceeded its timeout.
    InvocationTimeout,
    /// The capability ran and failed.
    ProcessError,
    /// Another install of the same capability is running.
    InstallInProgress,
    /// The host shut the router down while the call was running.
    InvocationCancelled,
    /// The state file could not be written.
    StateError,
}

impl ErrorKind {
    /// Stable snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RegistryFetchFailed => "registry_fetch_failed",
            Self::UnknownCapability => "unknown_capability",
            Self::FetchError => "fetch_error",
            Self::EnvCreationFailed => "env_creation_failed",
            Self::DependencyInstallFailed => "dependency_install_failed",
            Self::CapabilityNotInstalled => "capability_not_installed",
            Self::CapabilityDisabled => "capability_disabled",
            Self::EntryPointNotFound => "entry_point_not_found",
            Self::InvocationTimeout => "invocation_timeout",
            Self::ProcessError => "process_error",
            Self::InstallInProgress => "install_in_progress",
            Self::InvocationCancelled => "invocation_cancelled",
            Self::StateError => "state_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from mirroring a capability subtree.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The subtree path is empty, the repository root, or escapes it.
    #[error("invalid subtree path '{path}': {reason}")]
    InvalidSubtree {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A listed entry lies outside the declared subtree.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path.
        path: String,
    },

    /// The source repository URL is not one the contents source understands.
    #[error("unsupported repository url '{url}': {reason}")]
    UnsupportedRepository {
        /// The repository URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Listing a remote directory failed.
    #[error("listing {path} failed: {message}")]
    Listing {
        /// Remote directory path.
        path: String,
        /// Failure reason.
        message: String,
    },

    /// Downloading a remote file failed.
    #[error("download of {path} failed: {message}")]
    Download {
        /// Remote file path.
        path: String,
        /// Failure reason.
        message: String,
    },

    /// A file exceeds the configured size cap.
    #[error("{path} is too large: {size} bytes (limit: {limit} bytes)")]
    TooLarge {
        /// Remote file path.
        path: String,
        /// Observed size in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// The subtree has more entries than the configured cap.
    #[error("subtree exceeds maximum entry count ({limit})")]
    TooManyEntries {
        /// Configured limit.
        limit: usize,
    },

    /// Writing the local mirror failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Local path being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for selective fetches.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors from provisioning a dependency environment.
///
/// The two variants correspond to the two provisioning steps so callers
/// can tell which one failed.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Step 1: the environment could not be created.
    #[error("environment creation failed at {}: {message}", path.display())]
    EnvCreationFailed {
        /// Install path the environment belongs to.
        path: PathBuf,
        /// Failure reason.
        message: String,
    },

    /// Step 2: the dependency manifest could not be installed.
    #[error("dependency install from {manifest} failed at {}: {message}", path.display())]
    DependencyInstallFailed {
        /// Install path the environment belongs to.
        path: PathBuf,
        /// Manifest path as declared by the descriptor.
        manifest: String,
        /// Failure reason (truncated tool output).
        message: String,
    },
}

impl ProvisionError {
    /// Map to the host-facing taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EnvCreationFailed { .. } => ErrorKind::EnvCreationFailed,
            Self::DependencyInstallFailed { .. } => ErrorKind::DependencyInstallFailed,
        }
    }
}

/// Result type for provisioning.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors from the install/enable state store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Another install of this id holds the in-progress flag.
    #[error("install of {0} is already in progress")]
    InstallInProgress(CapabilityId),

    /// The operation needs an install record and there is none.
    #[error("no install record for {0}")]
    NoRecord(CapabilityId),

    /// Reading, serializing or persisting the state file failed.
    #[error("state file error at {}: {message}", path.display())]
    Persist {
        /// State file path.
        path: PathBuf,
        /// Failure reason.
        message: String,
    },
}

impl StateError {
    /// Map to the host-facing taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InstallInProgress(_) => ErrorKind::InstallInProgress,
            Self::NoRecord(_) => ErrorKind::CapabilityNotInstalled,
            Self::Persist { .. } => ErrorKind::StateError,
        }
    }
}

/// Result type for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors returned across the capability store boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The registry for `kind` has no entry `id`.
    #[error("unknown {kind}: {id}")]
    UnknownCapability {
        /// Registry kind that was searched.
        kind: CapabilityKind,
        /// Requested id.
        id: String,
    },

    /// Mirroring the capability's files failed; the install was rolled back.
    #[error("download of {capability} failed: {source}")]
    Fetch {
        /// The capability being installed.
        capability: CapabilityId,
        /// Underlying fetch error.
        #[source]
        source: FetchError,
    },

    /// Provisioning the capability's environment failed.
    #[error("provisioning {capability} failed: {source}")]
    Provision {
        /// The capability being installed.
        capability: CapabilityId,
        /// Underlying provisioning error.
        #[source]
        source: ProvisionError,
    },

    /// The descriptor's entry could not be resolved against the install.
    #[error("entry point of {capability} is invalid: {message}")]
    InvalidEntry {
        /// The capability being installed.
        capability: CapabilityId,
        /// Why resolution failed.
        message: String,
    },

    /// A registry URL was rejected before any request was made.
    #[error("invalid registry URL '{url}': {reason}")]
    InvalidRegistryUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The shared HTTP client could not be built.
    #[error("failed to build HTTP client: {message}")]
    HttpClient {
        /// Builder error text.
        message: String,
    },

    /// A store directory could not be created.
    #[error("failed to prepare {path}: {source}")]
    Io {
        /// Directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// State store failure.
    #[error(transparent)]
    State(#[from] StateError),
}

impl StoreError {
    /// Map to the host-facing taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownCapability { .. } => ErrorKind::UnknownCapability,
            Self::Fetch { .. } => ErrorKind::FetchError,
            Self::Provision { source, .. } => source.kind(),
            Self::InvalidEntry { .. } => ErrorKind::EntryPointNotFound,
            Self::InvalidRegistryUrl { .. } => ErrorKind::RegistryFetchFailed,
            Self::HttpClient { .. } => ErrorKind::FetchError,
            Self::Io { .. } => ErrorKind::StateError,
            Self::State(e) => e.kind(),
        }
    }
}

/// Result type for capability store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::DependencyInstallFailed).unwrap();
        assert_eq!(json, "\"dependency_install_failed\"");
        let back: ErrorKind = serde_json::from_str("\"invocation_timeout\"").unwrap();
        assert_eq!(back, ErrorKind::InvocationTimeout);
        assert_eq!(ErrorKind::InvocationTimeout.to_string(), "invocation_timeout");
    }

    #[test]
    fn provisioning_stages_stay_distinguishable() {
        let env = StoreError::Provision {
            capability: CapabilityId::from_static("alpha"),
            source: ProvisionError::EnvCreationFailed {
                path: PathBuf::from("/tmp/alpha"),
                message: "python3 not found".into(),
            },
        };
        let deps = StoreError::Provision {
            capability: CapabilityId::from_static("alpha"),
            source: ProvisionError::DependencyInstallFailed {
                path: PathBuf::from("/tmp/alpha"),
                manifest: "requirements.txt".into(),
                message: "no matching distribution".into(),
            },
        };
        assert_eq!(env.kind(), ErrorKind::EnvCreationFailed);
        assert_eq!(deps.kind(), ErrorKind::DependencyInstallFailed);
    }

    #[test]
    fn state_errors_map_to_kinds() {
        let busy: StoreError = StateError::InstallInProgress(CapabilityId::from_static("a")).into();
        assert_eq!(busy.kind(), ErrorKind::InstallInProgress);
        let missing: StoreError = StateError::NoRecord(CapabilityId::from_static("a")).into();
        assert_eq!(missing.kind(), ErrorKind::CapabilityNotInstalled);
    }
}
