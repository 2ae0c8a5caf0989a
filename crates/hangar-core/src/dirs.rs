//! Directory scaffolding for the Hangar private data directory.
//!
//! # Layout
//!
//! ```text
//! ~/.hangar/                          (HangarHome, or $HANGAR_HOME)
//! ├── config.toml                     (user config layer)
//! ├── logs/                           (rolling log files)
//! ├── cache/registry-<kind>.json      (last good registry document per kind)
//! ├── state/<kind>.json               (install/enable records per kind)
//! └── store/<kind>/<id>/              (install directories)
//! ```
//!
//! Each file under `cache/` and `state/` has exactly one owning component.

use std::io;
use std::path::{Path, PathBuf};

use crate::id::CapabilityId;
use crate::kind::CapabilityKind;

/// Environment variable that overrides the home directory.
pub const HOME_ENV_VAR: &str = "HANGAR_HOME";

/// Global Hangar home directory (`~/.hangar/` or `$HANGAR_HOME`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HangarHome {
    root: PathBuf,
}

impl HangarHome {
    /// Resolve the home directory.
    ///
    /// Checks `$HANGAR_HOME` first, then falls back to `$HOME/.hangar/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `$HANGAR_HOME` is relative, or if neither
    /// `$HANGAR_HOME` nor `$HOME` is set.
    pub fn resolve() -> io::Result<Self> {
        Self::resolve_from(
            std::env::var(HOME_ENV_VAR).ok(),
            std::env::var("HOME").ok(),
        )
    }

    /// Resolve from explicit variable values.
    fn resolve_from(custom: Option<String>, home: Option<String>) -> io::Result<Self> {
        let root = if let Some(custom) = custom {
            let p = PathBuf::from(custom);
            if !p.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "HANGAR_HOME must be an absolute path",
                ));
            }
            p
        } else {
            let home = home.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "neither HANGAR_HOME nor HOME environment variable is set",
                )
            })?;
            PathBuf::from(home).join(".hangar")
        };

        Ok(Self { root })
    }

    /// Create from an explicit path (useful for testing).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Ensure the directory structure exists with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation or permission setting fails.
    pub fn ensure(&self) -> io::Result<()> {
        let dirs = [
            self.root.clone(),
            self.logs_dir(),
            self.cache_dir(),
            self.state_dir(),
            self.store_dir(),
        ];
        for dir in &dirs {
            std::fs::create_dir_all(dir)?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for dir in &dirs {
                std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
            }
        }
        Ok(())
    }

    /// Root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// User configuration file (`~/.hangar/config.toml`).
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Logs directory (`~/.hangar/logs/`).
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Cache directory (`~/.hangar/cache/`).
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// State directory (`~/.hangar/state/`).
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// Install root for every kind (`~/.hangar/store/`).
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    /// Cached registry document for one kind.
    #[must_use]
    pub fn registry_cache_path(&self, kind: CapabilityKind) -> PathBuf {
        self.cache_dir()
            .join(format!("registry-{}.json", kind.as_str()))
    }

    /// Install/enable state file for one kind.
    #[must_use]
    pub fn state_path(&self, kind: CapabilityKind) -> PathBuf {
        self.state_dir().join(format!("{}.json", kind.as_str()))
    }

    /// Install root for one kind (`~/.hangar/store/<kind>/`).
    #[must_use]
    pub fn install_root(&self, kind: CapabilityKind) -> PathBuf {
        self.store_dir().join(kind.as_str())
    }

    /// Install directory for one capability.
    #[must_use]
    pub fn install_dir(&self, kind: CapabilityKind, id: &CapabilityId) -> PathBuf {
        self.install_root(kind).join(id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_override() {
        let home = HangarHome::resolve_from(
            Some("/srv/hangar".to_string()),
            Some("/home/user".to_string()),
        )
        .unwrap();
        assert_eq!(home.root(), Path::new("/srv/hangar"));
    }

    #[test]
    fn resolve_falls_back_to_home() {
        let home = HangarHome::resolve_from(None, Some("/home/user".to_string())).unwrap();
        assert_eq!(home.root(), Path::new("/home/user/.hangar"));
    }

    #[test]
    fn resolve_rejects_relative_override() {
        let err = HangarHome::resolve_from(Some("rel/dir".to_string()), None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn resolve_without_any_home_fails() {
        let err = HangarHome::resolve_from(None, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn per_kind_paths_are_distinct() {
        let home = HangarHome::from_path("/h");
        let id = CapabilityId::from_static("demo");
        assert_eq!(
            home.state_path(CapabilityKind::ToolServer),
            PathBuf::from("/h/state/tool-server.json")
        );
        assert_eq!(
            home.registry_cache_path(CapabilityKind::Agent),
            PathBuf::from("/h/cache/registry-agent.json")
        );
        assert_eq!(
            home.install_dir(CapabilityKind::Application, &id),
            PathBuf::from("/h/store/application/demo")
        );
    }

    #[test]
    fn ensure_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let home = HangarHome::from_path(dir.path().join("home"));
        home.ensure().unwrap();

        assert!(home.logs_dir().is_dir());
        assert!(home.cache_dir().is_dir());
        assert!(home.state_dir().is_dir());
        assert!(home.store_dir().is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn ensure_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let home = HangarHome::from_path(dir.path().join("home"));
        home.ensure().unwrap();

        let mode = std::fs::metadata(home.state_dir())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
