//! Per-capability dependency environments.
//!
//! Provisioning has two steps, each reported with its own error variant:
//!
//! 1. Create the environment under the install directory, or reuse an
//!    existing one.
//! 2. Install the declared dependency manifest into that environment only.
//!
//! A failure in step 2 leaves the environment from step 1 in place so a
//! retry can skip straight to the dependency install.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use hangar_core::truncate_to_boundary;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::descriptor::safe_relative;
use crate::error::{ProvisionError, ProvisionResult};

/// Directory name of the environment inside an install directory.
pub const ENV_DIR_NAME: &str = ".venv";

/// Marker file whose presence means the environment is complete.
const ENV_MARKER: &str = "pyvenv.cfg";

#[cfg(windows)]
const BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
const BIN_DIR: &str = "bin";

#[cfg(windows)]
const PYTHON_EXE: &str = "python.exe";
#[cfg(not(windows))]
const PYTHON_EXE: &str = "python";

/// A provisioned environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvHandle {
    /// Environment root.
    pub root: PathBuf,
    /// Directory prepended to the child `PATH`.
    pub bin_dir: PathBuf,
    /// Interpreter inside the environment, when there is one.
    pub interpreter: Option<PathBuf>,
}

impl EnvHandle {
    fn venv(root: PathBuf) -> Self {
        let bin_dir = root.join(BIN_DIR);
        let interpreter = Some(bin_dir.join(PYTHON_EXE));
        Self {
            root,
            bin_dir,
            interpreter,
        }
    }
}

/// Creates and locates per-capability dependency environments.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Ensure an environment exists for `install_path` and install
    /// `manifest` (relative to `install_path`) into it.
    async fn provision(
        &self,
        install_path: &Path,
        manifest: Option<&str>,
    ) -> ProvisionResult<EnvHandle>;

    /// The existing environment for `install_path`, if any.
    fn locate(&self, install_path: &Path) -> Option<EnvHandle>;
}

/// Python virtual environment per capability.
#[derive(Debug, Clone)]
pub struct VenvProvisioner {
    python: String,
    timeout: Duration,
    excerpt_bytes: usize,
}

impl VenvProvisioner {
    /// `python` creates the environments; each step is bounded by `timeout`;
    /// failed tool output is cut to `excerpt_bytes`.
    #[must_use]
    pub fn new(python: impl Into<String>, timeout: Duration, excerpt_bytes: usize) -> Self {
        Self {
            python: python.into(),
            timeout,
            excerpt_bytes,
        }
    }

    async fn create_env(&self, install_path: &Path, root: &Path) -> ProvisionResult<()> {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-m").arg("venv").arg(root).current_dir(install_path);

        info!(path = %root.display(), python = %self.python, "Creating environment");
        if let Err(message) = self.run(cmd).await {
            // A half-created environment would be reused next time.
            if let Err(e) = std::fs::remove_dir_all(root)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %root.display(), error = %e, "Failed to remove partial environment");
            }
            return Err(ProvisionError::EnvCreationFailed {
                path: install_path.to_path_buf(),
                message,
            });
        }
        Ok(())
    }

    async fn install_manifest(
        &self,
        install_path: &Path,
        env: &EnvHandle,
        manifest: &str,
    ) -> ProvisionResult<()> {
        let failed = |message: String| ProvisionError::DependencyInstallFailed {
            path: install_path.to_path_buf(),
            manifest: manifest.to_owned(),
            message,
        };

        let rel = safe_relative(manifest)
            .ok_or_else(|| failed("manifest path escapes the install directory".to_owned()))?;
        let manifest_path = install_path.join(&rel);
        if !manifest_path.is_file() {
            return Err(failed(format!("{} not found", manifest_path.display())));
        }

        let interpreter = env
            .interpreter
            .clone()
            .ok_or_else(|| failed("environment has no interpreter".to_owned()))?;
        let mut cmd = Command::new(interpreter);
        cmd.args(["-m", "pip", "install", "--disable-pip-version-check"])
            .current_dir(install_path);
        if rel.file_name().is_some_and(|n| n == "pyproject.toml") {
            cmd.arg(manifest_path.parent().unwrap_or(install_path));
        } else {
            cmd.arg("-r").arg(&manifest_path);
        }

        info!(manifest = %manifest_path.display(), "Installing dependencies");
        self.run(cmd).await.map_err(failed)
    }

    /// Run a provisioning command to completion within the timeout.
    async fn run(&self, mut cmd: Command) -> Result<(), String> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| format!("timed out after {}s", self.timeout.as_secs()))?
            .map_err(|e| format!("failed to start: {e}"))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            Err(format!("exited with {}", output.status))
        } else {
            Err(truncate_to_boundary(stderr, self.excerpt_bytes).to_owned())
        }
    }
}

#[async_trait]
impl Provisioner for VenvProvisioner {
    async fn provision(
        &self,
        install_path: &Path,
        manifest: Option<&str>,
    ) -> ProvisionResult<EnvHandle> {
        let root = install_path.join(ENV_DIR_NAME);
        if root.join(ENV_MARKER).is_file() {
            debug!(path = %root.display(), "Reusing existing environment");
        } else {
            self.create_env(install_path, &root).await?;
        }
        let env = EnvHandle::venv(root);

        if let Some(manifest) = manifest {
            self.install_manifest(install_path, &env, manifest).await?;
        }
        Ok(env)
    }

    fn locate(&self, install_path: &Path) -> Option<EnvHandle> {
        let root = install_path.join(ENV_DIR_NAME);
        root.join(ENV_MARKER)
            .is_file()
            .then(|| EnvHandle::venv(root))
    }
}

/// Provisioner for hosts that manage dependencies themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProvisioner;

#[async_trait]
impl Provisioner for NoopProvisioner {
    async fn provision(
        &self,
        install_path: &Path,
        manifest: Option<&str>,
    ) -> ProvisionResult<EnvHandle> {
        if let Some(manifest) = manifest {
            debug!(%manifest, "No provisioning backend; manifest ignored");
        }
        Ok(EnvHandle {
            root: install_path.to_path_buf(),
            bin_dir: install_path.join(BIN_DIR),
            interpreter: None,
        })
    }

    fn locate(&self, _install_path: &Path) -> Option<EnvHandle> {
        None
    }
}
