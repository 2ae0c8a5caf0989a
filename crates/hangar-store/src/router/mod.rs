//! Invocation router.
//!
//! Every call walks the same state machine:
//!
//! | Record state          | Outcome                    |
//! |-----------------------|----------------------------|
//! | missing / not installed | `CapabilityNotInstalled` |
//! | installed, disabled   | `CapabilityDisabled`       |
//! | installed, enabled    | dispatch on the resolved entry |
//!
//! In-process entries run a WebAssembly module through Extism; the host
//! context is reachable from the guest through host functions.
//! Out-of-process entries spawn a child speaking JSON over stdio.
//! All outcomes, including failures, come back as one
//! [`InvocationResponse`].

mod host_functions;
mod process;
mod wasm;

use std::sync::Arc;
use std::time::Duration;

use hangar_core::{CapabilityId, HostContext};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::descriptor::{InvocationRequest, InvocationResponse, ResolvedEntry};
use crate::error::ErrorKind;
use crate::provision::Provisioner;
use crate::state::StateStore;

use process::{ChildTracker, ProcessCall};
use wasm::WasmRuntime;

/// Default invocation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Router limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Timeout used when the caller gives none.
    pub default_timeout: Duration,
    /// How much of a failed child's stderr is kept.
    pub stderr_excerpt_bytes: usize,
    /// Linear memory cap for in-process modules.
    pub wasm_max_memory_bytes: u64,
    /// Largest stdout accepted from a child.
    pub max_output_bytes: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            stderr_excerpt_bytes: 2048,
            wasm_max_memory_bytes: 64 * 1024 * 1024,
            max_output_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Dispatches invocations for one capability kind.
pub struct InvocationRouter {
    state: Arc<StateStore>,
    provisioner: Arc<dyn Provisioner>,
    config: RouterConfig,
    shutdown: CancellationToken,
    children: Arc<ChildTracker>,
    wasm: WasmRuntime,
}

impl InvocationRouter {
    /// Create a router reading install state from `state`.
    #[must_use]
    pub fn new(
        state: Arc<StateStore>,
        host: Arc<dyn HostContext>,
        provisioner: Arc<dyn Provisioner>,
        config: RouterConfig,
    ) -> Self {
        let wasm = WasmRuntime::new(host, config.wasm_max_memory_bytes);
        Self {
            state,
            provisioner,
            config,
            shutdown: CancellationToken::new(),
            children: Arc::new(ChildTracker::default()),
            wasm,
        }
    }

    /// Invoke `id`. Never fails; every outcome is in the response.
    ///
    /// In-process calls block the current worker thread while the guest
    /// runs, so this must be called on the multi-threaded runtime.
    pub async fn invoke(
        &self,
        id: &CapabilityId,
        request: &InvocationRequest,
        timeout: Option<Duration>,
    ) -> InvocationResponse {
        if self.shutdown.is_cancelled() {
            return InvocationResponse::failure(
                ErrorKind::InvocationCancelled,
                "the capability store is shutting down",
            );
        }

        let record = match self.state.get(id) {
            Some(r) if r.installed => r,
            _ => {
                return InvocationResponse::failure(
                    ErrorKind::CapabilityNotInstalled,
                    format!("{id} is not installed"),
                );
            },
        };
        if !record.enabled {
            return InvocationResponse::failure(
                ErrorKind::CapabilityDisabled,
                format!("{id} is disabled"),
            );
        }
        let Some(entry) = record.entry else {
            return InvocationResponse::failure(
                ErrorKind::EntryPointNotFound,
                format!("{id} has no resolved entry point; reinstall it"),
            );
        };

        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let payload = match serde_json::to_string(request) {
            Ok(p) => p,
            Err(e) => {
                return InvocationResponse::failure(
                    ErrorKind::ProcessError,
                    format!("failed to encode request: {e}"),
                );
            },
        };

        debug!(capability = %id, timeout_ms = timeout.as_millis(), "Dispatching invocation");
        match entry {
            ResolvedEntry::InProcess {
                module_path,
                export,
            } => {
                self.wasm
                    .invoke(
                        id,
                        record.installed_at,
                        &module_path,
                        &export,
                        &payload,
                        timeout,
                    )
                    .await
            },
            ResolvedEntry::OutOfProcess {
                program,
                args,
                working_dir,
            } => {
                let env = record
                    .install_path
                    .as_deref()
                    .and_then(|p| self.provisioner.locate(p));
                let call = ProcessCall {
                    capability: id,
                    program: &program,
                    args: &args,
                    working_dir: &working_dir,
                    python_path: record.install_path.as_deref().unwrap_or(&working_dir),
                    env: env.as_ref(),
                    excerpt_bytes: self.config.stderr_excerpt_bytes,
                    max_output_bytes: self.config.max_output_bytes,
                };
                call.run(payload.as_bytes(), timeout, &self.shutdown, &self.children)
                    .await
            },
        }
    }

    /// Number of child processes currently running.
    #[must_use]
    pub fn live_children(&self) -> usize {
        self.children.len()
    }

    /// Cancel running invocations and kill every live child.
    ///
    /// Later invocations return `InvocationCancelled`.
    pub fn shutdown(&self) {
        info!(live = self.children.len(), "Shutting down invocation router");
        self.shutdown.cancel();
        self.children.kill_all();
        self.wasm.clear();
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for InvocationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationRouter")
            .field("config", &self.config)
            .field("live_children", &self.children.len())
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
