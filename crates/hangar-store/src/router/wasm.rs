//! In-process invocation of WebAssembly modules through Extism.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use extism::{Manifest, PluginBuilder, UserData, Wasm};
use hangar_core::{CapabilityId, HostContext};
use tracing::{debug, warn};

use super::host_functions::{HostState, register_host_functions};
use super::process::parse_output;
use crate::descriptor::InvocationResponse;
use crate::error::ErrorKind;

/// Bytes per WebAssembly page.
const WASM_PAGE_BYTES: u64 = 64 * 1024;

type SharedPlugin = Arc<Mutex<extism::Plugin>>;

struct CachedModule {
    installed_at: Option<DateTime<Utc>>,
    timeout: Duration,
    plugin: SharedPlugin,
}

/// Loads modules on first use and keeps them until the install changes.
pub(super) struct WasmRuntime {
    host: Arc<dyn HostContext>,
    max_memory_bytes: u64,
    modules: Mutex<HashMap<PathBuf, CachedModule>>,
}

impl WasmRuntime {
    pub(super) fn new(host: Arc<dyn HostContext>, max_memory_bytes: u64) -> Self {
        Self {
            host,
            max_memory_bytes,
            modules: Mutex::new(HashMap::new()),
        }
    }

    /// Call `export` in the module at `module_path` with `payload`.
    pub(super) async fn invoke(
        &self,
        id: &CapabilityId,
        installed_at: Option<DateTime<Utc>>,
        module_path: &Path,
        export: &str,
        payload: &str,
        timeout: Duration,
    ) -> InvocationResponse {
        let plugin = match self.cached(module_path, installed_at, timeout) {
            Some(p) => p,
            None => match self.load(id, module_path, timeout).await {
                Ok(p) => {
                    self.lock().insert(
                        module_path.to_path_buf(),
                        CachedModule {
                            installed_at,
                            timeout,
                            plugin: Arc::clone(&p),
                        },
                    );
                    p
                },
                Err(failure) => return failure,
            },
        };

        let exists = tokio::task::block_in_place(|| {
            plugin
                .lock()
                .map(|p| p.function_exists(export))
                .unwrap_or(false)
        });
        if !exists {
            return InvocationResponse::failure(
                ErrorKind::EntryPointNotFound,
                format!("{id}: module does not export `{export}`"),
            );
        }

        let started = Instant::now();
        // block_in_place allows blocking in an async context with the multi-threaded runtime.
        let result = tokio::task::block_in_place(|| {
            let mut plugin = plugin
                .lock()
                .map_err(|e| format!("module lock poisoned: {e}"))?;
            plugin
                .call::<&str, String>(export, payload)
                .map_err(|e| e.to_string())
        });

        match result {
            Ok(output) => InvocationResponse::ok(parse_output(&output)),
            Err(message) => {
                // A trapped instance is not reused.
                self.lock().remove(module_path);
                if started.elapsed() >= timeout || message.to_lowercase().contains("timeout") {
                    warn!(capability = %id, "In-process invocation timed out");
                    InvocationResponse::failure(
                        ErrorKind::InvocationTimeout,
                        format!(
                            "{id} did not respond within {}s",
                            timeout.as_secs_f64()
                        ),
                    )
                } else {
                    InvocationResponse::failure(
                        ErrorKind::ProcessError,
                        format!("{id}: `{export}` failed: {message}"),
                    )
                }
            },
        }
    }

    /// Drop every loaded module.
    pub(super) fn clear(&self) {
        self.lock().clear();
    }

    fn cached(
        &self,
        module_path: &Path,
        installed_at: Option<DateTime<Utc>>,
        timeout: Duration,
    ) -> Option<SharedPlugin> {
        let modules = self.lock();
        modules
            .get(module_path)
            .filter(|m| m.installed_at == installed_at && m.timeout == timeout)
            .map(|m| Arc::clone(&m.plugin))
    }

    async fn load(
        &self,
        id: &CapabilityId,
        module_path: &Path,
        timeout: Duration,
    ) -> Result<SharedPlugin, InvocationResponse> {
        let bytes = tokio::fs::read(module_path).await.map_err(|e| {
            InvocationResponse::failure(
                ErrorKind::EntryPointNotFound,
                format!("{id}: cannot read module {}: {e}", module_path.display()),
            )
        })?;

        let max_pages = u32::try_from(self.max_memory_bytes / WASM_PAGE_BYTES).unwrap_or(u32::MAX);
        let manifest = Manifest::new([Wasm::data(bytes)])
            .with_timeout(timeout)
            .with_memory_max(max_pages);

        let user_data = UserData::new(HostState {
            capability: id.clone(),
            host: Arc::clone(&self.host),
            runtime_handle: tokio::runtime::Handle::current(),
        });
        let builder = register_host_functions(PluginBuilder::new(manifest).with_wasi(true), user_data);

        let plugin = tokio::task::block_in_place(|| builder.build()).map_err(|e| {
            InvocationResponse::failure(
                ErrorKind::EntryPointNotFound,
                format!("{id}: invalid module {}: {e}", module_path.display()),
            )
        })?;

        debug!(capability = %id, module = %module_path.display(), "Loaded in-process module");
        Ok(Arc::new(Mutex::new(plugin)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, CachedModule>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
