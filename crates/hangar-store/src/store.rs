//! The capability store: composition root over the registry clients,
//! selective fetcher, provisioner, state stores and invocation routers.
//!
//! One registry client, state store and router exist per
//! [`CapabilityKind`]. Install records are authoritative for invocation;
//! the registry only decides what can be newly installed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hangar_config::Config;
use hangar_core::{CapabilityId, CapabilityKind, HangarHome, HostContext, NullHost};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::descriptor::{
    CapabilityDescriptor, InstallRecord, InvocationRequest, InvocationResponse, ResolvedEntry,
};
use crate::error::{ErrorKind, ProvisionError, StateError, StoreError, StoreResult};
use crate::fetcher::{ContentsSource, FetchReport, GitHubContents, SelectiveFetcher};
use crate::fsutil::remove_dir_if_exists;
use crate::provision::{EnvHandle, NoopProvisioner, Provisioner, VenvProvisioner};
use crate::registry::{Registry, RegistryClient, RegistryOrigin};
use crate::router::{InvocationRouter, RouterConfig};
use crate::state::StateStore;

/// Registry source URL per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryUrls {
    /// Agent registry.
    pub agent: String,
    /// Tool-server registry.
    pub tool_server: String,
    /// Application registry.
    pub application: String,
}

impl RegistryUrls {
    fn get(&self, kind: CapabilityKind) -> &str {
        match kind {
            CapabilityKind::Agent => &self.agent,
            CapabilityKind::ToolServer => &self.tool_server,
            CapabilityKind::Application => &self.application,
        }
    }
}

/// Injectable parts of a [`CapabilityStore`].
pub struct StoreComponents {
    /// Where each registry is fetched from.
    pub registry_urls: RegistryUrls,
    /// Timeout for one registry fetch.
    pub registry_timeout: Duration,
    /// Client used for registry fetches.
    pub http: reqwest::Client,
    /// Remote repository access for mirroring.
    pub contents: Arc<dyn ContentsSource>,
    /// Ref mirrored when a descriptor names none.
    pub default_git_ref: String,
    /// Upper bound on entries walked per subtree.
    pub max_entries: usize,
    /// Dependency environment backend.
    pub provisioner: Arc<dyn Provisioner>,
    /// Services exposed to in-process capabilities.
    pub host: Arc<dyn HostContext>,
    /// Invocation limits.
    pub router: RouterConfig,
}

/// One row of [`CapabilityStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityListing {
    /// Capability id.
    pub id: CapabilityId,
    /// Capability kind.
    pub kind: CapabilityKind,
    /// Display name (the id when the registry no longer lists it).
    pub name: String,
    /// Display description.
    pub description: String,
    /// Listed by the current registry snapshot.
    pub registered: bool,
    /// Installed locally.
    pub installed: bool,
    /// Enabled for invocation.
    pub enabled: bool,
    /// Registry asks for automatic install.
    pub enable_by_default: bool,
    /// Install directory.
    pub install_path: Option<PathBuf>,
    /// Completion time of the last install.
    pub installed_at: Option<DateTime<Utc>>,
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Kind installed into.
    pub kind: CapabilityKind,
    /// The record as persisted.
    pub record: InstallRecord,
    /// What the mirror wrote and skipped.
    pub fetch: FetchReport,
    /// The provisioned environment.
    pub env: EnvHandle,
}

/// A default that could not be installed or enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefaultFailure {
    /// Capability id.
    pub id: CapabilityId,
    /// Failure kind.
    pub error: ErrorKind,
    /// Display message.
    pub message: String,
}

/// Outcome of [`CapabilityStore::install_defaults`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DefaultsReport {
    /// Newly installed.
    pub installed: Vec<CapabilityId>,
    /// Already installed, now enabled.
    pub enabled: Vec<CapabilityId>,
    /// Failed, with the reason.
    pub failed: Vec<DefaultFailure>,
}

/// On-disk facts about one capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Capability id.
    pub id: CapabilityId,
    /// Capability kind.
    pub kind: CapabilityKind,
    /// Listed by the current registry snapshot.
    pub registered: bool,
    /// Persisted record, if any.
    pub record: Option<InstallRecord>,
    /// Install directory the store would use.
    pub install_dir: PathBuf,
    /// Whether that directory exists.
    pub install_dir_present: bool,
    /// Whether the recorded module or script exists. `None` when there is
    /// no recorded entry or it is a bare command on `PATH`.
    pub entry_point_present: Option<bool>,
    /// Whether a provisioned environment exists.
    pub env_present: bool,
    /// Interpreter of that environment.
    pub interpreter: Option<PathBuf>,
}

struct KindStore {
    registry: RegistryClient,
    state: Arc<StateStore>,
    router: InvocationRouter,
}

/// Installs, tracks and invokes capabilities of every kind.
pub struct CapabilityStore {
    home: HangarHome,
    fetcher: SelectiveFetcher,
    provisioner: Arc<dyn Provisioner>,
    agents: KindStore,
    tool_servers: KindStore,
    applications: KindStore,
}

impl CapabilityStore {
    /// Open the store under `home` with components built from `config`.
    ///
    /// # Errors
    ///
    /// Fails if the data directory cannot be created, the HTTP client cannot
    /// be built, or a state file cannot be read.
    pub fn open(home: HangarHome, config: &Config) -> StoreResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("hangar/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| StoreError::HttpClient {
                message: e.to_string(),
            })?;

        let contents = GitHubContents::new(
            http.clone(),
            config.fetch.api_base.clone(),
            Duration::from_secs(config.fetch.timeout_secs),
            config.fetch.max_file_bytes,
        );

        let provisioner: Arc<dyn Provisioner> = match config.provisioning.backend.as_str() {
            "none" => Arc::new(NoopProvisioner),
            _ => Arc::new(VenvProvisioner::new(
                config.provisioning.python.clone(),
                Duration::from_secs(config.provisioning.timeout_secs),
                config.invocation.stderr_excerpt_bytes,
            )),
        };

        let router = RouterConfig {
            default_timeout: Duration::from_secs(config.invocation.timeout_secs),
            stderr_excerpt_bytes: config.invocation.stderr_excerpt_bytes,
            wasm_max_memory_bytes: config
                .invocation
                .wasm_max_memory_mb
                .saturating_mul(1024 * 1024),
            ..RouterConfig::default()
        };

        Self::with_components(
            home,
            StoreComponents {
                registry_urls: RegistryUrls {
                    agent: config.registry.agent_url.clone(),
                    tool_server: config.registry.tool_server_url.clone(),
                    application: config.registry.application_url.clone(),
                },
                registry_timeout: Duration::from_secs(config.registry.timeout_secs),
                http,
                contents: Arc::new(contents),
                default_git_ref: config.fetch.git_ref.clone(),
                max_entries: config.fetch.max_entries,
                provisioner,
                host: Arc::new(NullHost),
                router,
            },
        )
    }

    /// Open the store with explicit components.
    ///
    /// # Errors
    ///
    /// Fails if the data directory cannot be created or a state file
    /// cannot be read.
    pub fn with_components(home: HangarHome, components: StoreComponents) -> StoreResult<Self> {
        home.ensure().map_err(|source| StoreError::Io {
            path: home.root().to_path_buf(),
            source,
        })?;

        let build = |kind: CapabilityKind| -> StoreResult<KindStore> {
            let state = Arc::new(StateStore::open(home.state_path(kind))?);
            if let Some(backup) = state.recovered_from_corruption() {
                warn!(%kind, backup = %backup.display(), "Started with empty state");
            }
            Ok(KindStore {
                registry: RegistryClient::new(
                    kind,
                    components.registry_urls.get(kind),
                    home.registry_cache_path(kind),
                    components.registry_timeout,
                    components.http.clone(),
                ),
                router: InvocationRouter::new(
                    Arc::clone(&state),
                    Arc::clone(&components.host),
                    Arc::clone(&components.provisioner),
                    components.router.clone(),
                ),
                state,
            })
        };

        let agents = build(CapabilityKind::Agent)?;
        let tool_servers = build(CapabilityKind::ToolServer)?;
        let applications = build(CapabilityKind::Application)?;
        info!(home = %home.root().display(), "Capability store opened");

        Ok(Self {
            fetcher: SelectiveFetcher::new(
                components.contents,
                components.default_git_ref,
                components.max_entries,
            ),
            provisioner: components.provisioner,
            home,
            agents,
            tool_servers,
            applications,
        })
    }

    fn kind(&self, kind: CapabilityKind) -> &KindStore {
        match kind {
            CapabilityKind::Agent => &self.agents,
            CapabilityKind::ToolServer => &self.tool_servers,
            CapabilityKind::Application => &self.applications,
        }
    }

    /// Data directory layout.
    #[must_use]
    pub fn home(&self) -> &HangarHome {
        &self.home
    }

    /// State store of `kind`, for hosts that render records directly.
    #[must_use]
    pub fn state(&self, kind: CapabilityKind) -> &StateStore {
        &self.kind(kind).state
    }

    /// The current registry snapshot of `kind` without fetching.
    #[must_use]
    pub fn registry(&self, kind: CapabilityKind) -> Arc<Registry> {
        self.kind(kind).registry.snapshot()
    }

    /// Fetch the registry of `kind` (remote, else cache, else empty).
    pub async fn refresh(&self, kind: CapabilityKind) -> Arc<Registry> {
        self.kind(kind).registry.fetch().await
    }

    /// The snapshot, fetching first if nothing was ever loaded.
    async fn loaded_registry(&self, kind: CapabilityKind) -> Arc<Registry> {
        let snapshot = self.registry(kind);
        if snapshot.fetched_at.is_none() && matches!(snapshot.origin, RegistryOrigin::Empty { .. })
        {
            return self.refresh(kind).await;
        }
        snapshot
    }

    /// Registered and installed capabilities of `kind`, by id.
    ///
    /// Installed capabilities that the registry no longer lists are
    /// included with `registered = false`.
    pub async fn list(&self, kind: CapabilityKind) -> Vec<CapabilityListing> {
        let registry = self.loaded_registry(kind).await;
        let records = self.kind(kind).state.list();

        let mut rows: Vec<CapabilityListing> = registry
            .entries
            .values()
            .map(|d| {
                let record = records.get(&d.id);
                CapabilityListing {
                    id: d.id.clone(),
                    kind,
                    name: if d.name.is_empty() {
                        d.id.to_string()
                    } else {
                        d.name.clone()
                    },
                    description: d.description.clone(),
                    registered: true,
                    installed: record.is_some_and(|r| r.installed),
                    enabled: record.is_some_and(|r| r.enabled),
                    enable_by_default: d.enable_by_default,
                    install_path: record.and_then(|r| r.install_path.clone()),
                    installed_at: record.and_then(|r| r.installed_at),
                }
            })
            .collect();

        rows.extend(
            records
                .values()
                .filter(|r| r.installed && !registry.entries.contains_key(&r.capability_id))
                .map(|r| CapabilityListing {
                    id: r.capability_id.clone(),
                    kind,
                    name: r.capability_id.to_string(),
                    description: String::new(),
                    registered: false,
                    installed: true,
                    enabled: r.enabled,
                    enable_by_default: false,
                    install_path: r.install_path.clone(),
                    installed_at: r.installed_at,
                }),
        );
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// Install `id` from the registry of `kind`.
    ///
    /// Steps: look up the descriptor, claim the in-progress flag, mirror the
    /// subtree, provision the environment, resolve the entry, record.
    ///
    /// A dependency install failure still records the capability as
    /// installed (files and environment are usable) and returns the error.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnknownCapability`]: not in the registry; state untouched.
    /// - [`StateError::InstallInProgress`]: another install of `id` is running.
    /// - [`StoreError::Fetch`] / env creation failure / [`StoreError::InvalidEntry`]:
    ///   the install directory is removed and the record is not installed.
    /// - [`ProvisionError::DependencyInstallFailed`]: see above.
    pub async fn install(&self, kind: CapabilityKind, id: &CapabilityId) -> StoreResult<InstallReport> {
        let registry = self.loaded_registry(kind).await;
        let descriptor = registry
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownCapability {
                kind,
                id: id.to_string(),
            })?;
        drop(registry);

        let ks = self.kind(kind);
        let _guard = ks.state.begin_install(id)?;
        let install_dir = self.home.install_dir(kind, id);
        info!(%kind, capability = %id, dest = %install_dir.display(), "Installing capability");

        let fetch = match self.fetcher.fetch_subtree(&descriptor, &install_dir).await {
            Ok(report) => report,
            Err(source) => {
                self.roll_back(ks, id, &install_dir);
                return Err(StoreError::Fetch {
                    capability: id.clone(),
                    source,
                });
            },
        };

        let (env, deps_error) = match self
            .provisioner
            .provision(&install_dir, descriptor.dependency_manifest())
            .await
        {
            Ok(env) => (env, None),
            Err(e @ ProvisionError::DependencyInstallFailed { .. }) => {
                let Some(env) = self.provisioner.locate(&install_dir) else {
                    self.roll_back(ks, id, &install_dir);
                    return Err(StoreError::Provision {
                        capability: id.clone(),
                        source: e,
                    });
                };
                (env, Some(e))
            },
            Err(e) => {
                self.roll_back(ks, id, &install_dir);
                return Err(StoreError::Provision {
                    capability: id.clone(),
                    source: e,
                });
            },
        };

        let entry = match resolve_entry(&descriptor, &install_dir) {
            Ok(entry) => entry,
            Err(message) => {
                self.roll_back(ks, id, &install_dir);
                return Err(StoreError::InvalidEntry {
                    capability: id.clone(),
                    message,
                });
            },
        };

        let record = ks
            .state
            .set_installed(id, &install_dir, entry, descriptor.enable_by_default)?;

        if let Some(source) = deps_error {
            warn!(%kind, capability = %id, error = %source, "Installed without dependencies");
            return Err(StoreError::Provision {
                capability: id.clone(),
                source,
            });
        }

        info!(
            %kind,
            capability = %id,
            files = fetch.files,
            enabled = record.enabled,
            "Capability installed"
        );
        Ok(InstallReport {
            kind,
            record,
            fetch,
            env,
        })
    }

    /// Remove a failed install's files and make sure no record claims it.
    ///
    /// Failures here are logged; the caller reports the error that caused
    /// the rollback.
    fn roll_back(&self, ks: &KindStore, id: &CapabilityId, install_dir: &Path) {
        if let Err(e) = remove_dir_if_exists(install_dir) {
            warn!(capability = %id, path = %install_dir.display(), error = %e, "Failed to remove install directory");
        }
        if let Err(e) = ks.state.mark_not_installed(id) {
            error!(capability = %id, error = %e, "Failed to mark rolled back install as not installed");
        }
    }

    /// Provision an installed capability again without refetching.
    ///
    /// The dependency manifest comes from the registry when it still lists
    /// the capability; otherwise only the environment is ensured.
    ///
    /// # Errors
    ///
    /// [`StateError::NoRecord`] if `id` is not installed, or the
    /// provisioning error.
    pub async fn reprovision(&self, kind: CapabilityKind, id: &CapabilityId) -> StoreResult<EnvHandle> {
        let ks = self.kind(kind);
        let install_dir = ks
            .state
            .get(id)
            .filter(|r| r.installed)
            .and_then(|r| r.install_path)
            .ok_or_else(|| StateError::NoRecord(id.clone()))?;
        let _guard = ks.state.begin_install(id)?;

        let registry = self.registry(kind);
        let manifest = registry
            .get(id)
            .and_then(CapabilityDescriptor::dependency_manifest);

        self.provisioner
            .provision(&install_dir, manifest)
            .await
            .map_err(|source| StoreError::Provision {
                capability: id.clone(),
                source,
            })
    }

    /// Enable or disable an installed capability.
    ///
    /// # Errors
    ///
    /// [`StateError::NoRecord`] if `id` has no record, or a persist failure.
    pub fn set_enabled(&self, kind: CapabilityKind, id: &CapabilityId, enabled: bool) -> StoreResult<InstallRecord> {
        let record = self.kind(kind).state.set_enabled(id, enabled)?;
        info!(%kind, capability = %id, enabled, "Capability toggled");
        Ok(record)
    }

    /// Invoke with the configured default timeout.
    pub async fn invoke(
        &self,
        kind: CapabilityKind,
        id: &CapabilityId,
        request: &InvocationRequest,
    ) -> InvocationResponse {
        self.kind(kind).router.invoke(id, request, None).await
    }

    /// Invoke with an explicit timeout.
    pub async fn invoke_with_timeout(
        &self,
        kind: CapabilityKind,
        id: &CapabilityId,
        request: &InvocationRequest,
        timeout: Duration,
    ) -> InvocationResponse {
        self.kind(kind).router.invoke(id, request, Some(timeout)).await
    }

    /// Point the registry of `kind` at `url` and fetch it.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidRegistryUrl`] if `url` is not an http(s) URL;
    /// the previous source stays in effect.
    pub async fn set_registry_url(&self, kind: CapabilityKind, url: &str) -> StoreResult<Arc<Registry>> {
        let parsed = url::Url::parse(url).map_err(|e| StoreError::InvalidRegistryUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StoreError::InvalidRegistryUrl {
                url: url.to_owned(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        let registry = &self.kind(kind).registry;
        registry.set_source_url(url);
        Ok(registry.fetch().await)
    }

    /// Install every `enable_by_default` entry that is not installed, and
    /// enable installed defaults that are disabled.
    ///
    /// Failures are collected per capability; one failure does not stop
    /// the others.
    pub async fn install_defaults(&self, kind: CapabilityKind) -> DefaultsReport {
        let registry = self.loaded_registry(kind).await;
        let mut report = DefaultsReport::default();

        for descriptor in registry.entries.values().filter(|d| d.enable_by_default) {
            let id = &descriptor.id;
            match self.kind(kind).state.get(id) {
                Some(record) if record.installed => {
                    if record.enabled {
                        continue;
                    }
                    match self.set_enabled(kind, id, true) {
                        Ok(_) => report.enabled.push(id.clone()),
                        Err(e) => report.failed.push(failure(id, &e)),
                    }
                },
                _ => match self.install(kind, id).await {
                    Ok(_) => report.installed.push(id.clone()),
                    Err(e) => {
                        warn!(%kind, capability = %id, error = %e, "Default install failed");
                        report.failed.push(failure(id, &e));
                    },
                },
            }
        }
        report
    }

    /// On-disk facts about `id`, for troubleshooting.
    #[must_use]
    pub fn inspect(&self, kind: CapabilityKind, id: &CapabilityId) -> Diagnostics {
        let record = self.kind(kind).state.get(id);
        let install_dir = record
            .as_ref()
            .and_then(|r| r.install_path.clone())
            .unwrap_or_else(|| self.home.install_dir(kind, id));
        let env = self.provisioner.locate(&install_dir);

        let entry_point_present = record
            .as_ref()
            .and_then(|r| r.entry.as_ref())
            .and_then(|entry| match entry {
                ResolvedEntry::InProcess { module_path, .. } => Some(module_path.is_file()),
                // `resolve` puts the mirrored script last; a bare command
                // is looked up on PATH at spawn time.
                ResolvedEntry::OutOfProcess {
                    program,
                    args,
                    working_dir,
                } => match args.last() {
                    Some(script) => Some(working_dir.join(script).is_file()),
                    None if Path::new(program).is_absolute() => Some(Path::new(program).is_file()),
                    None => None,
                },
            });

        Diagnostics {
            id: id.clone(),
            kind,
            registered: self.registry(kind).get(id).is_some(),
            install_dir_present: install_dir.is_dir(),
            install_dir,
            entry_point_present,
            env_present: env.is_some(),
            interpreter: env.and_then(|e| e.interpreter),
            record,
        }
    }

    /// The default agent named by the agent registry.
    #[must_use]
    pub fn default_agent(&self) -> Option<CapabilityId> {
        self.agents.registry.snapshot().default_id.clone()
    }

    /// Cancel running invocations and kill their processes.
    pub fn shutdown(&self) {
        for ks in [&self.agents, &self.tool_servers, &self.applications] {
            ks.router.shutdown();
        }
    }
}

impl std::fmt::Debug for CapabilityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityStore")
            .field("home", &self.home.root())
            .finish_non_exhaustive()
    }
}

/// Resolve the descriptor's entry and check the module of an in-process
/// entry was mirrored.
fn resolve_entry(descriptor: &CapabilityDescriptor, install_dir: &Path) -> Result<ResolvedEntry, String> {
    let entry = descriptor.entry.resolve(install_dir)?;
    if let ResolvedEntry::InProcess { module_path, .. } = &entry
        && !module_path.is_file()
    {
        return Err(format!("module {} was not mirrored", module_path.display()));
    }
    Ok(entry)
}

fn failure(id: &CapabilityId, e: &StoreError) -> DefaultFailure {
    DefaultFailure {
        id: id.clone(),
        error: e.kind(),
        message: e.to_string(),
    }
}
