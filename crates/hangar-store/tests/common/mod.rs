//! Shared fixtures for store integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hangar_core::{HangarHome, NullHost};
use hangar_store::error::{FetchResult, ProvisionResult};
use hangar_store::fetcher::RemoteEntryType;
use hangar_store::{
    CapabilityStore, ContentsSource, EnvHandle, FetchError, NoopProvisioner, ProvisionError,
    Provisioner, RegistryUrls, RemoteEntry, RouterConfig, StoreComponents,
};
use tempfile::TempDir;

pub const REPO: &str = "https://github.com/acme/hangar-capabilities";

/// In-memory repository: file path -> content.
#[derive(Default)]
pub struct MemoryRepo {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryRepo {
    pub fn with_files(files: &[(&str, &str)]) -> Arc<Self> {
        let repo = Self::default();
        repo.replace(files);
        Arc::new(repo)
    }

    /// Replace the whole tree.
    pub fn replace(&self, files: &[(&str, &str)]) {
        let mut map = self.files.lock().unwrap();
        map.clear();
        for (path, content) in files {
            map.insert((*path).to_owned(), content.as_bytes().to_vec());
        }
    }

    /// Make downloads of `path` fail.
    pub fn fail_download(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_owned());
    }
}

#[async_trait]
impl ContentsSource for MemoryRepo {
    async fn list_dir(
        &self,
        _repo_url: &str,
        _git_ref: &str,
        path: &str,
    ) -> FetchResult<Vec<RemoteEntry>> {
        let files = self.files.lock().unwrap();
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut dirs = Vec::new();
        let mut entries = Vec::new();
        for (full, content) in files.iter() {
            let Some(rest) = full.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    let dir_path = format!("{prefix}{dir}");
                    if !dirs.contains(&dir_path) {
                        dirs.push(dir_path.clone());
                        entries.push(RemoteEntry {
                            name: dir.to_owned(),
                            entry_type: RemoteEntryType::Dir,
                            path: dir_path,
                            download_url: None,
                            size: None,
                        });
                    }
                },
                None => entries.push(RemoteEntry {
                    name: rest.to_owned(),
                    entry_type: RemoteEntryType::File,
                    path: full.clone(),
                    download_url: Some(format!("memory://{full}")),
                    size: Some(content.len() as u64),
                }),
            }
        }
        if entries.is_empty() {
            return Err(FetchError::Listing {
                path: path.to_owned(),
                message: "404 Not Found".to_owned(),
            });
        }
        Ok(entries)
    }

    async fn download(&self, entry: &RemoteEntry) -> FetchResult<Vec<u8>> {
        if self.failing.lock().unwrap().contains(&entry.path) {
            return Err(FetchError::Download {
                path: entry.path.clone(),
                message: "connection reset".to_owned(),
            });
        }
        self.files
            .lock()
            .unwrap()
            .get(&entry.path)
            .cloned()
            .ok_or_else(|| FetchError::Download {
                path: entry.path.clone(),
                message: "404 Not Found".to_owned(),
            })
    }
}

/// Provisioner that fails at a chosen stage.
pub enum FlakyProvisioner {
    EnvFails,
    DepsFail,
}

#[async_trait]
impl Provisioner for FlakyProvisioner {
    async fn provision(
        &self,
        install_path: &Path,
        manifest: Option<&str>,
    ) -> ProvisionResult<EnvHandle> {
        match self {
            Self::EnvFails => Err(ProvisionError::EnvCreationFailed {
                path: install_path.to_path_buf(),
                message: "python3: command not found".to_owned(),
            }),
            Self::DepsFail => {
                std::fs::create_dir_all(install_path.join(".venv")).unwrap();
                Err(ProvisionError::DependencyInstallFailed {
                    path: install_path.to_path_buf(),
                    manifest: manifest.unwrap_or_default().to_owned(),
                    message: "No matching distribution found for torch".to_owned(),
                })
            },
        }
    }

    fn locate(&self, install_path: &Path) -> Option<EnvHandle> {
        let root = install_path.join(".venv");
        root.is_dir().then(|| EnvHandle {
            bin_dir: root.join("bin"),
            interpreter: None,
            root,
        })
    }
}

/// Registry document with the given agent entries.
pub fn agents_doc(entries: serde_json::Value) -> String {
    serde_json::json!({ "agents": entries, "default_agent": "alpha" }).to_string()
}

/// An out-of-process agent running `main.sh` from `subtree`.
pub fn script_agent(subtree: &str, enable_by_default: bool) -> serde_json::Value {
    serde_json::json!({
        "name": "Script agent",
        "description": "Runs a shell script",
        "repo_url": REPO,
        "folder_path": subtree,
        "entry": {"kind": "out-of-process", "entry_point": "main.sh", "command": "sh"},
        "enable_by_default": enable_by_default
    })
}

pub struct Fixture {
    pub dir: TempDir,
    pub server: mockito::ServerGuard,
    pub repo: Arc<MemoryRepo>,
}

impl Fixture {
    pub async fn new(files: &[(&str, &str)]) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            server: mockito::Server::new_async().await,
            repo: MemoryRepo::with_files(files),
        }
    }

    pub fn home(&self) -> HangarHome {
        HangarHome::from_path(self.dir.path().join("hangar"))
    }

    pub fn registry_url(&self) -> String {
        format!("{}/registry.json", self.server.url())
    }

    pub fn store(&self) -> CapabilityStore {
        self.store_with(Arc::new(NoopProvisioner))
    }

    pub fn store_with(&self, provisioner: Arc<dyn Provisioner>) -> CapabilityStore {
        let url = self.registry_url();
        CapabilityStore::with_components(
            self.home(),
            StoreComponents {
                registry_urls: RegistryUrls {
                    agent: url.clone(),
                    tool_server: url.clone(),
                    application: url,
                },
                registry_timeout: Duration::from_secs(5),
                http: reqwest::Client::new(),
                contents: Arc::clone(&self.repo) as Arc<dyn ContentsSource>,
                default_git_ref: "main".to_owned(),
                max_entries: 1000,
                provisioner,
                host: Arc::new(NullHost),
                router: RouterConfig {
                    default_timeout: Duration::from_secs(10),
                    ..RouterConfig::default()
                },
            },
        )
        .unwrap()
    }
}
