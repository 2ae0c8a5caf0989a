//! Descriptor model: registry entries, install records and invocation messages.
//!
//! These are plain data types. Behavior lives in the components that own
//! them; the only logic here is parsing a raw registry entry and resolving
//! an [`EntrySpec`] against an install directory.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use hangar_core::{CapabilityId, CapabilityKind};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// How a capability is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    /// Loaded into the host process and called directly.
    #[serde(alias = "in_process", alias = "inprocess")]
    InProcess,
    /// Spawned as a child process speaking JSON over stdio.
    #[serde(alias = "out_of_process", alias = "subprocess")]
    OutOfProcess,
}

/// Entry point as declared by a registry descriptor.
///
/// For in-process entries `entry_point` is the module file relative to the
/// install directory and `class_or_command` is the exported function to
/// call. For out-of-process entries `class_or_command` is the command line
/// and `entry_point`, when present, is appended as the final argument.
/// An out-of-process entry with no `entry_point` but with
/// `script_candidates` runs the first candidate found in the install
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpec {
    /// Invocation strategy.
    pub kind: EntryKind,
    /// Module or script path relative to the install directory.
    #[serde(default)]
    pub entry_point: String,
    /// Export name (in-process) or command line (out-of-process).
    #[serde(default, alias = "class_name", alias = "command")]
    pub class_or_command: String,
    /// Scripts looked up in order when `entry_point` is empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script_candidates: Vec<String>,
}

/// Entry point resolved against a concrete install directory.
///
/// Stored in the install record so invocation never re-derives the loading
/// strategy from the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResolvedEntry {
    /// A WebAssembly module and the export to call.
    InProcess {
        /// Absolute path of the module file.
        module_path: PathBuf,
        /// Exported function receiving the JSON request.
        export: String,
    },
    /// A command spawned per call.
    OutOfProcess {
        /// Program to execute.
        program: String,
        /// Arguments passed to the program.
        args: Vec<String>,
        /// Working directory of the child (the install directory).
        working_dir: PathBuf,
    },
}

impl EntrySpec {
    /// Resolve this entry against `install_path`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if a required field is empty
    /// or the entry point escapes the install directory.
    pub fn resolve(&self, install_path: &Path) -> Result<ResolvedEntry, String> {
        match self.kind {
            EntryKind::InProcess => {
                let rel = safe_relative(&self.entry_point)
                    .ok_or_else(|| format!("invalid module path '{}'", self.entry_point))?;
                let export = self.class_or_command.trim();
                if export.is_empty() {
                    return Err("in-process entry names no export".to_owned());
                }
                Ok(ResolvedEntry::InProcess {
                    module_path: install_path.join(rel),
                    export: export.to_owned(),
                })
            },
            EntryKind::OutOfProcess => {
                let mut tokens = self.class_or_command.split_whitespace().map(str::to_owned);
                let script = if !self.entry_point.trim().is_empty() {
                    Some(
                        safe_relative(&self.entry_point)
                            .ok_or_else(|| format!("invalid entry point '{}'", self.entry_point))?,
                    )
                } else if self.script_candidates.is_empty() {
                    None
                } else {
                    Some(self.discover_script(install_path)?)
                };

                let (program, mut args) = match (tokens.next(), &script) {
                    (Some(program), _) => (program, tokens.collect::<Vec<_>>()),
                    // A bare script is executed directly.
                    (None, Some(rel)) => {
                        let program = install_path.join(rel).display().to_string();
                        return Ok(ResolvedEntry::OutOfProcess {
                            program,
                            args: Vec::new(),
                            working_dir: install_path.to_path_buf(),
                        });
                    },
                    (None, None) => {
                        return Err("out-of-process entry names no command".to_owned());
                    },
                };
                if let Some(rel) = script {
                    args.push(rel.display().to_string());
                }
                Ok(ResolvedEntry::OutOfProcess {
                    program,
                    args,
                    working_dir: install_path.to_path_buf(),
                })
            },
        }
    }

    /// First candidate script present under `install_path`.
    fn discover_script(&self, install_path: &Path) -> Result<PathBuf, String> {
        self.script_candidates
            .iter()
            .filter_map(|c| safe_relative(c))
            .find(|rel| install_path.join(rel).is_file())
            .ok_or_else(|| {
                format!(
                    "no entry script found (looked for {})",
                    self.script_candidates.join(", ")
                )
            })
    }
}

/// Scripts tried, in order, for registry entries of `kind` that declare no
/// entry. Agents always declare one.
#[must_use]
pub fn default_script_candidates(kind: CapabilityKind, id: &str) -> Option<Vec<String>> {
    let names: &[&str] = match kind {
        CapabilityKind::Agent => return None,
        CapabilityKind::ToolServer => &["main.py", "web.py", "server.py", "app.py"],
        CapabilityKind::Application => &["src/main.py", "main.py", "app.py", "src/app.py"],
    };
    let mut candidates = Vec::with_capacity(names.len().saturating_add(1));
    if kind == CapabilityKind::ToolServer {
        candidates.push(format!("{id}.py"));
    }
    candidates.extend(names.iter().map(|n| (*n).to_owned()));
    Some(candidates)
}

/// One registry entry. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Unique key within its registry.
    pub id: CapabilityId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Display description.
    #[serde(default)]
    pub description: String,
    /// Repository hosting the capability's files.
    #[serde(alias = "repo_url")]
    pub source_repo_url: String,
    /// Path within the repository holding only this capability's files.
    #[serde(alias = "folder_path")]
    pub subtree_path: String,
    /// Branch, tag or commit to mirror. `None` uses the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    /// How to invoke the capability once installed.
    pub entry: EntrySpec,
    /// Dependency manifest relative to the subtree root.
    #[serde(
        default,
        alias = "dependency_manifest",
        skip_serializing_if = "Option::is_none"
    )]
    pub dependency_manifest_path: Option<String>,
    /// Install and enable automatically on first run.
    #[serde(default)]
    pub enable_by_default: bool,
}

impl CapabilityDescriptor {
    /// Parse one entry of a registry document.
    ///
    /// `key` is the map key the entry was found under; it supplies the id
    /// when the entry has none. Entries in the legacy shape (`module_path`
    /// plus `class_name`, no `entry`) are read as in-process entries. Tool
    /// servers and applications without any entry run `python` on a script
    /// discovered at install time (see [`default_script_candidates`]).
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the entry must be dropped.
    pub fn from_registry_entry(
        kind: CapabilityKind,
        key: &str,
        raw: &serde_json::Value,
    ) -> Result<Self, String> {
        let serde_json::Value::Object(map) = raw else {
            return Err("entry is not a JSON object".to_owned());
        };
        let mut map = map.clone();

        match map.get("id") {
            None => {
                map.insert("id".to_owned(), serde_json::Value::String(key.to_owned()));
            },
            Some(serde_json::Value::String(id)) if id != key => {
                return Err(format!("id '{id}' does not match registry key '{key}'"));
            },
            Some(_) => {},
        }

        if !map.contains_key("entry") {
            let legacy = (
                map.get("module_path").and_then(serde_json::Value::as_str),
                map.get("class_name").and_then(serde_json::Value::as_str),
            );
            let entry = match (legacy, default_script_candidates(kind, key)) {
                ((Some(module_path), Some(class_name)), _) => {
                    // Legacy module paths are relative to the kind's install root.
                    let module_path = module_path
                        .strip_prefix(&format!("{key}/"))
                        .unwrap_or(module_path);
                    serde_json::json!({
                        "kind": "in-process",
                        "entry_point": module_path,
                        "class_or_command": class_name,
                    })
                },
                (_, Some(candidates)) => serde_json::json!({
                    "kind": "out-of-process",
                    "class_or_command": "python",
                    "script_candidates": candidates,
                }),
                (_, None) => return Err("missing entry".to_owned()),
            };
            map.insert("entry".to_owned(), entry);
        }

        let descriptor: Self =
            serde_json::from_value(serde_json::Value::Object(map)).map_err(|e| e.to_string())?;
        normalize_subtree(&descriptor.subtree_path)?;
        Ok(descriptor)
    }

    /// Dependency manifest path relative to the install directory.
    #[must_use]
    pub fn dependency_manifest(&self) -> Option<&str> {
        self.dependency_manifest_path
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

/// Normalize a subtree path to `a/b/c` form.
///
/// # Errors
///
/// Rejects the repository root, absolute paths and any `..` component.
pub fn normalize_subtree(path: &str) -> Result<String, String> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {},
            ".." => return Err("subtree path must not contain '..'".to_owned()),
            p if p.contains('\\') => return Err("subtree path must use '/'".to_owned()),
            p => parts.push(p),
        }
    }
    if parts.is_empty() {
        return Err("subtree path must not be the repository root".to_owned());
    }
    Ok(parts.join("/"))
}

/// Interpret `path` as a relative path made only of normal components.
pub(crate) fn safe_relative(path: &str) -> Option<PathBuf> {
    let path = Path::new(path.trim());
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => out.push(c),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Local install/enable state for one capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    /// The capability this record belongs to.
    pub capability_id: CapabilityId,
    /// Files are mirrored and the environment exists.
    pub installed: bool,
    /// The host may invoke the capability.
    pub enabled: bool,
    /// Install directory, when known.
    pub install_path: Option<PathBuf>,
    /// Completion time of the last successful install.
    pub installed_at: Option<DateTime<Utc>>,
    /// Entry point resolved at install time.
    pub entry: Option<ResolvedEntry>,
}

impl InstallRecord {
    /// An empty, not-installed record.
    #[must_use]
    pub fn new(capability_id: CapabilityId) -> Self {
        Self {
            capability_id,
            installed: false,
            enabled: false,
            install_path: None,
            installed_at: None,
            entry: None,
        }
    }
}

/// One turn of prior conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `user`, `assistant` or `system`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// A call into a capability. Written as one JSON line to out-of-process
/// capabilities and passed as the call input to in-process ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// The user message.
    pub message: String,
    /// Free-form context (retrieved documents, UI state).
    #[serde(default)]
    pub context: String,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

impl InvocationRequest {
    /// A request carrying only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// The single response shape for every invocation outcome.
///
/// On failure `text` carries a short diagnostic suitable for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    /// Capability output, or the diagnostic on failure.
    pub text: String,
    /// Set when the call did not succeed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl InvocationResponse {
    /// A successful response.
    #[must_use]
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: None,
        }
    }

    /// A failed response.
    #[must_use]
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            error: Some(kind),
        }
    }

    /// Whether the call succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_agent(key: &str, raw: &serde_json::Value) -> Result<CapabilityDescriptor, String> {
        CapabilityDescriptor::from_registry_entry(CapabilityKind::Agent, key, raw)
    }

    #[test]
    fn parses_registry_aliases() {
        let raw = json!({
            "name": "Alpha",
            "repo_url": "https://github.com/acme/mcp-store",
            "folder_path": "servers/alpha",
            "dependency_manifest": "requirements.txt",
            "entry": {"kind": "out-of-process", "entry_point": "main.py", "command": "python3"},
            "enable_by_default": true
        });
        let d = parse_agent("alpha", &raw).unwrap();
        assert_eq!(d.id.as_str(), "alpha");
        assert_eq!(d.source_repo_url, "https://github.com/acme/mcp-store");
        assert_eq!(d.subtree_path, "servers/alpha");
        assert_eq!(d.dependency_manifest(), Some("requirements.txt"));
        assert_eq!(d.entry.class_or_command, "python3");
        assert!(d.enable_by_default);
    }

    #[test]
    fn legacy_module_class_becomes_in_process_entry() {
        let raw = json!({
            "repo_url": "https://github.com/acme/agent-store",
            "folder_path": "agents/adminotaur",
            "module_path": "adminotaur/adminotaur.wasm",
            "class_name": "chat"
        });
        let d = parse_agent("adminotaur", &raw).unwrap();
        assert_eq!(d.entry.kind, EntryKind::InProcess);
        assert_eq!(d.entry.entry_point, "adminotaur.wasm");
        assert_eq!(d.entry.class_or_command, "chat");
    }

    #[test]
    fn entry_without_entry_is_rejected() {
        let raw = json!({"repo_url": "https://github.com/a/b", "folder_path": "x"});
        let err = parse_agent("demo", &raw).unwrap_err();
        assert!(err.contains("missing entry"));
    }

    #[test]
    fn entryless_server_and_app_discover_their_script() {
        let raw = json!({
            "repo_url": "https://github.com/acme/mcp-store",
            "folder_path": "servers/web-search",
            "enable_by_default": true
        });
        let server =
            CapabilityDescriptor::from_registry_entry(CapabilityKind::ToolServer, "web-search", &raw)
                .unwrap();
        assert_eq!(server.entry.kind, EntryKind::OutOfProcess);
        assert_eq!(server.entry.class_or_command, "python");
        assert_eq!(
            server.entry.script_candidates,
            ["web-search.py", "main.py", "web.py", "server.py", "app.py"]
        );

        let app =
            CapabilityDescriptor::from_registry_entry(CapabilityKind::Application, "notes", &raw)
                .unwrap();
        assert_eq!(
            app.entry.script_candidates,
            ["src/main.py", "main.py", "app.py", "src/app.py"]
        );
    }

    #[test]
    fn discovery_picks_the_first_present_script() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("app.py"), "").unwrap();
        std::fs::write(dir.path().join("src/app.py"), "").unwrap();
        let spec = EntrySpec {
            kind: EntryKind::OutOfProcess,
            entry_point: String::new(),
            class_or_command: "python".into(),
            script_candidates: default_script_candidates(CapabilityKind::Application, "notes")
                .unwrap(),
        };

        let resolved = spec.resolve(dir.path()).unwrap();
        assert_eq!(
            resolved,
            ResolvedEntry::OutOfProcess {
                program: "python".into(),
                args: vec!["app.py".into()],
                working_dir: dir.path().to_path_buf(),
            }
        );
    }

    #[test]
    fn discovery_without_any_script_fails() {
        let dir = tempfile::tempdir().unwrap();
        let spec = EntrySpec {
            kind: EntryKind::OutOfProcess,
            entry_point: String::new(),
            class_or_command: "python".into(),
            script_candidates: default_script_candidates(CapabilityKind::ToolServer, "files")
                .unwrap(),
        };
        let err = spec.resolve(dir.path()).unwrap_err();
        assert!(err.contains("files.py"), "{err}");
    }

    #[test]
    fn invalid_key_is_rejected() {
        let raw = json!({
            "repo_url": "https://github.com/a/b",
            "folder_path": "x",
            "entry": {"kind": "out-of-process", "class_or_command": "true"}
        });
        assert!(parse_agent("../etc", &raw).is_err());
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let raw = json!({
            "id": "beta",
            "repo_url": "https://github.com/a/b",
            "folder_path": "x",
            "entry": {"kind": "out-of-process", "class_or_command": "true"}
        });
        assert!(parse_agent("alpha", &raw).is_err());
    }

    #[test]
    fn repository_root_subtree_is_rejected() {
        for root in ["", "/", ".", "./"] {
            assert!(normalize_subtree(root).is_err(), "{root:?} accepted");
        }
        assert!(normalize_subtree("servers/../..").is_err());
        assert_eq!(normalize_subtree("/servers//alpha/").unwrap(), "servers/alpha");
    }

    #[test]
    fn resolve_out_of_process_appends_script() {
        let spec = EntrySpec {
            kind: EntryKind::OutOfProcess,
            entry_point: "agent.py".into(),
            class_or_command: "python3 -u".into(),
            script_candidates: Vec::new(),
        };
        let resolved = spec.resolve(Path::new("/opt/hangar/store/agent/alpha")).unwrap();
        assert_eq!(
            resolved,
            ResolvedEntry::OutOfProcess {
                program: "python3".into(),
                args: vec!["-u".into(), "agent.py".into()],
                working_dir: PathBuf::from("/opt/hangar/store/agent/alpha"),
            }
        );
    }

    #[test]
    fn resolve_bare_script_runs_it_directly() {
        let spec = EntrySpec {
            kind: EntryKind::OutOfProcess,
            entry_point: "bin/run.sh".into(),
            class_or_command: String::new(),
            script_candidates: Vec::new(),
        };
        let ResolvedEntry::OutOfProcess { program, args, .. } =
            spec.resolve(Path::new("/srv/x")).unwrap()
        else {
            panic!("expected out-of-process entry");
        };
        assert_eq!(program, "/srv/x/bin/run.sh");
        assert!(args.is_empty());
    }

    #[test]
    fn resolve_rejects_escaping_module_path() {
        let spec = EntrySpec {
            kind: EntryKind::InProcess,
            entry_point: "../other/module.wasm".into(),
            class_or_command: "chat".into(),
            script_candidates: Vec::new(),
        };
        assert!(spec.resolve(Path::new("/srv/x")).is_err());
    }

    #[test]
    fn response_shape_round_trips_error_kind() {
        let r = InvocationResponse::failure(ErrorKind::CapabilityDisabled, "alpha is disabled");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["error"], "capability_disabled");
        assert!(!r.is_ok());
        let ok = serde_json::to_value(InvocationResponse::ok("hi")).unwrap();
        assert!(ok.get("error").is_none());
    }
}
