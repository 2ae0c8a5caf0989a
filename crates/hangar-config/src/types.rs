//! Configuration types for the Hangar capability store.
//!
//! Every struct implements [`Default`] with production defaults so that a
//! bare `[section]` header in TOML produces a working configuration.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory and store-wide policy.
    pub store: StoreSection,
    /// Registry locations per capability kind.
    pub registry: RegistrySection,
    /// Subtree mirroring limits.
    pub fetch: FetchSection,
    /// Dependency environment provisioning.
    pub provisioning: ProvisioningSection,
    /// Invocation timeouts and limits.
    pub invocation: InvocationSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// StoreSection
// ---------------------------------------------------------------------------

/// Store-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Absolute path of the data directory. `None` uses `$HANGAR_HOME` or
    /// `~/.hangar`.
    pub home: Option<String>,
    /// Install registry entries marked `enable_by_default` on startup.
    pub auto_install_defaults: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            home: None,
            auto_install_defaults: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RegistrySection
// ---------------------------------------------------------------------------

/// Where each kind's registry document is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Agent registry URL.
    pub agent_url: String,
    /// Tool-server registry URL.
    pub tool_server_url: String,
    /// Application registry URL.
    pub application_url: String,
    /// Network timeout for one registry fetch.
    pub timeout_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            agent_url:
                "https://raw.githubusercontent.com/decyphertek-io/agent-store/main/personality.json"
                    .to_owned(),
            tool_server_url:
                "https://raw.githubusercontent.com/decyphertek-io/mcp-store/main/skills.json"
                    .to_owned(),
            application_url:
                "https://raw.githubusercontent.com/decyphertek-io/app-store/main/app.json"
                    .to_owned(),
            timeout_secs: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// FetchSection
// ---------------------------------------------------------------------------

/// Limits for mirroring a capability subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    /// Base URL of the contents API.
    pub api_base: String,
    /// Git ref used when a descriptor does not name one.
    pub git_ref: String,
    /// Timeout for each listing or download request.
    pub timeout_secs: u64,
    /// Largest single file accepted.
    pub max_file_bytes: u64,
    /// Largest number of entries walked in one subtree.
    pub max_entries: usize,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_owned(),
            git_ref: "main".to_owned(),
            timeout_secs: 20,
            max_file_bytes: 50 * 1024 * 1024,
            max_entries: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// ProvisioningSection
// ---------------------------------------------------------------------------

/// Dependency environment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningSection {
    /// `"venv"` (Python virtual environment per capability) or `"none"`.
    pub backend: String,
    /// Interpreter used to create environments.
    pub python: String,
    /// Upper bound for each provisioning step.
    pub timeout_secs: u64,
}

impl Default for ProvisioningSection {
    fn default() -> Self {
        Self {
            backend: "venv".to_owned(),
            python: "python3".to_owned(),
            timeout_secs: 600,
        }
    }
}

// ---------------------------------------------------------------------------
// InvocationSection
// ---------------------------------------------------------------------------

/// Invocation limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationSection {
    /// Default invocation timeout.
    pub timeout_secs: u64,
    /// How much of a failed child's stderr is kept in the response.
    pub stderr_excerpt_bytes: usize,
    /// Linear memory cap for in-process modules.
    pub wasm_max_memory_mb: u64,
}

impl Default for InvocationSection {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            stderr_excerpt_bytes: 2048,
            wasm_max_memory_mb: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"` .. `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["hangar_store=debug"]`).
    pub directives: Vec<String>,
    /// Where logs go: `"stderr"`, or `"file"` for rolling files under the
    /// home's `logs/` directory.
    pub target: String,
    /// Rotation of file logs: `"daily"`, `"hourly"` or `"never"`.
    pub rotation: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
            target: "stderr".to_owned(),
            rotation: "daily".to_owned(),
        }
    }
}
